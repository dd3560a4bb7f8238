use thiserror::Error;

/// Why the policy refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    /// No session, or the session no longer matches a user.
    #[error("must be logged in")]
    Unauthenticated,

    /// Authenticated, but the role or ownership chain does not permit it.
    #[error("{0}")]
    Forbidden(String),
}

impl AccessDenied {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }
}
