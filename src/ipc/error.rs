use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::db;
use crate::policy::AccessDenied;

const GENERIC_FAILURE: &str = "Something went wrong";

/// Field-keyed validation messages, `_form` for errors not tied to one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut e = Self::default();
        e.add(field, message);
        e
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

/// Every way a handler can fail. Converted to a failure line, never thrown past the router.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Denied(#[from] AccessDenied),

    #[error("validation failed")]
    Validation(FieldErrors),

    #[error("{0}")]
    BadParams(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        field: &'static str,
        message: &'static str,
    },

    #[error("{0}")]
    BusinessRule(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        if let Some(columns) = db::unique_violation(&e) {
            let (field, message) = db::conflict_field(columns);
            return AppError::Conflict { field, message };
        }
        AppError::Internal(e.into())
    }
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Denied(AccessDenied::Unauthenticated) => "unauthenticated",
            AppError::Denied(AccessDenied::Forbidden(_)) => "forbidden",
            AppError::Validation(_) => "validation_failed",
            AppError::BadParams(_) => "bad_params",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict { .. } => "conflict",
            AppError::BusinessRule(_) => "business_rule",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status an API gateway should answer with.
    pub fn status(&self) -> u16 {
        match self {
            AppError::Denied(AccessDenied::Unauthenticated) => 401,
            AppError::Denied(AccessDenied::Forbidden(_)) => 403,
            AppError::Validation(_) | AppError::BadParams(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::Conflict { .. } => 409,
            AppError::BusinessRule(_) => 422,
            AppError::Internal(_) => 500,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        let code = self.code();
        let status = self.status();
        let (message, errors) = match self {
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                let m = GENERIC_FAILURE.to_string();
                (m.clone(), FieldErrors::single("_form", m))
            }
            AppError::Validation(fields) => ("validation failed".to_string(), fields),
            AppError::Conflict { field, message } => {
                (message.to_string(), FieldErrors::single(field, message))
            }
            other => {
                let m = other.to_string();
                (m.clone(), FieldErrors::single("_form", m))
            }
        };
        err(id, code, status, message, Some(&errors))
    }
}

pub fn ok(id: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "success": true,
        "data": data
    })
}

pub fn err(
    id: &str,
    code: &str,
    status: u16,
    message: impl Into<String>,
    errors: Option<&FieldErrors>,
) -> serde_json::Value {
    let mut resp = json!({
        "id": id,
        "success": false,
        "status": status,
        "error": {
            "code": code,
            "message": message.into(),
        },
    });
    if let Some(e) = errors {
        resp["errors"] = json!(e);
    }
    resp
}
