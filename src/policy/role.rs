//! Roles and the acting user resolved from a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The closed set of roles a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Teacher, Role::Student, Role::Parent];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Teacher => "TEACHER",
            Role::Student => "STUDENT",
            Role::Parent => "PARENT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Role together with the profile row that role owns.
///
/// A TEACHER/PARENT/STUDENT user may exist before its profile row does, so the
/// profile id is optional. An actor without a profile owns nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    Admin,
    Teacher(Option<String>),
    Parent(Option<String>),
    Student(Option<String>),
}

/// The authenticated user a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub profile: Profile,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, profile: Profile) -> Self {
        Self {
            user_id: user_id.into(),
            profile,
        }
    }

    pub fn role(&self) -> Role {
        match self.profile {
            Profile::Admin => Role::Admin,
            Profile::Teacher(_) => Role::Teacher,
            Profile::Parent(_) => Role::Parent,
            Profile::Student(_) => Role::Student,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.profile, Profile::Admin)
    }

    pub fn teacher_id(&self) -> Option<&str> {
        match &self.profile {
            Profile::Teacher(id) => id.as_deref(),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn parent_id(&self) -> Option<&str> {
        match &self.profile {
            Profile::Parent(id) => id.as_deref(),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn student_id(&self) -> Option<&str> {
        match &self.profile {
            Profile::Student(id) => id.as_deref(),
            _ => None,
        }
    }

    /// Profile id for whichever role the actor holds.
    pub fn profile_id(&self) -> Option<&str> {
        match &self.profile {
            Profile::Admin => None,
            Profile::Teacher(id) | Profile::Parent(id) | Profile::Student(id) => id.as_deref(),
        }
    }
}
