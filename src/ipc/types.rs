use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::grading::GradeScale;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub session: Option<SessionClaims>,
}

/// Decoded session cookie as forwarded by the host. Verified against `users` per request.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,
    pub role: String,
}

pub struct AppState {
    pub db_path: PathBuf,
    pub db: Connection,
    pub grading: GradeScale,
}
