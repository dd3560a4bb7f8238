use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::ipc::error::{ok, AppError, FieldErrors};
use crate::ipc::types::{AppState, Request};
use crate::ipc::ownership;
use crate::policy::{AccessDenied, Actor};

pub type Handler =
    fn(&AppState, &Actor, &serde_json::Value) -> Result<serde_json::Value, AppError>;

/// Resolves the session, runs `handler`, and folds the outcome into a response line.
pub fn dispatch(state: &AppState, req: &Request, handler: Handler) -> serde_json::Value {
    let result = ownership::resolve_actor(&state.db, req.session.as_ref()).and_then(|actor| {
        tracing::debug!(user = %actor.user_id, role = %actor.role(), "session resolved");
        handler(state, &actor, &req.params)
    });
    match result {
        Ok(data) => ok(&req.id, data),
        Err(e) => {
            match &e {
                AppError::Denied(AccessDenied::Unauthenticated) => tracing::info!("unauthenticated"),
                AppError::Denied(d) => tracing::info!(reason = %d, "denied"),
                AppError::Validation(_) | AppError::BadParams(_) | AppError::Conflict { .. } => {
                    tracing::debug!(code = e.code(), "rejected")
                }
                _ => {}
            }
            e.response(&req.id)
        }
    }
}

pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, AppError> {
    let v = if params.is_null() {
        json!({})
    } else {
        params.clone()
    };
    serde_json::from_value(v).map_err(|e| AppError::BadParams(format!("invalid params: {e}")))
}

/// Trims, and treats blank as absent.
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required(errors: &mut FieldErrors, field: &str, label: &str, value: Option<String>) -> String {
    match clean(value) {
        Some(v) => v,
        None => {
            errors.add(field, format!("{label} is required"));
            String::new()
        }
    }
}

/// For the id that names the record a call targets.
pub fn require_id(value: Option<String>, field: &str) -> Result<String, AppError> {
    clean(value).ok_or_else(|| AppError::Validation(FieldErrors::single(field, format!("{field} is required"))))
}

pub fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !email.chars().any(char::is_whitespace)
}

pub fn parse_date(errors: &mut FieldErrors, field: &str, raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            errors.add(field, "Date must be YYYY-MM-DD");
            None
        }
    }
}

/// RFC 3339 timestamp, normalised to UTC.
pub fn parse_timestamp(errors: &mut FieldErrors, field: &str, raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            errors.add(field, "Must be an RFC 3339 timestamp");
            None
        }
    }
}

/// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}
