use crate::ipc::error::{ok, AppError};
use crate::ipc::helpers::dispatch;
use crate::ipc::types::{AppState, Request};
use crate::policy::Actor;
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": state.db_path.to_string_lossy()
        }),
    )
}

fn handle_whoami(
    _state: &AppState,
    actor: &Actor,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    Ok(json!({
        "userId": actor.user_id,
        "role": actor.role(),
        "profileId": actor.profile_id(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "session.whoami" => Some(dispatch(state, req, handle_whoami)),
        _ => None,
    }
}
