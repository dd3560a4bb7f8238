use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{clean, dispatch, parse_params, require_id, Handler};
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Actor, Operation, Resource, Role};

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Removes a login and the rows that only make sense with it.
///
/// Events the user organised and attendance they recorded are handed to
/// `successor` so those records survive.
pub(super) fn delete_account(conn: &Connection, user_id: &str, successor: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE events SET organizer_id = ? WHERE organizer_id = ?",
        (successor, user_id),
    )?;
    conn.execute(
        "UPDATE attendance SET recorded_by = ? WHERE recorded_by = ?",
        (successor, user_id),
    )?;
    conn.execute("DELETE FROM event_registrations WHERE user_id = ?", [user_id])?;
    conn.execute(
        "DELETE FROM messages WHERE sender_id = ? OR receiver_id = ?",
        (user_id, user_id),
    )?;
    conn.execute("DELETE FROM users WHERE id = ?", [user_id])?;
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRow {
    id: String,
    email: String,
    name: String,
    role: String,
    created_at: String,
}

fn user_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: r.get(0)?,
        email: r.get(1)?,
        name: r.get(2)?,
        role: r.get(3)?,
        created_at: r.get(4)?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    page: Option<u32>,
    page_size: Option<u32>,
    role: Option<String>,
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::User(None))?;
    let p: ListParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let page = p.page.unwrap_or(1);
    if page == 0 {
        errors.add("page", "Page starts at 1");
    }
    let page_size = p.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        errors.add("pageSize", format!("Page size must be between 1 and {MAX_PAGE_SIZE}"));
    }
    let role = match clean(p.role) {
        Some(r) => match r.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                errors.add("role", e.to_string());
                None
            }
        },
        None => None,
    };
    errors.into_result()?;

    let (where_sql, args): (&str, Vec<String>) = match role {
        Some(r) => ("role = ?", vec![r.as_str().to_string()]),
        None => ("1 = 1", Vec::new()),
    };
    let total: i64 = state.db.query_row(
        &format!("SELECT COUNT(*) FROM users WHERE {where_sql}"),
        params_from_iter(&args),
        |r| r.get(0),
    )?;

    let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
    let mut stmt = state.db.prepare(&format!(
        "SELECT id, email, name, role, created_at FROM users
         WHERE {where_sql}
         ORDER BY created_at DESC, id
         LIMIT {page_size} OFFSET {offset}"
    ))?;
    let users = stmt
        .query_map(params_from_iter(&args), user_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "users": users,
        "total": total,
        "page": page,
        "pageSize": page_size,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdParams {
    user_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UserIdParams = parse_params(params)?;
    let user_id = require_id(p.user_id, "userId")?;
    authorize(actor, Operation::Read, Resource::User(Some(&user_id)))?;
    let user = state
        .db
        .query_row(
            "SELECT id, email, name, role, created_at FROM users WHERE id = ?",
            [&user_id],
            user_row,
        )
        .optional()?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(json!({ "user": user }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UserIdParams = parse_params(params)?;
    let user_id = require_id(p.user_id, "userId")?;
    authorize(actor, Operation::Delete, Resource::User(Some(&user_id)))?;

    let role: String = state
        .db
        .query_row("SELECT role FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| AppError::not_found("User"))?;

    let has_profile: bool = state.db.query_row(
        "SELECT EXISTS(SELECT 1 FROM teachers WHERE user_id = ?1)
             OR EXISTS(SELECT 1 FROM parents WHERE user_id = ?1)
             OR EXISTS(SELECT 1 FROM students WHERE user_id = ?1)",
        [&user_id],
        |r| r.get(0),
    )?;
    if has_profile {
        return Err(AppError::BusinessRule(format!(
            "This {} account has a profile; delete the profile instead",
            role.to_ascii_lowercase()
        )));
    }

    let tx = state.db.unchecked_transaction()?;
    delete_account(&tx, &user_id, &actor.user_id)?;
    tx.commit()?;
    tracing::info!(user_id = %user_id, "user deleted");

    Ok(json!({ "userId": user_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "users.list" => handle_list,
        "users.get" => handle_get,
        "users.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
