use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::users::delete_account;
use crate::db;
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{
    clean, dispatch, double_option, parse_params, require_id, required, valid_email, Handler,
};
use crate::ipc::ownership;
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, parent_scope, Actor, Operation, Resource};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParentRow {
    id: String,
    user_id: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    child_count: i64,
}

const PARENT_SELECT: &str = "SELECT
       p.id, p.user_id, p.first_name, p.last_name, u.email, p.phone,
       (SELECT COUNT(*) FROM students ch WHERE ch.parent_id = p.id)
     FROM parents p
     JOIN users u ON u.id = p.user_id";

fn parent_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ParentRow> {
    Ok(ParentRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        email: r.get(4)?,
        phone: r.get(5)?,
        child_count: r.get(6)?,
    })
}

fn load_parent(conn: &Connection, parent_id: &str) -> Result<ParentRow, AppError> {
    conn.query_row(&format!("{PARENT_SELECT} WHERE p.id = ?"), [parent_id], parent_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Parent"))
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Parent(None))?;
    let filter = parent_scope(actor).narrow();
    let mut stmt = state.db.prepare(&format!(
        "{PARENT_SELECT} WHERE {} ORDER BY p.last_name, p.first_name",
        filter.where_sql()
    ))?;
    let parents = stmt
        .query_map(params_from_iter(filter.args()), parent_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "parents": parents }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentIdParams {
    parent_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: ParentIdParams = parse_params(params)?;
    let parent_id = require_id(p.parent_id, "parentId")?;
    let owner = ownership::parent_owner(&state.db, &parent_id)?
        .ok_or_else(|| AppError::not_found("Parent"))?;
    authorize(actor, Operation::Read, Resource::Parent(Some(&owner)))?;
    Ok(json!({ "parent": load_parent(&state.db, &parent_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

fn handle_create(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::Create, Resource::Parent(None))?;
    let p: CreateParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let first_name = required(&mut errors, "firstName", "First name", p.first_name);
    let last_name = required(&mut errors, "lastName", "Last name", p.last_name);
    let email = required(&mut errors, "email", "Email", p.email);
    if !email.is_empty() && !valid_email(&email) {
        errors.add("email", "Email is invalid");
    }
    errors.into_result()?;

    let user_id = db::new_id();
    let parent_id = db::new_id();
    let tx = state.db.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users(id, email, name, role, created_at) VALUES(?, ?, ?, 'PARENT', ?)",
        (&user_id, &email, format!("{first_name} {last_name}"), db::now()),
    )?;
    tx.execute(
        "INSERT INTO parents(id, user_id, first_name, last_name, phone) VALUES(?, ?, ?, ?, ?)",
        (&parent_id, &user_id, &first_name, &last_name, clean(p.phone)),
    )?;
    tx.commit()?;
    tracing::info!(parent_id = %parent_id, user_id = %user_id, "parent registered");

    Ok(json!({ "parent": load_parent(&state.db, &parent_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    parent_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    phone: Option<Option<String>>,
}

fn handle_update(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UpdateParams = parse_params(params)?;
    let parent_id = require_id(p.parent_id, "parentId")?;
    let owner = ownership::parent_owner(&state.db, &parent_id)?
        .ok_or_else(|| AppError::not_found("Parent"))?;
    authorize(actor, Operation::Update, Resource::Parent(Some(&owner)))?;

    let current = load_parent(&state.db, &parent_id)?;
    let mut errors = FieldErrors::default();
    let first_name = match p.first_name {
        Some(v) => required(&mut errors, "firstName", "First name", Some(v)),
        None => current.first_name,
    };
    let last_name = match p.last_name {
        Some(v) => required(&mut errors, "lastName", "Last name", Some(v)),
        None => current.last_name,
    };
    let email = match p.email {
        Some(v) => {
            let e = required(&mut errors, "email", "Email", Some(v));
            if !e.is_empty() && !valid_email(&e) {
                errors.add("email", "Email is invalid");
            }
            e
        }
        None => current.email,
    };
    let phone = p.phone.map_or(current.phone, clean);
    errors.into_result()?;

    let tx = state.db.unchecked_transaction()?;
    tx.execute(
        "UPDATE parents SET first_name = ?, last_name = ?, phone = ? WHERE id = ?",
        (&first_name, &last_name, &phone, &parent_id),
    )?;
    tx.execute(
        "UPDATE users SET email = ?, name = ? WHERE id = ?",
        (&email, format!("{first_name} {last_name}"), &current.user_id),
    )?;
    tx.commit()?;
    tracing::info!(parent_id = %parent_id, "parent updated");

    Ok(json!({ "parent": load_parent(&state.db, &parent_id)? }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: ParentIdParams = parse_params(params)?;
    let parent_id = require_id(p.parent_id, "parentId")?;
    let owner = ownership::parent_owner(&state.db, &parent_id)?
        .ok_or_else(|| AppError::not_found("Parent"))?;
    authorize(actor, Operation::Delete, Resource::Parent(Some(&owner)))?;
    let current = load_parent(&state.db, &parent_id)?;

    let tx = state.db.unchecked_transaction()?;
    let detached = tx.execute(
        "UPDATE students SET parent_id = NULL WHERE parent_id = ?",
        [&parent_id],
    )?;
    tx.execute("DELETE FROM parents WHERE id = ?", [&parent_id])?;
    delete_account(&tx, &current.user_id, &actor.user_id)?;
    tx.commit()?;
    tracing::info!(parent_id = %parent_id, detached_children = detached, "parent deleted");

    Ok(json!({
        "parentId": parent_id,
        "deleted": true,
        "detachedChildren": detached,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "parents.list" => handle_list,
        "parents.get" => handle_get,
        "parents.create" => handle_create,
        "parents.update" => handle_update,
        "parents.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
