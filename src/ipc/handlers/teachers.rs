use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::users::delete_account;
use crate::db;
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{
    clean, dispatch, double_option, parse_params, require_id, required, valid_email, Handler,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Actor, Operation, Resource};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeacherRow {
    id: String,
    user_id: String,
    first_name: String,
    last_name: String,
    email: String,
    subject: Option<String>,
    phone: Option<String>,
    class_count: i64,
}

const TEACHER_SELECT: &str = "SELECT
       t.id, t.user_id, t.first_name, t.last_name, u.email, t.subject, t.phone,
       (SELECT COUNT(*) FROM classes c WHERE c.teacher_id = t.id)
     FROM teachers t
     JOIN users u ON u.id = t.user_id";

fn teacher_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TeacherRow> {
    Ok(TeacherRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        email: r.get(4)?,
        subject: r.get(5)?,
        phone: r.get(6)?,
        class_count: r.get(7)?,
    })
}

fn load_teacher(conn: &Connection, teacher_id: &str) -> Result<Option<TeacherRow>, AppError> {
    Ok(conn
        .query_row(&format!("{TEACHER_SELECT} WHERE t.id = ?"), [teacher_id], teacher_row)
        .optional()?)
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Teacher)?;
    let mut stmt = state
        .db
        .prepare(&format!("{TEACHER_SELECT} ORDER BY t.last_name, t.first_name"))?;
    let teachers = stmt
        .query_map([], teacher_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teachers": teachers }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherIdParams {
    teacher_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: TeacherIdParams = parse_params(params)?;
    let teacher_id = require_id(p.teacher_id, "teacherId")?;
    authorize(actor, Operation::Read, Resource::Teacher)?;
    let teacher = load_teacher(&state.db, &teacher_id)?.ok_or_else(|| AppError::not_found("Teacher"))?;
    Ok(json!({ "teacher": teacher }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    subject: Option<String>,
    phone: Option<String>,
}

fn handle_create(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::Create, Resource::Teacher)?;
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
    let teacher_id = db::new_id();
    let tx = state.db.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users(id, email, name, role, created_at) VALUES(?, ?, ?, 'TEACHER', ?)",
        (&user_id, &email, format!("{first_name} {last_name}"), db::now()),
    )?;
    tx.execute(
        "INSERT INTO teachers(id, user_id, first_name, last_name, subject, phone)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &user_id,
            &first_name,
            &last_name,
            clean(p.subject),
            clean(p.phone),
        ),
    )?;
    tx.commit()?;
    tracing::info!(teacher_id = %teacher_id, user_id = %user_id, "teacher registered");

    Ok(json!({ "teacher": load_teacher(&state.db, &teacher_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    teacher_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    subject: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    phone: Option<Option<String>>,
}

fn handle_update(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UpdateParams = parse_params(params)?;
    let teacher_id = require_id(p.teacher_id, "teacherId")?;
    authorize(actor, Operation::Update, Resource::Teacher)?;
    let current = load_teacher(&state.db, &teacher_id)?.ok_or_else(|| AppError::not_found("Teacher"))?;

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
    let subject = p.subject.map_or(current.subject, clean);
    let phone = p.phone.map_or(current.phone, clean);
    errors.into_result()?;

    let tx = state.db.unchecked_transaction()?;
    tx.execute(
        "UPDATE teachers SET first_name = ?, last_name = ?, subject = ?, phone = ? WHERE id = ?",
        (&first_name, &last_name, &subject, &phone, &teacher_id),
    )?;
    tx.execute(
        "UPDATE users SET email = ?, name = ? WHERE id = ?",
        (&email, format!("{first_name} {last_name}"), &current.user_id),
    )?;
    tx.commit()?;
    tracing::info!(teacher_id = %teacher_id, "teacher updated");

    Ok(json!({ "teacher": load_teacher(&state.db, &teacher_id)? }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: TeacherIdParams = parse_params(params)?;
    let teacher_id = require_id(p.teacher_id, "teacherId")?;
    authorize(actor, Operation::Delete, Resource::Teacher)?;
    let current = load_teacher(&state.db, &teacher_id)?.ok_or_else(|| AppError::not_found("Teacher"))?;

    let tx = state.db.unchecked_transaction()?;
    let unassigned = tx.execute(
        "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    )?;
    tx.execute(
        "UPDATE grades SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    )?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])?;
    delete_account(&tx, &current.user_id, &actor.user_id)?;
    tx.commit()?;
    tracing::info!(teacher_id = %teacher_id, unassigned_classes = unassigned, "teacher deleted");

    Ok(json!({
        "teacherId": teacher_id,
        "deleted": true,
        "unassignedClasses": unassigned,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "teachers.list" => handle_list,
        "teachers.get" => handle_get,
        "teachers.create" => handle_create,
        "teachers.update" => handle_update,
        "teachers.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
