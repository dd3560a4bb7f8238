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
use crate::policy::{authorize, student_scope, Actor, Operation, Resource, ScopedFilter, StudentFilter};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentRow {
    id: String,
    admission_no: String,
    first_name: String,
    last_name: String,
    class_id: String,
    class_name: Option<String>,
    parent_id: Option<String>,
    user_id: Option<String>,
    email: Option<String>,
}

const STUDENT_SELECT: &str = "SELECT
       s.id, s.admission_no, s.first_name, s.last_name,
       s.class_id, c.name, s.parent_id, s.user_id, u.email
     FROM students s
     LEFT JOIN classes c ON c.id = s.class_id
     LEFT JOIN users u ON u.id = s.user_id";

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        admission_no: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        class_id: r.get(4)?,
        class_name: r.get(5)?,
        parent_id: r.get(6)?,
        user_id: r.get(7)?,
        email: r.get(8)?,
    })
}

fn load_student(conn: &Connection, student_id: &str) -> Result<StudentRow, AppError> {
    conn.query_row(&format!("{STUDENT_SELECT} WHERE s.id = ?"), [student_id], student_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Student"))
}

fn query_students(conn: &Connection, filter: &ScopedFilter) -> Result<Vec<StudentRow>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "{STUDENT_SELECT} WHERE {} ORDER BY s.last_name, s.first_name",
        filter.where_sql()
    ))?;
    let rows = stmt
        .query_map(params_from_iter(filter.args()), student_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

fn check_class(conn: &Connection, errors: &mut FieldErrors, class_id: &str) -> Result<(), AppError> {
    if !class_id.is_empty() && !exists(conn, "SELECT 1 FROM classes WHERE id = ?", class_id)? {
        errors.add("classId", "Class not found");
    }
    Ok(())
}

fn check_parent(conn: &Connection, errors: &mut FieldErrors, parent_id: Option<&str>) -> Result<(), AppError> {
    if let Some(p) = parent_id {
        if !exists(conn, "SELECT 1 FROM parents WHERE id = ?", p)? {
            errors.add("parentId", "Parent not found");
        }
    }
    Ok(())
}

/// Makes `%`, `_` and `\` in user text match literally under `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    class_id: Option<String>,
    parent_id: Option<String>,
    student_id: Option<String>,
    search: Option<String>,
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Student(None))?;
    let p: ListParams = parse_params(params)?;
    let mut filter = StudentFilter {
        class_id: clean(p.class_id),
        parent_id: clean(p.parent_id),
        student_id: clean(p.student_id),
    }
    .narrow(&student_scope(actor));
    if let Some(q) = clean(p.search) {
        filter = filter.and(
            "(s.first_name || ' ' || s.last_name || ' ' || s.admission_no) LIKE ? ESCAPE '\\'",
            format!("%{}%", escape_like(&q)),
        );
    }
    let students = query_students(&state.db, &filter)?;
    Ok(json!({ "students": students }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentIdParams {
    student_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: StudentIdParams = parse_params(params)?;
    let student_id = require_id(p.student_id, "studentId")?;
    let owner = ownership::student_owner(&state.db, &student_id)?
        .ok_or_else(|| AppError::not_found("Student"))?;
    authorize(actor, Operation::Read, Resource::Student(Some(&owner)))?;
    Ok(json!({ "student": load_student(&state.db, &student_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    first_name: Option<String>,
    last_name: Option<String>,
    admission_no: Option<String>,
    class_id: Option<String>,
    parent_id: Option<String>,
    email: Option<String>,
}

fn handle_create(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::Create, Resource::Student(None))?;
    let p: CreateParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let first_name = required(&mut errors, "firstName", "First name", p.first_name);
    let last_name = required(&mut errors, "lastName", "Last name", p.last_name);
    let admission_no = required(&mut errors, "admissionNo", "Admission number", p.admission_no);
    let class_id = required(&mut errors, "classId", "Class", p.class_id);
    let parent_id = clean(p.parent_id);
    let email = clean(p.email);
    if email.as_deref().is_some_and(|e| !valid_email(e)) {
        errors.add("email", "Email is invalid");
    }
    check_class(&state.db, &mut errors, &class_id)?;
    check_parent(&state.db, &mut errors, parent_id.as_deref())?;
    errors.into_result()?;

    let student_id = db::new_id();
    let now = db::now();
    let tx = state.db.unchecked_transaction()?;
    let user_id = match &email {
        Some(e) => {
            let uid = db::new_id();
            tx.execute(
                "INSERT INTO users(id, email, name, role, created_at) VALUES(?, ?, ?, 'STUDENT', ?)",
                (&uid, e, format!("{first_name} {last_name}"), &now),
            )?;
            Some(uid)
        }
        None => None,
    };
    tx.execute(
        "INSERT INTO students(id, user_id, admission_no, first_name, last_name, class_id, parent_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &user_id,
            &admission_no,
            &first_name,
            &last_name,
            &class_id,
            &parent_id,
            &now,
        ),
    )?;
    tx.commit()?;
    tracing::info!(student_id = %student_id, class_id = %class_id, "student registered");

    Ok(json!({ "student": load_student(&state.db, &student_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    student_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    admission_no: Option<String>,
    class_id: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    parent_id: Option<Option<String>>,
}

fn handle_update(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UpdateParams = parse_params(params)?;
    let student_id = require_id(p.student_id, "studentId")?;
    let owner = ownership::student_owner(&state.db, &student_id)?
        .ok_or_else(|| AppError::not_found("Student"))?;
    authorize(actor, Operation::Update, Resource::Student(Some(&owner)))?;

    let current = load_student(&state.db, &student_id)?;
    let mut errors = FieldErrors::default();
    let mut keep_or_require = |field: &str, label: &str, value: Option<String>, current: String| match value {
        Some(v) => required(&mut errors, field, label, Some(v)),
        None => current,
    };
    let first_name = keep_or_require("firstName", "First name", p.first_name, current.first_name);
    let last_name = keep_or_require("lastName", "Last name", p.last_name, current.last_name);
    let admission_no = keep_or_require("admissionNo", "Admission number", p.admission_no, current.admission_no);
    let class_id = keep_or_require("classId", "Class", p.class_id, current.class_id);
    let parent_id = match p.parent_id {
        Some(v) => clean(v),
        None => current.parent_id,
    };
    check_class(&state.db, &mut errors, &class_id)?;
    check_parent(&state.db, &mut errors, parent_id.as_deref())?;
    errors.into_result()?;

    state.db.execute(
        "UPDATE students
         SET first_name = ?, last_name = ?, admission_no = ?, class_id = ?, parent_id = ?
         WHERE id = ?",
        (&first_name, &last_name, &admission_no, &class_id, &parent_id, &student_id),
    )?;
    tracing::info!(student_id = %student_id, class_id = %class_id, parent_id = ?parent_id, "student updated");

    Ok(json!({ "student": load_student(&state.db, &student_id)? }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: StudentIdParams = parse_params(params)?;
    let student_id = require_id(p.student_id, "studentId")?;
    let owner = ownership::student_owner(&state.db, &student_id)?
        .ok_or_else(|| AppError::not_found("Student"))?;
    authorize(actor, Operation::Delete, Resource::Student(Some(&owner)))?;

    let user_id: Option<String> = state.db.query_row(
        "SELECT user_id FROM students WHERE id = ?",
        [&student_id],
        |r| r.get(0),
    )?;

    let tx = state.db.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [&student_id])?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])?;
    if let Some(uid) = &user_id {
        delete_account(&tx, uid, &actor.user_id)?;
    }
    tx.commit()?;
    tracing::info!(student_id = %student_id, "student deleted");

    Ok(json!({ "studentId": student_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "students.list" => handle_list,
        "students.get" => handle_get,
        "students.create" => handle_create,
        "students.update" => handle_update,
        "students.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
