use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{clean, dispatch, double_option, parse_params, require_id, required, Handler};
use crate::ipc::ownership;
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, class_scope, Actor, ClassFilter, Operation, Resource, ScopedFilter};

/// Canonical class level. Free-text variants are normalised on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassLevel {
    OLevel,
    ALevel,
}

impl ClassLevel {
    fn parse(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match norm.as_str() {
            "O_LEVEL" | "OLEVEL" | "O" => Some(ClassLevel::OLevel),
            "A_LEVEL" | "ALEVEL" | "A" => Some(ClassLevel::ALevel),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ClassLevel::OLevel => "O_LEVEL",
            ClassLevel::ALevel => "A_LEVEL",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeacherRef {
    id: String,
    first_name: String,
    last_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassRow {
    id: String,
    name: String,
    level: Option<String>,
    teacher_id: Option<String>,
    teacher: Option<TeacherRef>,
    student_count: i64,
}

const CLASS_SELECT: &str = "SELECT
       c.id,
       c.name,
       c.level,
       c.teacher_id,
       t.first_name,
       t.last_name,
       (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
     FROM classes c
     LEFT JOIN teachers t ON t.id = c.teacher_id";

fn class_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRow> {
    let teacher_id: Option<String> = r.get(3)?;
    let first: Option<String> = r.get(4)?;
    let last: Option<String> = r.get(5)?;
    let teacher = match (&teacher_id, first, last) {
        (Some(id), Some(first_name), Some(last_name)) => Some(TeacherRef {
            id: id.clone(),
            first_name,
            last_name,
        }),
        _ => None,
    };
    Ok(ClassRow {
        id: r.get(0)?,
        name: r.get(1)?,
        level: r.get(2)?,
        teacher_id,
        teacher,
        student_count: r.get(6)?,
    })
}

fn load_class(conn: &Connection, class_id: &str) -> Result<ClassRow, AppError> {
    conn.query_row(&format!("{CLASS_SELECT} WHERE c.id = ?"), [class_id], class_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Class"))
}

fn query_classes(conn: &Connection, filter: &ScopedFilter) -> Result<Vec<ClassRow>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "{CLASS_SELECT} WHERE {} ORDER BY c.name",
        filter.where_sql()
    ))?;
    let rows = stmt
        .query_map(params_from_iter(filter.args()), class_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

fn check_level(errors: &mut FieldErrors, raw: Option<String>) -> Option<&'static str> {
    let raw = clean(raw)?;
    match ClassLevel::parse(&raw) {
        Some(l) => Some(l.as_str()),
        None => {
            errors.add("level", "Level must be O_LEVEL or A_LEVEL");
            None
        }
    }
}

fn check_teacher(
    conn: &Connection,
    errors: &mut FieldErrors,
    teacher_id: Option<String>,
) -> Result<Option<String>, AppError> {
    let Some(t) = clean(teacher_id) else {
        return Ok(None);
    };
    if !teacher_exists(conn, &t)? {
        errors.add("teacherId", "Teacher not found");
    }
    Ok(Some(t))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    teacher_id: Option<String>,
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Class(None))?;
    let p: ListParams = parse_params(params)?;
    let filter = ClassFilter {
        teacher_id: clean(p.teacher_id),
    }
    .narrow(&class_scope(actor));
    let classes = query_classes(&state.db, &filter)?;
    Ok(json!({ "classes": classes }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassIdParams {
    class_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: ClassIdParams = parse_params(params)?;
    let class_id = require_id(p.class_id, "classId")?;
    let owner = ownership::class_owner(&state.db, &class_id)?.ok_or_else(|| AppError::not_found("Class"))?;
    authorize(actor, Operation::Read, Resource::Class(Some(&owner)))?;
    Ok(json!({ "class": load_class(&state.db, &class_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    name: Option<String>,
    level: Option<String>,
    teacher_id: Option<String>,
}

fn handle_create(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::Create, Resource::Class(None))?;
    let p: CreateParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let name = required(&mut errors, "name", "Class name", p.name);
    let level = check_level(&mut errors, p.level);
    let teacher_id = check_teacher(&state.db, &mut errors, p.teacher_id)?;
    errors.into_result()?;

    let class_id = db::new_id();
    state.db.execute(
        "INSERT INTO classes(id, name, level, teacher_id, created_at) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &name, level, &teacher_id, db::now()),
    )?;
    tracing::info!(class_id = %class_id, name = %name, "class created");

    Ok(json!({ "class": load_class(&state.db, &class_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    class_id: Option<String>,
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    level: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    teacher_id: Option<Option<String>>,
}

fn handle_update(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UpdateParams = parse_params(params)?;
    let class_id = require_id(p.class_id, "classId")?;
    let owner = ownership::class_owner(&state.db, &class_id)?.ok_or_else(|| AppError::not_found("Class"))?;
    authorize(actor, Operation::Update, Resource::Class(Some(&owner)))?;

    let current = load_class(&state.db, &class_id)?;
    let mut errors = FieldErrors::default();
    let name = match p.name {
        Some(n) => required(&mut errors, "name", "Class name", Some(n)),
        None => current.name,
    };
    let level = match p.level {
        Some(raw) => check_level(&mut errors, raw).map(str::to_string),
        None => current.level,
    };
    let teacher_id = match p.teacher_id {
        Some(raw) => check_teacher(&state.db, &mut errors, raw)?,
        None => current.teacher_id,
    };
    errors.into_result()?;

    state.db.execute(
        "UPDATE classes SET name = ?, level = ?, teacher_id = ? WHERE id = ?",
        (&name, &level, &teacher_id, &class_id),
    )?;
    tracing::info!(class_id = %class_id, teacher_id = ?teacher_id, "class updated");

    Ok(json!({ "class": load_class(&state.db, &class_id)? }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: ClassIdParams = parse_params(params)?;
    let class_id = require_id(p.class_id, "classId")?;
    let owner = ownership::class_owner(&state.db, &class_id)?.ok_or_else(|| AppError::not_found("Class"))?;
    authorize(actor, Operation::Delete, Resource::Class(Some(&owner)))?;

    let tx = state.db.unchecked_transaction()?;
    let students: i64 = tx.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    )?;
    if students > 0 {
        return Err(AppError::BusinessRule(format!(
            "Cannot delete class with {students} enrolled student(s)"
        )));
    }
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])?;
    tx.commit()?;
    tracing::info!(class_id = %class_id, "class deleted");

    Ok(json!({ "classId": class_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "classes.list" => handle_list,
        "classes.get" => handle_get,
        "classes.create" => handle_create,
        "classes.update" => handle_update,
        "classes.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_inputs_normalise() {
        assert_eq!(ClassLevel::parse("O LEVEL"), Some(ClassLevel::OLevel));
        assert_eq!(ClassLevel::parse("o-level"), Some(ClassLevel::OLevel));
        assert_eq!(ClassLevel::parse("A_LEVEL"), Some(ClassLevel::ALevel));
        assert_eq!(ClassLevel::parse("10"), None);
    }

    #[test]
    fn blank_level_is_absent_not_invalid() {
        let mut errors = FieldErrors::default();
        assert_eq!(check_level(&mut errors, Some("  ".into())), None);
        assert!(errors.is_empty());
        assert_eq!(check_level(&mut errors, Some("Form 4".into())), None);
        assert!(!errors.is_empty());
    }
}
