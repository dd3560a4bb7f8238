use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::grading::{score_in_range, MAX_SCORE, MIN_SCORE};
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{clean, dispatch, double_option, parse_params, require_id, required, Handler};
use crate::ipc::ownership;
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, student_scope, Actor, Operation, Resource, StudentFilter};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GradeRow {
    id: String,
    student_id: String,
    student_name: String,
    teacher_id: Option<String>,
    subject: String,
    score: f64,
    grade: String,
    term: Option<String>,
    remarks: Option<String>,
    created_at: String,
    updated_at: Option<String>,
}

const GRADE_SELECT: &str = "SELECT
       g.id, g.student_id, s.first_name || ' ' || s.last_name, g.teacher_id,
       g.subject, g.score, g.grade, g.term, g.remarks, g.created_at, g.updated_at
     FROM grades g
     JOIN students s ON s.id = g.student_id
     LEFT JOIN classes c ON c.id = s.class_id";

fn grade_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        teacher_id: r.get(3)?,
        subject: r.get(4)?,
        score: r.get(5)?,
        grade: r.get(6)?,
        term: r.get(7)?,
        remarks: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn load_grade(conn: &Connection, grade_id: &str) -> Result<GradeRow, AppError> {
    conn.query_row(&format!("{GRADE_SELECT} WHERE g.id = ?"), [grade_id], grade_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Grade"))
}

fn check_score(errors: &mut FieldErrors, score: Option<f64>) -> f64 {
    match score {
        Some(s) if score_in_range(s) => s,
        Some(_) => {
            errors.add("score", format!("Score must be between {MIN_SCORE} and {MAX_SCORE}"));
            0.0
        }
        None => {
            errors.add("score", "Score is required");
            0.0
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    student_id: Option<String>,
    subject: Option<String>,
    score: Option<f64>,
    term: Option<String>,
    remarks: Option<String>,
}

fn handle_create(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: CreateParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let student_id = required(&mut errors, "studentId", "Student", p.student_id);
    let subject = required(&mut errors, "subject", "Subject", p.subject);
    let score = check_score(&mut errors, p.score);
    errors.into_result()?;

    // A missing student and someone else's student are indistinguishable to the caller.
    let owner = ownership::student_owner(&state.db, &student_id)?;
    authorize(actor, Operation::Create, Resource::Grade(owner.as_ref()))?;

    let grade_id = db::new_id();
    let label = state.grading.label(score);
    state.db.execute(
        "INSERT INTO grades(id, student_id, teacher_id, subject, score, grade, term, remarks, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &student_id,
            actor.teacher_id(),
            &subject,
            score,
            label,
            clean(p.term),
            clean(p.remarks),
            db::now(),
        ),
    )?;
    tracing::info!(grade_id = %grade_id, student_id = %student_id, score, grade = label, "grade recorded");

    Ok(json!({ "grade": load_grade(&state.db, &grade_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeIdParams {
    grade_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: GradeIdParams = parse_params(params)?;
    let grade_id = require_id(p.grade_id, "gradeId")?;
    let owner = ownership::grade_owner(&state.db, &grade_id)?.ok_or_else(|| AppError::not_found("Grade"))?;
    authorize(actor, Operation::Read, Resource::Grade(Some(&owner)))?;
    Ok(json!({ "grade": load_grade(&state.db, &grade_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    grade_id: Option<String>,
    subject: Option<String>,
    score: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    term: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    remarks: Option<Option<String>>,
}

fn handle_update(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UpdateParams = parse_params(params)?;
    let grade_id = require_id(p.grade_id, "gradeId")?;
    let owner = ownership::grade_owner(&state.db, &grade_id)?.ok_or_else(|| AppError::not_found("Grade"))?;
    authorize(actor, Operation::Update, Resource::Grade(Some(&owner)))?;

    let current = load_grade(&state.db, &grade_id)?;
    let mut errors = FieldErrors::default();
    let subject = match p.subject {
        Some(v) => required(&mut errors, "subject", "Subject", Some(v)),
        None => current.subject,
    };
    let score = match p.score {
        Some(s) => check_score(&mut errors, Some(s)),
        None => current.score,
    };
    let term = p.term.map_or(current.term, clean);
    let remarks = p.remarks.map_or(current.remarks, clean);
    errors.into_result()?;

    let label = state.grading.label(score);
    state.db.execute(
        "UPDATE grades
         SET subject = ?, score = ?, grade = ?, term = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        (&subject, score, label, &term, &remarks, db::now(), &grade_id),
    )?;
    tracing::info!(grade_id = %grade_id, score, grade = label, "grade updated");

    Ok(json!({ "grade": load_grade(&state.db, &grade_id)? }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: GradeIdParams = parse_params(params)?;
    let grade_id = require_id(p.grade_id, "gradeId")?;
    let owner = ownership::grade_owner(&state.db, &grade_id)?.ok_or_else(|| AppError::not_found("Grade"))?;
    authorize(actor, Operation::Delete, Resource::Grade(Some(&owner)))?;

    state.db.execute("DELETE FROM grades WHERE id = ?", [&grade_id])?;
    tracing::info!(grade_id = %grade_id, "grade deleted");
    Ok(json!({ "gradeId": grade_id, "deleted": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    student_id: Option<String>,
    class_id: Option<String>,
    subject: Option<String>,
    term: Option<String>,
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Grade(None))?;
    let p: ListParams = parse_params(params)?;
    let mut filter = StudentFilter {
        class_id: clean(p.class_id),
        parent_id: None,
        student_id: clean(p.student_id),
    }
    .narrow(&student_scope(actor));
    if let Some(subject) = clean(p.subject) {
        filter = filter.and("g.subject = ?", subject);
    }
    if let Some(term) = clean(p.term) {
        filter = filter.and("g.term = ?", term);
    }

    let mut stmt = state.db.prepare(&format!(
        "{GRADE_SELECT} WHERE {} ORDER BY g.created_at DESC, g.id",
        filter.where_sql()
    ))?;
    let grades = stmt
        .query_map(params_from_iter(filter.args()), grade_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "grades": grades }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "grades.create" => handle_create,
        "grades.get" => handle_get,
        "grades.update" => handle_update,
        "grades.delete" => handle_delete,
        "grades.list" => handle_list,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
