use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{clean, dispatch, parse_date, parse_params, require_id, required, Handler};
use crate::ipc::ownership;
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, student_scope, Actor, Operation, Resource, StudentFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Some(Self::Present),
            "ABSENT" => Some(Self::Absent),
            "LATE" => Some(Self::Late),
            "EXCUSED" => Some(Self::Excused),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
            Self::Late => "LATE",
            Self::Excused => "EXCUSED",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceRow {
    id: String,
    student_id: String,
    student_name: String,
    class_id: String,
    date: String,
    status: String,
    recorded_by: String,
    updated_at: String,
}

const ATTENDANCE_SELECT: &str = "SELECT
       a.id, a.student_id, s.first_name || ' ' || s.last_name, s.class_id,
       a.date, a.status, a.recorded_by, a.updated_at
     FROM attendance a
     JOIN students s ON s.id = a.student_id
     LEFT JOIN classes c ON c.id = s.class_id";

fn attendance_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        class_id: r.get(3)?,
        date: r.get(4)?,
        status: r.get(5)?,
        recorded_by: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

fn load_by_student_date(conn: &Connection, student_id: &str, date: &str) -> Result<AttendanceRow, AppError> {
    conn.query_row(
        &format!("{ATTENDANCE_SELECT} WHERE a.student_id = ? AND a.date = ?"),
        [student_id, date],
        attendance_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Attendance record"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkParams {
    student_id: Option<String>,
    date: Option<String>,
    status: Option<String>,
}

/// Upserts the record for `(studentId, date)`; a second mark overwrites the first.
fn handle_mark(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: MarkParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let student_id = required(&mut errors, "studentId", "Student", p.student_id);
    let raw_date = required(&mut errors, "date", "Date", p.date);
    let date = if raw_date.is_empty() {
        None
    } else {
        parse_date(&mut errors, "date", &raw_date)
    };
    let raw_status = required(&mut errors, "status", "Status", p.status);
    let status = if raw_status.is_empty() {
        None
    } else {
        let s = AttendanceStatus::parse(&raw_status);
        if s.is_none() {
            errors.add("status", "Status must be PRESENT, ABSENT, LATE or EXCUSED");
        }
        s
    };
    errors.into_result()?;
    let (Some(date), Some(status)) = (date, status) else {
        return Err(AppError::BadParams("invalid attendance".into()));
    };

    let owner = ownership::student_owner(&state.db, &student_id)?;
    authorize(actor, Operation::Create, Resource::Attendance(owner.as_ref()))?;
    if owner.is_none() {
        return Err(AppError::not_found("Student"));
    }

    let date = date.format("%Y-%m-%d").to_string();
    let tx = state.db.unchecked_transaction()?;
    let existed = tx
        .query_row(
            "SELECT 1 FROM attendance WHERE student_id = ? AND date = ?",
            [&student_id, &date],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    tx.execute(
        "INSERT INTO attendance(id, student_id, date, status, recorded_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           recorded_by = excluded.recorded_by,
           updated_at = excluded.updated_at",
        (
            db::new_id(),
            &student_id,
            &date,
            status.as_str(),
            &actor.user_id,
            db::now(),
        ),
    )?;
    tx.commit()?;
    tracing::info!(student_id = %student_id, date = %date, status = status.as_str(), created = !existed, "attendance marked");

    Ok(json!({
        "attendance": load_by_student_date(&state.db, &student_id, &date)?,
        "created": !existed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    student_id: Option<String>,
    class_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Attendance(None))?;
    let p: ListParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let start = clean(p.start_date).and_then(|d| parse_date(&mut errors, "startDate", &d));
    let end = clean(p.end_date).and_then(|d| parse_date(&mut errors, "endDate", &d));
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            errors.add("endDate", "End date must not be before start date");
        }
    }
    errors.into_result()?;

    let mut filter = StudentFilter {
        class_id: clean(p.class_id),
        parent_id: None,
        student_id: clean(p.student_id),
    }
    .narrow(&student_scope(actor));
    if let Some(s) = start {
        filter = filter.and("a.date >= ?", s.format("%Y-%m-%d").to_string());
    }
    if let Some(e) = end {
        filter = filter.and("a.date <= ?", e.format("%Y-%m-%d").to_string());
    }

    let mut stmt = state.db.prepare(&format!(
        "{ATTENDANCE_SELECT} WHERE {} ORDER BY a.date DESC, s.last_name, s.first_name",
        filter.where_sql()
    ))?;
    let rows = stmt
        .query_map(params_from_iter(filter.args()), attendance_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attendance": rows }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteParams {
    attendance_id: Option<String>,
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: DeleteParams = parse_params(params)?;
    let attendance_id = require_id(p.attendance_id, "attendanceId")?;
    let owner = ownership::attendance_owner(&state.db, &attendance_id)?
        .ok_or_else(|| AppError::not_found("Attendance record"))?;
    authorize(actor, Operation::Delete, Resource::Attendance(Some(&owner)))?;

    state.db.execute("DELETE FROM attendance WHERE id = ?", [&attendance_id])?;
    tracing::info!(attendance_id = %attendance_id, "attendance deleted");
    Ok(json!({ "attendanceId": attendance_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "attendance.mark" => handle_mark,
        "attendance.list" => handle_list,
        "attendance.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
