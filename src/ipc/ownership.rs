//! Loads the session's actor and the ownership chains the policy decides on.
//!
//! Nothing here is cached: every request sees the current class, parent and
//! teacher assignments.

use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::AppError;
use crate::ipc::types::SessionClaims;
use crate::policy::{
    AccessDenied, Actor, ClassOwner, EventOwner, MessageOwner, ParentOwner, Profile, Role,
    StudentOwner,
};

pub fn resolve_actor(conn: &Connection, claims: Option<&SessionClaims>) -> Result<Actor, AppError> {
    let Some(claims) = claims else {
        return Err(AccessDenied::Unauthenticated.into());
    };
    let Ok(claimed) = claims.role.parse::<Role>() else {
        tracing::warn!(role = %claims.role, "session carries an unknown role");
        return Err(AccessDenied::Unauthenticated.into());
    };

    let stored: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&claims.user_id], |r| r.get(0))
        .optional()?;
    let Some(stored) = stored else {
        tracing::info!(user = %claims.user_id, "session user no longer exists");
        return Err(AccessDenied::Unauthenticated.into());
    };
    let role = stored
        .parse::<Role>()
        .map_err(|e| AppError::Internal(e.into()))?;
    if role != claimed {
        tracing::warn!(user = %claims.user_id, %claimed, %role, "session role is stale");
        return Err(AccessDenied::Unauthenticated.into());
    }

    let uid = claims.user_id.as_str();
    let profile = match role {
        Role::Admin => Profile::Admin,
        Role::Teacher => Profile::Teacher(profile_id(conn, "SELECT id FROM teachers WHERE user_id = ?", uid)?),
        Role::Parent => Profile::Parent(profile_id(conn, "SELECT id FROM parents WHERE user_id = ?", uid)?),
        Role::Student => Profile::Student(profile_id(conn, "SELECT id FROM students WHERE user_id = ?", uid)?),
    };
    Ok(Actor::new(uid, profile))
}

fn profile_id(conn: &Connection, sql: &str, user_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(sql, [user_id], |r| r.get(0)).optional()
}

pub fn class_owner(conn: &Connection, class_id: &str) -> rusqlite::Result<Option<ClassOwner>> {
    conn.query_row(
        "SELECT id, teacher_id FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassOwner {
                class_id: r.get(0)?,
                teacher_id: r.get(1)?,
            })
        },
    )
    .optional()
}

const STUDENT_CHAIN: &str = "SELECT s.id, s.class_id, c.teacher_id, s.parent_id
     FROM students s
     LEFT JOIN classes c ON c.id = s.class_id";

fn student_chain(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentOwner> {
    Ok(StudentOwner {
        student_id: r.get(0)?,
        class_id: r.get(1)?,
        teacher_id: r.get(2)?,
        parent_id: r.get(3)?,
    })
}

pub fn student_owner(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<StudentOwner>> {
    conn.query_row(
        &format!("{STUDENT_CHAIN} WHERE s.id = ?"),
        [student_id],
        student_chain,
    )
    .optional()
}

/// Chain of the student a grade belongs to.
pub fn grade_owner(conn: &Connection, grade_id: &str) -> rusqlite::Result<Option<StudentOwner>> {
    conn.query_row(
        &format!("{STUDENT_CHAIN} JOIN grades g ON g.student_id = s.id WHERE g.id = ?"),
        [grade_id],
        student_chain,
    )
    .optional()
}

/// Chain of the student an attendance row belongs to.
pub fn attendance_owner(
    conn: &Connection,
    attendance_id: &str,
) -> rusqlite::Result<Option<StudentOwner>> {
    conn.query_row(
        &format!("{STUDENT_CHAIN} JOIN attendance a ON a.student_id = s.id WHERE a.id = ?"),
        [attendance_id],
        student_chain,
    )
    .optional()
}

pub fn parent_owner(conn: &Connection, parent_id: &str) -> rusqlite::Result<Option<ParentOwner>> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM parents WHERE id = ?", [parent_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.teacher_id
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE s.parent_id = ? AND c.teacher_id IS NOT NULL",
    )?;
    let teacher_ids = stmt
        .query_map([parent_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(Some(ParentOwner {
        parent_id: parent_id.to_string(),
        teacher_ids,
    }))
}

pub fn message_owner(conn: &Connection, message_id: &str) -> rusqlite::Result<Option<MessageOwner>> {
    conn.query_row(
        "SELECT sender_id, receiver_id FROM messages WHERE id = ?",
        [message_id],
        |r| {
            Ok(MessageOwner {
                sender_id: r.get(0)?,
                receiver_id: r.get(1)?,
            })
        },
    )
    .optional()
}

pub fn event_owner(conn: &Connection, event_id: &str) -> rusqlite::Result<Option<EventOwner>> {
    conn.query_row(
        "SELECT id, organizer_id, is_public FROM events WHERE id = ?",
        [event_id],
        |r| {
            Ok(EventOwner {
                event_id: r.get(0)?,
                organizer_id: r.get(1)?,
                is_public: r.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
}

pub fn user_exists(conn: &Connection, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}
