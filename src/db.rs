use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::config::AdminSeed;

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('ADMIN', 'TEACHER', 'STUDENT', 'PARENT')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            subject TEXT,
            phone TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            level TEXT,
            teacher_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT UNIQUE,
            admission_no TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            class_id TEXT NOT NULL,
            parent_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(parent_id) REFERENCES parents(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_parent ON students(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            subject TEXT NOT NULL,
            score REAL NOT NULL CHECK (score >= 0 AND score <= 100),
            grade TEXT NOT NULL,
            term TEXT,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PRESENT', 'ABSENT', 'LATE', 'EXCUSED')),
            recorded_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_id, date),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(recorded_by) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            subject TEXT,
            content TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(sender_id) REFERENCES users(id),
            FOREIGN KEY(receiver_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            location TEXT,
            starts_at TEXT NOT NULL,
            ends_at TEXT,
            is_public INTEGER NOT NULL,
            organizer_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(organizer_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS event_registrations(
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(event_id, user_id),
            FOREIGN KEY(event_id) REFERENCES events(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    Ok(())
}

/// Inserts the configured ADMIN if no user with that id exists yet.
pub fn ensure_admin(conn: &Connection, seed: &AdminSeed) -> anyhow::Result<bool> {
    let exists: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&seed.id], |r| r.get(0))
        .optional()?;
    match exists {
        Some(role) if role == "ADMIN" => Ok(false),
        Some(role) => anyhow::bail!(
            "bootstrap admin id {:?} belongs to a {} user",
            seed.id,
            role
        ),
        None => {
            conn.execute(
                "INSERT INTO users(id, email, name, role, created_at) VALUES(?, ?, ?, 'ADMIN', ?)",
                (&seed.id, &seed.email, &seed.name, now()),
            )?;
            Ok(true)
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fixed-width UTC timestamp, so text order is time order.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// The `table.column` list of a violated UNIQUE constraint, if that is what failed.
pub fn unique_violation(e: &rusqlite::Error) -> Option<&str> {
    match e {
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            msg.strip_prefix("UNIQUE constraint failed: ")
        }
        _ => None,
    }
}

/// Request field that a unique constraint protects, with the message to report.
pub fn conflict_field(columns: &str) -> (&'static str, &'static str) {
    match columns {
        "users.email" => ("email", "A user with this email already exists"),
        "students.admission_no" => ("admissionNo", "Admission number already exists"),
        "students.user_id" => ("email", "This account already has a student profile"),
        "classes.name" => ("name", "A class with this name already exists"),
        "teachers.user_id" | "parents.user_id" => ("email", "This account already has a profile"),
        "attendance.student_id, attendance.date" => ("date", "Attendance already recorded for this date"),
        "event_registrations.event_id, event_registrations.user_id" => {
            ("eventId", "Already registered for this event")
        }
        _ => ("_form", "Record already exists"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = memory();
        ensure_schema(&conn).unwrap();
    }

    #[test]
    fn duplicate_email_is_reported_as_unique_violation() {
        let conn = memory();
        let seed = AdminSeed::default();
        assert!(ensure_admin(&conn, &seed).unwrap());
        assert!(!ensure_admin(&conn, &seed).unwrap());

        let e = conn
            .execute(
                "INSERT INTO users(id, email, name, role, created_at) VALUES('x', ?, 'X', 'PARENT', ?)",
                (&seed.email, now()),
            )
            .unwrap_err();
        assert_eq!(unique_violation(&e), Some("users.email"));
        assert_eq!(conflict_field("users.email").0, "email");
    }

    #[test]
    fn email_uniqueness_ignores_case() {
        let conn = memory();
        let seed = AdminSeed::default();
        ensure_admin(&conn, &seed).unwrap();
        let e = conn
            .execute(
                "INSERT INTO users(id, email, name, role, created_at) VALUES('x', ?, 'X', 'PARENT', ?)",
                (seed.email.to_uppercase(), now()),
            )
            .unwrap_err();
        assert_eq!(unique_violation(&e), Some("users.email"));
    }

    #[test]
    fn composite_unique_columns_map_to_a_field() {
        assert_eq!(conflict_field("attendance.student_id, attendance.date").0, "date");
        assert_eq!(conflict_field("something.else").0, "_form");
    }

    #[test]
    fn other_errors_are_not_unique_violations() {
        let conn = memory();
        let e = conn
            .execute(
                "INSERT INTO users(id, email, name, role, created_at) VALUES('x', 'e', 'X', 'JANITOR', ?)",
                [now()],
            )
            .unwrap_err();
        assert_eq!(unique_violation(&e), None);
    }

    #[test]
    fn bootstrap_refuses_non_admin_id() {
        let conn = memory();
        conn.execute(
            "INSERT INTO users(id, email, name, role, created_at) VALUES('admin', 'p@x', 'P', 'PARENT', ?)",
            [now()],
        )
        .unwrap();
        assert!(ensure_admin(&conn, &AdminSeed::default()).is_err());
    }
}
