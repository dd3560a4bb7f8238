#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub const ADMIN_ID: &str = "admin";

pub fn session(user_id: &str, role: &str) -> Value {
    json!({ "userId": user_id, "role": role })
}

pub fn admin() -> Value {
    session(ADMIN_ID, "ADMIN")
}

/// A running `schoold` over a throwaway database.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    dir: TempDir,
}

pub fn spawn_sidecar() -> Sidecar {
    let dir = tempfile::tempdir().expect("temp dir");
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_CONFIG")
        .env("SCHOOLD_DB_PATH", dir.path().join("school.sqlite3"))
        .env("SCHOOLD_ADMIN_ID", ADMIN_ID)
        .env("SCHOOLD_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
        dir,
    }
}

impl Sidecar {
    /// Inserts a bare login straight into the database, bypassing the profile modules.
    pub fn seed_user(&self, id: &str, email: &str, role: &str) {
        let conn = rusqlite::Connection::open(self.dir.path().join("school.sqlite3")).expect("open db");
        conn.execute(
            "INSERT INTO users(id, email, name, role, created_at) VALUES(?, ?, ?, ?, '2024-01-01T00:00:00.000000Z')",
            (id, email, id, role),
        )
        .expect("seed user");
    }

    pub fn send_line(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value, session: Option<&Value>) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(s) = session {
            payload["session"] = s.clone();
        }
        let value = self.send_line(&payload.to_string());
        assert_eq!(value["id"], json!(id), "response id mismatch: {}", value);
        value
    }

    /// Asserts success and returns `data`.
    pub fn ok(&mut self, method: &str, params: Value, session: &Value) -> Value {
        let value = self.request(method, params, Some(session));
        assert_eq!(value["success"], json!(true), "{} failed: {}", method, value);
        value.get("data").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts failure with `status` and returns the whole envelope.
    pub fn fail(&mut self, method: &str, params: Value, session: &Value, status: u16) -> Value {
        let value = self.request(method, params, Some(session));
        assert_eq!(value["success"], json!(false), "{} unexpectedly succeeded: {}", method, value);
        assert_eq!(value["status"], json!(status), "{} wrong status: {}", method, value);
        value
    }

    pub fn create_teacher(&mut self, first: &str, email: &str) -> (String, Value) {
        let data = self.ok(
            "teachers.create",
            json!({ "firstName": first, "lastName": "Teacher", "email": email }),
            &admin(),
        );
        let t = &data["teacher"];
        let id = str_field(t, "id");
        let sess = session(&str_field(t, "userId"), "TEACHER");
        (id, sess)
    }

    pub fn create_parent(&mut self, first: &str, email: &str) -> (String, Value) {
        let data = self.ok(
            "parents.create",
            json!({ "firstName": first, "lastName": "Parent", "email": email }),
            &admin(),
        );
        let p = &data["parent"];
        (str_field(p, "id"), session(&str_field(p, "userId"), "PARENT"))
    }

    pub fn create_class(&mut self, name: &str, teacher_id: Option<&str>) -> String {
        let data = self.ok(
            "classes.create",
            json!({ "name": name, "teacherId": teacher_id }),
            &admin(),
        );
        str_field(&data["class"], "id")
    }

    pub fn create_student(&mut self, admission_no: &str, class_id: &str, parent_id: Option<&str>) -> String {
        let data = self.ok(
            "students.create",
            json!({
                "firstName": "Pupil",
                "lastName": admission_no,
                "admissionNo": admission_no,
                "classId": class_id,
                "parentId": parent_id,
            }),
            &admin(),
        );
        str_field(&data["student"], "id")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

pub fn ids(list: &Value) -> Vec<String> {
    list.as_array()
        .expect("array")
        .iter()
        .map(|v| str_field(v, "id"))
        .collect()
}
