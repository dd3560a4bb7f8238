mod test_support;

use serde_json::json;
use test_support::{admin, session, spawn_sidecar};

#[test]
fn health_answers_without_a_session() {
    let mut sc = spawn_sidecar();
    let v = sc.request("health", json!({}), None);
    assert_eq!(v["success"], json!(true));
    assert!(v["data"]["version"].is_string());
    assert!(v["data"]["database"].as_str().unwrap().ends_with("school.sqlite3"));
}

#[test]
fn requests_without_a_session_are_401() {
    let mut sc = spawn_sidecar();
    let v = sc.request("classes.list", json!({}), None);
    assert_eq!(v["success"], json!(false));
    assert_eq!(v["status"], json!(401));
    assert_eq!(v["error"]["code"], json!("unauthenticated"));
    assert_eq!(v["errors"]["_form"], json!(["must be logged in"]));
}

#[test]
fn stale_and_forged_sessions_are_401() {
    let mut sc = spawn_sidecar();
    sc.fail("classes.list", json!({}), &session("admin", "TEACHER"), 401);
    sc.fail("classes.list", json!({}), &session("ghost", "ADMIN"), 401);
    sc.fail("classes.list", json!({}), &session("admin", "PRINCIPAL"), 401);
}

#[test]
fn whoami_reports_the_resolved_actor() {
    let mut sc = spawn_sidecar();
    let me = sc.ok("session.whoami", json!({}), &admin());
    assert_eq!(me["userId"], json!("admin"));
    assert_eq!(me["role"], json!("ADMIN"));
    assert!(me["profileId"].is_null());

    let (teacher_id, teacher) = sc.create_teacher("Ada", "ada@school.org");
    let me = sc.ok("session.whoami", json!({}), &teacher);
    assert_eq!(me["role"], json!("TEACHER"));
    assert_eq!(me["profileId"], json!(teacher_id));
}

#[test]
fn unknown_methods_and_bad_lines_fail_cleanly() {
    let mut sc = spawn_sidecar();
    let v = sc.request("classes.explode", json!({}), Some(&admin()));
    assert_eq!(v["status"], json!(404));
    assert_eq!(v["error"]["code"], json!("not_implemented"));

    let v = sc.send_line("{not json");
    assert_eq!(v["success"], json!(false));
    assert_eq!(v["status"], json!(400));
    assert_eq!(v["error"]["code"], json!("bad_json"));
    assert!(v.get("id").is_none());

    // The sidecar keeps serving after a bad line.
    sc.ok("session.whoami", json!({}), &admin());
}

#[test]
fn wrongly_typed_params_are_bad_params() {
    let mut sc = spawn_sidecar();
    let v = sc.fail("classes.create", json!({ "name": 7 }), &admin(), 400);
    assert_eq!(v["error"]["code"], json!("bad_params"));
}

#[test]
fn logins_without_a_profile_are_refused_scoped_lists() {
    let mut sc = spawn_sidecar();
    sc.seed_user("bare-teacher", "bt@school.org", "TEACHER");
    sc.seed_user("bare-parent", "bp@school.org", "PARENT");
    sc.seed_user("bare-student", "bs@school.org", "STUDENT");
    let x = sc.create_class("X", None);
    sc.create_student("S-1", &x, None);

    for (user, role) in [
        ("bare-teacher", "TEACHER"),
        ("bare-parent", "PARENT"),
        ("bare-student", "STUDENT"),
    ] {
        let who = session(user, role);
        for method in ["students.list", "grades.list", "attendance.list", "parents.list"] {
            sc.fail(method, json!({}), &who, 403);
        }
    }
    sc.fail("classes.list", json!({}), &session("bare-teacher", "TEACHER"), 403);

    let seen = sc.ok("classes.list", json!({}), &session("bare-parent", "PARENT"));
    assert_eq!(seen["classes"].as_array().unwrap().len(), 1);
    let everyone = sc.ok("students.list", json!({}), &admin());
    assert_eq!(everyone["students"].as_array().unwrap().len(), 1);
}
