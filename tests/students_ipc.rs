mod test_support;

use serde_json::json;
use test_support::{admin, ids, spawn_sidecar, str_field};

#[test]
fn duplicate_keys_are_field_conflicts_and_create_nothing() {
    let mut sc = spawn_sidecar();
    let x = sc.create_class("X", None);
    sc.create_student("ADM-1", &x, None);

    let v = sc.fail(
        "students.create",
        json!({ "firstName": "B", "lastName": "C", "admissionNo": "ADM-1", "classId": x }),
        &admin(),
        409,
    );
    assert_eq!(v["errors"]["admissionNo"], json!(["Admission number already exists"]));

    sc.create_teacher("T", "taken@school.org");
    let v = sc.fail(
        "students.create",
        json!({
            "firstName": "B", "lastName": "C", "admissionNo": "ADM-2",
            "classId": x, "email": "taken@school.org"
        }),
        &admin(),
        409,
    );
    assert_eq!(v["errors"]["email"], json!(["A user with this email already exists"]));
    let v = sc.fail(
        "teachers.create",
        json!({ "firstName": "T", "lastName": "Two", "email": "taken@school.org" }),
        &admin(),
        409,
    );
    assert_eq!(v["error"]["code"], json!("conflict"));
    let v = sc.fail(
        "parents.create",
        json!({ "firstName": "P", "lastName": "Upper", "email": "Taken@School.org" }),
        &admin(),
        409,
    );
    assert_eq!(v["errors"]["email"], json!(["A user with this email already exists"]));

    let all = sc.ok("students.list", json!({}), &admin());
    assert_eq!(all["students"].as_array().unwrap().len(), 1);
    let teachers = sc.ok("teachers.list", json!({}), &admin());
    assert_eq!(teachers["teachers"].as_array().unwrap().len(), 1);
}

#[test]
fn create_reports_every_missing_field() {
    let mut sc = spawn_sidecar();
    let v = sc.fail("students.create", json!({ "classId": "nope", "email": "bad" }), &admin(), 400);
    let errors = &v["errors"];
    assert_eq!(errors["firstName"], json!(["First name is required"]));
    assert_eq!(errors["admissionNo"], json!(["Admission number is required"]));
    assert_eq!(errors["classId"], json!(["Class not found"]));
    assert_eq!(errors["email"], json!(["Email is invalid"]));
}

#[test]
fn parent_supplied_parent_id_is_ignored() {
    let mut sc = spawn_sidecar();
    let (p1, _) = sc.create_parent("One", "p1@school.org");
    let (p2, parent_2) = sc.create_parent("Two", "p2@school.org");
    let x = sc.create_class("X", None);
    sc.create_student("S-1", &x, Some(&p1));
    let mine = sc.create_student("S-2", &x, Some(&p2));

    let listed = sc.ok("students.list", json!({ "parentId": p1 }), &parent_2);
    assert_eq!(ids(&listed["students"]), vec![mine]);
}

#[test]
fn teachers_list_their_class_and_read_only_its_students() {
    let mut sc = spawn_sidecar();
    let (ta, teacher_a) = sc.create_teacher("A", "a@school.org");
    let x = sc.create_class("X", Some(&ta));
    let y = sc.create_class("Y", None);
    let in_x = sc.create_student("S-1", &x, None);
    let in_y = sc.create_student("S-2", &y, None);

    let listed = sc.ok("students.list", json!({}), &teacher_a);
    assert_eq!(ids(&listed["students"]), vec![in_x.clone()]);
    let listed = sc.ok("students.list", json!({ "classId": y }), &teacher_a);
    assert!(listed["students"].as_array().unwrap().is_empty());

    sc.ok("students.get", json!({ "studentId": in_x }), &teacher_a);
    sc.fail("students.get", json!({ "studentId": in_y }), &teacher_a, 403);
    sc.fail(
        "students.update",
        json!({ "studentId": in_x, "firstName": "New" }),
        &teacher_a,
        403,
    );
}

#[test]
fn moving_a_student_rescopes_it_immediately() {
    let mut sc = spawn_sidecar();
    let (ta, teacher_a) = sc.create_teacher("A", "a@school.org");
    let x = sc.create_class("X", Some(&ta));
    let y = sc.create_class("Y", None);
    let s = sc.create_student("S-1", &x, None);
    sc.ok("students.get", json!({ "studentId": s }), &teacher_a);

    let moved = sc.ok("students.update", json!({ "studentId": s, "classId": y }), &admin());
    assert_eq!(moved["student"]["classId"], json!(y));
    sc.fail("students.get", json!({ "studentId": s }), &teacher_a, 403);
}

#[test]
fn search_and_delete_with_login() {
    let mut sc = spawn_sidecar();
    let x = sc.create_class("X", None);
    let created = sc.ok(
        "students.create",
        json!({
            "firstName": "Amara", "lastName": "Okafor", "admissionNo": "A-77",
            "classId": x, "email": "amara@school.org"
        }),
        &admin(),
    );
    let student = &created["student"];
    let user_id = str_field(student, "userId");
    assert_eq!(student["email"], json!("amara@school.org"));
    sc.create_student("B-1", &x, None);

    let found = sc.ok("students.list", json!({ "search": "okaf" }), &admin());
    assert_eq!(ids(&found["students"]), vec![str_field(student, "id")]);

    sc.ok("students.delete", json!({ "studentId": str_field(student, "id") }), &admin());
    sc.fail("users.get", json!({ "userId": user_id }), &admin(), 404);
}

#[test]
fn search_wildcards_match_literally() {
    let mut sc = spawn_sidecar();
    let x = sc.create_class("X", None);
    let underscored = sc.create_student("A_1", &x, None);
    sc.create_student("AB1", &x, None);

    let found = sc.ok("students.list", json!({ "search": "A_1" }), &admin());
    assert_eq!(ids(&found["students"]), vec![underscored]);

    let none = sc.ok("students.list", json!({ "search": "%" }), &admin());
    assert!(none["students"].as_array().unwrap().is_empty());
}
