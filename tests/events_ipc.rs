mod test_support;

use serde_json::json;
use test_support::{admin, ids, spawn_sidecar, str_field};

fn create_event(sc: &mut test_support::Sidecar, organizer: &serde_json::Value, title: &str, public: bool) -> String {
    let data = sc.ok(
        "events.create",
        json!({
            "title": title,
            "startsAt": "2024-06-01T09:00:00+01:00",
            "endsAt": "2024-06-01T12:00:00+01:00",
            "isPublic": public,
        }),
        organizer,
    );
    assert_eq!(data["event"]["startsAt"], json!("2024-06-01T08:00:00Z"));
    str_field(&data["event"], "id")
}

#[test]
fn private_events_are_hidden_from_everyone_but_organizer_and_admin() {
    let mut sc = spawn_sidecar();
    let (_, teacher) = sc.create_teacher("T", "t@school.org");
    let (_, parent) = sc.create_parent("P", "p@school.org");
    let public = create_event(&mut sc, &teacher, "Sports day", true);
    let private = create_event(&mut sc, &teacher, "Staff meeting", false);

    let seen = sc.ok("events.list", json!({}), &parent);
    assert_eq!(ids(&seen["events"]), vec![public.clone()]);
    let v = sc.fail("events.get", json!({ "eventId": private }), &parent, 403);
    assert_eq!(v["errors"]["_form"], json!(["This event is private"]));

    sc.ok("events.get", json!({ "eventId": private }), &teacher);
    sc.ok("events.get", json!({ "eventId": private }), &admin());
    assert_eq!(sc.ok("events.list", json!({}), &admin())["events"].as_array().unwrap().len(), 2);
    sc.fail("events.get", json!({ "eventId": "missing" }), &parent, 404);
}

#[test]
fn only_staff_organise_and_only_organizer_or_admin_modify() {
    let mut sc = spawn_sidecar();
    let (_, teacher) = sc.create_teacher("T", "t@school.org");
    let (_, other_teacher) = sc.create_teacher("U", "u@school.org");
    let (_, parent) = sc.create_parent("P", "p@school.org");

    sc.fail(
        "events.create",
        json!({ "title": "Bake sale", "startsAt": "2024-06-01T09:00:00Z" }),
        &parent,
        403,
    );
    let event_id = create_event(&mut sc, &teacher, "Concert", true);

    let v = sc.fail(
        "events.update",
        json!({ "eventId": event_id, "title": "Hijacked" }),
        &other_teacher,
        403,
    );
    assert_eq!(
        v["errors"]["_form"],
        json!(["Only the organizer or an admin can modify this event"])
    );
    let v = sc.fail(
        "events.update",
        json!({ "eventId": event_id, "endsAt": "2024-06-01T07:00:00Z" }),
        &teacher,
        400,
    );
    assert!(v["errors"]["endsAt"].is_array());

    let updated = sc.ok(
        "events.update",
        json!({ "eventId": event_id, "location": "Hall", "endsAt": null }),
        &admin(),
    );
    assert_eq!(updated["event"]["location"], json!("Hall"));
    assert!(updated["event"]["endsAt"].is_null());
    assert_eq!(updated["event"]["title"], json!("Concert"));

    sc.fail("events.delete", json!({ "eventId": event_id }), &other_teacher, 403);
    sc.ok("events.delete", json!({ "eventId": event_id }), &teacher);
    sc.fail("events.get", json!({ "eventId": event_id }), &teacher, 404);
}

#[test]
fn registrations_are_unique_and_scoped() {
    let mut sc = spawn_sidecar();
    let (_, teacher) = sc.create_teacher("T", "t@school.org");
    let (_, parent_1) = sc.create_parent("One", "p1@school.org");
    let (_, parent_2) = sc.create_parent("Two", "p2@school.org");
    let event_id = create_event(&mut sc, &teacher, "Open day", true);
    let private = create_event(&mut sc, &teacher, "Staff only", false);

    sc.ok("events.register", json!({ "eventId": event_id }), &parent_1);
    let v = sc.fail("events.register", json!({ "eventId": event_id }), &parent_1, 409);
    assert_eq!(v["errors"]["eventId"], json!(["Already registered for this event"]));
    sc.ok("events.register", json!({ "eventId": event_id }), &parent_2);
    sc.fail("events.register", json!({ "eventId": private }), &parent_1, 403);

    let got = sc.ok("events.get", json!({ "eventId": event_id }), &parent_1);
    assert_eq!(got["event"]["registrationCount"], json!(2));

    let all = sc.ok("events.registrations", json!({ "eventId": event_id }), &teacher);
    assert_eq!(all["registrations"].as_array().unwrap().len(), 2);
    let own = sc.ok("events.registrations", json!({ "eventId": event_id }), &parent_1);
    let own = own["registrations"].as_array().unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0]["userId"], parent_1["userId"]);

    // Removing someone else's registration needs the organizer or an admin.
    let p2_user = str_field(&parent_2, "userId");
    sc.fail(
        "events.unregister",
        json!({ "eventId": event_id, "userId": p2_user }),
        &parent_1,
        403,
    );
    sc.ok("events.unregister", json!({ "eventId": event_id, "userId": p2_user }), &teacher);
    sc.ok("events.unregister", json!({ "eventId": event_id }), &parent_1);
    sc.fail("events.unregister", json!({ "eventId": event_id }), &parent_1, 404);

    sc.ok("events.delete", json!({ "eventId": event_id }), &admin());
}

#[test]
fn list_can_start_from_a_time() {
    let mut sc = spawn_sidecar();
    let early = sc.ok(
        "events.create",
        json!({ "title": "Early", "startsAt": "2024-01-10T09:00:00Z" }),
        &admin(),
    );
    let late = sc.ok(
        "events.create",
        json!({ "title": "Late", "startsAt": "2024-09-10T09:00:00Z" }),
        &admin(),
    );
    assert_eq!(early["event"]["isPublic"], json!(true));
    let listed = sc.ok("events.list", json!({ "from": "2024-06-01T00:00:00Z" }), &admin());
    assert_eq!(ids(&listed["events"]), vec![str_field(&late["event"], "id")]);
    sc.fail("events.list", json!({ "from": "June" }), &admin(), 400);
}
