mod test_support;

use serde_json::json;
use test_support::{admin, spawn_sidecar, str_field, ADMIN_ID};

#[test]
fn third_parties_see_nothing_of_a_conversation() {
    let mut sc = spawn_sidecar();
    let (_, teacher) = sc.create_teacher("T", "t@school.org");
    let (_, parent) = sc.create_parent("P", "p@school.org");
    let (_, outsider) = sc.create_parent("O", "o@school.org");
    let parent_user = str_field(&parent, "userId");
    let teacher_user = str_field(&teacher, "userId");

    let sent = sc.ok(
        "messages.send",
        json!({ "receiverId": parent_user, "subject": "Trip", "content": "Forms due Friday" }),
        &teacher,
    );
    let message_id = str_field(&sent["message"], "id");
    assert_eq!(sent["message"]["read"], json!(false));

    let listed = sc.ok("messages.list", json!({ "conversationWith": teacher_user }), &outsider);
    assert!(listed["messages"].as_array().unwrap().is_empty());
    let listed = sc.ok("messages.list", json!({}), &outsider);
    assert!(listed["messages"].as_array().unwrap().is_empty());
    sc.fail("messages.get", json!({ "messageId": message_id }), &outsider, 403);
    sc.fail("messages.get", json!({ "messageId": message_id }), &admin(), 403);
}

#[test]
fn listing_marks_incoming_messages_read() {
    let mut sc = spawn_sidecar();
    let (_, teacher) = sc.create_teacher("T", "t@school.org");
    let (_, parent) = sc.create_parent("P", "p@school.org");
    let parent_user = str_field(&parent, "userId");
    let teacher_user = str_field(&teacher, "userId");

    for content in ["one", "two"] {
        sc.ok(
            "messages.send",
            json!({ "receiverId": parent_user, "content": content }),
            &teacher,
        );
    }
    let unread = sc.ok("messages.unreadCount", json!({}), &parent);
    assert_eq!(unread["count"], json!(2));

    // The sender listing does not mark anything.
    sc.ok("messages.list", json!({}), &teacher);
    let unread = sc.ok("messages.unreadCount", json!({}), &parent);
    assert_eq!(unread["count"], json!(2));

    let listed = sc.ok(
        "messages.list",
        json!({ "conversationWith": teacher_user, "limit": 1 }),
        &parent,
    );
    let rows = listed["messages"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["content"], json!("two"));
    assert_eq!(rows[0]["read"], json!(true));
    let unread = sc.ok("messages.unreadCount", json!({}), &parent);
    assert_eq!(unread["count"], json!(1));
}

#[test]
fn send_rejects_self_and_unknown_receivers() {
    let mut sc = spawn_sidecar();
    let v = sc.fail(
        "messages.send",
        json!({ "receiverId": ADMIN_ID, "content": "hi" }),
        &admin(),
        400,
    );
    assert_eq!(v["errors"]["receiverId"], json!(["You cannot message yourself"]));
    let v = sc.fail(
        "messages.send",
        json!({ "receiverId": "ghost", "content": "hi" }),
        &admin(),
        404,
    );
    assert_eq!(v["error"]["message"], json!("Receiver not found"));
    let v = sc.fail("messages.send", json!({ "receiverId": "ghost" }), &admin(), 400);
    assert_eq!(v["errors"]["content"], json!(["Message is required"]));
}

#[test]
fn only_the_sender_deletes() {
    let mut sc = spawn_sidecar();
    let (_, parent) = sc.create_parent("P", "p@school.org");
    let sent = sc.ok(
        "messages.send",
        json!({ "receiverId": str_field(&parent, "userId"), "content": "hello" }),
        &admin(),
    );
    let message_id = str_field(&sent["message"], "id");

    let opened = sc.ok("messages.get", json!({ "messageId": message_id }), &parent);
    assert_eq!(opened["message"]["read"], json!(true));
    sc.fail("messages.delete", json!({ "messageId": message_id }), &parent, 403);
    sc.ok("messages.delete", json!({ "messageId": message_id }), &admin());
    sc.fail("messages.get", json!({ "messageId": message_id }), &admin(), 404);
}
