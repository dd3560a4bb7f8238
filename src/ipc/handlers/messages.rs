use rusqlite::{params_from_iter, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{clean, dispatch, parse_params, require_id, required, Handler};
use crate::ipc::ownership;
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Actor, Operation, Resource};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageRow {
    id: String,
    sender_id: String,
    sender_name: String,
    receiver_id: String,
    receiver_name: String,
    subject: Option<String>,
    content: String,
    read: bool,
    created_at: String,
}

const MESSAGE_SELECT: &str = "SELECT
       m.id, m.sender_id, su.name, m.receiver_id, ru.name,
       m.subject, m.content, m.read, m.created_at
     FROM messages m
     JOIN users su ON su.id = m.sender_id
     JOIN users ru ON ru.id = m.receiver_id";

fn message_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: r.get(0)?,
        sender_id: r.get(1)?,
        sender_name: r.get(2)?,
        receiver_id: r.get(3)?,
        receiver_name: r.get(4)?,
        subject: r.get(5)?,
        content: r.get(6)?,
        read: r.get::<_, i64>(7)? != 0,
        created_at: r.get(8)?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    receiver_id: Option<String>,
    subject: Option<String>,
    content: Option<String>,
}

fn handle_send(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::Create, Resource::Message(None))?;
    let p: SendParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let receiver_id = required(&mut errors, "receiverId", "Receiver", p.receiver_id);
    let content = required(&mut errors, "content", "Message", p.content);
    if receiver_id == actor.user_id {
        errors.add("receiverId", "You cannot message yourself");
    }
    errors.into_result()?;

    if !ownership::user_exists(&state.db, &receiver_id)? {
        return Err(AppError::not_found("Receiver"));
    }

    let message_id = db::new_id();
    state.db.execute(
        "INSERT INTO messages(id, sender_id, receiver_id, subject, content, read, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (
            &message_id,
            &actor.user_id,
            &receiver_id,
            clean(p.subject),
            &content,
            db::now(),
        ),
    )?;
    tracing::info!(message_id = %message_id, receiver = %receiver_id, "message sent");

    let message = state
        .db
        .query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?"), [&message_id], message_row)?;
    Ok(json!({ "message": message }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    conversation_with: Option<String>,
    limit: Option<u32>,
}

/// Lists the caller's own messages, newest first, and marks the incoming ones read.
fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Message(None))?;
    let p: ListParams = parse_params(params)?;
    let limit = p.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let me = actor.user_id.as_str();
    let mut sql = format!("{MESSAGE_SELECT} WHERE (m.sender_id = ?1 OR m.receiver_id = ?1)");
    let mut args = vec![me.to_string()];
    if let Some(other) = clean(p.conversation_with) {
        sql.push_str(" AND (m.sender_id = ?2 OR m.receiver_id = ?2)");
        args.push(other);
    }
    sql.push_str(&format!(" ORDER BY m.created_at DESC, m.id LIMIT {limit}"));

    let tx = state.db.unchecked_transaction()?;
    let mut messages = {
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(&args), message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let mut marked = 0;
    for m in messages.iter_mut().filter(|m| m.receiver_id == me && !m.read) {
        marked += tx.execute("UPDATE messages SET read = 1 WHERE id = ?", [&m.id])?;
        m.read = true;
    }
    tx.commit()?;
    if marked > 0 {
        tracing::debug!(marked, "messages marked read");
    }

    Ok(json!({ "messages": messages }))
}

fn handle_unread_count(
    state: &AppState,
    actor: &Actor,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Message(None))?;
    let count: i64 = state.db.query_row(
        "SELECT COUNT(*) FROM messages WHERE receiver_id = ? AND read = 0",
        [&actor.user_id],
        |r| r.get(0),
    )?;
    Ok(json!({ "count": count }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdParams {
    message_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: MessageIdParams = parse_params(params)?;
    let message_id = require_id(p.message_id, "messageId")?;
    let owner = ownership::message_owner(&state.db, &message_id)?
        .ok_or_else(|| AppError::not_found("Message"))?;
    authorize(actor, Operation::Read, Resource::Message(Some(&owner)))?;

    if owner.receiver_id == actor.user_id {
        state
            .db
            .execute("UPDATE messages SET read = 1 WHERE id = ?", [&message_id])?;
    }
    let message = state
        .db
        .query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?"), [&message_id], message_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Message"))?;
    Ok(json!({ "message": message }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: MessageIdParams = parse_params(params)?;
    let message_id = require_id(p.message_id, "messageId")?;
    let owner = ownership::message_owner(&state.db, &message_id)?
        .ok_or_else(|| AppError::not_found("Message"))?;
    authorize(actor, Operation::Delete, Resource::Message(Some(&owner)))?;

    state.db.execute("DELETE FROM messages WHERE id = ?", [&message_id])?;
    tracing::info!(message_id = %message_id, "message deleted");
    Ok(json!({ "messageId": message_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "messages.send" => handle_send,
        "messages.list" => handle_list,
        "messages.unreadCount" => handle_unread_count,
        "messages.get" => handle_get,
        "messages.delete" => handle_delete,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
