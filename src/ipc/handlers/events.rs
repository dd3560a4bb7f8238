use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::ipc::error::{AppError, FieldErrors};
use crate::ipc::helpers::{
    clean, dispatch, double_option, parse_params, parse_timestamp, require_id, required, Handler,
};
use crate::ipc::ownership;
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Actor, EventOwner, Operation, Resource, ScopedFilter};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventRow {
    id: String,
    title: String,
    description: Option<String>,
    location: Option<String>,
    starts_at: String,
    ends_at: Option<String>,
    is_public: bool,
    organizer_id: String,
    organizer_name: String,
    registration_count: i64,
    created_at: String,
}

const EVENT_SELECT: &str = "SELECT
       e.id, e.title, e.description, e.location, e.starts_at, e.ends_at,
       e.is_public, e.organizer_id, u.name,
       (SELECT COUNT(*) FROM event_registrations r WHERE r.event_id = e.id),
       e.created_at
     FROM events e
     JOIN users u ON u.id = e.organizer_id";

fn event_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        location: r.get(3)?,
        starts_at: r.get(4)?,
        ends_at: r.get(5)?,
        is_public: r.get::<_, i64>(6)? != 0,
        organizer_id: r.get(7)?,
        organizer_name: r.get(8)?,
        registration_count: r.get(9)?,
        created_at: r.get(10)?,
    })
}

fn load_event(conn: &Connection, event_id: &str) -> Result<EventRow, AppError> {
    conn.query_row(&format!("{EVENT_SELECT} WHERE e.id = ?"), [event_id], event_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Event"))
}

fn load_owner(conn: &Connection, event_id: &str) -> Result<EventOwner, AppError> {
    ownership::event_owner(conn, event_id)?.ok_or_else(|| AppError::not_found("Event"))
}

fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn stored(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

fn check_window(errors: &mut FieldErrors, starts: Option<DateTime<Utc>>, ends: Option<DateTime<Utc>>) {
    if let (Some(s), Some(e)) = (starts, ends) {
        if e < s {
            errors.add("endsAt", "End time must not be before start time");
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    starts_at: Option<String>,
    ends_at: Option<String>,
    is_public: Option<bool>,
}

fn handle_create(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::Create, Resource::Event(None))?;
    let p: CreateParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let title = required(&mut errors, "title", "Title", p.title);
    let raw_start = required(&mut errors, "startsAt", "Start time", p.starts_at);
    let starts_at = if raw_start.is_empty() {
        None
    } else {
        parse_timestamp(&mut errors, "startsAt", &raw_start)
    };
    let ends_at = clean(p.ends_at).and_then(|raw| parse_timestamp(&mut errors, "endsAt", &raw));
    check_window(&mut errors, starts_at, ends_at);
    errors.into_result()?;
    let Some(starts_at) = starts_at else {
        return Err(AppError::BadParams("invalid startsAt".into()));
    };

    let event_id = db::new_id();
    let is_public = p.is_public.unwrap_or(true);
    state.db.execute(
        "INSERT INTO events(id, title, description, location, starts_at, ends_at, is_public, organizer_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            &title,
            clean(p.description),
            clean(p.location),
            stamp(starts_at),
            ends_at.map(stamp),
            is_public,
            &actor.user_id,
            db::now(),
        ),
    )?;
    tracing::info!(event_id = %event_id, is_public, "event created");

    Ok(json!({ "event": load_event(&state.db, &event_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventIdParams {
    event_id: Option<String>,
}

fn handle_get(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: EventIdParams = parse_params(params)?;
    let event_id = require_id(p.event_id, "eventId")?;
    let owner = load_owner(&state.db, &event_id)?;
    authorize(actor, Operation::Read, Resource::Event(Some(&owner)))?;
    Ok(json!({ "event": load_event(&state.db, &event_id)? }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    from: Option<String>,
}

fn handle_list(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    authorize(actor, Operation::ReadList, Resource::Event(None))?;
    let p: ListParams = parse_params(params)?;

    let mut errors = FieldErrors::default();
    let from = clean(p.from).and_then(|raw| parse_timestamp(&mut errors, "from", &raw));
    errors.into_result()?;

    let mut filter = ScopedFilter::default();
    if !actor.is_admin() {
        filter = filter.and("(e.is_public = 1 OR e.organizer_id = ?)", actor.user_id.as_str());
    }
    if let Some(t) = from {
        filter = filter.and("e.starts_at >= ?", stamp(t));
    }

    let mut stmt = state.db.prepare(&format!(
        "{EVENT_SELECT} WHERE {} ORDER BY e.starts_at, e.title",
        filter.where_sql()
    ))?;
    let events = stmt
        .query_map(params_from_iter(filter.args()), event_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "events": events }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    event_id: Option<String>,
    title: Option<String>,
    starts_at: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    ends_at: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    location: Option<Option<String>>,
    is_public: Option<bool>,
}

fn handle_update(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UpdateParams = parse_params(params)?;
    let event_id = require_id(p.event_id, "eventId")?;
    let owner = load_owner(&state.db, &event_id)?;
    authorize(actor, Operation::Update, Resource::Event(Some(&owner)))?;

    let current = load_event(&state.db, &event_id)?;
    let mut errors = FieldErrors::default();
    let title = match p.title {
        Some(v) => required(&mut errors, "title", "Title", Some(v)),
        None => current.title,
    };
    let starts_at = match p.starts_at {
        Some(raw) => {
            let raw = required(&mut errors, "startsAt", "Start time", Some(raw));
            if raw.is_empty() {
                None
            } else {
                parse_timestamp(&mut errors, "startsAt", &raw)
            }
        }
        None => stored(&current.starts_at),
    };
    let ends_at = match p.ends_at {
        Some(raw) => clean(raw).and_then(|r| parse_timestamp(&mut errors, "endsAt", &r)),
        None => current.ends_at.as_deref().and_then(stored),
    };
    check_window(&mut errors, starts_at, ends_at);
    let description = p.description.map_or(current.description, clean);
    let location = p.location.map_or(current.location, clean);
    let is_public = p.is_public.unwrap_or(current.is_public);
    errors.into_result()?;
    let Some(starts_at) = starts_at else {
        return Err(AppError::BadParams("invalid startsAt".into()));
    };

    state.db.execute(
        "UPDATE events
         SET title = ?, description = ?, location = ?, starts_at = ?, ends_at = ?, is_public = ?
         WHERE id = ?",
        (
            &title,
            &description,
            &location,
            stamp(starts_at),
            ends_at.map(stamp),
            is_public,
            &event_id,
        ),
    )?;
    tracing::info!(event_id = %event_id, is_public, "event updated");

    Ok(json!({ "event": load_event(&state.db, &event_id)? }))
}

fn handle_delete(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: EventIdParams = parse_params(params)?;
    let event_id = require_id(p.event_id, "eventId")?;
    let owner = load_owner(&state.db, &event_id)?;
    authorize(actor, Operation::Delete, Resource::Event(Some(&owner)))?;

    let tx = state.db.unchecked_transaction()?;
    let registrations = tx.execute("DELETE FROM event_registrations WHERE event_id = ?", [&event_id])?;
    tx.execute("DELETE FROM events WHERE id = ?", [&event_id])?;
    tx.commit()?;
    tracing::info!(event_id = %event_id, registrations, "event deleted");

    Ok(json!({ "eventId": event_id, "deleted": true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRow {
    id: String,
    event_id: String,
    user_id: String,
    user_name: String,
    created_at: String,
}

const REGISTRATION_SELECT: &str = "SELECT r.id, r.event_id, r.user_id, u.name, r.created_at
     FROM event_registrations r
     JOIN users u ON u.id = r.user_id";

fn registration_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RegistrationRow> {
    Ok(RegistrationRow {
        id: r.get(0)?,
        event_id: r.get(1)?,
        user_id: r.get(2)?,
        user_name: r.get(3)?,
        created_at: r.get(4)?,
    })
}

fn handle_register(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: EventIdParams = parse_params(params)?;
    let event_id = require_id(p.event_id, "eventId")?;
    let owner = load_owner(&state.db, &event_id)?;
    authorize(
        actor,
        Operation::Create,
        Resource::Registration {
            event: &owner,
            user_id: &actor.user_id,
        },
    )?;

    let registration_id = db::new_id();
    state.db.execute(
        "INSERT INTO event_registrations(id, event_id, user_id, created_at) VALUES(?, ?, ?, ?)",
        (&registration_id, &event_id, &actor.user_id, db::now()),
    )?;
    tracing::info!(event_id = %event_id, user = %actor.user_id, "registered for event");

    let registration = state.db.query_row(
        &format!("{REGISTRATION_SELECT} WHERE r.id = ?"),
        [&registration_id],
        registration_row,
    )?;
    Ok(json!({ "registration": registration }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnregisterParams {
    event_id: Option<String>,
    user_id: Option<String>,
}

fn handle_unregister(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: UnregisterParams = parse_params(params)?;
    let event_id = require_id(p.event_id, "eventId")?;
    let user_id = clean(p.user_id).unwrap_or_else(|| actor.user_id.clone());
    let owner = load_owner(&state.db, &event_id)?;
    authorize(
        actor,
        Operation::Delete,
        Resource::Registration {
            event: &owner,
            user_id: &user_id,
        },
    )?;

    let removed = state.db.execute(
        "DELETE FROM event_registrations WHERE event_id = ? AND user_id = ?",
        (&event_id, &user_id),
    )?;
    if removed == 0 {
        return Err(AppError::not_found("Registration"));
    }
    tracing::info!(event_id = %event_id, user = %user_id, "registration removed");
    Ok(json!({ "eventId": event_id, "userId": user_id, "deleted": true }))
}

/// Organizer and ADMIN see every registration; anyone else only their own.
fn handle_registrations(
    state: &AppState,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let p: EventIdParams = parse_params(params)?;
    let event_id = require_id(p.event_id, "eventId")?;
    let owner = load_owner(&state.db, &event_id)?;
    authorize(
        actor,
        Operation::ReadList,
        Resource::Registration {
            event: &owner,
            user_id: &actor.user_id,
        },
    )?;

    let mut filter = ScopedFilter::default().and("r.event_id = ?", event_id.as_str());
    if !(actor.is_admin() || owner.organizer_id == actor.user_id) {
        filter = filter.and("r.user_id = ?", actor.user_id.as_str());
    }
    let mut stmt = state.db.prepare(&format!(
        "{REGISTRATION_SELECT} WHERE {} ORDER BY r.created_at, r.id",
        filter.where_sql()
    ))?;
    let registrations = stmt
        .query_map(params_from_iter(filter.args()), registration_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "registrations": registrations }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "events.create" => handle_create,
        "events.get" => handle_get,
        "events.list" => handle_list,
        "events.update" => handle_update,
        "events.delete" => handle_delete,
        "events.register" => handle_register,
        "events.unregister" => handle_unregister,
        "events.registrations" => handle_registrations,
        _ => return None,
    };
    Some(dispatch(state, req, handler))
}
