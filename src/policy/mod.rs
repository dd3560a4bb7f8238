//! Role-scoped authorization.
//!
//! Every feature handler asks two questions before touching the database:
//!
//! ```text
//! authorize(actor, operation, resource)   -> may this actor do this to that record?
//! *_scope(actor) + Filter::narrow(scope)  -> which rows may this actor list?
//! ```
//!
//! Both are pure functions of the [`Actor`] and the record's ownership chain.
//! Ownership chains are loaded fresh per request by `ownership`, never cached,
//! so a student moved to another class is re-scoped on the next call.
//!
//! | Resource   | Create / Update / Delete                         | Read                                      |
//! |------------|--------------------------------------------------|-------------------------------------------|
//! | Class      | ADMIN                                            | TEACHER own classes, everyone else all    |
//! | Student    | ADMIN                                            | [`StudentScope`]                          |
//! | Grade      | TEACHER of the student's class                   | [`StudentScope`]                          |
//! | Attendance | ADMIN, or TEACHER of the student's class         | [`StudentScope`]                          |
//! | Message    | any sender; receiver marks read; sender deletes  | sender or receiver                        |
//! | Event      | ADMIN/TEACHER create; organizer or ADMIN modify  | public, organizer, or ADMIN               |
//! | User       | ADMIN, never deleting themselves                 | ADMIN                                     |

mod error;
mod role;
mod scope;

pub use error::AccessDenied;
pub use role::{Actor, Profile, Role};
pub use scope::{
    class_scope, parent_scope, student_scope, ClassFilter, ParentScope, ScopedFilter,
    StudentFilter,
};
use scope::{ClassScope, StudentScope};

const NOT_AUTHORIZED: &str = "not authorized";
pub const NOT_YOUR_STUDENT: &str = "Student not found or not in your class";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    ReadList,
    Update,
    Delete,
}

impl Operation {
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Create | Operation::Update | Operation::Delete)
    }
}

/// Ownership chain of a class: who teaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassOwner {
    pub class_id: String,
    pub teacher_id: Option<String>,
}

/// Ownership chain of a student, and of every grade or attendance row hanging off it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentOwner {
    pub student_id: String,
    pub class_id: String,
    pub teacher_id: Option<String>,
    pub parent_id: Option<String>,
}

/// A parent profile and the teachers of its children's classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentOwner {
    pub parent_id: String,
    pub teacher_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOwner {
    pub sender_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOwner {
    pub event_id: String,
    pub organizer_id: String,
    pub is_public: bool,
}

/// The record (or, for creates and lists, the record kind) being acted on.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Class(Option<&'a ClassOwner>),
    Student(Option<&'a StudentOwner>),
    Teacher,
    Parent(Option<&'a ParentOwner>),
    Grade(Option<&'a StudentOwner>),
    Attendance(Option<&'a StudentOwner>),
    Message(Option<&'a MessageOwner>),
    Event(Option<&'a EventOwner>),
    Registration {
        event: &'a EventOwner,
        user_id: &'a str,
    },
    User(Option<&'a str>),
}

/// Decides whether `actor` may perform `op` on `resource`.
///
/// List operations return `Ok` for every role that has some scope and refuse
/// actors whose scope is empty; the rows themselves are narrowed by the
/// matching `*_scope` function.
pub fn authorize(actor: &Actor, op: Operation, resource: Resource<'_>) -> Result<(), AccessDenied> {
    match resource {
        Resource::Class(owner) => authorize_class(actor, op, owner),
        Resource::Student(owner) => {
            if op.is_write() {
                return require(actor.is_admin(), NOT_AUTHORIZED);
            }
            read_student_scoped(actor, op, owner)
        }
        Resource::Teacher => {
            if op.is_write() {
                return require(actor.is_admin(), NOT_AUTHORIZED);
            }
            Ok(())
        }
        Resource::Parent(owner) => authorize_parent(actor, op, owner),
        Resource::Grade(owner) => {
            if op.is_write() {
                return require(teaches(actor, owner), NOT_YOUR_STUDENT);
            }
            read_student_scoped(actor, op, owner)
        }
        Resource::Attendance(owner) => {
            if op.is_write() {
                return require(actor.is_admin() || teaches(actor, owner), NOT_YOUR_STUDENT);
            }
            read_student_scoped(actor, op, owner)
        }
        Resource::Message(owner) => authorize_message(actor, op, owner),
        Resource::Event(owner) => authorize_event(actor, op, owner),
        Resource::Registration { event, user_id } => authorize_registration(actor, op, event, user_id),
        Resource::User(target) => {
            require(actor.is_admin(), NOT_AUTHORIZED)?;
            if op == Operation::Delete && target == Some(actor.user_id.as_str()) {
                return Err(AccessDenied::forbidden("You cannot delete your own account"));
            }
            Ok(())
        }
    }
}

fn require(allowed: bool, reason: &str) -> Result<(), AccessDenied> {
    if allowed {
        Ok(())
    } else {
        Err(AccessDenied::forbidden(reason))
    }
}

fn teaches(actor: &Actor, owner: Option<&StudentOwner>) -> bool {
    match (actor.teacher_id(), owner.and_then(|o| o.teacher_id.as_deref())) {
        (Some(me), Some(theirs)) => me == theirs,
        _ => false,
    }
}

fn read_student_scoped(
    actor: &Actor,
    op: Operation,
    owner: Option<&StudentOwner>,
) -> Result<(), AccessDenied> {
    match op {
        Operation::ReadList => require(student_scope(actor) != StudentScope::Nothing, NOT_AUTHORIZED),
        _ => {
            let visible = owner.is_some_and(|o| student_scope(actor).contains(o));
            require(visible, NOT_AUTHORIZED)
        }
    }
}

fn authorize_class(
    actor: &Actor,
    op: Operation,
    owner: Option<&ClassOwner>,
) -> Result<(), AccessDenied> {
    match op {
        Operation::Create | Operation::Update | Operation::Delete => {
            require(actor.is_admin(), NOT_AUTHORIZED)
        }
        Operation::ReadList => require(class_scope(actor) != ClassScope::Nothing, NOT_AUTHORIZED),
        Operation::Read => {
            let visible = owner.is_some_and(|c| class_scope(actor).contains(c));
            require(visible, NOT_AUTHORIZED)
        }
    }
}

fn authorize_parent(
    actor: &Actor,
    op: Operation,
    owner: Option<&ParentOwner>,
) -> Result<(), AccessDenied> {
    if op.is_write() {
        return require(actor.is_admin(), NOT_AUTHORIZED);
    }
    let scope = parent_scope(actor);
    match op {
        Operation::ReadList => require(scope != ParentScope::Nothing, NOT_AUTHORIZED),
        _ => require(owner.is_some_and(|p| scope.contains(p)), NOT_AUTHORIZED),
    }
}

fn authorize_message(
    actor: &Actor,
    op: Operation,
    owner: Option<&MessageOwner>,
) -> Result<(), AccessDenied> {
    let me = actor.user_id.as_str();
    match op {
        Operation::Create | Operation::ReadList => Ok(()),
        Operation::Read => require(
            owner.is_some_and(|m| m.sender_id == me || m.receiver_id == me),
            NOT_AUTHORIZED,
        ),
        Operation::Update => require(owner.is_some_and(|m| m.receiver_id == me), NOT_AUTHORIZED),
        Operation::Delete => require(owner.is_some_and(|m| m.sender_id == me), NOT_AUTHORIZED),
    }
}

/// Whether `actor` may see `event` at all.
pub fn event_visible(actor: &Actor, event: &EventOwner) -> bool {
    event.is_public || actor.is_admin() || event.organizer_id == actor.user_id
}

fn authorize_event(
    actor: &Actor,
    op: Operation,
    owner: Option<&EventOwner>,
) -> Result<(), AccessDenied> {
    match op {
        Operation::Create => require(
            matches!(actor.role(), Role::Admin | Role::Teacher),
            NOT_AUTHORIZED,
        ),
        Operation::ReadList => Ok(()),
        Operation::Read => require(
            owner.is_some_and(|e| event_visible(actor, e)),
            "This event is private",
        ),
        Operation::Update | Operation::Delete => require(
            owner.is_some_and(|e| actor.is_admin() || e.organizer_id == actor.user_id),
            "Only the organizer or an admin can modify this event",
        ),
    }
}

fn authorize_registration(
    actor: &Actor,
    op: Operation,
    event: &EventOwner,
    user_id: &str,
) -> Result<(), AccessDenied> {
    let me = actor.user_id.as_str();
    let manages = actor.is_admin() || event.organizer_id == me;
    match op {
        Operation::Create => {
            require(event_visible(actor, event), "This event is private")?;
            require(user_id == me, "You can only register yourself")
        }
        Operation::ReadList => require(event_visible(actor, event), "This event is private"),
        Operation::Read | Operation::Delete => require(user_id == me || manages, NOT_AUTHORIZED),
        Operation::Update => Err(AccessDenied::forbidden(NOT_AUTHORIZED)),
    }
}
