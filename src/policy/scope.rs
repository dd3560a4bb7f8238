//! Row scopes for list queries.
//!
//! A scope is computed from the session first; the caller's filter only ever
//! refines it. Filter fields that a scope pins (a parent's `parentId`, a
//! student's `studentId`, a teacher's `teacherId`) are replaced with the
//! session-derived value, never trusted from the request.
//!
//! SQL fragments assume the aliases `s` (students), `c` (classes) and
//! `p` (parents).

use super::{Actor, ClassOwner, ParentOwner, Profile, StudentOwner};

/// Students (and their grades and attendance) an actor may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentScope {
    All,
    TeacherClasses(String),
    ParentChildren(String),
    OnlyStudent(String),
    Nothing,
}

pub fn student_scope(actor: &Actor) -> StudentScope {
    match &actor.profile {
        Profile::Admin => StudentScope::All,
        Profile::Teacher(Some(id)) => StudentScope::TeacherClasses(id.clone()),
        Profile::Parent(Some(id)) => StudentScope::ParentChildren(id.clone()),
        Profile::Student(Some(id)) => StudentScope::OnlyStudent(id.clone()),
        Profile::Teacher(None) | Profile::Parent(None) | Profile::Student(None) => {
            StudentScope::Nothing
        }
    }
}

impl StudentScope {
    pub fn contains(&self, owner: &StudentOwner) -> bool {
        match self {
            StudentScope::All => true,
            StudentScope::TeacherClasses(t) => owner.teacher_id.as_deref() == Some(t.as_str()),
            StudentScope::ParentChildren(p) => owner.parent_id.as_deref() == Some(p.as_str()),
            StudentScope::OnlyStudent(s) => owner.student_id == *s,
            StudentScope::Nothing => false,
        }
    }
}

/// Classes an actor may list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassScope {
    All,
    TaughtBy(String),
    Nothing,
}

pub fn class_scope(actor: &Actor) -> ClassScope {
    match &actor.profile {
        Profile::Teacher(Some(id)) => ClassScope::TaughtBy(id.clone()),
        Profile::Teacher(None) => ClassScope::Nothing,
        Profile::Admin | Profile::Parent(_) | Profile::Student(_) => ClassScope::All,
    }
}

impl ClassScope {
    pub fn contains(&self, owner: &ClassOwner) -> bool {
        match self {
            ClassScope::All => true,
            ClassScope::TaughtBy(t) => owner.teacher_id.as_deref() == Some(t.as_str()),
            ClassScope::Nothing => false,
        }
    }
}

/// Parent profiles an actor may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentScope {
    All,
    OnlySelf(String),
    OfTeacher(String),
    Nothing,
}

pub fn parent_scope(actor: &Actor) -> ParentScope {
    match &actor.profile {
        Profile::Admin => ParentScope::All,
        Profile::Parent(Some(id)) => ParentScope::OnlySelf(id.clone()),
        Profile::Teacher(Some(id)) => ParentScope::OfTeacher(id.clone()),
        Profile::Parent(None) | Profile::Teacher(None) | Profile::Student(_) => ParentScope::Nothing,
    }
}

impl ParentScope {
    pub fn contains(&self, owner: &ParentOwner) -> bool {
        match self {
            ParentScope::All => true,
            ParentScope::OnlySelf(p) => owner.parent_id == *p,
            ParentScope::OfTeacher(t) => owner.teacher_ids.iter().any(|id| id == t),
            ParentScope::Nothing => false,
        }
    }

    pub fn narrow(&self) -> ScopedFilter {
        let mut f = ScopedFilter::default();
        match self {
            ParentScope::All => {}
            ParentScope::OnlySelf(p) => f.push("p.id = ?", p),
            ParentScope::OfTeacher(t) => f.push(
                "EXISTS (SELECT 1 FROM students s JOIN classes c ON c.id = s.class_id
                         WHERE s.parent_id = p.id AND c.teacher_id = ?)",
                t,
            ),
            ParentScope::Nothing => f.deny(),
        }
        f
    }
}

/// A parameterised `WHERE` clause: scope first, then caller refinements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedFilter {
    clauses: Vec<&'static str>,
    args: Vec<String>,
}

impl ScopedFilter {
    fn push(&mut self, clause: &'static str, arg: &str) {
        self.clauses.push(clause);
        self.args.push(arg.to_string());
    }

    fn deny(&mut self) {
        self.clauses.push("0 = 1");
    }

    /// Adds a caller refinement. Refinements can only shrink the result.
    pub fn and(mut self, clause: &'static str, arg: impl Into<String>) -> Self {
        self.clauses.push(clause);
        self.args.push(arg.into());
        self
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Caller-supplied refinements for student-scoped lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentFilter {
    pub class_id: Option<String>,
    pub parent_id: Option<String>,
    pub student_id: Option<String>,
}

impl StudentFilter {
    pub fn narrow(self, scope: &StudentScope) -> ScopedFilter {
        let mut f = ScopedFilter::default();
        let mut filter = self;
        match scope {
            StudentScope::All => {}
            StudentScope::TeacherClasses(t) => f.push("c.teacher_id = ?", t),
            StudentScope::ParentChildren(p) => {
                if filter.parent_id.as_deref().is_some_and(|v| v != p) {
                    tracing::warn!(requested = ?filter.parent_id, "ignoring parentId outside session scope");
                }
                filter.parent_id = None;
                f.push("s.parent_id = ?", p);
            }
            StudentScope::OnlyStudent(s) => {
                if filter.student_id.as_deref().is_some_and(|v| v != s) {
                    tracing::warn!(requested = ?filter.student_id, "ignoring studentId outside session scope");
                }
                filter.student_id = None;
                f.push("s.id = ?", s);
            }
            StudentScope::Nothing => f.deny(),
        }
        if let Some(v) = filter.class_id {
            f = f.and("s.class_id = ?", v);
        }
        if let Some(v) = filter.parent_id {
            f = f.and("s.parent_id = ?", v);
        }
        if let Some(v) = filter.student_id {
            f = f.and("s.id = ?", v);
        }
        f
    }
}

/// Caller-supplied refinements for class lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassFilter {
    pub teacher_id: Option<String>,
}

impl ClassFilter {
    pub fn narrow(self, scope: &ClassScope) -> ScopedFilter {
        let mut f = ScopedFilter::default();
        match scope {
            ClassScope::All => {
                if let Some(t) = self.teacher_id {
                    f = f.and("c.teacher_id = ?", t);
                }
            }
            ClassScope::TaughtBy(t) => {
                if self.teacher_id.as_deref().is_some_and(|v| v != t) {
                    tracing::warn!(requested = ?self.teacher_id, "ignoring teacherId outside session scope");
                }
                f.push("c.teacher_id = ?", t);
            }
            ClassScope::Nothing => f.deny(),
        }
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(profile: Profile) -> Actor {
        Actor::new("u1", profile)
    }

    #[test]
    fn parent_supplied_parent_id_is_overridden() {
        let scope = student_scope(&actor(Profile::Parent(Some("p-me".into()))));
        let f = StudentFilter {
            parent_id: Some("p-other".into()),
            ..Default::default()
        }
        .narrow(&scope);
        assert_eq!(f.where_sql(), "s.parent_id = ?");
        assert_eq!(f.args(), ["p-me".to_string()]);
    }

    #[test]
    fn parent_student_filter_is_intersected_not_replaced() {
        let scope = student_scope(&actor(Profile::Parent(Some("p-me".into()))));
        let f = StudentFilter {
            student_id: Some("someone-elses-child".into()),
            ..Default::default()
        }
        .narrow(&scope);
        assert_eq!(f.where_sql(), "s.parent_id = ? AND s.id = ?");
        assert_eq!(
            f.args(),
            ["p-me".to_string(), "someone-elses-child".to_string()]
        );
    }

    #[test]
    fn student_sees_only_self_whatever_the_filter() {
        let scope = student_scope(&actor(Profile::Student(Some("s-me".into()))));
        let f = StudentFilter {
            student_id: Some("s-other".into()),
            class_id: Some("c1".into()),
            ..Default::default()
        }
        .narrow(&scope);
        assert_eq!(f.where_sql(), "s.id = ? AND s.class_id = ?");
        assert_eq!(f.args(), ["s-me".to_string(), "c1".to_string()]);
    }

    #[test]
    fn teacher_scope_applies_before_class_refinement() {
        let scope = student_scope(&actor(Profile::Teacher(Some("t1".into()))));
        let f = StudentFilter {
            class_id: Some("c9".into()),
            ..Default::default()
        }
        .narrow(&scope);
        assert_eq!(f.where_sql(), "c.teacher_id = ? AND s.class_id = ?");
    }

    #[test]
    fn missing_profile_denies_everything() {
        let f = StudentFilter::default().narrow(&student_scope(&actor(Profile::Student(None))));
        assert_eq!(f.where_sql(), "0 = 1");
        let c = ClassFilter::default().narrow(&class_scope(&actor(Profile::Teacher(None))));
        assert_eq!(c.where_sql(), "0 = 1");
    }

    #[test]
    fn admin_filter_passes_through() {
        let f = StudentFilter {
            parent_id: Some("p1".into()),
            ..Default::default()
        }
        .narrow(&student_scope(&actor(Profile::Admin)));
        assert_eq!(f.where_sql(), "s.parent_id = ?");
        assert_eq!(f.args(), ["p1".to_string()]);
        assert_eq!(StudentFilter::default().narrow(&StudentScope::All).where_sql(), "1 = 1");
    }

    #[test]
    fn teacher_class_filter_pins_own_id() {
        let f = ClassFilter {
            teacher_id: Some("t-other".into()),
        }
        .narrow(&ClassScope::TaughtBy("t-me".into()));
        assert_eq!(f.args(), ["t-me".to_string()]);
    }

    #[test]
    fn refinements_append() {
        let f = StudentFilter::default()
            .narrow(&StudentScope::All)
            .and("a.date >= ?", "2024-01-01");
        assert_eq!(f.where_sql(), "a.date >= ?");
        assert_eq!(f.args().len(), 1);
    }
}
