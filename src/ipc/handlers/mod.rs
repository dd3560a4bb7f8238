pub mod attendance;
pub mod classes;
pub mod core;
pub mod events;
pub mod grades;
pub mod messages;
pub mod parents;
pub mod students;
pub mod teachers;
pub mod users;
