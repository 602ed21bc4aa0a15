pub mod assignments;
pub mod attendance;
pub mod catalog;
pub mod core;
pub mod enrollments;
pub mod gradebook;
pub mod roster;
