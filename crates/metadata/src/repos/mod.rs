//! Repository traits grouped by concern.

pub mod audit;
pub mod projects;

pub use audit::AuditRepo;
pub use projects::ProjectRepo;
