//! HTTP request handlers.

pub mod admin;
pub mod cleanup;
pub mod uploads;

pub use admin::*;
pub use cleanup::*;
pub use uploads::*;
