//! Core domain types and shared logic for the vitrine image service.
//!
//! This crate defines the rules every other crate must agree on:
//! - Storage key layout for uploaded images and their thumbnails
//! - Mapping between public image URLs and storage keys
//! - Configuration shared by the server and its backends

pub mod audit;
pub mod config;
pub mod error;
pub mod image_key;

pub use audit::AuditAction;
pub use error::{Error, Result};
pub use image_key::{PublicBaseUrl, UploadKeys, collect_in_use_keys, thumbnail_key};

/// Suffix inserted before the first `.` of a key to name its thumbnail.
pub const THUMBNAIL_SUFFIX: &str = "_thumb";
