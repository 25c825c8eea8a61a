//! Storage key rules for uploaded images.
//!
//! An upload produces two objects:
//!
//! ```text
//! {folder}/{YYYY}/{MM}/{uuid}{ext}        main variant
//! {folder}/{YYYY}/{MM}/{uuid}_thumb{ext}  thumbnail
//! ```
//!
//! The thumbnail key is always derivable from the main key by inserting
//! [`THUMBNAIL_SUFFIX`](crate::THUMBNAIL_SUFFIX) before the **first** `.` of
//! the whole key. Keys already in storage were written under this rule, so
//! it must not change to a last-dot rule. Folders containing a `.` are
//! rejected at upload time to keep the two forms in agreement.

use crate::THUMBNAIL_SUFFIX;
use crate::error::{Error, Result};
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

/// Derive the thumbnail key for a main image key.
///
/// A key without any `.` is returned unchanged.
pub fn thumbnail_key(key: &str) -> String {
    key.replacen('.', &format!("{THUMBNAIL_SUFFIX}."), 1)
}

/// Normalized public base URL (no trailing slash).
///
/// Image references stored in the database have the form `{base}/{key}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicBaseUrl(String);

impl PublicBaseUrl {
    /// Parse a configured base URL. Must be an absolute http(s) URL with a host.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let lower = trimmed.to_ascii_lowercase();
        let host = lower
            .strip_prefix("https://")
            .or_else(|| lower.strip_prefix("http://"));
        match host {
            Some(host) if !host.is_empty() => Ok(Self(trimmed.to_string())),
            _ => Err(Error::InvalidPublicUrl(format!(
                "expected an absolute http(s) URL, got '{url}'"
            ))),
        }
    }

    /// The base URL without trailing slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public URL for a storage key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.0, key)
    }

    /// Recover the storage key from a public URL.
    ///
    /// Returns `None` when the URL is not served from this base, or when
    /// nothing is left after the base is stripped.
    pub fn key_for<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
    }
}

impl std::fmt::Display for PublicBaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the set of storage keys referenced by a collection of image URLs.
///
/// Each recovered key contributes itself and its thumbnail key. URLs that
/// don't belong to `base` are skipped without error: an unknown reference
/// must never cause an in-use object to look orphaned.
pub fn collect_in_use_keys<I, S>(base: &PublicBaseUrl, urls: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut keys = HashSet::new();
    for url in urls {
        let Some(key) = base.key_for(url.as_ref()) else {
            continue;
        };
        keys.insert(thumbnail_key(key));
        keys.insert(key.to_string());
    }
    keys
}

/// Validate an upload folder name.
///
/// Folders are `/`-separated segments of ASCII letters, digits, `-` and `_`.
/// A `.` anywhere would break thumbnail derivation, so it is rejected.
pub fn validate_folder(folder: &str) -> Result<()> {
    if folder.is_empty() {
        return Err(Error::InvalidFolder("folder cannot be empty".to_string()));
    }
    for segment in folder.split('/') {
        if segment.is_empty() {
            return Err(Error::InvalidFolder(format!(
                "'{folder}' contains an empty path segment"
            )));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidFolder(format!(
                "'{folder}' may only contain letters, digits, '-', '_' and '/'"
            )));
        }
    }
    Ok(())
}

/// Lowercased extension of a file name, including the leading dot.
pub fn file_extension(filename: &str) -> Result<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => Ok(name[idx..].to_ascii_lowercase()),
        _ => Err(Error::InvalidFileName(format!(
            "'{filename}' has no file extension"
        ))),
    }
}

/// Storage keys for a newly uploaded image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadKeys {
    /// Key of the main (resized) variant.
    pub key: String,
    /// Key of the thumbnail variant.
    pub thumbnail_key: String,
}

impl UploadKeys {
    /// Generate keys for an upload into `folder` with extension `ext`.
    pub fn generate(folder: &str, ext: &str) -> Result<Self> {
        Self::generate_at(folder, ext, OffsetDateTime::now_utc(), Uuid::new_v4())
    }

    /// Generate keys for a fixed timestamp and id.
    pub fn generate_at(folder: &str, ext: &str, at: OffsetDateTime, id: Uuid) -> Result<Self> {
        validate_folder(folder)?;
        let dir = format!("{folder}/{:04}/{:02}", at.year(), u8::from(at.month()));
        Ok(Self {
            key: format!("{dir}/{id}{ext}"),
            thumbnail_key: format!("{dir}/{id}{THUMBNAIL_SUFFIX}{ext}"),
        })
    }
}
