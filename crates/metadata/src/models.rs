//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use vitrine_core::AuditAction;

// =============================================================================
// Projects
// =============================================================================

/// Project record. `images` holds a JSON array of public image URLs.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub project_id: i64,
    pub title: String,
    pub slug: String,
    pub images: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ProjectRow {
    /// Decode the image URL list.
    pub fn image_urls(&self) -> MetadataResult<Vec<String>> {
        decode_images(self.project_id, &self.images)
    }
}

/// Fields for a new project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub title: String,
    pub slug: String,
    pub images: Vec<String>,
    pub is_active: bool,
}

/// Decode a stored image list. An empty column or a JSON `null` is an empty
/// list; anything else that is not a JSON string array is an error, never an
/// empty list.
pub(crate) fn decode_images(project_id: i64, raw: &str) -> MetadataResult<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        MetadataError::InvalidData(format!("project {project_id} has malformed images: {e}"))
    })
}

// =============================================================================
// Audit log
// =============================================================================

/// Audit log record.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub audit_log_id: i64,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_key: Option<String>,
    /// JSON object with action-specific details.
    pub details: String,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Fields for a new audit log entry.
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub actor: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_key: Option<String>,
    pub details: serde_json::Value,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Window and filter for listing audit entries, newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditLogQuery {
    pub limit: u32,
    pub offset: u64,
    /// Case-insensitive substring of the action, entity type, entity key or
    /// details.
    pub search: Option<String>,
}

impl AuditLogQuery {
    /// The `limit` most recent entries.
    pub fn latest(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// `LIKE` pattern for the search term, with wildcards in the term escaped
    /// using `\`.
    pub(crate) fn like_pattern(&self) -> Option<String> {
        let term = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let mut pattern = String::with_capacity(term.len() + 2);
        pattern.push('%');
        for c in term.chars() {
            if matches!(c, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Some(pattern)
    }

    pub(crate) fn offset_i64(&self) -> i64 {
        i64::try_from(self.offset).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_images() {
        assert!(decode_images(1, "").unwrap().is_empty());
        assert!(decode_images(1, "[]").unwrap().is_empty());
        assert_eq!(
            decode_images(1, r#"["https://a/x.jpg","https://a/y.jpg"]"#).unwrap(),
            vec!["https://a/x.jpg", "https://a/y.jpg"]
        );
        assert!(matches!(
            decode_images(7, "not json"),
            Err(MetadataError::InvalidData(msg)) if msg.contains("project 7")
        ));
        assert!(decode_images(1, r#"[1, 2]"#).is_err());
    }

    #[test]
    fn test_decode_images_null_is_empty() {
        assert!(decode_images(1, "null").unwrap().is_empty());
        assert!(decode_images(1, " null\n").unwrap().is_empty());
        assert!(decode_images(1, "NULL").is_err());
        assert!(decode_images(1, "{}").is_err());
        assert!(decode_images(1, "[null]").is_err());
    }

    #[test]
    fn test_audit_like_pattern() {
        let query = |search: Option<&str>| AuditLogQuery {
            search: search.map(str::to_string),
            ..AuditLogQuery::latest(10)
        };
        assert_eq!(query(None).like_pattern(), None);
        assert_eq!(query(Some("  ")).like_pattern(), None);
        assert_eq!(query(Some(" cleanup ")).like_pattern().unwrap(), "%cleanup%");
        assert_eq!(
            query(Some(r"100%_a\b")).like_pattern().unwrap(),
            r"%100\%\_a\\b%"
        );
    }
}
