//! Audit trail vocabulary.

use serde::{Deserialize, Serialize};

/// Actions recorded in the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// An image and its thumbnail were uploaded.
    ImageUpload,
    /// An image and its thumbnail were deleted on request.
    ImageDelete,
    /// A cleanup run deleted orphaned images.
    ImageCleanup,
    /// A cleanup run reported orphans without deleting them.
    ImageCleanupDryRun,
}

impl AuditAction {
    /// Stable string stored in the `action` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageUpload => "IMAGE_UPLOAD",
            Self::ImageDelete => "IMAGE_DELETE",
            Self::ImageCleanup => "IMAGE_CLEANUP",
            Self::ImageCleanupDryRun => "IMAGE_CLEANUP_DRY_RUN",
        }
    }

    /// Parse a stored action string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IMAGE_UPLOAD" => Some(Self::ImageUpload),
            "IMAGE_DELETE" => Some(Self::ImageDelete),
            "IMAGE_CLEANUP" => Some(Self::ImageCleanup),
            "IMAGE_CLEANUP_DRY_RUN" => Some(Self::ImageCleanupDryRun),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_column_value() {
        for action in [
            AuditAction::ImageUpload,
            AuditAction::ImageDelete,
            AuditAction::ImageCleanup,
            AuditAction::ImageCleanupDryRun,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
    }
}
