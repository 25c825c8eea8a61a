//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cron expression for the cleanup scheduler: every day at 03:00.
pub const DEFAULT_CLEANUP_SCHEDULE: &str = "0 3 * * *";

/// Default key prefix managed by the cleanup job.
pub const DEFAULT_CLEANUP_PREFIX: &str = "projects/";

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum request body size in bytes. Must leave room for multipart
    /// framing on top of `media.max_upload_bytes`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    12 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Admin token configuration.
///
/// Administrative endpoints (cleanup trigger, uploads, audit log) accept a
/// bearer token whose SHA-256 digest matches `token_hash`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters,
    /// optionally prefixed with `sha256:`).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** SHA256 of "vitrine-test-admin".
    pub fn for_testing() -> Self {
        Self {
            token_hash: "3086bab8f5c67c23f7bf773314d1be52d016fc83d06629959fd48c6ea555579e"
                .to_string(),
        }
    }

    /// Return the normalized (lowercase, unprefixed) token hash.
    pub fn normalized_hash(&self) -> String {
        self.token_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.token_hash)
            .to_lowercase()
    }

    /// Validate that the hash looks like a SHA-256 hex digest.
    pub fn validate(&self) -> Result<(), String> {
        let hash = self.normalized_hash();
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("invalid admin token_hash: expected 64 hex chars".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage (AWS S3, Cloudflare R2, MinIO).
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// Cloudflare account ID. When set and `endpoint` is not, the endpoint
        /// becomes `https://{account_id}.r2.cloudflarestorage.com` and the
        /// region defaults to `auto`.
        account_id: Option<String>,
        /// Region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars over storing secrets in config files.
        access_key_id: Option<String>,
        /// Secret access key.
        /// WARNING: Prefer env vars over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }

    /// Resolve the endpoint and region to use for an S3 backend.
    ///
    /// An explicit endpoint wins; otherwise an R2 account ID maps to the
    /// account's R2 endpoint.
    pub fn resolved_s3_endpoint(&self) -> Option<(Option<String>, Option<String>)> {
        match self {
            StorageConfig::S3 {
                endpoint,
                account_id,
                region,
                ..
            } => {
                let r2_endpoint = account_id
                    .as_ref()
                    .filter(|id| !id.is_empty())
                    .map(|id| format!("https://{id}.r2.cloudflarestorage.com"));
                match (endpoint.clone(), r2_endpoint) {
                    (Some(endpoint), _) => Some((Some(endpoint), region.clone())),
                    (None, Some(r2)) => Some((
                        Some(r2),
                        Some(region.clone().unwrap_or_else(|| "auto".to_string())),
                    )),
                    (None, None) => Some((None, region.clone())),
                }
            }
            StorageConfig::Filesystem { .. } => None,
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and small deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL.
        /// WARNING: Prefer VITRINE_METADATA__URL over storing credentials in config.
        url: String,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                max_connections,
            } => {
                if url.trim().is_empty() {
                    return Err("postgres config requires a non-empty 'url'".to_string());
                }
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Image upload and public URL configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Public base URL under which stored objects are served
    /// (e.g. "https://images.example.com"). Image references stored in the
    /// database are `{public_url}/{key}`.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Accepted file extensions (lowercase, with leading dot).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Folder used when an upload does not name one.
    #[serde(default = "default_folder")]
    pub default_folder: String,
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_folder() -> String {
    "projects".to_string()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
            default_folder: default_folder(),
        }
    }
}

impl MediaConfig {
    /// The configured public URL, if non-empty.
    pub fn public_url(&self) -> Option<&str> {
        self.public_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Validate media configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = self.public_url() {
            crate::image_key::PublicBaseUrl::parse(url)
                .map_err(|e| format!("media.public_url: {e}"))?;
        }
        if self.max_upload_bytes == 0 {
            return Err("media.max_upload_bytes must be greater than 0".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("media.allowed_extensions cannot be empty".to_string());
        }
        crate::image_key::validate_folder(&self.default_folder)
            .map_err(|e| format!("media.default_folder: {e}"))?;
        Ok(())
    }
}

/// Orphaned image cleanup configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Run the cleanup job on a schedule (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
    /// Cron expression. Five-field Unix expressions are accepted; an invalid
    /// expression falls back to [`DEFAULT_CLEANUP_SCHEDULE`] at startup.
    #[serde(default = "default_cleanup_schedule")]
    pub schedule: String,
    /// IANA timezone the schedule is evaluated in (default: UTC).
    #[serde(default)]
    pub timezone: Option<String>,
    /// Key prefix whose objects are reconciled.
    #[serde(default = "default_cleanup_prefix")]
    pub prefix: String,
    /// Default timeout for on-demand runs, in seconds. When it elapses the
    /// run stops issuing deletes and returns what it has done so far.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Orphans modified more recently than this are left alone (default: 0,
    /// disabled). Protects uploads whose owning record is not yet committed.
    #[serde(default)]
    pub min_orphan_age_secs: u64,
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_cleanup_schedule() -> String {
    DEFAULT_CLEANUP_SCHEDULE.to_string()
}

fn default_cleanup_prefix() -> String {
    DEFAULT_CLEANUP_PREFIX.to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            schedule: default_cleanup_schedule(),
            timezone: None,
            prefix: default_cleanup_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
            min_orphan_age_secs: 0,
        }
    }
}

impl CleanupConfig {
    /// Default on-demand timeout as a std Duration.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate cleanup configuration.
    ///
    /// The schedule itself is not validated here: an unparsable expression
    /// is logged and replaced by the default when the scheduler starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.prefix.trim().is_empty() {
            return Err(
                "cleanup.prefix cannot be empty (it would reconcile the whole bucket)".to_string(),
            );
        }
        if self.request_timeout_secs == 0 {
            return Err("cleanup.request_timeout_secs must be greater than 0".to_string());
        }
        if self.min_orphan_age_secs > i64::MAX as u64 {
            return Err(format!(
                "cleanup.min_orphan_age_secs {} exceeds maximum value {}",
                self.min_orphan_age_secs,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Audit trail configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Capacity of the bounded audit write queue. Events submitted while the
    /// queue is full are dropped and logged.
    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_audit_queue_capacity() -> usize {
    256
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_audit_queue_capacity(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    /// Upload and public URL configuration.
    #[serde(default)]
    pub media: MediaConfig,
    /// Orphaned image cleanup configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Audit trail configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// a dummy admin token and `https://images.test` as the public URL.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            media: MediaConfig {
                public_url: Some("https://images.test".to_string()),
                ..MediaConfig::default()
            },
            cleanup: CleanupConfig::default(),
            audit: AuditConfig::default(),
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.admin.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.media.validate()?;
        self.cleanup.validate()?;
        if self.audit.queue_capacity == 0 {
            return Err("audit.queue_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}
