//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    AuditLogQuery, AuditLogRow, NewAuditLog, NewProject, ProjectRow, decode_images,
};
use crate::repos::{AuditRepo, ProjectRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ProjectRepo + AuditRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a single
        // connection avoids "database is locked" under concurrent requests.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool. Subsequent queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectRepo for SqliteStore {
    async fn create_project(&self, project: &NewProject) -> MetadataResult<ProjectRow> {
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (title, slug, images, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&project.title)
        .bind(&project.slug)
        .bind(serde_json::to_string(&project.images)?)
        .bind(project.is_active)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_project(&self, project_id: i64) -> MetadataResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_project_images(
        &self,
        project_id: i64,
        images: &[String],
    ) -> MetadataResult<()> {
        let result =
            sqlx::query("UPDATE projects SET images = ?, updated_at = ? WHERE project_id = ?")
                .bind(serde_json::to_string(images)?)
                .bind(OffsetDateTime::now_utc())
                .bind(project_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("project {project_id}")));
        }
        Ok(())
    }

    async fn delete_project(&self, project_id: i64) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("project {project_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_project_images(&self) -> MetadataResult<Vec<Vec<String>>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT project_id, images FROM projects ORDER BY project_id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|(project_id, images)| decode_images(*project_id, images))
            .collect()
    }
}

#[async_trait]
impl AuditRepo for SqliteStore {
    async fn insert_audit_log(&self, entry: &NewAuditLog) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_logs (actor, action, entity_type, entity_key, details, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING audit_log_id
            "#,
        )
        .bind(&entry.actor)
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_key)
        .bind(entry.details.to_string())
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list_audit_logs(&self, query: &AuditLogQuery) -> MetadataResult<Vec<AuditLogRow>> {
        let pattern = query.like_pattern();
        let filter = if pattern.is_some() { AUDIT_SEARCH_FILTER } else { "" };
        let sql =
            format!("SELECT * FROM audit_logs {filter} ORDER BY audit_log_id DESC LIMIT ? OFFSET ?");
        let mut rows = sqlx::query_as::<_, AuditLogRow>(&sql);
        if let Some(pattern) = &pattern {
            for _ in 0..AUDIT_SEARCH_BINDS {
                rows = rows.bind(pattern.as_str());
            }
        }
        let rows = rows
            .bind(i64::from(query.limit))
            .bind(query.offset_i64())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_audit_logs(&self, query: &AuditLogQuery) -> MetadataResult<u64> {
        let pattern = query.like_pattern();
        let filter = if pattern.is_some() { AUDIT_SEARCH_FILTER } else { "" };
        let sql = format!("SELECT COUNT(*) FROM audit_logs {filter}");
        let mut count = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(pattern) = &pattern {
            for _ in 0..AUDIT_SEARCH_BINDS {
                count = count.bind(pattern.as_str());
            }
        }
        let total = count.fetch_one(&self.pool).await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

/// Search filter over audit entries; every `?` binds the same pattern.
const AUDIT_SEARCH_FILTER: &str = r"WHERE action LIKE ? ESCAPE '\' OR entity_type LIKE ? ESCAPE '\' OR entity_key LIKE ? ESCAPE '\' OR details LIKE ? ESCAPE '\'";
const AUDIT_SEARCH_BINDS: usize = 4;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    images TEXT NOT NULL DEFAULT '[]',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    audit_log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_key TEXT,
    details TEXT NOT NULL DEFAULT '{}',
    user_agent TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action);
CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vitrine_core::AuditAction;

    async fn store() -> (SqliteStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("metadata.db")).await.unwrap();
        (store, temp)
    }

    fn project(slug: &str, images: &[&str]) -> NewProject {
        NewProject {
            title: format!("Project {slug}"),
            slug: slug.to_string(),
            images: images.iter().map(|s| s.to_string()).collect(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_project_crud() {
        let (store, _temp) = store().await;

        let row = store
            .create_project(&project("lobby", &["https://img/projects/a.jpg"]))
            .await
            .unwrap();
        assert_eq!(row.image_urls().unwrap(), vec!["https://img/projects/a.jpg"]);

        store
            .update_project_images(row.project_id, &["https://img/projects/b.jpg".to_string()])
            .await
            .unwrap();
        let fetched = store.get_project(row.project_id).await.unwrap().unwrap();
        assert_eq!(fetched.image_urls().unwrap(), vec!["https://img/projects/b.jpg"]);

        store.delete_project(row.project_id).await.unwrap();
        assert!(store.get_project(row.project_id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_project(row.project_id).await,
            Err(MetadataError::NotFound(_))
        ));
        assert!(matches!(
            store.update_project_images(row.project_id, &[]).await,
            Err(MetadataError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_project_images_includes_inactive() {
        let (store, _temp) = store().await;
        store.create_project(&project("a", &["u1", "u2"])).await.unwrap();
        let mut hidden = project("b", &["u3"]);
        hidden.is_active = false;
        store.create_project(&hidden).await.unwrap();
        store.create_project(&project("c", &[])).await.unwrap();

        let images = store.list_project_images().await.unwrap();
        assert_eq!(
            images,
            vec![vec!["u1".to_string(), "u2".to_string()], vec!["u3".to_string()], vec![]]
        );
    }

    #[tokio::test]
    async fn test_list_project_images_rejects_malformed_row() {
        let (store, _temp) = store().await;
        let row = store.create_project(&project("a", &["u1"])).await.unwrap();
        sqlx::query("UPDATE projects SET images = 'oops' WHERE project_id = ?")
            .bind(row.project_id)
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(
            store.list_project_images().await,
            Err(MetadataError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_log_insert_and_list() {
        let (store, _temp) = store().await;
        for action in [AuditAction::ImageUpload, AuditAction::ImageCleanup] {
            store
                .insert_audit_log(&NewAuditLog {
                    actor: "admin".to_string(),
                    action,
                    entity_type: "image".to_string(),
                    entity_key: Some("projects/a.jpg".to_string()),
                    details: serde_json::json!({ "deleted": 1 }),
                    user_agent: Some("curl/8".to_string()),
                    created_at: OffsetDateTime::now_utc(),
                })
                .await
                .unwrap();
        }

        let rows = store
            .list_audit_logs(&AuditLogQuery::latest(10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "IMAGE_CLEANUP");
        assert_eq!(rows[1].action, "IMAGE_UPLOAD");
        let details: serde_json::Value = serde_json::from_str(&rows[0].details).unwrap();
        assert_eq!(details["deleted"], 1);

        let newest = store
            .list_audit_logs(&AuditLogQuery::latest(1))
            .await
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(
            store.count_audit_logs(&AuditLogQuery::latest(1)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_audit_log_pages_and_search() {
        let (store, _temp) = store().await;
        for i in 0..5 {
            let action = if i % 2 == 0 {
                AuditAction::ImageUpload
            } else {
                AuditAction::ImageDelete
            };
            store
                .insert_audit_log(&NewAuditLog {
                    actor: "admin".to_string(),
                    action,
                    entity_type: "image".to_string(),
                    entity_key: Some(format!("projects/img_{i}.jpg")),
                    details: serde_json::json!({ "index": i }),
                    user_agent: None,
                    created_at: OffsetDateTime::now_utc(),
                })
                .await
                .unwrap();
        }

        let second_page = AuditLogQuery {
            limit: 2,
            offset: 2,
            search: None,
        };
        let rows = store.list_audit_logs(&second_page).await.unwrap();
        let keys: Vec<_> = rows.iter().filter_map(|r| r.entity_key.as_deref()).collect();
        assert_eq!(keys, ["projects/img_2.jpg", "projects/img_1.jpg"]);

        // LIKE is case-insensitive for ASCII.
        let deletes = AuditLogQuery {
            search: Some("image_delete".to_string()),
            ..AuditLogQuery::latest(10)
        };
        let rows = store.list_audit_logs(&deletes).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.action == "IMAGE_DELETE"));
        assert_eq!(store.count_audit_logs(&deletes).await.unwrap(), 2);

        let by_key = AuditLogQuery {
            search: Some("img_4".to_string()),
            ..AuditLogQuery::latest(10)
        };
        let rows = store.list_audit_logs(&by_key).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_key.as_deref(), Some("projects/img_4.jpg"));

        // Wildcards in the term match literally.
        let wildcard = AuditLogQuery {
            search: Some("img%4".to_string()),
            ..AuditLogQuery::latest(10)
        };
        assert_eq!(store.count_audit_logs(&wildcard).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_fails_queries() {
        let (store, _temp) = store().await;
        store.close().await;
        assert!(store.list_project_images().await.is_err());
        assert!(store.health_check().await.is_err());
    }
}
