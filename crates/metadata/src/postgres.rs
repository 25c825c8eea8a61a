//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    AuditLogQuery, AuditLogRow, NewAuditLog, NewProject, ProjectRow, decode_images,
};
use crate::repos::{AuditRepo, ProjectRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::instrument;

const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    -- JSON array of public image URLs
    images TEXT NOT NULL DEFAULT '[]',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    audit_log_id BIGSERIAL PRIMARY KEY,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_key TEXT,
    details TEXT NOT NULL DEFAULT '{}',
    user_agent TEXT,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action);
CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at);
"#;

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL and apply the schema.
    pub async fn from_url(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectRepo for PostgresStore {
    async fn create_project(&self, project: &NewProject) -> MetadataResult<ProjectRow> {
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (title, slug, images, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
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
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_id = $1")
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
            sqlx::query("UPDATE projects SET images = $1, updated_at = $2 WHERE project_id = $3")
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
        let result = sqlx::query("DELETE FROM projects WHERE project_id = $1")
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
impl AuditRepo for PostgresStore {
    async fn insert_audit_log(&self, entry: &NewAuditLog) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_logs (actor, action, entity_type, entity_key, details, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
        let rows = match query.like_pattern() {
            Some(pattern) => {
                let sql = format!(
                    "SELECT * FROM audit_logs {AUDIT_SEARCH_FILTER} ORDER BY audit_log_id DESC LIMIT $2 OFFSET $3"
                );
                sqlx::query_as::<_, AuditLogRow>(&sql)
                    .bind(pattern)
                    .bind(i64::from(query.limit))
                    .bind(query.offset_i64())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, AuditLogRow>(
                    "SELECT * FROM audit_logs ORDER BY audit_log_id DESC LIMIT $1 OFFSET $2",
                )
                .bind(i64::from(query.limit))
                .bind(query.offset_i64())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn count_audit_logs(&self, query: &AuditLogQuery) -> MetadataResult<u64> {
        let total: i64 = match query.like_pattern() {
            Some(pattern) => {
                let sql = format!("SELECT COUNT(*) FROM audit_logs {AUDIT_SEARCH_FILTER}");
                sqlx::query_scalar(&sql)
                    .bind(pattern)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

/// Search filter over audit entries, bound to `$1`.
const AUDIT_SEARCH_FILTER: &str = r"WHERE action ILIKE $1 ESCAPE '\' OR entity_type ILIKE $1 ESCAPE '\' OR entity_key ILIKE $1 ESCAPE '\' OR details ILIKE $1 ESCAPE '\'";
