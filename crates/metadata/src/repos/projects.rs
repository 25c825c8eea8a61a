//! Project repository.

use crate::error::MetadataResult;
use crate::models::{NewProject, ProjectRow};
use async_trait::async_trait;

/// Repository for projects and the image references they own.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Insert a project and return the stored row.
    async fn create_project(&self, project: &NewProject) -> MetadataResult<ProjectRow>;

    /// Get a project by ID.
    async fn get_project(&self, project_id: i64) -> MetadataResult<Option<ProjectRow>>;

    /// Replace a project's image list.
    async fn update_project_images(&self, project_id: i64, images: &[String])
    -> MetadataResult<()>;

    /// Delete a project.
    async fn delete_project(&self, project_id: i64) -> MetadataResult<()>;

    /// Image URL lists of every project, in project ID order.
    ///
    /// Fails if any stored list cannot be decoded: callers treat the result
    /// as the complete set of references.
    async fn list_project_images(&self) -> MetadataResult<Vec<Vec<String>>>;
}
