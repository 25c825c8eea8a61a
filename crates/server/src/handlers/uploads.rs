//! Image upload and deletion endpoints.

use crate::audit::AuditEvent;
use crate::auth::AdminIdentity;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{IMAGES_UPLOADED, record_upload_error};
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::{Extension, Json};
use bytes::Bytes;
use serde::Serialize;
use vitrine_core::AuditAction;
use vitrine_storage::{StorageError, UploadResult};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: &'static str,
    pub data: UploadResult,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: &'static str,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("invalid multipart body: {e}"))
}

fn upload_error_type(err: &StorageError) -> &'static str {
    match err {
        StorageError::Rejected(vitrine_core::Error::FileTooLarge { .. }) => "too_large",
        StorageError::Rejected(_) => "rejected",
        StorageError::Image(_) => "decode",
        _ => "storage",
    }
}

/// POST /v1/uploads/images - Upload an image and its thumbnail.
///
/// Multipart fields: `image` (file, required) and `folder` (text, optional).
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut image: Option<(String, Bytes)> = None;
    let mut folder: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("image field must be a file".into()))?;
                let data = field.bytes().await.map_err(multipart_error)?;
                image = Some((filename, data));
            }
            Some("folder") => {
                folder = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let Some((filename, data)) = image else {
        record_upload_error("missing_file");
        return Err(ApiError::BadRequest("no image file provided".into()));
    };

    let result = match state
        .images
        .upload_image(data, &filename, folder.as_deref())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            record_upload_error(upload_error_type(&e));
            return Err(e.into());
        }
    };
    IMAGES_UPLOADED.inc();

    state.audit.record(
        AuditEvent::image(identity.actor, AuditAction::ImageUpload)
            .with_key(result.key.clone())
            .with_details(serde_json::json!({
                "filename": filename,
                "thumbnail_key": result.thumbnail_key,
            }))
            .with_user_agent(identity.user_agent),
    );

    Ok(Json(UploadResponse {
        success: true,
        message: "Image uploaded successfully",
        data: result,
    }))
}

/// DELETE /v1/uploads/images/{*key} - Delete an image and its thumbnail.
pub async fn delete_image(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(key): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(ApiError::BadRequest("image key is required".into()));
    }

    state.images.delete_image(key).await?;

    state.audit.record(
        AuditEvent::image(identity.actor, AuditAction::ImageDelete)
            .with_key(key)
            .with_user_agent(identity.user_agent),
    );

    Ok(Json(DeleteResponse {
        success: true,
        message: "Image deleted successfully",
    }))
}
