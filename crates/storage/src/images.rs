//! Image upload pipeline.
//!
//! Every upload is stored twice: a main variant scaled down to fit
//! [`MAIN_MAX_WIDTH`]x[`MAIN_MAX_HEIGHT`] and a [`THUMB_WIDTH`]x[`THUMB_HEIGHT`]
//! centre-cropped thumbnail. Keys follow [`UploadKeys`], so the cleanup job
//! can always re-derive the thumbnail from the main key.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tracing::instrument;
use vitrine_core::config::MediaConfig;
use vitrine_core::image_key::{self, PublicBaseUrl, UploadKeys};

pub const MAIN_MAX_WIDTH: u32 = 1200;
pub const MAIN_MAX_HEIGHT: u32 = 900;
pub const THUMB_WIDTH: u32 = 400;
pub const THUMB_HEIGHT: u32 = 300;
pub const JPEG_QUALITY: u8 = 85;

/// Keys and public URLs of a stored upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub key: String,
    pub url: String,
    pub thumbnail_key: String,
    pub thumbnail_url: String,
}

/// Encoding used for both variants of an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Jpeg,
    Png,
    Gif,
}

impl OutputFormat {
    /// PNG and GIF keep their format; everything else is re-encoded as JPEG.
    fn for_extension(ext: &str) -> Self {
        match ext {
            ".png" => Self::Png,
            ".gif" => Self::Gif,
            _ => Self::Jpeg,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }

    fn encode(self, img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        match self {
            Self::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))?;
            }
            Self::Png => img.write_to(&mut buf, ImageFormat::Png)?,
            Self::Gif => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::Gif)?,
        }
        Ok(buf.into_inner())
    }
}

/// Decode, resize and encode both variants. CPU bound.
fn render_variants(data: &[u8], format: OutputFormat) -> StorageResult<(Vec<u8>, Vec<u8>)> {
    let img = image::load_from_memory(data)
        .map_err(|e| StorageError::Image(format!("failed to decode image: {e}")))?;

    // Never upscale the main variant.
    let main = if img.width() > MAIN_MAX_WIDTH || img.height() > MAIN_MAX_HEIGHT {
        img.resize(MAIN_MAX_WIDTH, MAIN_MAX_HEIGHT, FilterType::Lanczos3)
    } else {
        img.clone()
    };
    let thumb = img.resize_to_fill(THUMB_WIDTH, THUMB_HEIGHT, FilterType::Lanczos3);

    let main = format
        .encode(&main)
        .map_err(|e| StorageError::Image(format!("failed to encode image: {e}")))?;
    let thumb = format
        .encode(&thumb)
        .map_err(|e| StorageError::Image(format!("failed to encode thumbnail: {e}")))?;
    Ok((main, thumb))
}

/// Uploads and deletes images in an [`ObjectStore`].
#[derive(Clone)]
pub struct ImageStore {
    store: Arc<dyn ObjectStore>,
    public_url: Option<PublicBaseUrl>,
    max_upload_bytes: usize,
    allowed_extensions: Vec<String>,
    default_folder: String,
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("backend", &self.store.backend_name())
            .field("public_url", &self.public_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}

impl ImageStore {
    /// Create an image store over `store` using the media settings.
    pub fn new(store: Arc<dyn ObjectStore>, media: &MediaConfig) -> StorageResult<Self> {
        let public_url = media
            .public_url()
            .map(PublicBaseUrl::parse)
            .transpose()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        image_key::validate_folder(&media.default_folder)?;
        Ok(Self {
            store,
            public_url,
            max_upload_bytes: media.max_upload_bytes,
            allowed_extensions: media
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            default_folder: media.default_folder.clone(),
        })
    }

    /// Configured public base URL, if any.
    pub fn public_base_url(&self) -> Option<&PublicBaseUrl> {
        self.public_url.as_ref()
    }

    /// Public URL of a key, or the bare key when no base URL is configured.
    pub fn public_url(&self, key: &str) -> String {
        match &self.public_url {
            Some(base) => base.url_for(key),
            None => key.to_string(),
        }
    }

    /// Validate, resize and store an upload with its thumbnail.
    ///
    /// `folder` defaults to the configured default folder.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_image(
        &self,
        data: Bytes,
        filename: &str,
        folder: Option<&str>,
    ) -> StorageResult<UploadResult> {
        if data.len() > self.max_upload_bytes {
            return Err(vitrine_core::Error::FileTooLarge {
                size: data.len(),
                max: self.max_upload_bytes,
            }
            .into());
        }

        let ext = image_key::file_extension(filename)?;
        if !self.allowed_extensions.iter().any(|allowed| *allowed == ext) {
            return Err(vitrine_core::Error::UnsupportedExtension(ext).into());
        }

        let folder = folder
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.default_folder);
        let keys = UploadKeys::generate(folder, &ext)?;
        let format = OutputFormat::for_extension(&ext);

        let (main, thumb) = tokio::task::spawn_blocking(move || render_variants(&data, format))
            .await
            .map_err(|e| StorageError::Image(format!("image worker failed: {e}")))??;

        self.store
            .put(&keys.key, Bytes::from(main), Some(format.content_type()))
            .await?;
        if let Err(e) = self
            .store
            .put(&keys.thumbnail_key, Bytes::from(thumb), Some(format.content_type()))
            .await
        {
            if let Err(cleanup_err) = self.store.delete(&keys.key).await {
                tracing::warn!(
                    key = %keys.key,
                    error = %cleanup_err,
                    "failed to remove main image after thumbnail upload failure"
                );
            }
            return Err(e);
        }

        tracing::info!(key = %keys.key, thumbnail_key = %keys.thumbnail_key, "image uploaded");
        Ok(UploadResult {
            url: self.public_url(&keys.key),
            thumbnail_url: self.public_url(&keys.thumbnail_key),
            key: keys.key,
            thumbnail_key: keys.thumbnail_key,
        })
    }

    /// Delete an image, then its thumbnail.
    ///
    /// Only the main object is authoritative: a thumbnail that is missing or
    /// fails to delete is logged and ignored.
    #[instrument(skip(self))]
    pub async fn delete_image(&self, key: &str) -> StorageResult<()> {
        self.store.delete(key).await?;

        let thumbnail_key = image_key::thumbnail_key(key);
        if thumbnail_key != key {
            match self.store.delete(&thumbnail_key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(thumbnail_key = %thumbnail_key, "thumbnail already absent");
                }
                Err(e) => {
                    tracing::warn!(thumbnail_key = %thumbnail_key, error = %e, "failed to delete thumbnail");
                }
            }
        }
        Ok(())
    }
}
