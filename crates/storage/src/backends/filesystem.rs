//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectInfo, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// File name prefix of in-flight writes. Such files are never listed, so a
/// concurrent cleanup cannot mistake a half-written upload for an orphan.
const TEMP_FILE_PREFIX: &str = ".vitrine-partial-";

/// Local filesystem object store.
///
/// Keys map to paths below `root`; content types are not persisted.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path below the root.
    ///
    /// Runs on the blocking pool because it canonicalizes paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key_path(&root, &key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }

    fn map_not_found(err: std::io::Error, key: &str) -> StorageError {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

/// `None` when the path vanished between being listed and inspected.
fn skip_vanished<T>(result: std::io::Result<T>) -> StorageResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Map `key` below `root`, rejecting anything that could escape it: `..`,
/// absolute paths, and symlinks (on the path itself or on the nearest
/// existing ancestor) that resolve outside the root.
fn resolve_key_path(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize()?;

    // Check the path itself if it exists, otherwise its closest existing
    // ancestor, so writes can't create directories through a symlink.
    let mut probe = path.as_path();
    loop {
        match std::fs::symlink_metadata(probe) {
            Ok(meta) => {
                let canonical = probe.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(path),
            },
            Err(err) => return Err(StorageError::Io(err)),
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        Ok(fs::try_exists(&path).await? && fs::metadata(&path).await?.is_file())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::map_not_found(e, key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, _content_type: Option<&str>) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        let Some(parent) = path.parent() else {
            return Err(StorageError::InvalidKey(key.to_string()));
        };
        fs::create_dir_all(parent).await?;

        // Write to a uniquely named sibling, fsync, then rename into place.
        let temp_path = parent.join(format!("{TEMP_FILE_PREFIX}{}", Uuid::new_v4()));
        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::map_not_found(e, key))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        // Walk from the directory part of the prefix; the remainder is
        // matched as a plain string prefix, like S3 does.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.key_path(dir_part).await?
        };

        let mut results = Vec::new();
        match fs::metadata(&start).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(results),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            // Concurrent deletes can remove entries at any point of the walk.
            let Some(mut entries) = skip_vanished(fs::read_dir(&dir).await)? else {
                continue;
            };
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; links are never listed.
                let Some(file_type) = skip_vanished(entry.file_type().await)? else {
                    continue;
                };
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file()
                    || entry
                        .file_name()
                        .to_string_lossy()
                        .starts_with(TEMP_FILE_PREFIX)
                {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(prefix) {
                    continue;
                }
                let Some(meta) = skip_vanished(entry.metadata().await)? else {
                    tracing::debug!(key = %key, "object removed during listing");
                    continue;
                };
                results.push(ObjectInfo {
                    key,
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(Into::into),
                });
            }
        }

        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Config(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let key = "projects/2025/01/a.jpg";
        let data = Bytes::from("jpeg bytes");

        backend.put(key, data.clone(), Some("image/jpeg")).await.unwrap();
        assert!(backend.exists(key).await.unwrap());
        assert_eq!(backend.get(key).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let err = backend.delete("projects/missing.jpg").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_matches_string_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        for key in [
            "projects/2025/01/b.jpg",
            "projects/2025/01/a.jpg",
            "projects/2025/02/c.jpg",
            "news/2025/01/d.jpg",
        ] {
            backend.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }

        let keys = backend.list("projects/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "projects/2025/01/a.jpg",
                "projects/2025/01/b.jpg",
                "projects/2025/02/c.jpg",
            ]
        );

        let keys = backend.list("projects/2025/01/a").await.unwrap();
        assert_eq!(keys, vec!["projects/2025/01/a.jpg"]);

        assert!(backend.list("missing/").await.unwrap().is_empty());
        assert_eq!(backend.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_list_reports_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend
            .put("projects/a.png", Bytes::from_static(b"12345"), None)
            .await
            .unwrap();

        let objects = backend.list_objects("projects/").await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].size, 5);
        assert!(objects[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_list_skips_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend
            .put("projects/a.jpg", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        std::fs::write(
            dir.path()
                .join("projects")
                .join(format!("{TEMP_FILE_PREFIX}1234")),
            b"partial",
        )
        .unwrap();

        assert_eq!(backend.list("projects/").await.unwrap(), vec!["projects/a.jpg"]);
    }

    #[test]
    fn test_skip_vanished() {
        assert_eq!(skip_vanished(Ok(3)).unwrap(), Some(3));
        let gone = std::io::Error::from(ErrorKind::NotFound);
        assert_eq!(skip_vanished::<u8>(Err(gone)).unwrap(), None);
        let denied = std::io::Error::from(ErrorKind::PermissionDenied);
        assert!(matches!(
            skip_vanished::<u8>(Err(denied)),
            Err(StorageError::Io(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_tolerates_concurrent_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = std::sync::Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let keys: Vec<String> = (0..200)
            .map(|i| format!("projects/{}/{i}.jpg", i % 10))
            .collect();
        for key in &keys {
            backend.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }

        let deleter = {
            let backend = backend.clone();
            let keys = keys.clone();
            tokio::spawn(async move {
                for key in keys {
                    backend.delete(&key).await.unwrap();
                }
            })
        };
        while !deleter.is_finished() {
            let listed = backend.list_objects("projects/").await.unwrap();
            assert!(listed.len() <= keys.len());
        }
        deleter.await.unwrap();
        assert!(backend.list_objects("projects/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists("./foo").await.is_err());
        assert!(backend.exists("").await.is_err());

        assert!(backend.exists("valid/nested/key.jpg").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        std::fs::write(outside_dir.path().join("secret.txt"), "secret").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();

        let result = backend.get("escape/secret.txt").await;
        match result {
            Err(StorageError::InvalidKey(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected InvalidKey, got {other:?}"),
        }

        let result = backend
            .put("escape/nested/deep/file.jpg", Bytes::from("data"), None)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside_dir.path().join("nested").exists());

        // Symlinks are not listed either.
        assert!(backend.list("").await.unwrap().is_empty());
    }
}
