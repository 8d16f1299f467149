//! src/services/storage_service.rs
//!
//! Object store gateway. `ObjectStore` is the contract the delivery pipeline
//! writes through; `LocalObjectStore` implements it with SQLite for metadata
//! and local disk for payloads sharded beneath
//! `base_path/{container}/{shard}/{shard}/{key}`.

use crate::models::object::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("object `{key}` not found in container `{container}`")]
    ObjectNotFound { container: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object store did not respond within {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Descriptive metadata recorded alongside a payload.
#[derive(Clone, Copy, Debug)]
pub struct NewObject<'a> {
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
}

/// Durable blob storage addressed by `(container, key)`.
///
/// `put` always overwrites an existing key and makes exactly one attempt.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(
        &self,
        container: &str,
        key: &str,
        meta: NewObject<'_>,
        payload: Bytes,
    ) -> StoreResult<StoredObject>;
}

/// Disk + SQLite implementation of [`ObjectStore`], also serving reads.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        meta: NewObject<'_>,
        payload: Bytes,
    ) -> StoreResult<StoredObject> {
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(payload) });
        self.upload_object_stream(container, key, meta, stream)
            .await
    }
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape the container directory.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate container name format.
    ///
    /// S3 bucket naming rules: 3–63 characters of lowercase letters, digits,
    /// dots and hyphens; starts and ends alphanumeric; no `..`, `.-` or `-.`;
    /// not shaped like an IPv4 address.
    pub fn ensure_container_name_safe(name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| {
            Err(StoreError::InvalidContainerName {
                name: name.to_string(),
                reason: reason.into(),
            })
        };

        let len = name.len();
        if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
            return invalid("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return invalid("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return invalid("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return invalid("must not be formatted like an IP address");
        }
        Ok(())
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    /// Two-level shard directories from MD5(container/key), `00`–`ff` each.
    fn object_shards(container: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, container: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(container, key);
        let mut path = self.container_root(container);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, container: &str, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, container, key, filename, content_type, size_bytes, etag, created_at
             FROM objects
             WHERE container = ? AND key = ?",
        )
        .bind(container)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Stream-upload an object to disk and upsert its metadata.
    ///
    /// Bytes go to a temp file which is fsynced and renamed over the final
    /// path. Until the metadata upsert succeeds a [`PendingFile`] owns the
    /// payload on disk, so an error or a dropped future (timeout) removes it.
    pub async fn upload_object_stream<S>(
        &self,
        container: &str,
        key: &str,
        meta: NewObject<'_>,
        stream: S,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_container_name_safe(container)?;
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(container, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let mut cleanup = PendingFile::new(tmp_path.clone());

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(StoreError::Io(err));
            }
            fs::remove_file(&file_path).await?;
            fs::rename(&tmp_path, &file_path).await?;
        }
        cleanup.retarget(file_path);

        let etag = format!("{:x}", digest.compute());
        let object = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, container, key, filename, content_type, size_bytes, etag, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                created_at = excluded.created_at
            RETURNING id, container, key, filename, content_type, size_bytes, etag, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(container)
        .bind(key)
        .bind(meta.filename)
        .bind(meta.content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        cleanup.keep();
        debug!(container, key, size_bytes, "object written");
        Ok(object)
    }

    /// Metadata plus an open file handle ready for streaming out.
    ///
    /// Returns `ObjectNotFound` if metadata exists but the payload is missing.
    pub async fn open(&self, container: &str, key: &str) -> StoreResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(container, key).await?;

        let file = File::open(self.object_path(container, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::ObjectNotFound {
                        container: container.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;

        Ok((object, file))
    }

    /// Metadata only.
    pub async fn metadata(&self, container: &str, key: &str) -> StoreResult<StoredObject> {
        self.ensure_key_safe(key)?;
        self.fetch_object(container, key).await
    }
}

/// A file on disk that is deleted on drop unless [`PendingFile::keep`] is called.
struct PendingFile {
    path: Option<PathBuf>,
}

impl PendingFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// The payload moved; clean up `path` instead.
    fn retarget(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    fn keep(&mut self) {
        self.path = None;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "could not remove partial object");
                }
            }
        }
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn store() -> (LocalObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(Arc::new(test_pool().await), dir.path());
        (store, dir)
    }

    fn meta(filename: &str) -> NewObject<'_> {
        NewObject {
            filename,
            content_type: Some("application/json"),
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found
    }

    #[tokio::test]
    async fn cancelled_upload_leaves_no_partial_file() {
        let (store, dir) = store().await;
        let stream = futures::stream::once(async { Ok(Bytes::from_static(b"{\"a\":")) })
            .chain(futures::stream::pending());

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            store.upload_object_stream("uploads", "a-000000.json", meta("a.json"), stream),
        )
        .await;
        assert!(outcome.is_err());
        assert!(files_under(dir.path()).is_empty());
        assert!(matches!(
            store.metadata("uploads", "a-000000.json").await,
            Err(StoreError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_stream_removes_temp_file() {
        let (store, dir) = store().await;
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"[1,")),
            Err(io::Error::other("client went away")),
        ]);
        let err = store
            .upload_object_stream("uploads", "b-000000.json", meta("b.json"), stream)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(files_under(dir.path()).is_empty());
    }

    #[test]
    fn pending_file_is_removed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped");
        let kept = dir.path().join("kept");
        std::fs::write(&dropped, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();

        drop(PendingFile::new(dropped.clone()));
        let mut guard = PendingFile::new(kept.clone());
        guard.keep();
        drop(guard);

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn put_then_open_returns_payload() {
        let (store, _dir) = store().await;
        let obj = store
            .put(
                "uploads",
                "a-000000.json",
                meta("a.json"),
                Bytes::from_static(b"{\"a\":1}"),
            )
            .await
            .unwrap();
        assert_eq!(obj.size_bytes, 7);
        assert_eq!(obj.content_type.as_deref(), Some("application/json"));
        assert_eq!(obj.etag.as_deref(), Some(format!("{:x}", md5::compute(b"{\"a\":1}")).as_str()));

        let (read_meta, mut file) = store.open("uploads", "a-000000.json").await.unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"{\"a\":1}");
        assert_eq!(read_meta, obj);
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let (store, _dir) = store().await;
        store
            .put("uploads", "k-111111.json", meta("k.json"), Bytes::from_static(b"[1]"))
            .await
            .unwrap();
        let second = store
            .put(
                "uploads",
                "k-111111.json",
                meta("k2.json"),
                Bytes::from_static(b"[1,2,3]"),
            )
            .await
            .unwrap();
        assert_eq!(second.filename, "k2.json");
        assert_eq!(second.size_bytes, 7);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (store, _dir) = store().await;
        for key in ["", "/etc/passwd", "../x.json", "a\\b.json"] {
            let err = store
                .put("uploads", key, meta("x.json"), Bytes::new())
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidObjectKey), "{key:?}");
        }
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (store, _dir) = store().await;
        let err = store.open("uploads", "nope-000000.json").await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));
    }

    #[test]
    fn container_names_follow_bucket_rules() {
        assert!(LocalObjectStore::ensure_container_name_safe("uploads").is_ok());
        assert!(LocalObjectStore::ensure_container_name_safe("json-drop.v2").is_ok());
        for bad in ["ab", "Uploads", "-uploads", "up..loads", "192.168.0.1", "up_loads"] {
            assert!(
                LocalObjectStore::ensure_container_name_safe(bad).is_err(),
                "{bad}"
            );
        }
    }
}
