//! Blob placement: put the cover bytes somewhere the model can fetch them.
//!
//! The scanner only needs two guarantees from a [`BlobStore`]: every call
//! gets a fresh key (nothing is ever overwritten), and the returned URL is
//! publicly readable without credentials, because the completion service
//! fetches it on its own. Keys come from [`object_key`], which mixes the
//! owner with a random UUID.
//!
//! Three implementations ship with the crate:
//!
//! | Store | Use |
//! |-------|-----|
//! | [`SupabaseStorage`] | Supabase Storage bucket with public read |
//! | [`DirectoryBlobStore`] | a directory served by some static file server |
//! | [`MemoryBlobStore`] | tests and embedding |
//!
//! No store retries. A single failure surfaces as
//! [`CoverError::StorageFailure`].

use crate::error::CoverError;
use crate::pipeline::validate::OwnerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Default bucket name for cover images.
pub const DEFAULT_BUCKET: &str = "book-covers";

/// Where a stored cover lives. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImageRef {
    /// Key inside the store, unique per owner and upload.
    pub storage_key: String,
    /// Absolute, publicly resolvable address of the object.
    pub public_url: Url,
}

/// A content store that yields public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Store `bytes` under a fresh key owned by `owner`.
    async fn store(
        &self,
        owner: &OwnerId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<StoredImageRef, CoverError>;
}

/// Derive a fresh object key: `{owner}/{uuid}.{ext}`.
///
/// Characters outside `[A-Za-z0-9_-]` in the owner id are replaced with `_`
/// so the key is always a safe path and URL segment.
pub fn object_key(owner: &OwnerId, mime_type: &str) -> String {
    let owner: String = owner
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let owner = if owner.is_empty() { "anonymous".to_string() } else { owner };
    format!("{}/{}.{}", owner, Uuid::new_v4(), extension_for(mime_type))
}

/// File extension for an image MIME type.
fn extension_for(mime_type: &str) -> &'static str {
    image::ImageFormat::from_mime_type(mime_type)
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("img")
}

/// Ensure a base URL ends with `/` so `Url::join` appends instead of replacing.
fn as_directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn storage_err(detail: impl Into<String>) -> CoverError {
    CoverError::StorageFailure {
        status: None,
        detail: detail.into(),
    }
}

// ── Supabase ─────────────────────────────────────────────────────────────

/// Supabase Storage bucket with public read access.
pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl SupabaseStorage {
    /// `base_url` is the project URL, e.g. `https://xyz.supabase.co`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, CoverError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| {
            CoverError::InvalidConfig(format!("Supabase URL '{base_url}' is invalid: {e}"))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CoverError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            bucket: bucket.into(),
        })
    }

    fn upload_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    fn public_url(&self, key: &str) -> Result<Url, CoverError> {
        let raw = format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        );
        Url::parse(&raw).map_err(|e| storage_err(format!("bad public URL '{raw}': {e}")))
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn store(
        &self,
        owner: &OwnerId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<StoredImageRef, CoverError> {
        let key = object_key(owner, mime_type);
        debug!(bucket = %self.bucket, key = %key, size = bytes.len(), "Uploading cover");

        let response = self
            .client
            .post(self.upload_url(&key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .header("cache-control", "3600")
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| storage_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoverError::StorageFailure {
                status: Some(status.as_u16()),
                detail: upstream_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }

        let public_url = self.public_url(&key)?;
        info!(key = %key, "Stored cover in bucket '{}'", self.bucket);
        Ok(StoredImageRef {
            storage_key: key,
            public_url,
        })
    }
}

/// Pull `message` (or `error`) out of a JSON error body.
fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// ── Directory ────────────────────────────────────────────────────────────

/// Writes covers under a local directory exposed at `public_base_url`.
pub struct DirectoryBlobStore {
    root: PathBuf,
    public_base_url: Url,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self, CoverError> {
        let public_base_url = Url::parse(public_base_url).map_err(|e| {
            CoverError::InvalidConfig(format!("public base URL '{public_base_url}' is invalid: {e}"))
        })?;
        Ok(Self {
            root: root.into(),
            public_base_url: as_directory_url(public_base_url),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    fn name(&self) -> &str {
        "directory"
    }

    async fn store(
        &self,
        owner: &OwnerId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<StoredImageRef, CoverError> {
        let key = object_key(owner, mime_type);
        let path = self.root.join(&key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(format!("create {}: {e}", parent.display())))?;
        }

        // create_new: an existing file is an error, never a silent overwrite
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| storage_err(format!("open {}: {e}", path.display())))?;
        file.write_all(bytes)
            .await
            .map_err(|e| storage_err(format!("write {}: {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| storage_err(format!("flush {}: {e}", path.display())))?;

        let public_url = self
            .public_base_url
            .join(&key)
            .map_err(|e| storage_err(format!("public URL for '{key}': {e}")))?;

        debug!(path = %path.display(), "Stored cover on disk");
        Ok(StoredImageRef {
            storage_key: key,
            public_url,
        })
    }
}

// ── Memory ───────────────────────────────────────────────────────────────

/// An object held by [`MemoryBlobStore`].
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub owner: OwnerId,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// In-process store; URLs are derived from a base that nothing serves.
pub struct MemoryBlobStore {
    public_base_url: Url,
    objects: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: Url) -> Self {
        Self {
            public_base_url: as_directory_url(public_base_url),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<StoredBlob> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(
        &self,
        owner: &OwnerId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<StoredImageRef, CoverError> {
        let key = object_key(owner, mime_type);
        let public_url = self
            .public_base_url
            .join(&key)
            .map_err(|e| storage_err(format!("public URL for '{key}': {e}")))?;

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(storage_err(format!("key '{key}' already exists")));
        }
        objects.insert(
            key.clone(),
            StoredBlob {
                owner: owner.clone(),
                mime_type: mime_type.to_string(),
                bytes: bytes.to_vec(),
            },
        );

        Ok(StoredImageRef {
            storage_key: key,
            public_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn object_key_shape() {
        let key = object_key(&OwnerId::new("user-42"), "image/jpeg");
        let (owner, file) = key.split_once('/').unwrap();
        assert_eq!(owner, "user-42");
        assert!(file.ends_with(".jpg"), "got {file}");
        let stem = file.trim_end_matches(".jpg");
        assert!(Uuid::parse_str(stem).is_ok(), "got {stem}");
    }

    #[test]
    fn object_key_is_fresh_per_call() {
        let owner = OwnerId::new("u");
        assert_ne!(object_key(&owner, "image/png"), object_key(&owner, "image/png"));
    }

    #[test]
    fn object_key_sanitises_owner() {
        let key = object_key(&OwnerId::new("../etc/passwd"), "image/png");
        assert!(key.starts_with("___etc_passwd/"), "got {key}");
        assert!(key.ends_with(".png"));
    }

    #[test]
    fn unknown_image_subtype_gets_generic_extension() {
        let key = object_key(&OwnerId::new("u"), "image/x-unknown");
        assert!(key.ends_with(".img"), "got {key}");
    }

    #[test]
    fn directory_url_gets_trailing_slash() {
        let url = as_directory_url(Url::parse("https://cdn.example.com/covers").unwrap());
        assert_eq!(url.as_str(), "https://cdn.example.com/covers/");
        assert_eq!(
            url.join("u/a.png").unwrap().as_str(),
            "https://cdn.example.com/covers/u/a.png"
        );
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryBlobStore::new(Url::parse("https://blobs.test/covers").unwrap());
        let owner = OwnerId::new("u1");
        let stored = store.store(&owner, b"jpeg-bytes", "image/jpeg").await.unwrap();

        assert!(stored.public_url.as_str().starts_with("https://blobs.test/covers/u1/"));
        let blob = store.get(&stored.storage_key).await.unwrap();
        assert_eq!(blob.bytes, b"jpeg-bytes");
        assert_eq!(blob.owner, owner);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn directory_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryBlobStore::new(dir.path(), "http://localhost:8000/covers").unwrap();

        let stored = store
            .store(&OwnerId::new("reader"), b"\x89PNG....", "image/png")
            .await
            .unwrap();

        let on_disk = std::fs::read(dir.path().join(&stored.storage_key)).unwrap();
        assert_eq!(on_disk, b"\x89PNG....");
        assert_eq!(
            stored.public_url.as_str(),
            format!("http://localhost:8000/covers/{}", stored.storage_key)
        );
    }

    #[test]
    fn directory_store_rejects_bad_base_url() {
        let err = DirectoryBlobStore::new("/tmp", "not a url").err().unwrap();
        assert!(matches!(err, CoverError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn supabase_upload_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/storage/v1/object/book-covers/u1/.+\.jpg$"))
            .and(header("authorization", "Bearer anon-key"))
            .and(header("x-upsert", "false"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "Key": "book-covers/u1/x.jpg" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = SupabaseStorage::new(server.uri(), "anon-key", DEFAULT_BUCKET, 5).unwrap();
        let stored = store
            .store(&OwnerId::new("u1"), b"jpeg", "image/jpeg")
            .await
            .unwrap();

        let expected_prefix = format!("{}/storage/v1/object/public/book-covers/u1/", server.uri());
        assert!(
            stored.public_url.as_str().starts_with(&expected_prefix),
            "got {}",
            stored.public_url
        );
    }

    #[tokio::test]
    async fn supabase_error_is_storage_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "message": "Bucket not found" })),
            )
            .mount(&server)
            .await;

        let store = SupabaseStorage::new(server.uri(), "anon-key", "missing", 5).unwrap();
        let err = store
            .store(&OwnerId::new("u1"), b"jpeg", "image/jpeg")
            .await
            .unwrap_err();

        match err {
            CoverError::StorageFailure { status, detail } => {
                assert_eq!(status, Some(400));
                assert_eq!(detail, "Bucket not found");
            }
            other => panic!("expected StorageFailure, got {other:?}"),
        }
    }
}
