//! Book records and caller identity.
//!
//! The scanner never writes records; the HTTP layer persists a
//! [`BookRecord`] after the user confirms (or corrects) the scanned fields.
//! Both collaborators are traits so the server can be driven by in-memory
//! fakes in tests.

use crate::error::CoverError;
use crate::output::ExtractedMetadata;
use crate::pipeline::storage::StoredImageRef;
use crate::pipeline::validate::OwnerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Book {id} not found")]
    NotFound { id: Uuid },

    #[error("Record store error: {0}")]
    Backend(String),
}

/// A persisted book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

/// Fields supplied when creating a book.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub cover_key: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl NewBook {
    /// Pre-fill a book from a scan.
    pub fn from_scan(metadata: &ExtractedMetadata, image: &StoredImageRef) -> Self {
        Self {
            title: metadata.title.clone(),
            author: metadata.author.clone(),
            cover_key: Some(image.storage_key.clone()),
            cover_url: Some(image.public_url.to_string()),
        }
    }
}

/// Selection criteria for [`RecordStore::select`].
#[derive(Debug, Clone)]
pub struct BookFilter {
    pub owner: OwnerId,
    /// Case-insensitive substring match on the title.
    pub title_contains: Option<String>,
}

impl BookFilter {
    pub fn owner(owner: OwnerId) -> Self {
        Self {
            owner,
            title_contains: None,
        }
    }

    fn matches(&self, book: &BookRecord) -> bool {
        if book.owner_id != self.owner {
            return false;
        }
        match self.title_contains.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => book
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, owner: &OwnerId, book: NewBook) -> Result<BookRecord, StoreError>;

    async fn select(&self, filter: &BookFilter) -> Result<Vec<BookRecord>, StoreError>;

    /// Delete a book owned by `owner`. Books owned by someone else are
    /// reported as [`StoreError::NotFound`].
    async fn delete(&self, owner: &OwnerId, id: Uuid) -> Result<(), StoreError>;
}

/// Process-local record store. Listing order is insertion order.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    books: RwLock<Vec<BookRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, owner: &OwnerId, book: NewBook) -> Result<BookRecord, StoreError> {
        let record = BookRecord {
            id: Uuid::new_v4(),
            owner_id: owner.clone(),
            title: book.title,
            author: book.author,
            cover_key: book.cover_key,
            cover_url: book.cover_url,
        };
        self.books.write().await.push(record.clone());
        debug!(id = %record.id, owner = %owner, "Book inserted");
        Ok(record)
    }

    async fn select(&self, filter: &BookFilter) -> Result<Vec<BookRecord>, StoreError> {
        let books = self.books.read().await;
        Ok(books.iter().filter(|b| filter.matches(b)).cloned().collect())
    }

    async fn delete(&self, owner: &OwnerId, id: Uuid) -> Result<(), StoreError> {
        let mut books = self.books.write().await;
        let before = books.len();
        books.retain(|b| !(b.id == id && &b.owner_id == owner));
        if books.len() == before {
            return Err(StoreError::NotFound { id });
        }
        debug!(%id, owner = %owner, "Book deleted");
        Ok(())
    }
}

// ── Identity ─────────────────────────────────────────────────────────────

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: OwnerId,
}

/// Resolves a bearer token to a user. `None` means unauthenticated.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self, token: &str) -> Option<UserIdentity>;
}

/// Fixed token → user table, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    users: HashMap<String, OwnerId>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, user: impl Into<OwnerId>) -> Self {
        self.users.insert(token.into(), user.into());
        self
    }

    /// Parse a `TOKEN=USER_ID` pair.
    pub fn parse_pair(pair: &str) -> Option<(String, String)> {
        let (token, user) = pair.split_once('=')?;
        let (token, user) = (token.trim(), user.trim());
        if token.is_empty() || user.is_empty() {
            return None;
        }
        Some((token.to_string(), user.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self, token: &str) -> Option<UserIdentity> {
        self.users
            .get(token)
            .map(|id| UserIdentity { id: id.clone() })
    }
}

/// Resolves tokens against a Supabase project's `GET /auth/v1/user`.
#[derive(Debug, Clone)]
pub struct SupabaseIdentity {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

impl SupabaseIdentity {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
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
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn current_user(&self, token: &str) -> Option<UserIdentity> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = match self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Identity lookup failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "Token rejected");
            return None;
        }
        let user: AuthUser = response.json().await.ok()?;
        Some(UserIdentity {
            id: OwnerId::new(user.id),
        })
    }
}

pub type SharedRecordStore = Arc<dyn RecordStore>;
pub type SharedIdentity = Arc<dyn IdentityProvider>;
