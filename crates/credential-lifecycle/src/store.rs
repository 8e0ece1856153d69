//! Single-slot credential storage
//!
//! A store holds zero or one serialized `CredentialRecord`. `replace` swaps
//! the whole slot in one step; readers never see a cleared-but-not-yet-written
//! state. Backends are picked from the configured store URL:
//!
//! - `sqlite:<path>` → [`SqliteStore`](crate::SqliteStore), one row per namespace
//! - `file:<dir>` → [`FileStore`](crate::FileStore), `<dir>/<namespace>.json`

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use google_auth::CredentialRecord;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::StoreError;
use crate::file::FileStore;
use crate::sqlite::SqliteStore;

/// Durable single-slot credential storage.
///
/// Uses `Pin<Box<dyn Future>>` return types so the manager can hold an
/// `Arc<dyn CredentialStore>`.
pub trait CredentialStore: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// The serialized credential blob, if any.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + '_>>;

    /// Atomically clear the slot and store `record`.
    fn replace<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Empty the slot. Clearing an empty slot is not an error.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// The stored credential, parsed.
    fn get(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CredentialRecord>, StoreError>> + Send + '_>>
    {
        Box::pin(async move {
            match self.load().await? {
                Some(blob) => CredentialRecord::from_json(&blob)
                    .map(Some)
                    .map_err(|e| StoreError::Corrupt(e.to_string())),
                None => Ok(None),
            }
        })
    }
}

/// Open the backend named by `url`, scoped to the `database` namespace.
pub async fn open_store(url: &str, database: &str) -> Result<Arc<dyn CredentialStore>, StoreError> {
    if url.starts_with("sqlite:") {
        let store = SqliteStore::connect(url, database).await?;
        info!(backend = "sqlite", namespace = database, "credential store opened");
        return Ok(Arc::new(store));
    }

    if let Some(dir) = url
        .strip_prefix("file://")
        .or_else(|| url.strip_prefix("file:"))
    {
        let path = PathBuf::from(dir).join(format!("{database}.json"));
        let store = FileStore::open(path).await?;
        info!(backend = "file", namespace = database, "credential store opened");
        return Ok(Arc::new(store));
    }

    Err(StoreError::UnsupportedUrl(url.to_string()))
}

/// Non-durable store kept in process memory.
///
/// Serializes on write just like the durable backends, so a record that
/// cannot round-trip is caught here too.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a record already in the slot.
    pub fn with_record(record: &CredentialRecord) -> Result<Self, StoreError> {
        let blob = record
            .to_json()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Self {
            slot: Mutex::new(Some(blob)),
        })
    }
}

impl CredentialStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.slot.lock().await.clone()) })
    }

    fn replace<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let blob = record
                .to_json()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            *self.slot.lock().await = Some(blob);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.slot.lock().await.take();
            Ok(())
        })
    }
}
