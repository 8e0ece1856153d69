//! File-backed credential slot
//!
//! The slot is one JSON document, `{"token": "<credential blob>", "updated_at": ...}`.
//! Writes go to a temp file in the same directory and are renamed over the
//! target, so a crash leaves either the old document or the new one. An empty
//! slot is a missing file. A tokio Mutex serializes all mutations and guards
//! the in-memory copy that reads are served from.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use google_auth::CredentialRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::CredentialStore;

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    token: String,
    updated_at: i64,
}

pub struct FileStore {
    path: PathBuf,
    slot: Mutex<Option<String>>,
}

impl FileStore {
    /// Open the slot at `path`, loading an existing document if present.
    ///
    /// The parent directory is created when missing.
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let slot = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::Io(format!("checking credential file: {e}")))?
        {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Io(format!("reading credential file: {e}")))?;
            let document: StoredDocument = serde_json::from_str(&contents)
                .map_err(|e| StoreError::Corrupt(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), "loaded stored credential");
            Some(document.token)
        } else {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| StoreError::Io(format!("creating credential directory: {e}")))?;
            }
            info!(path = %path.display(), "no stored credential, starting empty");
            None
        };

        Ok(Self {
            path,
            slot: Mutex::new(slot),
        })
    }
}

impl CredentialStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
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
            let mut slot = self.slot.lock().await;
            let document = StoredDocument {
                token: blob.clone(),
                updated_at: chrono::Utc::now().timestamp_millis(),
            };
            write_atomic(&self.path, &document).await?;
            *slot = Some(blob);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut slot = self.slot.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => debug!(path = %self.path.display(), "removed credential file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(format!("removing credential file: {e}"))),
            }
            *slot = None;
            Ok(())
        })
    }
}

/// Sibling temp file for `path`, unique per target file and process.
fn temp_path(path: &Path) -> Result<PathBuf, StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io("credential path has no parent directory".into()))?;
    let name = path
        .file_name()
        .ok_or_else(|| StoreError::Io("credential path has no file name".into()))?;
    Ok(dir.join(format!(
        ".{}.tmp.{}",
        name.to_string_lossy(),
        std::process::id()
    )))
}

/// Write the slot document atomically with 0600 permissions.
async fn write_atomic(path: &Path, document: &StoredDocument) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| StoreError::Corrupt(format!("serializing credential document: {e}")))?;

    let tmp_path = temp_path(path)?;

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| StoreError::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn record(suffix: &str) -> CredentialRecord {
        CredentialRecord {
            access_token: format!("at_{suffix}"),
            refresh_token: Some(format!("rt_{suffix}")),
            token_type: "Bearer".into(),
            expiry: Some(Utc::now() + Duration::hours(1)),
            scopes: vec!["scope-a".into()],
            client_id: "client".into(),
            client_secret: "secret".into(),
            token_uri: "https://oauth2.googleapis.com/token".into(),
        }
    }

    #[tokio::test]
    async fn roundtrip_replace_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classroom.json");

        let store = FileStore::open(path.clone()).await.unwrap();
        store.replace(&record("1")).await.unwrap();

        let reopened = FileStore::open(path).await.unwrap();
        let cred = reopened.get().await.unwrap().unwrap();
        assert_eq!(cred.access_token, "at_1");
        assert_eq!(cred.refresh_token.as_deref(), Some("rt_1"));
    }

    #[tokio::test]
    async fn cold_start_is_empty_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("classroom.json");

        let store = FileStore::open(path.clone()).await.unwrap();
        assert!(store.get().await.unwrap().is_none());
        assert!(path.parent().unwrap().exists());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn clear_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classroom.json");

        let store = FileStore::open(path.clone()).await.unwrap();
        store.replace(&record("1")).await.unwrap();
        store.clear().await.unwrap();

        assert!(!path.exists());
        assert!(store.get().await.unwrap().is_none());
        // Clearing an empty slot succeeds
        store.clear().await.unwrap();

        let reopened = FileStore::open(path).await.unwrap();
        assert!(reopened.get().await.unwrap().is_none());
    }

    #[test]
    fn temp_path_is_distinct_per_target() {
        let dir = Path::new("/var/lib/broker");
        let a = temp_path(&dir.join("classroom.json")).unwrap();
        let b = temp_path(&dir.join("staging.json")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir));
    }

    #[tokio::test]
    async fn namespaces_sharing_a_directory_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(FileStore::open(dir.path().join("a.json")).await.unwrap());
        let b = Arc::new(FileStore::open(dir.path().join("b.json")).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let (a, b) = (a.clone(), b.clone());
            handles.push(tokio::spawn(async move {
                a.replace(&record(&format!("a{i}"))).await.unwrap();
                b.replace(&record(&format!("b{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let from_a = FileStore::open(dir.path().join("a.json")).await.unwrap();
        let from_b = FileStore::open(dir.path().join("b.json")).await.unwrap();
        assert!(from_a.get().await.unwrap().unwrap().access_token.starts_with("at_a"));
        assert!(from_b.get().await.unwrap().unwrap().access_token.starts_with("at_b"));
    }

    #[tokio::test]
    async fn corrupt_document_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classroom.json");
        std::fs::write(&path, "{{{{").unwrap();

        let result = FileStore::open(path).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classroom.json");

        let store = FileStore::open(path.clone()).await.unwrap();
        store.replace(&record("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_replaces_leave_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classroom.json");
        let store = Arc::new(FileStore::open(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.replace(&record(&i.to_string())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // The document on disk parses and matches the in-memory slot
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let document: StoredDocument = serde_json::from_str(&contents).unwrap();
        let on_disk = CredentialRecord::from_json(&document.token).unwrap();
        let in_memory = store.get().await.unwrap().unwrap();
        assert_eq!(on_disk, in_memory);
    }
}
