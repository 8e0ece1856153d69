//! Credential lifecycle for the single-user classroom broker
//!
//! Keeps exactly one OAuth credential valid across calls. The store is the
//! single source of truth for token data; the manager reads it on every
//! credentialed request, refreshes at most once when the access token has
//! expired, and writes the result back.
//!
//! Credential lifecycle:
//! 1. OAuth callback hands a fresh record to `accept_new` → persisted if valid
//! 2. Each API call goes through `ensure_valid` → classify, maybe refresh, persist
//! 3. Refresh rejected or refresh token missing → typed error, user logs in again
//! 4. `logout` clears the slot

pub mod error;
pub mod file;
pub mod manager;
pub mod refresh;
pub mod sqlite;
pub mod store;
pub mod validator;

pub use error::{CredentialError, RefreshError, StoreError};
pub use file::FileStore;
pub use manager::{CredentialLifecycleManager, CredentialStatus};
pub use refresh::{OAuthRefresher, TokenRefresher};
pub use sqlite::SqliteStore;
pub use store::{CredentialStore, MemoryStore, open_store};
pub use validator::{Classification, classify};
