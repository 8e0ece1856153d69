//! Authenticated access to the upstream Classroom REST API
//!
//! Every call first asks the credential lifecycle manager for a valid
//! credential. A credential failure short-circuits before any request goes
//! upstream, so callers can tell "not logged in" apart from "API broken".

pub mod proxy;

pub use proxy::{ApiProxy, ApiSettings};

use credential_lifecycle::CredentialError;
use serde::{Deserialize, Serialize};

/// One upstream resource (a course, by default).
///
/// Only `id` is interpreted; every other field is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("upstream api error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
