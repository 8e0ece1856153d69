//! Error types for the credential lifecycle

/// Failures of the durable credential slot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),
}

/// Failures of a single refresh exchange. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("credential has no refresh token")]
    MissingRefreshToken,

    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Http(String),

    #[error("refresh timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("token endpoint error: {0}")]
    Provider(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
}

impl RefreshError {
    /// Metric label for the outcome.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshError::MissingRefreshToken => "missing_refresh_token",
            RefreshError::Rejected(_) => "rejected",
            RefreshError::Http(_) => "http_error",
            RefreshError::Timeout(_) => "timeout",
            RefreshError::Provider(_) => "provider_error",
            RefreshError::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<google_auth::Error> for RefreshError {
    fn from(err: google_auth::Error) -> Self {
        match err {
            google_auth::Error::InvalidCredentials(msg) => RefreshError::Rejected(msg),
            google_auth::Error::Http(msg) => RefreshError::Http(msg),
            google_auth::Error::InvalidResponse(msg) => RefreshError::InvalidResponse(msg),
            other => RefreshError::Provider(other.to_string()),
        }
    }
}

/// Caller-facing outcome of the lifecycle manager.
///
/// Provider-specific detail is carried only as text for server-side logs.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no stored credential")]
    Missing,

    #[error("credential is invalid and cannot be refreshed")]
    Invalid,

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("unknown credential error: {0}")]
    Unknown(String),
}

impl CredentialError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::Missing => "credential_missing",
            CredentialError::Invalid => "credential_invalid",
            CredentialError::RefreshFailed(_) => "refresh_failed",
            CredentialError::Unknown(_) => "unknown",
        }
    }
}

impl From<StoreError> for CredentialError {
    fn from(err: StoreError) -> Self {
        CredentialError::Unknown(err.to_string())
    }
}
