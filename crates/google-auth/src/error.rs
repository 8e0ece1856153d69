//! Error types for OAuth operations

/// Errors from OAuth client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The provider rejected the grant (revoked or expired refresh token,
    /// reused authorization code).
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("client secrets error: {0}")]
    ClientSecrets(String),
}

/// Result alias for OAuth operations.
pub type Result<T> = std::result::Result<T, Error>;
