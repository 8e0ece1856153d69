//! Google OAuth defaults
//!
//! Endpoint values are fallbacks only: the client secrets file and each
//! persisted credential carry their own `auth_uri` / `token_uri`.

/// Google's OAuth 2.0 authorization endpoint
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Read-only Classroom scopes the API proxy needs.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/classroom.courses.readonly",
    "https://www.googleapis.com/auth/classroom.student-submissions.me.readonly",
];

/// Callback registered with the OAuth client
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:5000/oauth/callback";

/// Token type assumed when the provider omits one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
