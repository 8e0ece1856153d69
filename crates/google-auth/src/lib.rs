//! Google OAuth plumbing for the classroom credential broker
//!
//! Provides client secrets loading, PKCE + authorization URL generation,
//! token endpoint exchange/refresh, and the `CredentialRecord` model that the
//! lifecycle crate validates and persists. No storage or orchestration lives
//! here, so everything in this crate can be tested against a mock token
//! endpoint in isolation.
//!
//! Credential flow:
//! 1. Broker loads `client_secrets::ClientSecrets` at startup
//! 2. `/login` calls `pkce::generate_verifier()` + `pkce::build_authorization_url()`
//! 3. `/oauth/callback` calls `token::exchange_code()` with the authorization code
//! 4. `CredentialRecord::from_exchange()` turns the response into a record
//! 5. Expired records go through `token::refresh_token()` and `CredentialRecord::refreshed()`

pub mod client_secrets;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod pkce;
pub mod token;

pub use client_secrets::ClientSecrets;
pub use constants::*;
pub use credentials::{CredentialInput, CredentialRecord};
pub use error::{Error, Result};
pub use pkce::{build_authorization_url, compute_challenge, generate_state, generate_verifier};
pub use token::{TokenResponse, exchange_code, refresh_token};
