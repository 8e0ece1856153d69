//! Route-level error mapping
//!
//! Per-request failures become short plain-text bodies. The full error goes
//! to the log, never to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use classroom_api::ProxyError;
use credential_lifecycle::CredentialError;
use thiserror::Error;
use tracing::{error, warn};

use crate::oauth_flow::FlowError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Api(#[from] ProxyError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl Error {
    /// Status and body for the API routes.
    pub fn status_and_message(&self) -> (StatusCode, &'static str) {
        let credential = match self {
            Error::Credential(e) | Error::Api(ProxyError::Credential(e)) => Some(e),
            _ => None,
        };
        if let Some(e) = credential {
            return match e {
                CredentialError::Missing => (StatusCode::UNAUTHORIZED, "not authenticated"),
                CredentialError::Invalid => (StatusCode::UNAUTHORIZED, "invalid credentials"),
                CredentialError::RefreshFailed(_) => {
                    (StatusCode::BAD_GATEWAY, "credential refresh failed")
                }
                CredentialError::Unknown(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "encountered unknown error, check logs",
                ),
            };
        }

        match self {
            Error::Api(ProxyError::NotFound(_)) => (StatusCode::NOT_FOUND, "invalid id"),
            Error::Api(ProxyError::Api(_)) => {
                (StatusCode::BAD_GATEWAY, "upstream api error, check logs")
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encountered unknown error, check logs",
            ),
        }
    }

    /// Body for the OAuth callback, which always answers 200.
    pub fn callback_message(&self) -> &'static str {
        match self {
            Error::Credential(CredentialError::Invalid) => "invalid credentials",
            Error::Flow(FlowError::Exchange(_)) => {
                "error fetching credentials from url, check logs"
            }
            _ => "encountered unknown error, check logs",
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Credential(e) | Error::Api(ProxyError::Credential(e)) => e.kind(),
            Error::Api(ProxyError::NotFound(_)) => "not_found",
            Error::Api(ProxyError::Api(_)) => "upstream_api",
            Error::Flow(_) => "oauth_flow",
        }
    }

    fn log(&self) {
        let kind = self.kind();
        match self {
            Error::Credential(CredentialError::Missing)
            | Error::Api(ProxyError::Credential(CredentialError::Missing))
            | Error::Api(ProxyError::NotFound(_)) => warn!(kind, error = %self, "request rejected"),
            _ => error!(kind, error = %self, "request failed"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        let (status, message) = self.status_and_message();
        (status, message).into_response()
    }
}
