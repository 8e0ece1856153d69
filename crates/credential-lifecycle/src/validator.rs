//! Credential classification
//!
//! Pure decision logic: given a record and the current time, decide whether
//! it can be used as is, needs a refresh, or is unusable.

use chrono::{DateTime, Utc};
use google_auth::CredentialRecord;

/// Usability of a credential at a given instant.
///
/// - Valid: well formed, not expired (or no expiry)
/// - ExpiredRefreshable: expired, refresh token present
/// - Invalid: malformed, or expired without a refresh token (cannot self-heal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Valid,
    ExpiredRefreshable,
    Invalid,
}

impl Classification {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::ExpiredRefreshable => "expired_refreshable",
            Classification::Invalid => "invalid",
        }
    }
}

pub fn classify(record: &CredentialRecord, now: DateTime<Utc>) -> Classification {
    if !record.is_well_formed() {
        return Classification::Invalid;
    }
    if !record.is_expired(now) {
        return Classification::Valid;
    }
    if record.usable_refresh_token().is_some() {
        Classification::ExpiredRefreshable
    } else {
        Classification::Invalid
    }
}
