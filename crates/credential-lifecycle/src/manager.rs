//! Credential lifecycle orchestration
//!
//! Combines the validator, refresher and store to answer "give me a currently
//! valid credential or tell me why not". Every mutating operation runs under
//! one async mutex, so the read → classify → refresh → write sequence is
//! single-flight: two concurrent callers can never both refresh and have one
//! rotation result overwrite the other.

use std::sync::Arc;

use chrono::Utc;
use google_auth::{CredentialInput, CredentialRecord};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::CredentialError;
use crate::refresh::TokenRefresher;
use crate::store::CredentialStore;
use crate::validator::{Classification, classify};

/// Classifications per `ensure_valid` call: the original record plus the
/// refreshed one. This caps each call at one refresh.
const MAX_CLASSIFICATIONS: u32 = 2;

/// Read-only view of the stored credential for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Absent,
    Valid,
    ExpiredRefreshable,
    Invalid,
}

impl From<Classification> for CredentialStatus {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Valid => CredentialStatus::Valid,
            Classification::ExpiredRefreshable => CredentialStatus::ExpiredRefreshable,
            Classification::Invalid => CredentialStatus::Invalid,
        }
    }
}

pub struct CredentialLifecycleManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    required_scopes: Vec<String>,
    flight: Mutex<()>,
}

impl CredentialLifecycleManager {
    /// `required_scopes` must all be granted for `accept_new` to persist a
    /// credential. An empty list disables the check.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        required_scopes: Vec<String>,
    ) -> Self {
        Self {
            store,
            refresher,
            required_scopes,
            flight: Mutex::new(()),
        }
    }

    /// Return a currently valid credential, refreshing at most once.
    ///
    /// Uses `input` when given, otherwise the stored credential. A valid
    /// credential is written back even when unchanged, so the store always
    /// holds exactly what was last handed out. On any failure the store is
    /// left untouched.
    #[instrument(skip_all)]
    pub async fn ensure_valid(
        &self,
        input: Option<CredentialInput>,
    ) -> Result<CredentialRecord, CredentialError> {
        let _flight = self.flight.lock().await;

        let input = match input {
            Some(input) => input,
            None => match self.store.load().await? {
                Some(blob) => CredentialInput::FromSerializedForm(blob),
                None => {
                    debug!("no stored credential");
                    return Err(CredentialError::Missing);
                }
            },
        };

        let mut record = input.into_record().map_err(|e| {
            warn!(error = %e, "credential is malformed");
            CredentialError::Invalid
        })?;

        for attempt in 1..=MAX_CLASSIFICATIONS {
            let classification = classify(&record, Utc::now());
            record_classification(classification);

            match classification {
                Classification::Valid => {
                    self.store.replace(&record).await?;
                    return Ok(record);
                }
                Classification::Invalid => {
                    warn!(attempt, "credential is invalid");
                    return Err(CredentialError::Invalid);
                }
                Classification::ExpiredRefreshable if attempt < MAX_CLASSIFICATIONS => {
                    record = self.refresher.refresh(&record).await.map_err(|e| {
                        error!(error = %e, kind = e.label(), "credential refresh failed");
                        CredentialError::RefreshFailed(e.to_string())
                    })?;
                }
                Classification::ExpiredRefreshable => break,
            }
        }

        warn!("refreshed credential is still expired");
        Err(CredentialError::RefreshFailed(
            "refreshed credential is still expired".into(),
        ))
    }

    /// Validate a freshly exchanged credential once and persist it if usable.
    ///
    /// Never refreshes: a credential straight from the authorization exchange
    /// that is not already valid, or that lacks a required scope, is rejected.
    #[instrument(skip_all)]
    pub async fn accept_new(
        &self,
        input: CredentialInput,
    ) -> Result<CredentialRecord, CredentialError> {
        let _flight = self.flight.lock().await;

        let record = input.into_record().map_err(|e| {
            warn!(error = %e, "new credential is malformed");
            CredentialError::Invalid
        })?;

        let classification = classify(&record, Utc::now());
        record_classification(classification);
        if classification != Classification::Valid {
            warn!(
                classification = classification.label(),
                "new credential rejected"
            );
            return Err(CredentialError::Invalid);
        }

        if !record.covers_scopes(&self.required_scopes) {
            warn!(
                granted = ?record.scopes,
                required = ?self.required_scopes,
                "new credential is missing required scopes"
            );
            return Err(CredentialError::Invalid);
        }

        self.store.replace(&record).await?;
        info!(backend = self.store.backend(), "new credential stored");
        Ok(record)
    }

    /// Drop the stored credential. Always succeeds; store errors are logged.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        let _flight = self.flight.lock().await;
        match self.store.clear().await {
            Ok(()) => info!("credential cleared"),
            Err(e) => error!(error = %e, "failed to clear credential store"),
        }
    }

    /// Classify the stored credential without refreshing or writing.
    pub async fn status(&self) -> Result<CredentialStatus, CredentialError> {
        let Some(blob) = self.store.load().await? else {
            return Ok(CredentialStatus::Absent);
        };
        Ok(match CredentialInput::FromSerializedForm(blob).into_record() {
            Ok(record) => classify(&record, Utc::now()).into(),
            Err(_) => CredentialStatus::Invalid,
        })
    }
}

fn record_classification(classification: Classification) {
    metrics::counter!(
        "credential_validation_total",
        "classification" => classification.label()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshError;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Duration};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Refresher returning canned results in order and counting calls.
    struct StubRefresher {
        calls: AtomicUsize,
        results: StdMutex<VecDeque<Result<CredentialRecord, RefreshError>>>,
        delay: std::time::Duration,
    }

    impl StubRefresher {
        fn new(results: Vec<Result<CredentialRecord, RefreshError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                results: StdMutex::new(results.into()),
                delay: std::time::Duration::ZERO,
            })
        }

        fn slow(results: Vec<Result<CredentialRecord, RefreshError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                results: StdMutex::new(results.into()),
                delay: std::time::Duration::from_millis(50),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenRefresher for StubRefresher {
        fn refresh<'a>(
            &'a self,
            _record: &'a CredentialRecord,
        ) -> Pin<Box<dyn Future<Output = Result<CredentialRecord, RefreshError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.results
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(RefreshError::Http("no canned result".into())))
            })
        }
    }

    fn record(
        access: &str,
        expiry: DateTime<Utc>,
        refresh: Option<&str>,
    ) -> CredentialRecord {
        CredentialRecord {
            access_token: access.into(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".into(),
            expiry: Some(expiry),
            scopes: vec!["scope-a".into(), "scope-b".into()],
            client_id: "client".into(),
            client_secret: "secret".into(),
            token_uri: "https://oauth2.googleapis.com/token".into(),
        }
    }

    fn manager(
        store: Arc<MemoryStore>,
        refresher: Arc<StubRefresher>,
    ) -> CredentialLifecycleManager {
        CredentialLifecycleManager::new(store, refresher, vec!["scope-a".into()])
    }

    fn hours(n: i64) -> DateTime<Utc> {
        Utc::now() + Duration::hours(n)
    }

    #[tokio::test]
    async fn empty_store_is_missing_without_refresh() {
        let store = Arc::new(MemoryStore::new());
        let refresher = StubRefresher::new(vec![]);
        let mgr = manager(store, refresher.clone());

        let result = mgr.ensure_valid(None).await;
        assert!(matches!(result, Err(CredentialError::Missing)));
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn valid_record_is_returned_and_repersisted() {
        let store = Arc::new(MemoryStore::new());
        let refresher = StubRefresher::new(vec![]);
        let mgr = manager(store.clone(), refresher.clone());
        let input = record("at_valid", hours(1), None);

        let result = mgr
            .ensure_valid(Some(CredentialInput::FromRecord(input.clone())))
            .await
            .unwrap();

        assert_eq!(result, input);
        // Re-persisted even though nothing changed
        assert_eq!(store.get().await.unwrap().unwrap(), input);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn expired_record_is_refreshed_and_stored() {
        let stale = record("at_stale", hours(-1), Some("rt1"));
        let fresh = record("at_fresh", hours(1), Some("rt1"));
        let store = Arc::new(MemoryStore::with_record(&stale).unwrap());
        let refresher = StubRefresher::new(vec![Ok(fresh.clone())]);
        let mgr = manager(store.clone(), refresher.clone());

        let result = mgr.ensure_valid(None).await.unwrap();

        assert_eq!(result, fresh);
        assert!(result.expiry.unwrap() > Utc::now());
        assert_eq!(store.get().await.unwrap().unwrap(), fresh);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_invalid_and_store_unchanged() {
        let stale = record("at_stale", hours(-1), None);
        let store = Arc::new(MemoryStore::with_record(&stale).unwrap());
        let refresher = StubRefresher::new(vec![]);
        let mgr = manager(store.clone(), refresher.clone());

        let result = mgr.ensure_valid(None).await;

        assert!(matches!(result, Err(CredentialError::Invalid)));
        assert_eq!(store.get().await.unwrap().unwrap(), stale);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn refresh_failure_is_refresh_failed_and_store_unchanged() {
        let stale = record("at_stale", hours(-1), Some("rt_revoked"));
        let store = Arc::new(MemoryStore::with_record(&stale).unwrap());
        let refresher =
            StubRefresher::new(vec![Err(RefreshError::Rejected("invalid_grant".into()))]);
        let mgr = manager(store.clone(), refresher.clone());

        let result = mgr.ensure_valid(None).await;

        assert!(matches!(result, Err(CredentialError::RefreshFailed(_))));
        assert_eq!(store.get().await.unwrap().unwrap(), stale);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn at_most_one_refresh_even_if_refreshed_record_is_still_expired() {
        let stale = record("at_stale", hours(-1), Some("rt1"));
        let still_stale = record("at_still_stale", hours(-1), Some("rt1"));
        let store = Arc::new(MemoryStore::with_record(&stale).unwrap());
        let refresher = StubRefresher::new(vec![
            Ok(still_stale.clone()),
            Ok(record("at_never", hours(1), Some("rt1"))),
        ]);
        let mgr = manager(store.clone(), refresher.clone());

        let result = mgr.ensure_valid(None).await;

        assert!(matches!(result, Err(CredentialError::RefreshFailed(_))));
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.get().await.unwrap().unwrap(), stale);
    }

    #[tokio::test]
    async fn refreshed_record_that_is_malformed_is_invalid() {
        let stale = record("at_stale", hours(-1), Some("rt1"));
        let broken = record("", hours(1), Some("rt1"));
        let store = Arc::new(MemoryStore::with_record(&stale).unwrap());
        let refresher = StubRefresher::new(vec![Ok(broken)]);
        let mgr = manager(store.clone(), refresher.clone());

        let result = mgr.ensure_valid(None).await;
        assert!(matches!(result, Err(CredentialError::Invalid)));
        assert_eq!(store.get().await.unwrap().unwrap(), stale);
    }

    #[tokio::test]
    async fn serialized_input_is_normalized() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store.clone(), StubRefresher::new(vec![]));
        let input = record("at_json", hours(1), Some("rt1"));

        let result = mgr
            .ensure_valid(Some(CredentialInput::FromSerializedForm(
                input.to_json().unwrap(),
            )))
            .await
            .unwrap();
        assert_eq!(result, input);
        assert_eq!(store.get().await.unwrap().unwrap(), input);
    }

    #[tokio::test]
    async fn unparseable_serialized_input_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store.clone(), StubRefresher::new(vec![]));

        let result = mgr
            .ensure_valid(Some(CredentialInput::FromSerializedForm("{oops".into())))
            .await;
        assert!(matches!(result, Err(CredentialError::Invalid)));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logout_then_ensure_valid_is_missing() {
        let store = Arc::new(MemoryStore::with_record(&record("at", hours(1), None)).unwrap());
        let mgr = manager(store, StubRefresher::new(vec![]));

        mgr.logout().await;
        assert!(matches!(
            mgr.ensure_valid(None).await,
            Err(CredentialError::Missing)
        ));
        // Logging out twice is fine
        mgr.logout().await;
    }

    #[tokio::test]
    async fn accept_new_stores_valid_record_without_refresh() {
        let store = Arc::new(MemoryStore::new());
        let refresher = StubRefresher::new(vec![]);
        let mgr = manager(store.clone(), refresher.clone());
        let new = record("at_new", hours(1), Some("rt_new"));

        let accepted = mgr
            .accept_new(CredentialInput::FromRecord(new.clone()))
            .await
            .unwrap();

        assert_eq!(accepted, new);
        assert_eq!(store.get().await.unwrap().unwrap(), new);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn accept_new_rejects_expired_record_without_refreshing() {
        let existing = record("at_existing", hours(1), None);
        let store = Arc::new(MemoryStore::with_record(&existing).unwrap());
        let refresher = StubRefresher::new(vec![Ok(record("at_x", hours(1), None))]);
        let mgr = manager(store.clone(), refresher.clone());

        let result = mgr
            .accept_new(record("at_new", hours(-1), Some("rt")).into())
            .await;

        assert!(matches!(result, Err(CredentialError::Invalid)));
        assert_eq!(refresher.calls(), 0);
        assert_eq!(store.get().await.unwrap().unwrap(), existing);
    }

    #[tokio::test]
    async fn accept_new_rejects_missing_scopes() {
        let store = Arc::new(MemoryStore::new());
        let mgr = CredentialLifecycleManager::new(
            store.clone(),
            StubRefresher::new(vec![]),
            vec!["scope-a".into(), "scope-z".into()],
        );

        let result = mgr
            .accept_new(record("at_new", hours(1), Some("rt")).into())
            .await;
        assert!(matches!(result, Err(CredentialError::Invalid)));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_reports_without_mutating() {
        let stale = record("at_stale", hours(-1), Some("rt1"));
        let store = Arc::new(MemoryStore::new());
        let refresher = StubRefresher::new(vec![]);
        let mgr = manager(store.clone(), refresher.clone());

        assert_eq!(mgr.status().await.unwrap(), CredentialStatus::Absent);

        store.replace(&stale).await.unwrap();
        assert_eq!(
            mgr.status().await.unwrap(),
            CredentialStatus::ExpiredRefreshable
        );
        assert_eq!(refresher.calls(), 0);
        assert_eq!(store.get().await.unwrap().unwrap(), stale);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let stale = record("at_stale", hours(-1), Some("rt1"));
        let fresh = record("at_fresh", hours(1), Some("rt2"));
        let store = Arc::new(MemoryStore::with_record(&stale).unwrap());
        // Only one canned success: a second refresh would fail
        let refresher = StubRefresher::slow(vec![Ok(fresh.clone())]);
        let mgr = Arc::new(manager(store.clone(), refresher.clone()));

        let mut handles = vec![];
        for _ in 0..8 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move { mgr.ensure_valid(None).await }));
        }
        for h in handles {
            let record = h.await.unwrap().unwrap();
            assert_eq!(record, fresh);
        }

        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.get().await.unwrap().unwrap(), fresh);
    }
}
