//! SQLite-backed credential slot (SQLx)
//!
//! # Schema
//! ```sql
//! CREATE TABLE credentials (
//!     namespace  TEXT PRIMARY KEY,  -- configured database name
//!     token      TEXT NOT NULL,     -- serialized CredentialRecord
//!     updated_at INTEGER NOT NULL   -- unix millis
//! );
//! ```
//!
//! `replace` deletes and inserts inside one transaction, so the slot goes
//! straight from the old record to the new one. The pool has a single
//! connection, which also serializes writers.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use google_auth::CredentialRecord;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::error::StoreError;
use crate::store::CredentialStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://broker.db`), creating the file and
    /// schema when missing.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err("parsing sqlite url"))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(db_err("connecting to sqlite"))?;

        Self::with_pool(pool, namespace).await
    }

    /// Use an existing pool; creates the table if needed.
    pub async fn with_pool(pool: SqlitePool, namespace: &str) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                namespace TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err("creating credentials table"))?;

        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    #[cfg(test)]
    async fn row_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM credentials WHERE namespace = ?")
            .bind(&self.namespace)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

impl CredentialStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, String>("SELECT token FROM credentials WHERE namespace = ?")
                .bind(&self.namespace)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("loading credential"))
        })
    }

    fn replace<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let blob = record
                .to_json()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let now = chrono::Utc::now().timestamp_millis();

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(db_err("starting transaction"))?;

            sqlx::query("DELETE FROM credentials WHERE namespace = ?")
                .bind(&self.namespace)
                .execute(&mut *tx)
                .await
                .map_err(db_err("clearing credential slot"))?;

            sqlx::query("INSERT INTO credentials (namespace, token, updated_at) VALUES (?, ?, ?)")
                .bind(&self.namespace)
                .bind(&blob)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err("inserting credential"))?;

            tx.commit().await.map_err(db_err("committing credential"))?;
            debug!(namespace = %self.namespace, "persisted credential");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM credentials WHERE namespace = ?")
                .bind(&self.namespace)
                .execute(&self.pool)
                .await
                .map_err(db_err("clearing credential slot"))?;
            debug!(namespace = %self.namespace, "cleared credential");
            Ok(())
        })
    }
}
