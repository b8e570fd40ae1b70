//! SQLite-backed session store
//!
//! One row per session holding the merged JSON document. The read-merge-upsert
//! cycle runs in a single transaction and is retried on lock contention.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use sage_common::{Error, Result};

use super::{PhaseKey, SessionFile, SessionLocks, SessionStore};
use crate::models::Session;
use crate::utils::{retry_with_backoff, RetryPolicy};

pub struct SqliteSessionStore {
    pool: SqlitePool,
    locks: SessionLocks,
}

impl SqliteSessionStore {
    /// Open (or create) the database file and ensure the table exists
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        tracing::info!(path = %db_path.display(), "SQLite session store opened");
        Self::new(pool).await
    }

    /// Use an existing pool, creating the table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_files (
                session_id TEXT PRIMARY KEY NOT NULL,
                document TEXT NOT NULL,
                status TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            locks: SessionLocks::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn merge_once(&self, session: &Session, update: Option<(PhaseKey, Value)>) -> Result<()> {
        let id = session.session_id.to_string();
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT document FROM session_files WHERE session_id = ?")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await?;

        let mut file = match existing {
            Some(doc) => parse_document(&id, &doc)?,
            None => SessionFile::default(),
        };
        file.merge(session, update);

        let document = serde_json::to_string(&file)?;
        let last_updated = file
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO session_files (session_id, document, status, last_updated)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                document = excluded.document,
                status = excluded.status,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&id)
        .bind(&document)
        .bind(session.state.status.as_str())
        .bind(&last_updated)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn merge_write(&self, session: &Session, update: Option<(PhaseKey, Value)>) -> Result<()> {
        let _guard = self.locks.acquire(session.session_id).await;
        let policy = RetryPolicy::lock_contention();

        retry_with_backoff("session document upsert", &policy, || {
            self.merge_once(session, update.clone())
        })
        .await?;

        tracing::debug!(
            session_id = %session.session_id,
            key = update.as_ref().map(|(k, _)| k.as_str()).unwrap_or("session_metadata"),
            "Session row written"
        );
        Ok(())
    }
}

fn parse_document(id: &str, doc: &str) -> Result<SessionFile> {
    serde_json::from_str(doc)
        .map_err(|e| Error::Internal(format!("Corrupt session document {}: {}", id, e)))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save_metadata(&self, session: &Session) -> Result<()> {
        self.merge_write(session, None).await
    }

    async fn save_phase_output(&self, session: &Session, key: PhaseKey, data: Value) -> Result<()> {
        self.merge_write(session, Some((key, data))).await
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionFile>> {
        let id = session_id.to_string();
        let row = sqlx::query("SELECT document FROM session_files WHERE session_id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let doc: String = row.try_get("document")?;
                parse_document(&id, &doc).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list_session_ids(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT session_id FROM session_files ORDER BY session_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(ids
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect())
    }
}
