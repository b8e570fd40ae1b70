//! Durable, mergeable session persistence
//!
//! A session file is a JSON document with stable top-level keys:
//! `session_metadata`, `collection_results`, `preprocessing_summary`,
//! `analysis_results`, `generated_knowledge` and `last_updated`.
//!
//! Every write reads the existing document, replaces exactly one key,
//! refreshes `session_metadata` and `last_updated`, and writes the whole
//! document back atomically. Keys never disappear once written. Writers to
//! the same session are serialized through [`SessionLocks`].

pub mod file_store;
pub mod sqlite_store;

pub use file_store::FileSessionStore;
pub use sqlite_store::SqliteSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use sage_common::Result;

use crate::models::Session;

/// Phase output keys of the session file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKey {
    CollectionResults,
    PreprocessingSummary,
    AnalysisResults,
    GeneratedKnowledge,
}

impl PhaseKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKey::CollectionResults => "collection_results",
            PhaseKey::PreprocessingSummary => "preprocessing_summary",
            PhaseKey::AnalysisResults => "analysis_results",
            PhaseKey::GeneratedKnowledge => "generated_knowledge",
        }
    }
}

/// Persisted form of a session
///
/// Absent keys mean the phase has not produced output yet. Keys written by
/// other tools are kept in `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_metadata: Option<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocessing_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_knowledge: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionFile {
    pub fn phase_output(&self, key: PhaseKey) -> Option<&Value> {
        match key {
            PhaseKey::CollectionResults => self.collection_results.as_ref(),
            PhaseKey::PreprocessingSummary => self.preprocessing_summary.as_ref(),
            PhaseKey::AnalysisResults => self.analysis_results.as_ref(),
            PhaseKey::GeneratedKnowledge => self.generated_knowledge.as_ref(),
        }
    }

    /// Typed view of a phase output
    pub fn phase<T: DeserializeOwned>(&self, key: PhaseKey) -> Result<Option<T>> {
        self.phase_output(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Into::into)
    }

    /// Replace one phase key, leaving every other key as it was
    pub fn set_phase_output(&mut self, key: PhaseKey, data: Value) {
        let slot = match key {
            PhaseKey::CollectionResults => &mut self.collection_results,
            PhaseKey::PreprocessingSummary => &mut self.preprocessing_summary,
            PhaseKey::AnalysisResults => &mut self.analysis_results,
            PhaseKey::GeneratedKnowledge => &mut self.generated_knowledge,
        };
        *slot = Some(data);
    }

    /// Apply one write: optional phase output, then refresh metadata
    pub fn merge(&mut self, session: &Session, update: Option<(PhaseKey, Value)>) {
        if let Some((key, data)) = update {
            self.set_phase_output(key, data);
        }
        self.session_metadata = Some(session.clone());
        self.last_updated = Some(Utc::now());
    }

    /// Top-level keys currently present
    pub fn present_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.session_metadata.is_some() {
            keys.push("session_metadata".to_string());
        }
        for key in [
            PhaseKey::CollectionResults,
            PhaseKey::PreprocessingSummary,
            PhaseKey::AnalysisResults,
            PhaseKey::GeneratedKnowledge,
        ] {
            if self.phase_output(key).is_some() {
                keys.push(key.as_str().to_string());
            }
        }
        if self.last_updated.is_some() {
            keys.push("last_updated".to_string());
        }
        keys.extend(self.extra.keys().cloned());
        keys
    }
}

/// Durable system of record for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Refresh `session_metadata`, keeping all phase outputs
    async fn save_metadata(&self, session: &Session) -> Result<()>;

    /// Replace one phase output and refresh `session_metadata`
    async fn save_phase_output(&self, session: &Session, key: PhaseKey, data: Value) -> Result<()>;

    /// Load the merged document, `None` if never written
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionFile>>;

    /// Ids of every persisted session
    async fn list_session_ids(&self) -> Result<Vec<Uuid>>;
}

/// One async mutex per session id
///
/// Held across the read-merge-write cycle so metadata updates and phase
/// output updates for the same session cannot interleave.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(session_id).or_default())
        };
        lock.lock_owned().await
    }
}
