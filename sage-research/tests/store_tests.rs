//! Session store contract tests
//!
//! The same scenarios run against the file-backed and SQLite-backed stores.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use sage_research::models::{NewSession, Session, SessionStatus};
use sage_research::store::{FileSessionStore, PhaseKey, SessionStore, SqliteSessionStore};

fn session(topic: &str) -> Session {
    Session::new(
        NewSession::new(topic, Duration::from_secs(60), 1.0)
            .into_config()
            .unwrap(),
    )
}

async fn file_store(dir: &TempDir) -> Arc<dyn SessionStore> {
    Arc::new(FileSessionStore::new(dir.path().join("sessions")).await.unwrap())
}

async fn sqlite_store(dir: &TempDir) -> Arc<dyn SessionStore> {
    Arc::new(SqliteSessionStore::connect(&dir.path().join("sessions.db")).await.unwrap())
}

async fn merge_keeps_earlier_outputs(store: Arc<dyn SessionStore>) {
    let mut s = session("merging");
    store.save_metadata(&s).await.unwrap();
    store
        .save_phase_output(&s, PhaseKey::CollectionResults, json!({ "total_documents": 3 }))
        .await
        .unwrap();

    s.state.transition_to(SessionStatus::Running).unwrap();
    s.state.documents_collected = 3;
    store
        .save_phase_output(&s, PhaseKey::PreprocessingSummary, json!({ "enabled": true }))
        .await
        .unwrap();
    store.save_metadata(&s).await.unwrap();

    let file = store.load(s.session_id).await.unwrap().unwrap();
    assert_eq!(
        file.phase_output(PhaseKey::CollectionResults),
        Some(&json!({ "total_documents": 3 }))
    );
    assert_eq!(
        file.phase_output(PhaseKey::PreprocessingSummary),
        Some(&json!({ "enabled": true }))
    );
    assert!(file.phase_output(PhaseKey::AnalysisResults).is_none());

    let metadata = file.session_metadata.as_ref().unwrap();
    assert_eq!(metadata.state.status, SessionStatus::Running);
    assert_eq!(metadata.state.documents_collected, 3);
    assert!(file.last_updated.is_some());
}

async fn rewriting_a_key_replaces_it(store: Arc<dyn SessionStore>) {
    let s = session("rewrite");
    store
        .save_phase_output(&s, PhaseKey::AnalysisResults, json!({ "batches_completed": 1 }))
        .await
        .unwrap();
    let first = store.load(s.session_id).await.unwrap().unwrap().last_updated.unwrap();

    store
        .save_phase_output(&s, PhaseKey::AnalysisResults, json!({ "batches_completed": 2 }))
        .await
        .unwrap();
    let file = store.load(s.session_id).await.unwrap().unwrap();

    assert_eq!(
        file.phase_output(PhaseKey::AnalysisResults),
        Some(&json!({ "batches_completed": 2 }))
    );
    assert!(file.last_updated.unwrap() >= first);
}

async fn repeated_save_is_idempotent(store: Arc<dyn SessionStore>) {
    let s = session("repeat");
    store
        .save_phase_output(&s, PhaseKey::CollectionResults, json!({ "total_documents": 1 }))
        .await
        .unwrap();
    store
        .save_phase_output(&s, PhaseKey::AnalysisResults, json!({ "batches_completed": 1 }))
        .await
        .unwrap();
    let before = store.load(s.session_id).await.unwrap().unwrap();

    store
        .save_phase_output(&s, PhaseKey::AnalysisResults, json!({ "batches_completed": 1 }))
        .await
        .unwrap();
    let after = store.load(s.session_id).await.unwrap().unwrap();

    assert_eq!(after.collection_results, before.collection_results);
    assert_eq!(after.analysis_results, before.analysis_results);
    assert_eq!(after.session_metadata, before.session_metadata);
    assert_eq!(after.present_keys(), before.present_keys());
}

async fn concurrent_writers_lose_nothing(store: Arc<dyn SessionStore>) {
    let s = session("contended");
    store.save_metadata(&s).await.unwrap();

    let keys = [
        PhaseKey::CollectionResults,
        PhaseKey::PreprocessingSummary,
        PhaseKey::AnalysisResults,
        PhaseKey::GeneratedKnowledge,
    ];
    let writers = keys.into_iter().enumerate().map(|(i, key)| {
        let store = store.clone();
        let s = s.clone();
        tokio::spawn(async move { store.save_phase_output(&s, key, json!({ "writer": i })).await })
    });
    for result in futures::future::join_all(writers).await {
        result.unwrap().unwrap();
    }

    let file = store.load(s.session_id).await.unwrap().unwrap();
    for (i, key) in keys.into_iter().enumerate() {
        assert_eq!(file.phase_output(key), Some(&json!({ "writer": i })), "{}", key.as_str());
    }
}

async fn listing_and_missing(store: Arc<dyn SessionStore>) {
    assert!(store.list_session_ids().await.unwrap().is_empty());
    assert!(store.load(uuid::Uuid::new_v4()).await.unwrap().is_none());

    let a = session("first");
    let b = session("second");
    store.save_metadata(&a).await.unwrap();
    store.save_metadata(&b).await.unwrap();

    let mut expected = vec![a.session_id, b.session_id];
    expected.sort();
    assert_eq!(store.list_session_ids().await.unwrap(), expected);
}

#[tokio::test]
async fn test_file_store_merges_outputs() {
    let dir = tempfile::tempdir().unwrap();
    merge_keeps_earlier_outputs(file_store(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_store_merges_outputs() {
    let dir = tempfile::tempdir().unwrap();
    merge_keeps_earlier_outputs(sqlite_store(&dir).await).await;
}

#[tokio::test]
async fn test_file_store_rewrites_key() {
    let dir = tempfile::tempdir().unwrap();
    rewriting_a_key_replaces_it(file_store(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_store_rewrites_key() {
    let dir = tempfile::tempdir().unwrap();
    rewriting_a_key_replaces_it(sqlite_store(&dir).await).await;
}

#[tokio::test]
async fn test_file_store_repeated_save() {
    let dir = tempfile::tempdir().unwrap();
    repeated_save_is_idempotent(file_store(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_store_repeated_save() {
    let dir = tempfile::tempdir().unwrap();
    repeated_save_is_idempotent(sqlite_store(&dir).await).await;
}

#[tokio::test]
async fn test_file_store_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    concurrent_writers_lose_nothing(file_store(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_store_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    concurrent_writers_lose_nothing(sqlite_store(&dir).await).await;
}

#[tokio::test]
async fn test_file_store_listing() {
    let dir = tempfile::tempdir().unwrap();
    listing_and_missing(file_store(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_store_listing() {
    let dir = tempfile::tempdir().unwrap();
    listing_and_missing(sqlite_store(&dir).await).await;
}

#[tokio::test]
async fn test_stores_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let s = session("durable");

    {
        let files = file_store(&dir).await;
        let db = sqlite_store(&dir).await;
        for store in [&files, &db] {
            store
                .save_phase_output(&s, PhaseKey::GeneratedKnowledge, json!({ "source": "empty" }))
                .await
                .unwrap();
        }
    }

    for store in [file_store(&dir).await, sqlite_store(&dir).await] {
        let file = store.load(s.session_id).await.unwrap().unwrap();
        assert_eq!(file.session_metadata.as_ref().unwrap().session_id, s.session_id);
        assert_eq!(
            file.phase_output(PhaseKey::GeneratedKnowledge),
            Some(&json!({ "source": "empty" }))
        );
    }
}

#[tokio::test]
async fn test_file_store_keeps_foreign_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).await.unwrap();
    let s = session("annotated");

    std::fs::write(
        store.path_for(s.session_id),
        serde_json::to_vec(&json!({ "operator_notes": "check sources" })).unwrap(),
    )
    .unwrap();

    store.save_metadata(&s).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.path_for(s.session_id)).unwrap()).unwrap();
    assert_eq!(raw["operator_notes"], "check sources");
    assert!(raw["session_metadata"].is_object());
    assert!(!dir.path().join(format!("session_{}.json.tmp", s.session_id)).exists());
}
