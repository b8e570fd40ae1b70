//! One JSON document per session on the local filesystem
//!
//! Files are named `session_<uuid>.json`. Each write goes to a sibling
//! `.tmp` file which is fsynced and renamed over the target, so a reader
//! (or a crash) only ever observes a complete document.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use sage_common::{Error, Result};

use super::{PhaseKey, SessionFile, SessionLocks, SessionStore};
use crate::models::Session;

const FILE_PREFIX: &str = "session_";
const FILE_SUFFIX: &str = ".json";

pub struct FileSessionStore {
    dir: PathBuf,
    locks: SessionLocks,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "File session store ready");
        Ok(Self {
            dir,
            locks: SessionLocks::new(),
        })
    }

    pub fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", FILE_PREFIX, session_id, FILE_SUFFIX))
    }

    async fn read_file(&self, session_id: Uuid) -> Result<Option<SessionFile>> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Internal(format!("Corrupt session file {}: {}", path.display(), e))
                })?;
                Ok(Some(file))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, session_id: Uuid, file: &SessionFile) -> Result<()> {
        let path = self.path_for(session_id);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(file)?;

        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&bytes).await?;
        tmp.sync_all().await?;
        drop(tmp);

        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn merge_write(&self, session: &Session, update: Option<(PhaseKey, Value)>) -> Result<()> {
        let _guard = self.locks.acquire(session.session_id).await;

        let mut file = self.read_file(session.session_id).await?.unwrap_or_default();
        let key = update.as_ref().map(|(k, _)| k.as_str());
        file.merge(session, update);
        self.write_file(session.session_id, &file).await?;

        tracing::debug!(
            session_id = %session.session_id,
            key = key.unwrap_or("session_metadata"),
            status = session.state.status.as_str(),
            "Session file written"
        );
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save_metadata(&self, session: &Session) -> Result<()> {
        self.merge_write(session, None).await
    }

    async fn save_phase_output(&self, session: &Session, key: PhaseKey, data: Value) -> Result<()> {
        self.merge_write(session, Some((key, data))).await
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionFile>> {
        let _guard = self.locks.acquire(session_id).await;
        self.read_file(session_id).await
    }

    async fn list_session_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let id = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
                .and_then(|id| Uuid::parse_str(id).ok());
            if let Some(id) = id {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}
