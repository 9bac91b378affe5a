// ============================================
// File: crates/blemesh-bearer/src/store.rs
// ============================================
//! # JSON File Store
//!
//! ## Creation Reason
//! Keeps keys and configuration across restarts of the binary. The whole
//! `StoredState` is rewritten as pretty JSON after each change; the state
//! is small; sequence numbers are written once per reserved block and
//! replay entries in batches.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The file holds raw keys; create it with restrictive permissions
//! - A missing file loads as empty state
//!
//! ## Last Modified
//! v0.1.0 - Initial file store

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BearerError, Result};
use crate::traits::{
    AppKeyRecord, HeartbeatPubRecord, ModelRecord, NodeStateRecord, Persistence, ReplayRecord,
    SequenceRecord, StoredState, SubnetRecord,
};

/// `Persistence` backed by a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoredState>,
}

impl JsonFileStore {
    /// Opens the store at `path`, reading existing contents if present.
    ///
    /// # Errors
    /// `Storage` if the file exists but cannot be read or decoded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| BearerError::storage("decode", e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredState::default(),
            Err(e) => return Err(BearerError::storage("read", e.to_string())),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Applies `f` to the state and rewrites the file.
    async fn update(&self, f: impl FnOnce(&mut StoredState)) -> Result<()> {
        let content = {
            let mut state = self.state.lock();
            f(&mut state);
            serde_json::to_string_pretty(&*state)
                .map_err(|e| BearerError::storage("encode", e.to_string()))?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BearerError::storage("create dir", e.to_string()))?;
            }
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| BearerError::storage("write", e.to_string()))?;
        debug!(path = %self.path.display(), "State persisted");
        Ok(())
    }
}

#[async_trait]
impl Persistence for JsonFileStore {
    async fn store_subnet(&self, record: SubnetRecord) -> Result<()> {
        self.update(|s| s.upsert_subnet(record)).await
    }

    async fn remove_subnet(&self, net_idx: u16) -> Result<()> {
        self.update(|s| s.remove_subnet(net_idx)).await
    }

    async fn store_app_key(&self, record: AppKeyRecord) -> Result<()> {
        self.update(|s| s.upsert_app_key(record)).await
    }

    async fn remove_app_key(&self, app_idx: u16) -> Result<()> {
        self.update(|s| s.remove_app_key(app_idx)).await
    }

    async fn store_model(&self, record: ModelRecord) -> Result<()> {
        self.update(|s| s.upsert_model(record)).await
    }

    async fn store_node_state(&self, record: NodeStateRecord) -> Result<()> {
        self.update(|s| s.node = Some(record)).await
    }

    async fn store_sequence(&self, record: SequenceRecord) -> Result<()> {
        self.update(|s| s.sequence = Some(record)).await
    }

    async fn store_heartbeat_pub(&self, record: HeartbeatPubRecord) -> Result<()> {
        self.update(|s| s.heartbeat_pub = Some(record)).await
    }

    async fn store_replay(&self, records: Vec<ReplayRecord>) -> Result<()> {
        self.update(|s| s.upsert_replay(records)).await
    }

    async fn load(&self) -> Result<StoredState> {
        Ok(self.state.lock().clone())
    }

    async fn clear(&self) -> Result<()> {
        self.update(StoredState::reset).await
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("blemesh-store-{}-{name}.json", std::process::id()))
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let path = temp_path("missing");
        let _ = tokio::fs::remove_file(&path).await;
        let store = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap(), StoredState::default());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let path = temp_path("reopen");
        let store = JsonFileStore::open(&path).await.unwrap();
        store
            .store_subnet(SubnetRecord {
                net_idx: 0,
                phase: 1,
                key: [1; 16],
                new_key: Some([2; 16]),
                node_identity: 0,
            })
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let state = reopened.load().await.unwrap();
        assert_eq!(state.subnets.len(), 1);
        assert_eq!(state.subnets[0].new_key, Some([2; 16]));

        reopened
            .store_sequence(SequenceRecord {
                seq: 128,
                iv_index: 0,
                iv_update: false,
            })
            .await
            .unwrap();
        reopened.clear().await.unwrap();
        drop(reopened);

        let cleared = JsonFileStore::open(&path).await.unwrap().load().await.unwrap();
        assert!(cleared.subnets.is_empty());
        assert_eq!(cleared.sequence.map(|s| s.seq), Some(128));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let path = temp_path("corrupt");
        tokio::fs::write(&path, "not json").await.unwrap();
        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(err.is_storage_error());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
