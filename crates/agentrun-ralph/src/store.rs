//! Checkpoint persistence.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use agentrun_core::{Checkpoint, TaskId};

/// Checkpoint store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persistence for task checkpoints, keyed by task id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a task, if one exists.
    async fn load(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, StoreError>;

    /// Persist a checkpoint, replacing any previous one.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Remove a task's checkpoint. Removing a missing checkpoint is not
    /// an error.
    async fn remove(&self, task_id: &TaskId) -> Result<(), StoreError>;
}

/// File-backed store, one JSON file per task under a base directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`. The directory is created on the
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(task_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.task_id);
        let raw = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(&path, raw).await?;
        debug!(task_id = %checkpoint.task_id, iteration = checkpoint.iteration, "Checkpoint saved");
        Ok(())
    }

    async fn remove(&self, task_id: &TaskId) -> Result<(), StoreError> {
        let path = self.path_for(task_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, used in tests and single-process setups.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: RwLock<HashMap<TaskId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.inner.read().await.get(task_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(checkpoint.task_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn remove(&self, task_id: &TaskId) -> Result<(), StoreError> {
        self.inner.write().await.remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let task_id = TaskId::new("t-1");

        assert!(store.load(&task_id).await.unwrap().is_none());

        let mut cp = Checkpoint::new(task_id.clone());
        cp.iteration = 4;
        store.save(&cp).await.unwrap();

        let loaded = store.load(&task_id).await.unwrap().unwrap();
        assert_eq!(loaded.iteration, 4);
        assert_eq!(loaded.task_id, task_id);

        store.remove(&task_id).await.unwrap();
        assert!(store.load(&task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.remove(&TaskId::new("never-saved")).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_replaces_on_save() {
        let store = MemoryCheckpointStore::new();
        let task_id = TaskId::new("t-1");

        let mut cp = Checkpoint::new(task_id.clone());
        store.save(&cp).await.unwrap();
        cp.iteration = 9;
        store.save(&cp).await.unwrap();

        assert_eq!(store.len().await, 1);
        let loaded = store.load(&task_id).await.unwrap().unwrap();
        assert_eq!(loaded.iteration, 9);
    }
}
