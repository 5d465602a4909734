//! Checkpoint persistence for restart-safe resume.
//!
//! One JSON file per committed micro-batch, named by zero-padded batch id so
//! lexical order is numeric order. A checkpoint is written to a temp file
//! and renamed into place; earlier checkpoints are superseded, never
//! mutated, and only read back at startup to find the resume point. A crash
//! between output writes and the commit reprocesses that batch, which is
//! safe because output names are deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while persisting or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable marker of one committed micro-batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub batch_id: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub committed_at: DateTime<Utc>,
}

/// Filesystem-backed checkpoint store.
pub struct CheckpointStore {
    dir: PathBuf,
    retain: usize,
}

impl CheckpointStore {
    /// Open (and create if needed) the checkpoint directory.
    pub fn open(dir: impl Into<PathBuf>, retain: usize) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retain: retain.max(1),
        })
    }

    fn path_for(&self, batch_id: u64) -> PathBuf {
        self.dir.join(format!("checkpoint-{:020}.json", batch_id))
    }

    /// Persist a checkpoint, pruning superseded files beyond the retention
    /// count.
    pub fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let tmp = self
            .dir
            .join(format!(".checkpoint-{:020}.tmp", checkpoint.batch_id));

        fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?)?;
        fs::rename(&tmp, self.path_for(checkpoint.batch_id))?;

        debug!(batch_id = checkpoint.batch_id, "checkpoint committed");

        self.prune()
    }

    /// The newest parseable checkpoint, if any.
    ///
    /// A corrupt file is skipped with a warning and the next older one is
    /// used: falling back only widens reprocessing, which at-least-once
    /// semantics already allow.
    pub fn latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let mut files = self.checkpoint_files()?;
        files.sort();

        for path in files.iter().rev() {
            let parsed = fs::read(path)
                .map_err(CheckpointError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(CheckpointError::from));
            match parsed {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint");
                }
            }
        }

        Ok(None)
    }

    /// Batch id the next run should start from.
    pub fn resume_batch_id(&self) -> Result<u64, CheckpointError> {
        Ok(self
            .latest()?
            .map(|checkpoint| checkpoint.batch_id + 1)
            .unwrap_or(0))
    }

    fn checkpoint_files(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("checkpoint-") && name.ends_with(".json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn prune(&self) -> Result<(), CheckpointError> {
        let mut files = self.checkpoint_files()?;
        files.sort();

        let excess = files.len().saturating_sub(self.retain);
        for path in files.drain(..excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to prune checkpoint");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_checkpoint(batch_id: u64) -> Checkpoint {
        Checkpoint {
            batch_id,
            success_count: 10,
            failure_count: 2,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), 4).unwrap();
        assert_eq!(store.latest().unwrap(), None);
        assert_eq!(store.resume_batch_id().unwrap(), 0);
    }

    #[test]
    fn test_commit_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), 4).unwrap();

        store.commit(&create_test_checkpoint(5)).unwrap();

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.batch_id, 5);
        assert_eq!(latest.success_count, 10);
        assert_eq!(store.resume_batch_id().unwrap(), 6);
    }

    #[test]
    fn test_newer_checkpoint_supersedes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), 8).unwrap();

        for id in 0..3 {
            store.commit(&create_test_checkpoint(id)).unwrap();
        }

        assert_eq!(store.latest().unwrap().unwrap().batch_id, 2);
        // Superseded markers still exist untouched.
        assert_eq!(store.checkpoint_files().unwrap().len(), 3);
    }

    #[test]
    fn test_prune_keeps_retention_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), 2).unwrap();

        for id in 0..5 {
            store.commit(&create_test_checkpoint(id)).unwrap();
        }

        let files = store.checkpoint_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(store.latest().unwrap().unwrap().batch_id, 4);
    }

    #[test]
    fn test_corrupt_newest_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), 8).unwrap();

        store.commit(&create_test_checkpoint(1)).unwrap();
        fs::write(
            dir.path().join("checkpoint-00000000000000000002.json"),
            b"garbage",
        )
        .unwrap();

        assert_eq!(store.latest().unwrap().unwrap().batch_id, 1);
    }

    #[test]
    fn test_reopen_resumes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CheckpointStore::open(dir.path(), 4).unwrap();
            store.commit(&create_test_checkpoint(9)).unwrap();
        }

        let reopened = CheckpointStore::open(dir.path(), 4).unwrap();
        assert_eq!(reopened.resume_batch_id().unwrap(), 10);
    }
}
