//! Approval checkpoints
//!
//! A proposal is persisted as a checkpoint awaiting approval. Approving it
//! claims the checkpoint exactly once, across processes, before anything
//! touches infrastructure. The run is written back after every stage.

use super::run::PipelineRun;
use crate::client::async_trait;
use crate::error::{OptimizerError, Result};
use crate::models::Proposal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    AwaitingApproval,
    Resumed,
    Cancelled,
    Completed,
}

impl CheckpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointState::AwaitingApproval => "awaiting_approval",
            CheckpointState::Resumed => "resumed",
            CheckpointState::Cancelled => "cancelled",
            CheckpointState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub cluster_name: String,
    pub state: CheckpointState,
    pub proposal: Proposal,
    pub run: Option<PipelineRun>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Fails with `ApprovalNotFound` for unknown ids
    async fn load(&self, id: &str) -> Result<Checkpoint>;

    async fn list(&self) -> Result<Vec<Checkpoint>>;

    /// Take the one-time resume token; true only for the first caller
    async fn try_claim(&self, id: &str) -> Result<bool>;
}

/// JSON file per checkpoint plus a `create_new` claim marker
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn claim_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.claim", id))
    }
}

fn store_error(context: &str, err: impl std::fmt::Display) -> OptimizerError {
    OptimizerError::Checkpoint(format!("{}: {}", context, err))
}

/// Ids are uuids; anything else could escape the state directory
fn validate_id(id: &str) -> Result<()> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| OptimizerError::ApprovalNotFound(id.to_string()))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        validate_id(&checkpoint.id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error("creating state directory", e))?;

        let path = self.checkpoint_path(&checkpoint.id);
        let temp_path = self.dir.join(format!("{}.json.tmp", checkpoint.id));
        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| store_error("serializing checkpoint", e))?;

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| store_error("creating checkpoint file", e))?;
        file.write_all(&body)
            .await
            .map_err(|e| store_error("writing checkpoint", e))?;
        file.sync_all()
            .await
            .map_err(|e| store_error("syncing checkpoint", e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| store_error("renaming checkpoint", e))?;
        debug!(id = %checkpoint.id, state = checkpoint.state.as_str(), "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        validate_id(id)?;
        let body = match tokio::fs::read(self.checkpoint_path(id)).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OptimizerError::ApprovalNotFound(id.to_string()))
            }
            Err(e) => return Err(store_error("reading checkpoint", e)),
        };
        serde_json::from_slice(&body).map_err(|e| store_error("decoding checkpoint", e))
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_error("listing state directory", e)),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error("listing state directory", e))?
        {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if validate_id(id).is_err() {
                continue;
            }
            checkpoints.push(self.load(id).await?);
        }
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(checkpoints)
    }

    async fn try_claim(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error("creating state directory", e))?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.claim_path(id))
            .await
        {
            Ok(mut marker) => {
                marker
                    .write_all(Utc::now().to_rfc3339().as_bytes())
                    .await
                    .map_err(|e| store_error("writing claim marker", e))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(store_error("creating claim marker", e)),
        }
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    claimed: Mutex<HashSet<String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| OptimizerError::ApprovalNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut all: Vec<Checkpoint> = self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn try_claim(&self, id: &str) -> Result<bool> {
        Ok(self
            .claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string()))
    }
}

/// Approval workflow over a [`CheckpointStore`]
#[derive(Clone)]
pub struct ApprovalGate {
    store: Arc<dyn CheckpointStore>,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn CheckpointStore {
        self.store.as_ref()
    }

    /// Persist a proposal awaiting approval and return its id
    pub async fn submit(&self, proposal: Proposal) -> Result<String> {
        let now = Utc::now();
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            cluster_name: proposal.cluster_name.clone(),
            state: CheckpointState::AwaitingApproval,
            proposal,
            run: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&checkpoint).await?;
        info!(id = %checkpoint.id, cluster = %checkpoint.cluster_name, "Proposal awaiting approval");
        Ok(checkpoint.id)
    }

    pub async fn load(&self, id: &str) -> Result<Checkpoint> {
        self.store.load(id).await
    }

    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        self.store.list().await
    }

    /// Resume a pending checkpoint exactly once
    pub async fn claim(&self, id: &str) -> Result<Checkpoint> {
        let mut checkpoint = self.store.load(id).await?;
        match checkpoint.state {
            CheckpointState::AwaitingApproval => {}
            CheckpointState::Cancelled => return Err(OptimizerError::ApprovalCancelled(id.to_string())),
            CheckpointState::Resumed | CheckpointState::Completed => {
                return Err(OptimizerError::AlreadyResumed(id.to_string()))
            }
        }

        let busy = self.store.list().await?.into_iter().any(|other| {
            other.id != checkpoint.id
                && other.cluster_name == checkpoint.cluster_name
                && other.state == CheckpointState::Resumed
        });
        if busy {
            return Err(OptimizerError::RunInProgress(checkpoint.cluster_name));
        }

        if !self.store.try_claim(id).await? {
            return Err(OptimizerError::AlreadyResumed(id.to_string()));
        }

        checkpoint.state = CheckpointState::Resumed;
        checkpoint.updated_at = Utc::now();
        self.store.save(&checkpoint).await?;
        info!(id, cluster = %checkpoint.cluster_name, "Approval claimed");
        Ok(checkpoint)
    }

    /// Reject a pending checkpoint; no infrastructure is touched
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let mut checkpoint = self.store.load(id).await?;
        match checkpoint.state {
            CheckpointState::Cancelled => return Ok(()),
            CheckpointState::Resumed | CheckpointState::Completed => {
                return Err(OptimizerError::AlreadyResumed(id.to_string()))
            }
            CheckpointState::AwaitingApproval => {}
        }
        if !self.store.try_claim(id).await? {
            return Err(OptimizerError::AlreadyResumed(id.to_string()));
        }
        checkpoint.state = CheckpointState::Cancelled;
        checkpoint.updated_at = Utc::now();
        self.store.save(&checkpoint).await?;
        info!(id, cluster = %checkpoint.cluster_name, "Approval cancelled");
        Ok(())
    }

    /// Persist the latest run state; a terminal run completes the checkpoint
    pub async fn record_run(&self, id: &str, run: &PipelineRun) -> Result<()> {
        let mut checkpoint = self.store.load(id).await?;
        if run.phase.is_terminal() && checkpoint.state == CheckpointState::Resumed {
            checkpoint.state = CheckpointState::Completed;
        }
        checkpoint.run = Some(run.clone());
        checkpoint.updated_at = Utc::now();
        self.store.save(&checkpoint).await
    }
}
