use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::state::{NodeId, RunState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingFeedback,
    Completed,
    Terminated,
    Failed { error: String },
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::AwaitingFeedback => "awaiting_feedback",
            RunStatus::Completed => "completed",
            RunStatus::Terminated => "terminated",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Terminated
                | RunStatus::Failed { .. }
                | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a run after a transition. `node` is the node the run resumes at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub node: NodeId,
    pub status: RunStatus,
    pub state: RunState,
    pub revision: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl RunCheckpoint {
    pub fn new(run_id: impl Into<String>, state: RunState) -> Self {
        let now = now_ms();
        Self {
            run_id: run_id.into(),
            node: NodeId::Coordinator,
            status: RunStatus::Running,
            state,
            revision: 1,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn touch(&mut self) {
        self.revision = self.revision.saturating_add(1);
        self.updated_at_ms = now_ms();
    }
}

/// One JSON file per run under a directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub async fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, checkpoint: &RunCheckpoint) -> anyhow::Result<()> {
        let path = self.path_for(&checkpoint.run_id)?;
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&tmp, payload)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move checkpoint into {}", path.display()))?;
        Ok(())
    }

    pub async fn load(&self, run_id: &str) -> anyhow::Result<Option<RunCheckpoint>> {
        let path = self.path_for(run_id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    /// All readable checkpoints, most recently updated first. Unreadable files
    /// are skipped with a warning.
    pub async fn list(&self) -> anyhow::Result<Vec<RunCheckpoint>> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.dir.display()));
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|raw| Ok(serde_json::from_str::<RunCheckpoint>(&raw)?));
            match parsed {
                Ok(checkpoint) => out.push(checkpoint),
                Err(err) => tracing::warn!("skipping checkpoint {}: {err}", path.display()),
            }
        }
        out.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
        Ok(out)
    }

    fn path_for(&self, run_id: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_run_id(run_id) {
            anyhow::bail!("invalid run id `{run_id}`");
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
