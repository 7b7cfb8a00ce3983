use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use quill_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};

use crate::checkpoint::{is_valid_run_id, CheckpointStore, RunCheckpoint, RunStatus};
use crate::error::WorkflowError;
use crate::nodes::{transition, Event, Next, NodeContext, WorkflowServices};
use crate::state::{NodeId, RunState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub auto_accepted_plan: bool,
    #[serde(default = "default_true")]
    pub enable_background_investigation: bool,
    #[serde(default)]
    pub run_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            locale: None,
            auto_accepted_plan: false,
            enable_background_investigation: true,
            run_id: None,
        }
    }
}

/// Where a drive of the run stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub node: NodeId,
    pub status: RunStatus,
    /// Set while the run waits for feedback.
    pub interrupt: Option<String>,
    pub state: RunState,
}

impl RunOutcome {
    fn from_checkpoint(checkpoint: RunCheckpoint, interrupt: Option<String>) -> Self {
        Self {
            run_id: checkpoint.run_id,
            node: checkpoint.node,
            status: checkpoint.status,
            interrupt,
            state: checkpoint.state,
        }
    }

    pub fn final_report(&self) -> Option<&str> {
        Some(self.state.final_report.as_str()).filter(|report| !report.is_empty())
    }

    /// Plan text shown to the reviewer while awaiting feedback.
    pub fn pending_plan(&self) -> Option<String> {
        match self.status {
            RunStatus::AwaitingFeedback => self.state.current_plan.display_text(),
            _ => None,
        }
    }
}

/// Drives runs through the node graph, persisting a checkpoint after every
/// transition.
#[derive(Clone)]
pub struct WorkflowRunner {
    services: Arc<WorkflowServices>,
    store: CheckpointStore,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

struct ActiveRun {
    run_id: String,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.run_id);
        }
    }
}

impl WorkflowRunner {
    pub fn new(services: WorkflowServices, store: CheckpointStore) -> Self {
        Self {
            services: Arc::new(services),
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn services(&self) -> &WorkflowServices {
        &self.services
    }

    pub async fn start(&self, request: RunRequest) -> Result<RunOutcome, WorkflowError> {
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if !is_valid_run_id(&run_id) {
            return Err(WorkflowError::InvalidRunId(run_id));
        }
        let (guard, cancel) = self.acquire(&run_id)?;
        if self.store.load(&run_id).await?.is_some() {
            return Err(WorkflowError::AlreadyExists(run_id));
        }

        let mut state = RunState::new(request.query).with_locale(request.locale.as_deref());
        state.auto_accepted_plan = request.auto_accepted_plan;
        state.enable_background_investigation = request.enable_background_investigation;
        let checkpoint = RunCheckpoint::new(run_id.clone(), state);
        self.store.save(&checkpoint).await?;

        let query = checkpoint
            .state
            .latest_user_message()
            .map(|m| redact_text(&m.content))
            .unwrap_or_default();
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                run_id: Some(&run_id),
                status: Some("running"),
                detail: Some(&query),
                ..ObservabilityEvent::new("workflow.run.started", "runner")
            },
        );

        let outcome = self.drive(checkpoint, Event::Advance, &cancel).await;
        drop(guard);
        outcome
    }

    /// Delivers reviewer feedback to a run waiting at `human_feedback`.
    pub async fn resume(
        &self,
        run_id: &str,
        feedback: impl Into<String>,
    ) -> Result<RunOutcome, WorkflowError> {
        let (guard, cancel) = self.acquire(run_id)?;
        let checkpoint = self.load_existing(run_id).await?;
        if checkpoint.status != RunStatus::AwaitingFeedback {
            return Err(WorkflowError::NotAwaitingFeedback {
                run_id: run_id.to_string(),
                status: checkpoint.status.to_string(),
            });
        }
        let event = Event::Resume {
            feedback: feedback.into(),
        };
        let outcome = self.drive(checkpoint, event, &cancel).await;
        drop(guard);
        outcome
    }

    /// Cancels a run. A run being driven stops at its next step; an idle
    /// non-terminal run is marked cancelled directly. Terminal runs keep their
    /// status.
    pub async fn cancel(&self, run_id: &str) -> Result<RunStatus, WorkflowError> {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(run_id).cloned());
        if let Some(token) = token {
            token.cancel();
            return Ok(RunStatus::Cancelled);
        }
        let mut checkpoint = self.load_existing(run_id).await?;
        if checkpoint.status.is_terminal() {
            return Ok(checkpoint.status);
        }
        checkpoint.status = RunStatus::Cancelled;
        checkpoint.touch();
        self.store.save(&checkpoint).await?;
        self.emit_finished(&checkpoint, Level::INFO);
        Ok(RunStatus::Cancelled)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, WorkflowError> {
        if !is_valid_run_id(run_id) {
            return Err(WorkflowError::InvalidRunId(run_id.to_string()));
        }
        Ok(self.store.load(run_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<RunCheckpoint>, WorkflowError> {
        Ok(self.store.list().await?)
    }

    fn acquire(&self, run_id: &str) -> Result<(ActiveRun, CancellationToken), WorkflowError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| anyhow::anyhow!("active run table poisoned"))?;
        if active.contains_key(run_id) {
            return Err(WorkflowError::RunBusy(run_id.to_string()));
        }
        let token = CancellationToken::new();
        active.insert(run_id.to_string(), token.clone());
        Ok((
            ActiveRun {
                run_id: run_id.to_string(),
                active: self.active.clone(),
            },
            token,
        ))
    }

    async fn load_existing(&self, run_id: &str) -> Result<RunCheckpoint, WorkflowError> {
        if !is_valid_run_id(run_id) {
            return Err(WorkflowError::InvalidRunId(run_id.to_string()));
        }
        self.store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(run_id.to_string()))
    }

    async fn drive(
        &self,
        mut checkpoint: RunCheckpoint,
        first_event: Event,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, WorkflowError> {
        let run_id = checkpoint.run_id.clone();
        let ctx = NodeContext {
            services: &self.services,
            run_id: &run_id,
            cancel,
        };
        checkpoint.status = RunStatus::Running;
        let mut event = first_event;

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(checkpoint).await;
            }
            let node = checkpoint.node;
            let step = transition(&ctx, checkpoint.state.clone(), node, event).await;
            event = Event::Advance;

            let step = match step {
                Ok(step) => step,
                Err(WorkflowError::Cancelled(_)) => return self.finish_cancelled(checkpoint).await,
                Err(err) => {
                    tracing::error!(run_id = %run_id, node = %node, "run failed: {err}");
                    checkpoint.status = RunStatus::Failed {
                        error: err.to_string(),
                    };
                    checkpoint.touch();
                    self.store.save(&checkpoint).await?;
                    self.emit_finished_with_code(&checkpoint, Level::ERROR, Some(err.code()));
                    return Err(err);
                }
            };

            checkpoint.state = step.state;
            if cancel.is_cancelled() {
                return self.finish_cancelled(checkpoint).await;
            }
            checkpoint.touch();
            match step.next {
                Next::Goto(next) => {
                    tracing::debug!(run_id = %run_id, from = %node, to = %next, "transition");
                    checkpoint.node = next;
                    self.store.save(&checkpoint).await?;
                }
                Next::Interrupt(prompt) => {
                    checkpoint.status = RunStatus::AwaitingFeedback;
                    self.store.save(&checkpoint).await?;
                    emit_event(
                        Level::INFO,
                        ProcessKind::Engine,
                        ObservabilityEvent {
                            run_id: Some(&run_id),
                            node: Some(node.as_str()),
                            status: Some("awaiting_feedback"),
                            ..ObservabilityEvent::new("workflow.run.interrupted", "runner")
                        },
                    );
                    return Ok(RunOutcome::from_checkpoint(checkpoint, Some(prompt)));
                }
                Next::End => {
                    checkpoint.status = if node == NodeId::Reporter {
                        RunStatus::Completed
                    } else {
                        RunStatus::Terminated
                    };
                    checkpoint.node = NodeId::End;
                    self.store.save(&checkpoint).await?;
                    self.emit_finished(&checkpoint, Level::INFO);
                    return Ok(RunOutcome::from_checkpoint(checkpoint, None));
                }
            }
        }
    }

    async fn finish_cancelled(
        &self,
        mut checkpoint: RunCheckpoint,
    ) -> Result<RunOutcome, WorkflowError> {
        tracing::info!(run_id = %checkpoint.run_id, "run cancelled");
        checkpoint.status = RunStatus::Cancelled;
        checkpoint.touch();
        self.store.save(&checkpoint).await?;
        self.emit_finished(&checkpoint, Level::INFO);
        Ok(RunOutcome::from_checkpoint(checkpoint, None))
    }

    fn emit_finished(&self, checkpoint: &RunCheckpoint, level: Level) {
        self.emit_finished_with_code(checkpoint, level, None);
    }

    fn emit_finished_with_code(
        &self,
        checkpoint: &RunCheckpoint,
        level: Level,
        error_code: Option<&str>,
    ) {
        let detail = format!(
            "observations={} plan_iterations={}",
            checkpoint.state.observations.len(),
            checkpoint.state.plan_iterations
        );
        emit_event(
            level,
            ProcessKind::Engine,
            ObservabilityEvent {
                run_id: Some(&checkpoint.run_id),
                node: Some(checkpoint.node.as_str()),
                status: Some(checkpoint.status.as_str()),
                error_code,
                detail: Some(&detail),
                ..ObservabilityEvent::new("workflow.run.finished", "runner")
            },
        );
    }
}
