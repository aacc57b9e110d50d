use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::DeployError;
use crate::webhook::{DeploymentEvent, FetchTarget};

/// Stage of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Fetching,
    Extracting,
    PostDeploy,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Stages only move forward. `PostDeploy` may be skipped and any
    /// non-terminal stage may fail.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Fetching)
            | (Fetching, Extracting)
            | (Extracting, PostDeploy)
            | (Extracting, Done)
            | (PostDeploy, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Pending => "pending",
            RunState::Fetching => "fetching",
            RunState::Extracting => "extracting",
            RunState::PostDeploy => "post_deploy",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One fetch, extract, post-deploy run triggered by a deployment event
#[derive(Debug, Clone)]
pub struct DeployRun {
    pub id: String,
    pub target: FetchTarget,
    pub triggered_by: String,
    pub environment: Option<String>,
    pub short_sha: Option<String>,
    pub queued_at: DateTime<Utc>,
    state: RunState,
}

impl DeployRun {
    /// Create a new run in Pending state
    pub fn new(target: FetchTarget, triggered_by: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            target,
            triggered_by,
            environment: None,
            short_sha: None,
            queued_at: Utc::now(),
            state: RunState::Pending,
        }
    }

    /// Create a run from a successful deployment event
    pub fn from_event(event: &DeploymentEvent, target: FetchTarget) -> Self {
        let mut run = Self::new(target, event.triggered_by().to_string());
        run.environment = event.environment.clone();
        run.short_sha = event.short_sha.clone();
        run
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to the next stage. Returns false and leaves the state untouched
    /// when the transition is not allowed.
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        info!(run = %self.id, from = %self.state, to = %next, "Run state changed");
        self.state = next;
        true
    }
}

/// Result of a pipeline run. Only ever handed to the log sink.
#[derive(Debug)]
pub enum RunOutcome {
    Deployed { entries: usize, ran_post_deploy: bool },
    Failed { stage: RunState, error: DeployError },
}

impl RunOutcome {
    pub fn log(&self, run: &DeployRun) {
        let elapsed_ms = (Utc::now() - run.queued_at).num_milliseconds();
        match self {
            RunOutcome::Deployed {
                entries,
                ran_post_deploy,
            } => info!(
                run = %run.id,
                entries,
                ran_post_deploy,
                elapsed_ms,
                "Deployment of artifact went successfully, {}. Done!",
                run.target
            ),
            RunOutcome::Failed { stage, error } => error!(
                run = %run.id,
                stage = %stage,
                elapsed_ms,
                "Deployment failed, {}: {}",
                run.target,
                error
            ),
        }
    }
}
