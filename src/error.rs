//! Error taxonomy for automation runs.
//!
//! Each pipeline component signals its own typed failure; this module
//! aggregates them into the single error a run terminates with. The
//! orchestrator never retries a failed stage — retries are a caller concern.

use thiserror::Error;

use crate::config::ConfigError;
use crate::mirror::MirrorError;
use crate::planner::PlanError;
use crate::repo::RepoRefError;
use crate::session::TransportError;

/// Terminal failure of one automation run.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("prompt optimize: {0}")]
    Plan(#[from] PlanError),

    /// The coding agent is not authenticated on the execution host.
    ///
    /// Kept distinct from generic failure so user-facing boundaries can emit
    /// a remediation message instead of a raw error.
    #[error("agent login required on {target}: {detail}")]
    AuthRequired { target: String, detail: String },

    #[error(transparent)]
    Repo(#[from] RepoRefError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    /// Non-zero exit from an agent invocation, with captured output.
    #[error("{stage} failed: {detail}")]
    AgentExecution { stage: &'static str, detail: String },

    /// The commit/push stage was reached with nothing to commit.
    #[error("no pending changes to commit")]
    NoChanges,
}

impl AutomationError {
    /// Whether this failure is the user-actionable "log in first" condition.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, AutomationError::AuthRequired { .. })
    }
}
