//! Typed error hierarchy for the cartpilot control loop.
//!
//! Four enums cover the boundaries the loop talks across:
//! - `SurfaceError` - a single call against the interactive tool surface
//! - `PlannerError` - the planning capability (call failures and bad output)
//! - `RecoveryError` - page-state recovery running out of strategies
//! - `OrchestratorError` - plumbing failures inside the loop itself

use std::time::Duration;

use thiserror::Error;

/// Result of one call against the tool surface.
///
/// `NotFound` means the surface answered but the thing asked for is not on the
/// page; callers usually move on to the next candidate. `Failed` and `Timeout`
/// mean the call itself did not complete and may be worth retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Surface call failed: {0}")]
    Failed(String),

    #[error("Surface call timed out after {0:?}")]
    Timeout(Duration),
}

impl SurfaceError {
    /// Whether the failure says something about the page rather than the call.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SurfaceError::NotFound(_))
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SurfaceError::Failed(_) | SurfaceError::Timeout(_))
    }
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Errors from the planning capability.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Planner call failed: {0}")]
    Call(#[source] anyhow::Error),

    #[error("Planner response could not be parsed: {reason}")]
    Unparseable { reason: String, raw: String },

    #[error("Planner failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Errors from page-state recovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("All recovery strategies exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },
}

/// Errors from the orchestrator's own plumbing.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("Session {session_id} was cancelled")]
    Cancelled { session_id: String },

    #[error("Session {session_id} exceeded its time limit of {limit:?}")]
    DeadlineExceeded { session_id: String, limit: Duration },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
