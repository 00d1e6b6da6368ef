//! Progress broadcasting for automation sessions.
//!
//! A [`ProgressReporter`] owns one session's [`ProgressState`]. Every mutating
//! call updates the state and then pushes a typed [`ProgressEvent`] to each
//! subscriber in turn. Subscribers that fail delivery are dropped; the
//! mutating call never fails because of them.

mod reporter;

pub use reporter::{ChannelSubscriber, ProgressRegistry, ProgressReporter, SubscriberId};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of a session's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub current_phase: Option<String>,
    pub current_step: u32,
    pub total_steps: u32,
    pub steps_completed: Vec<String>,
    pub is_running: bool,
    pub error: Option<String>,
}

/// Events delivered to progress subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Full snapshot, sent once on connect
    State {
        #[serde(flatten)]
        state: ProgressState,
        timestamp: DateTime<Utc>,
    },
    Progress {
        phase: String,
        step: u32,
        total_steps: u32,
        message: String,
        details: Value,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        step: String,
        total_completed: usize,
        timestamp: DateTime<Utc>,
    },
    AutomationStarted {
        total_steps: u32,
        timestamp: DateTime<Utc>,
    },
    AutomationCompleted {
        success: bool,
        final_url: Option<String>,
        steps_completed: usize,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::State { .. } => "state",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::StepCompleted { .. } => "step_completed",
            ProgressEvent::AutomationStarted { .. } => "automation_started",
            ProgressEvent::AutomationCompleted { .. } => "automation_completed",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Receiver of progress events (a WebSocket, a terminal renderer, a test probe).
#[async_trait]
pub trait ProgressSubscriber: Send + Sync {
    /// Deliver one event. An error removes the subscriber.
    async fn send(&self, event: &ProgressEvent) -> anyhow::Result<()>;
}
