//! The automation control loop.
//!
//! - `loop_detector` - bookkeeping that flags a stalled loop
//! - `runner` - plan → act → observe → verify → recover loop for one task

pub mod loop_detector;
pub mod runner;

pub use loop_detector::{ActionRecord, LoopDetector};
pub use runner::{Orchestrator, RecoveryReport, Task, TaskDetails, TaskOutcome, TaskStatus};

use std::time::Duration;

use crate::config::{GateRule, PilotToml};
use crate::recovery::RecoverySettings;

/// Loop tunables, resolved from [`PilotToml`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_steps: u32,
    pub planner_retries: u32,
    pub planner_backoff: Duration,
    pub tool_timeout: Duration,
    pub max_total_failures: u32,
    pub history_window: usize,
    pub max_recoveries: u32,
    pub window_size: usize,
    pub threshold: usize,
    pub input_timeout: Duration,
    pub require_confirmation: bool,
    pub confirm_tools: Vec<String>,
    /// Step labels that trigger a verification gate
    pub gates: Vec<GateRule>,
    pub recovery: RecoverySettings,
}

impl From<&PilotToml> for OrchestratorSettings {
    fn from(toml: &PilotToml) -> Self {
        let o = &toml.orchestrator;
        Self {
            max_steps: o.max_steps,
            planner_retries: o.planner_retries,
            planner_backoff: Duration::from_millis(o.planner_backoff_ms),
            tool_timeout: Duration::from_secs(o.tool_timeout_secs),
            max_total_failures: o.max_total_failures,
            history_window: o.history_window,
            max_recoveries: o.max_recoveries,
            window_size: toml.loop_detection.window_size,
            threshold: toml.loop_detection.threshold,
            input_timeout: Duration::from_secs(toml.interrupts.input_timeout_secs),
            require_confirmation: toml.interrupts.require_confirmation,
            confirm_tools: toml.interrupts.confirm_tools.clone(),
            gates: toml.verification.gates.clone(),
            recovery: RecoverySettings::from(&toml.recovery),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&PilotToml::default())
    }
}
