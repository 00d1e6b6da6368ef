use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use super::OrchestratorSettings;
use super::loop_detector::LoopDetector;
use crate::errors::OrchestratorError;
use crate::planner::{HistoryEntry, PlanRequest, PlannerDecision, PlanningCapability, plan_with_retry};
use crate::recovery::{RecoveryMethod, RecoveryStrategist};
use crate::session::SessionContext;
use crate::surface::{self, Action, Observation, ToolSurface};
use crate::variants::VariantRegistry;
use crate::verification::{self, VerificationCapability};

const AFFIRMATIVE: &[&str] = &["yes", "y", "confirm", "confirmed"];

/// One automation goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub goal: String,
    /// Customer data passed through to the planner untouched
    #[serde(default)]
    pub customer: Value,
    pub max_steps: u32,
}

impl Task {
    pub fn new(goal: impl Into<String>, customer: Value, max_steps: u32) -> Self {
        Self {
            goal: goal.into(),
            customer,
            max_steps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub step: u32,
    pub success: bool,
    pub method: RecoveryMethod,
    pub url: Option<String>,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskDetails {
    pub steps_taken: u32,
    pub total_failures: u32,
    pub final_url: Option<String>,
    pub recoveries: Vec<RecoveryReport>,
    pub history: Vec<HistoryEntry>,
}

/// Final result of [`Orchestrator::execute_task`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub status: TaskStatus,
    pub message: String,
    pub details: TaskDetails,
}

/// How the loop itself ended, before details are attached.
struct Ending {
    status: TaskStatus,
    message: String,
}

impl Ending {
    fn completed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            message: message.into(),
        }
    }

    fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Cancelled,
            message: message.into(),
        }
    }
}

/// Mutable state of one `execute_task` run. Lives outside the loop future so
/// it survives cancellation.
struct LoopState {
    detector: LoopDetector,
    history: Vec<HistoryEntry>,
    total_failures: u32,
    recoveries: Vec<RecoveryReport>,
    /// Annotation for the next planning prompt only
    next_note: Option<String>,
    steps_taken: u32,
}

/// Aborts the spawned tool call if the loop is dropped mid-execution.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives one task to completion against one tool surface.
pub struct Orchestrator {
    planner: Arc<dyn PlanningCapability>,
    surface: Arc<dyn ToolSurface>,
    variants: Arc<VariantRegistry>,
    verifier: Option<Arc<dyn VerificationCapability>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn PlanningCapability>,
        surface: Arc<dyn ToolSurface>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            planner,
            surface,
            variants: Arc::new(VariantRegistry::new()),
            verifier: None,
            settings,
        }
    }

    pub fn with_variants(mut self, variants: Arc<VariantRegistry>) -> Self {
        self.variants = variants;
        self
    }

    /// Check gated steps and answer assistance requests with `verifier`.
    pub fn with_verifier(mut self, verifier: Arc<dyn VerificationCapability>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run `task` until the planner completes or aborts, a terminal failure
    /// occurs, `task.max_steps` is spent, or the session is cancelled or
    /// runs out of time. Never panics or returns an error: every ending is a
    /// [`TaskOutcome`].
    pub async fn execute_task(&self, task: &Task, session: &SessionContext) -> TaskOutcome {
        let session_id = session.session_id.as_str();
        tracing::info!(session_id, goal = %task.goal, max_steps = task.max_steps, "Starting task");
        session.progress.start_automation(task.max_steps).await;

        let mut state = LoopState {
            detector: LoopDetector::new(self.settings.window_size, self.settings.threshold),
            history: Vec::new(),
            total_failures: 0,
            recoveries: Vec::new(),
            next_note: None,
            steps_taken: 0,
        };

        let ending = tokio::select! {
            ending = self.run_loop(task, session, &mut state) => ending,
            _ = session.cancel.cancelled() => {
                Ending::cancelled(OrchestratorError::Cancelled { session_id: session_id.to_string() }.to_string())
            }
            _ = tokio::time::sleep(session.time_limit) => {
                Ending::cancelled(OrchestratorError::DeadlineExceeded {
                    session_id: session_id.to_string(),
                    limit: session.time_limit,
                }.to_string())
            }
        };

        if ending.status == TaskStatus::Cancelled {
            session.broker.cancel_session(session_id);
        }

        let final_url = if ending.status == TaskStatus::Cancelled {
            None
        } else {
            self.current_url().await
        };
        self.finish(ending, state, final_url, session).await
    }

    async fn run_loop(&self, task: &Task, session: &SessionContext, state: &mut LoopState) -> Ending {
        let session_id = session.session_id.as_str();
        let progress = &session.progress;
        let max = task.max_steps;

        for step in 1..=max {
            state.steps_taken = step;
            progress
                .update_phase("planning", step, max, "Deciding next action", None)
                .await;

            let request = PlanRequest {
                goal: task.goal.clone(),
                customer: task.customer.clone(),
                tools: self.surface.catalog(),
                history: recent(&state.history, self.settings.history_window),
                stuck_context: state.next_note.take(),
            };

            let decision = match plan_with_retry(
                self.planner.as_ref(),
                &request,
                self.settings.planner_retries,
                self.settings.planner_backoff,
            )
            .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(session_id, step, error = %e, "Planner gave up");
                    return Ending::failed(OrchestratorError::from(e).to_string());
                }
            };

            let action = match decision {
                PlannerDecision::Complete { message } => {
                    tracing::info!(session_id, step, "Planner reported completion");
                    return Ending::completed(message);
                }
                PlannerDecision::Abort { reason } => {
                    tracing::warn!(session_id, step, reason = %reason, "Planner aborted");
                    return Ending::failed(format!("Planner aborted: {}", reason));
                }
                PlannerDecision::Action(action) => action,
            };

            if self.needs_confirmation(&action) && !self.confirm(&action, step, max, session).await {
                return Ending::failed("Order placement cancelled by user");
            }

            progress
                .update_phase(
                    "executing",
                    step,
                    max,
                    &format!("Running {}", action.label()),
                    Some(json!({ "tool": action.tool, "params": action.params })),
                )
                .await;
            tracing::info!(session_id, step, tool = %action.tool, "Executing action");
            let mut observation = self.execute_action(&action).await;
            if observation.assistance_requested() {
                observation = self.retry_with_advice(&action, observation, session_id).await;
            }

            if let Some(input) = observation.input_required() {
                progress
                    .update_phase("awaiting_input", step, max, &input.message, None)
                    .await;
                let value = session
                    .broker
                    .request_input(
                        session_id,
                        &input.prompt_type,
                        &input.message,
                        &input.field_name,
                        self.settings.input_timeout,
                    )
                    .await;
                match value {
                    Some(value) => {
                        let follow_up = Action::new("provide_input")
                            .with_param("field_name", input.field_name.clone())
                            .with_param("value", value)
                            .with_step(format!("Provide {}", input.field_name));
                        observation = self.execute_action(&follow_up).await;
                    }
                    None if input.required => {
                        return Ending::failed(format!(
                            "No {} received for '{}' before the prompt closed",
                            input.prompt_type, input.field_name
                        ));
                    }
                    None => {
                        tracing::info!(session_id, field = %input.field_name, "Optional input skipped");
                    }
                }
            }

            self.record(state, step, &action, &observation, session).await;

            if observation.is_unrecoverable() {
                return Ending::failed(format!("Unrecoverable: {}", observation.message));
            }
            if observation.success
                && let Some(ending) = self
                    .check_gate(&action, &observation, step, max, session)
                    .await
            {
                return ending;
            }
            if state.total_failures >= self.settings.max_total_failures {
                tracing::error!(session_id, failures = state.total_failures, "Failure budget spent");
                return Ending::failed(format!(
                    "Giving up after {} failed actions",
                    state.total_failures
                ));
            }

            if state.detector.is_stuck() {
                self.handle_stuck(state, step, max, &action, session).await;
            }
        }

        Ending::failed(format!("Reached max steps ({}) without completing", max))
    }

    async fn record(
        &self,
        state: &mut LoopState,
        step: u32,
        action: &Action,
        observation: &Observation,
        session: &SessionContext,
    ) {
        let label = action.label();
        state.history.push(HistoryEntry {
            step,
            tool: action.tool.clone(),
            params: action.params.clone(),
            success: observation.success,
            message: observation.message.clone(),
        });
        state
            .detector
            .add_action(&action.tool, observation.success, &label);

        if observation.success {
            session.progress.complete_step(&label).await;
        } else {
            state.total_failures += 1;
            tracing::warn!(
                session_id = %session.session_id,
                step,
                tool = %action.tool,
                message = %observation.message,
                "Action failed"
            );
        }
    }

    /// Try recovery while budget remains; otherwise (or on failure) carry the
    /// stuck summary into the next prompt.
    async fn handle_stuck(
        &self,
        state: &mut LoopState,
        step: u32,
        max: u32,
        action: &Action,
        session: &SessionContext,
    ) {
        let session_id = session.session_id.as_str();
        let stuck = state.detector.get_context();
        tracing::warn!(session_id, step, "Loop detector reports stuck");

        if state.recoveries.len() as u32 >= self.settings.max_recoveries {
            state.next_note = Some(stuck);
            return;
        }

        session
            .progress
            .update_phase("recovering", step, max, "Trying to regain the checkout page", None)
            .await;
        let current_url = self.current_url().await.unwrap_or_default();
        let strategist = RecoveryStrategist::new(Arc::clone(&self.surface), self.settings.recovery.clone());
        let outcome = strategist.recover(&current_url, action.step.as_deref()).await;

        state.recoveries.push(RecoveryReport {
            step,
            success: outcome.success,
            method: outcome.method,
            url: outcome.url.clone(),
            attempts: outcome.attempts.len(),
        });
        state.detector.reset();

        state.next_note = Some(if outcome.success {
            format!(
                "The page was reset ({}). Re-assess from the current page before acting.",
                outcome.summary()
            )
        } else {
            format!("{}\nAutomatic recovery failed: {}", stuck, outcome.summary())
        });
    }

    /// Run the gate matching `action`'s label, if any. A verifier that errors
    /// or hangs lets the loop continue.
    async fn check_gate(
        &self,
        action: &Action,
        observation: &Observation,
        step: u32,
        max: u32,
        session: &SessionContext,
    ) -> Option<Ending> {
        let verifier = self.verifier.as_ref()?;
        let label = action.label();
        let gate = verification::gate_for(&self.settings.gates, &label)?;
        let session_id = session.session_id.as_str();

        session
            .progress
            .update_phase("verifying", step, max, &format!("Checking {}", gate), None)
            .await;
        let verdict = match tokio::time::timeout(
            self.settings.tool_timeout,
            verifier.verify(gate, &label, observation),
        )
        .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::error!(session_id, step, gate, error = %e, "Gate verification errored");
                return None;
            }
            Err(_) => {
                tracing::error!(session_id, step, gate, "Gate verification timed out");
                return None;
            }
        };

        if !verdict.approved {
            tracing::warn!(session_id, step, gate, feedback = %verdict.feedback, "Gate rejected");
            return Some(Ending::failed(format!(
                "Gate {} failed: {}",
                gate, verdict.feedback
            )));
        }
        tracing::info!(session_id, step, gate, "Gate passed");
        if verdict.terminate {
            let message = if verdict.feedback.is_empty() {
                format!("Verified complete at {}", gate)
            } else {
                verdict.feedback
            };
            return Some(Ending::completed(message));
        }
        None
    }

    /// Ask the verifier for advice and run `action` once more with it attached.
    async fn retry_with_advice(
        &self,
        action: &Action,
        observation: Observation,
        session_id: &str,
    ) -> Observation {
        let Some(verifier) = &self.verifier else {
            return observation;
        };
        let label = action.label();
        let advice = match tokio::time::timeout(
            self.settings.tool_timeout,
            verifier.advise(&label, &observation),
        )
        .await
        {
            Ok(Ok(advice)) => advice,
            Ok(Err(e)) => {
                tracing::warn!(session_id, step = %label, error = %e, "No advice available");
                return observation;
            }
            Err(_) => {
                tracing::warn!(session_id, step = %label, "Timed out waiting for advice");
                return observation;
            }
        };

        tracing::info!(session_id, step = %label, advice = %advice, "Retrying with advice");
        let advised = action.clone().with_param("advice", advice);
        self.execute_action(&advised).await
    }

    fn needs_confirmation(&self, action: &Action) -> bool {
        self.settings.require_confirmation
            && self.settings.confirm_tools.iter().any(|t| *t == action.tool)
    }

    async fn confirm(&self, action: &Action, step: u32, max: u32, session: &SessionContext) -> bool {
        let message = format!("Confirm before running {}: {}", action.tool, action.label());
        session
            .progress
            .update_phase("awaiting_input", step, max, &message, None)
            .await;
        let answer = session
            .broker
            .request_input(
                &session.session_id,
                "confirmation",
                &message,
                "confirmation",
                self.settings.input_timeout,
            )
            .await;
        is_affirmative(answer.as_deref())
    }

    /// Run one action off the loop's task so a panicking surface becomes a
    /// failed observation.
    async fn execute_action(&self, action: &Action) -> Observation {
        let surface = Arc::clone(&self.surface);
        let variants = Arc::clone(&self.variants);
        let action = action.clone();
        let timeout = self.settings.tool_timeout;
        // Order-placing tools are never repeated automatically.
        let retry_transient = !self.settings.confirm_tools.contains(&action.tool);

        let mut handle = AbortOnDrop(tokio::spawn(async move {
            if action.tool == "select_variant" {
                select_variant(surface, &variants, &action, timeout).await
            } else {
                execute_with_retry(surface.as_ref(), &action, timeout, retry_transient).await
            }
        }));

        match (&mut handle.0).await {
            Ok(observation) => observation,
            Err(e) if e.is_panic() => {
                tracing::error!("Tool execution panicked");
                Observation::failed("Tool execution panicked")
            }
            Err(e) => Observation::failed(format!("Tool execution did not finish: {}", e)),
        }
    }

    async fn current_url(&self) -> Option<String> {
        let timeout = self.settings.tool_timeout;
        surface::bounded(timeout, self.surface.current_url(timeout))
            .await
            .ok()
    }

    async fn finish(
        &self,
        ending: Ending,
        state: LoopState,
        final_url: Option<String>,
        session: &SessionContext,
    ) -> TaskOutcome {
        let success = ending.status == TaskStatus::Completed;
        let mut message = ending.message;
        if !state.recoveries.is_empty() {
            let recovered = state.recoveries.iter().filter(|r| r.success).count();
            message = format!(
                "{} ({} recovery attempt(s), {} succeeded)",
                message,
                state.recoveries.len(),
                recovered
            );
        }

        if success {
            tracing::info!(session_id = %session.session_id, steps = state.steps_taken, "Task completed");
        } else {
            tracing::warn!(session_id = %session.session_id, status = ?ending.status, message = %message, "Task did not complete");
            session.progress.report_error(&message).await;
        }
        session
            .progress
            .complete_automation(success, final_url.clone())
            .await;

        TaskOutcome {
            success,
            status: ending.status,
            message,
            details: TaskDetails {
                steps_taken: state.steps_taken,
                total_failures: state.total_failures,
                final_url,
                recoveries: state.recoveries,
                history: state.history,
            },
        }
    }
}

/// One surface call, repeated once when the error says the call itself
/// broke rather than the page.
async fn execute_with_retry(
    surface: &dyn ToolSurface,
    action: &Action,
    timeout: std::time::Duration,
    retry_transient: bool,
) -> Observation {
    match surface::bounded(timeout, surface.execute(action, timeout)).await {
        Ok(observation) => observation,
        Err(e) if retry_transient && e.is_retryable() => {
            tracing::debug!(tool = %action.tool, error = %e, "Retrying transient surface error");
            surface::bounded(timeout, surface.execute(action, timeout))
                .await
                .unwrap_or_else(Observation::from)
        }
        Err(e) => Observation::from(e),
    }
}

async fn select_variant(
    surface: Arc<dyn ToolSurface>,
    variants: &VariantRegistry,
    action: &Action,
    timeout: std::time::Duration,
) -> Observation {
    let variant_type = action
        .param_str("variant_type")
        .or_else(|| action.param_str("type"));
    let value = action
        .param_str("value")
        .or_else(|| action.param_str("variant_value"));
    let (Some(variant_type), Some(value)) = (variant_type, value) else {
        return Observation::failed("select_variant needs 'variant_type' and 'value' parameters");
    };

    let url = surface::bounded(timeout, surface.current_url(timeout))
        .await
        .unwrap_or_default();
    match tokio::time::timeout(
        timeout,
        variants.select(surface.as_ref(), &url, variant_type, value, timeout),
    )
    .await
    {
        Ok(outcome) => outcome.into(),
        Err(_) => Observation::failed(format!("Variant selection timed out after {:?}", timeout)),
    }
}

fn recent(history: &[HistoryEntry], window: usize) -> Vec<HistoryEntry> {
    history[history.len().saturating_sub(window)..].to_vec()
}

fn is_affirmative(answer: Option<&str>) -> bool {
    answer.is_some_and(|a| AFFIRMATIVE.contains(&a.trim().to_lowercase().as_str()))
}
