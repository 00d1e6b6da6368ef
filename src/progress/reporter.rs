use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ProgressEvent, ProgressState, ProgressSubscriber};

/// Upper bound on a single subscriber delivery. Expiry counts as a failure.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle returned by [`ProgressReporter::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
struct Inner {
    state: ProgressState,
    subscribers: Vec<(SubscriberId, Arc<dyn ProgressSubscriber>)>,
    next_id: u64,
}

/// Owner of one session's [`ProgressState`] and its subscribers.
///
/// The state lock is an async mutex held across delivery so events reach
/// each subscriber in the order the mutations happened.
#[derive(Default)]
pub struct ProgressReporter {
    inner: tokio::sync::Mutex<Inner>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and send it the current snapshot.
    pub async fn connect(&self, subscriber: Arc<dyn ProgressSubscriber>) -> SubscriberId {
        let mut inner = self.inner.lock().await;
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;

        let snapshot = ProgressEvent::State {
            state: inner.state.clone(),
            timestamp: Utc::now(),
        };
        match deliver(subscriber.as_ref(), &snapshot).await {
            Ok(()) => inner.subscribers.push((id, subscriber)),
            Err(e) => tracing::debug!(error = %e, "Subscriber failed initial snapshot; not registered"),
        }
        id
    }

    pub async fn disconnect(&self, id: SubscriberId) {
        self.inner
            .lock()
            .await
            .subscribers
            .retain(|(sub_id, _)| *sub_id != id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn update_phase(
        &self,
        phase: &str,
        step: u32,
        total: u32,
        message: &str,
        details: Option<Value>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.state.current_phase = Some(phase.to_string());
        inner.state.current_step = step;
        inner.state.total_steps = total;
        let event = ProgressEvent::Progress {
            phase: phase.to_string(),
            step,
            total_steps: total,
            message: message.to_string(),
            details: details.unwrap_or_else(|| Value::Object(Default::default())),
            timestamp: Utc::now(),
        };
        broadcast(&mut inner, &event).await;
    }

    /// Record a completed step. A name already recorded is ignored.
    pub async fn complete_step(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        if inner.state.steps_completed.iter().any(|s| s == name) {
            return;
        }
        inner.state.steps_completed.push(name.to_string());
        inner.state.current_step += 1;
        let event = ProgressEvent::StepCompleted {
            step: name.to_string(),
            total_completed: inner.state.steps_completed.len(),
            timestamp: Utc::now(),
        };
        broadcast(&mut inner, &event).await;
    }

    pub async fn start_automation(&self, total_steps: u32) {
        let mut inner = self.inner.lock().await;
        inner.state.is_running = true;
        inner.state.current_phase = None;
        inner.state.current_step = 0;
        inner.state.total_steps = total_steps;
        inner.state.steps_completed.clear();
        inner.state.error = None;
        let event = ProgressEvent::AutomationStarted {
            total_steps,
            timestamp: Utc::now(),
        };
        broadcast(&mut inner, &event).await;
    }

    pub async fn complete_automation(&self, success: bool, final_url: Option<String>) {
        let mut inner = self.inner.lock().await;
        inner.state.is_running = false;
        let event = ProgressEvent::AutomationCompleted {
            success,
            final_url,
            steps_completed: inner.state.steps_completed.len(),
            timestamp: Utc::now(),
        };
        broadcast(&mut inner, &event).await;
    }

    pub async fn report_error(&self, error: &str) {
        let mut inner = self.inner.lock().await;
        inner.state.error = Some(error.to_string());
        inner.state.is_running = false;
        let event = ProgressEvent::Error {
            error: error.to_string(),
            timestamp: Utc::now(),
        };
        broadcast(&mut inner, &event).await;
    }

    pub async fn snapshot(&self) -> ProgressState {
        self.inner.lock().await.state.clone()
    }

    /// Restore the default state between runs. Subscribers stay connected.
    pub async fn reset(&self) {
        self.inner.lock().await.state = ProgressState::default();
    }
}

/// Sequential best-effort delivery; failing subscribers are pruned.
async fn broadcast(inner: &mut Inner, event: &ProgressEvent) {
    let mut failed = Vec::new();
    for (id, subscriber) in &inner.subscribers {
        if let Err(e) = deliver(subscriber.as_ref(), event).await {
            tracing::debug!(subscriber = id.0, error = %e, "Dropping progress subscriber");
            failed.push(*id);
        }
    }
    if !failed.is_empty() {
        inner.subscribers.retain(|(id, _)| !failed.contains(id));
    }
}

async fn deliver(
    subscriber: &dyn ProgressSubscriber,
    event: &ProgressEvent,
) -> anyhow::Result<()> {
    match tokio::time::timeout(DELIVERY_TIMEOUT, subscriber.send(event)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("delivery timed out after {:?}", DELIVERY_TIMEOUT),
    }
}

/// Subscriber that forwards events into an mpsc channel.
///
/// Delivery never waits: a closed or full channel is a failed delivery, which
/// prunes the subscriber.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSubscriber for ChannelSubscriber {
    async fn send(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self.tx
            .try_send(event.clone())
            .map_err(|e| anyhow::anyhow!("Progress channel unavailable: {}", e))
    }
}

/// Process-wide map of session id → reporter.
#[derive(Default)]
pub struct ProgressRegistry {
    reporters: Mutex<HashMap<String, Arc<ProgressReporter>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter for `session_id`, created on first use.
    pub fn reporter(&self, session_id: &str) -> Arc<ProgressReporter> {
        let mut reporters = self.reporters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            reporters
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(ProgressReporter::new())),
        )
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ProgressReporter>> {
        self.reporters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<ProgressReporter>> {
        self.reporters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }
}
