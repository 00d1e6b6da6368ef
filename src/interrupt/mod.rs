//! Human-in-the-loop input with single-writer resolution.
//!
//! The orchestrator suspends on [`InterruptBroker::request_input`] when a step
//! needs something only a person can supply (a one-time code, a password, an
//! order confirmation). The prompt is pushed to whatever transport the session
//! has registered, and the waiter resumes on the first of:
//!
//! - `submit_input` → the submitted value
//! - `cancel_input` → `None`
//! - timeout expiry → `None`
//!
//! Each prompt owns a [`ResolutionSlot`] that can be written exactly once, so
//! racing submit/cancel/timeout calls are safe without holding a lock across
//! the wait.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo(broker: std::sync::Arc<cartpilot::interrupt::InterruptBroker>) {
//! use std::time::Duration;
//! let code = broker
//!     .request_input("s1", "otp", "Enter code", "otp_field", Duration::from_secs(300))
//!     .await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Event pushed to a session's prompt transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptEvent {
    InputRequired {
        prompt_type: String,
        message: String,
        field_name: String,
    },
}

/// Outbound channel for prompt delivery (usually a WebSocket).
#[async_trait]
pub trait PromptTransport: Send + Sync {
    async fn send(&self, session_id: &str, event: &PromptEvent) -> anyhow::Result<()>;
}

/// Single-assignment cell carrying a prompt's answer.
///
/// The first `resolve` call wins; later calls return `false` and do nothing.
#[derive(Debug)]
pub struct ResolutionSlot {
    sender: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl ResolutionSlot {
    pub fn new() -> (Self, oneshot::Receiver<Option<String>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub fn resolve(&self, value: Option<String>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // The waiter may already be gone (cancelled); the write still counts.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// A live prompt awaiting resolution.
#[derive(Debug)]
pub struct PendingPrompt {
    pub id: Uuid,
    pub session_id: String,
    pub prompt_type: String,
    pub message: String,
    pub field_name: String,
    pub created_at: DateTime<Utc>,
    slot: Arc<ResolutionSlot>,
}

impl PendingPrompt {
    pub fn view(&self) -> PendingPromptView {
        PendingPromptView {
            session_id: self.session_id.clone(),
            prompt_type: self.prompt_type.clone(),
            message: self.message.clone(),
            field_name: self.field_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// Read-only, serializable view of a [`PendingPrompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPromptView {
    pub session_id: String,
    pub prompt_type: String,
    pub message: String,
    pub field_name: String,
    pub created_at: DateTime<Utc>,
}

impl PendingPromptView {
    pub fn event(&self) -> PromptEvent {
        PromptEvent::InputRequired {
            prompt_type: self.prompt_type.clone(),
            message: self.message.clone(),
            field_name: self.field_name.clone(),
        }
    }
}

/// Process-wide registry of pending prompts and prompt transports, keyed by
/// session id.
#[derive(Default)]
pub struct InterruptBroker {
    pending: Mutex<HashMap<String, PendingPrompt>>,
    transports: Mutex<HashMap<String, Arc<dyn PromptTransport>>>,
}

impl InterruptBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingPrompt>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transports(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn PromptTransport>>> {
        self.transports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the transport prompts for `session_id` are delivered on.
    /// Replaces any previous registration.
    pub fn register_transport(&self, session_id: &str, transport: Arc<dyn PromptTransport>) {
        self.transports().insert(session_id.to_string(), transport);
    }

    /// Remove `transport` if it is still the one registered for `session_id`.
    pub fn unregister_transport(&self, session_id: &str, transport: &Arc<dyn PromptTransport>) {
        let mut transports = self.transports();
        if transports
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, transport))
        {
            transports.remove(session_id);
        }
    }

    /// Suspend until a human answers, the prompt is cancelled, or `timeout`
    /// elapses. Returns `None` for cancel and timeout.
    ///
    /// A newer request for the same session resolves this one to `None`.
    /// Dropping the returned future removes the prompt and resolves it to
    /// `None`.
    pub async fn request_input(
        &self,
        session_id: &str,
        prompt_type: &str,
        message: &str,
        field_name: &str,
        timeout: Duration,
    ) -> Option<String> {
        let (slot, mut rx) = ResolutionSlot::new();
        let slot = Arc::new(slot);
        let prompt = PendingPrompt {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            prompt_type: prompt_type.to_string(),
            message: message.to_string(),
            field_name: field_name.to_string(),
            created_at: Utc::now(),
            slot: Arc::clone(&slot),
        };
        let prompt_id = prompt.id;
        let event = prompt.view().event();

        if let Some(previous) = self.pending().insert(session_id.to_string(), prompt)
            && previous.slot.resolve(None)
        {
            tracing::info!(session_id, prompt_type = %previous.prompt_type, "Superseded pending prompt");
        }
        let _guard = PendingGuard {
            broker: self,
            session_id,
            prompt_id,
        };

        tracing::info!(session_id, prompt_type, field_name, "Waiting for user input");

        // Delivery and the wait share one deadline.
        let deadline = tokio::time::Instant::now() + timeout;
        let transport = self.transports().get(session_id).cloned();
        match transport {
            Some(transport) => {
                match tokio::time::timeout_at(deadline, transport.send(session_id, &event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(session_id, error = %e, "Failed to deliver prompt");
                    }
                    Err(_) => {
                        tracing::warn!(session_id, ?timeout, "Timed out delivering prompt");
                    }
                }
            }
            None => {
                tracing::debug!(session_id, "No prompt transport registered; prompt is query-only");
            }
        }

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => None,
            Err(_) => {
                if slot.resolve(None) {
                    tracing::warn!(session_id, ?timeout, "Timed out waiting for user input");
                    None
                } else {
                    // submit/cancel won the race just before expiry
                    rx.try_recv().ok().flatten()
                }
            }
        }
    }

    /// Deliver `value` to the session's pending prompt.
    ///
    /// Returns `false` when no unresolved prompt exists.
    pub fn submit_input(&self, session_id: &str, value: &str) -> bool {
        self.resolve_pending(session_id, Some(value.to_string()))
    }

    /// Resolve the session's pending prompt to `None`.
    pub fn cancel_input(&self, session_id: &str) -> bool {
        self.resolve_pending(session_id, None)
    }

    fn resolve_pending(&self, session_id: &str, value: Option<String>) -> bool {
        let mut pending = self.pending();
        let resolved = pending
            .get(session_id)
            .is_some_and(|prompt| prompt.slot.resolve(value));
        if resolved {
            pending.remove(session_id);
            tracing::info!(session_id, "Pending prompt resolved");
        }
        resolved
    }

    pub fn has_pending_prompt(&self, session_id: &str) -> bool {
        self.pending()
            .get(session_id)
            .is_some_and(|prompt| !prompt.slot.is_resolved())
    }

    pub fn get_pending_prompt(&self, session_id: &str) -> Option<PendingPromptView> {
        self.pending()
            .get(session_id)
            .filter(|prompt| !prompt.slot.is_resolved())
            .map(PendingPrompt::view)
    }

    /// Teardown for a cancelled session: resolve any pending prompt to `None`.
    /// The transport stays registered; its connection outlives the run.
    pub fn cancel_session(&self, session_id: &str) {
        if let Some(prompt) = self.pending().remove(session_id) {
            prompt.slot.resolve(None);
            tracing::debug!(session_id, "Cleared pending prompt for cancelled session");
        }
    }
}

/// Removes the waiter's own prompt when `request_input` returns or is dropped.
struct PendingGuard<'a> {
    broker: &'a InterruptBroker,
    session_id: &'a str,
    prompt_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.broker.pending();
        if pending
            .get(self.session_id)
            .is_some_and(|prompt| prompt.id == self.prompt_id)
            && let Some(prompt) = pending.remove(self.session_id)
        {
            prompt.slot.resolve(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct RecordingTransport {
        tx: mpsc::UnboundedSender<(String, PromptEvent)>,
    }

    #[async_trait]
    impl PromptTransport for RecordingTransport {
        async fn send(&self, session_id: &str, event: &PromptEvent) -> anyhow::Result<()> {
            self.tx.send((session_id.to_string(), event.clone()))?;
            Ok(())
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl PromptTransport for BrokenTransport {
        async fn send(&self, _session_id: &str, _event: &PromptEvent) -> anyhow::Result<()> {
            anyhow::bail!("socket closed")
        }
    }

    struct StalledTransport;

    #[async_trait]
    impl PromptTransport for StalledTransport {
        async fn send(&self, _session_id: &str, _event: &PromptEvent) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(1000)).await;
            Ok(())
        }
    }

    fn spawn_request(
        broker: &Arc<InterruptBroker>,
        session_id: &'static str,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<Option<String>> {
        let broker = Arc::clone(broker);
        tokio::spawn(async move {
            broker
                .request_input(session_id, "otp", "Enter code", "otp_field", timeout)
                .await
        })
    }

    #[test]
    fn test_resolution_slot_single_assignment() {
        let (slot, mut rx) = ResolutionSlot::new();
        assert!(!slot.is_resolved());
        assert!(slot.resolve(Some("first".to_string())));
        assert!(!slot.resolve(Some("second".to_string())));
        assert!(!slot.resolve(None));
        assert!(slot.is_resolved());
        assert_eq!(rx.try_recv().unwrap(), Some("first".to_string()));
    }

    #[test]
    fn test_prompt_event_wire_shape() {
        let event = PromptEvent::InputRequired {
            prompt_type: "otp".to_string(),
            message: "Enter code".to_string(),
            field_name: "otp_field".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_required");
        assert_eq!(json["prompt_type"], "otp");
        assert_eq!(json["field_name"], "otp_field");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_one_second_later_returns_value() {
        let broker = Arc::new(InterruptBroker::new());
        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(broker.has_pending_prompt("s1"));
        assert!(broker.submit_input("s1", "123456"));

        assert_eq!(handle.await.unwrap(), Some("123456".to_string()));
        assert!(!broker.submit_input("s1", "654321"));
        assert!(!broker.has_pending_prompt("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_none_and_removes_entry() {
        let broker = Arc::new(InterruptBroker::new());
        let handle = spawn_request(&broker, "s1", Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(broker.has_pending_prompt("s1"));

        assert_eq!(handle.await.unwrap(), None);
        assert!(!broker.has_pending_prompt("s1"));
        assert!(broker.get_pending_prompt("s1").is_none());
        assert!(!broker.submit_input("s1", "late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_none() {
        let broker = Arc::new(InterruptBroker::new());
        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(broker.cancel_input("s1"));
        assert!(!broker.cancel_input("s1"));
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_submit_and_cancel_without_prompt_return_false() {
        let broker = InterruptBroker::new();
        assert!(!broker.submit_input("nobody", "x"));
        assert!(!broker.cancel_input("nobody"));
        assert!(!broker.has_pending_prompt("nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_pending_prompt_view() {
        let broker = Arc::new(InterruptBroker::new());
        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let view = broker.get_pending_prompt("s1").unwrap();
        assert_eq!(view.session_id, "s1");
        assert_eq!(view.prompt_type, "otp");
        assert_eq!(view.message, "Enter code");
        assert_eq!(view.field_name, "otp_field");

        broker.submit_input("s1", "1");
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_request_supersedes_old() {
        let broker = Arc::new(InterruptBroker::new());
        let first = spawn_request(&broker, "s1", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = spawn_request(&broker, "s1", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(first.await.unwrap(), None);
        // The superseded waiter must not remove the newer prompt on exit.
        assert!(broker.has_pending_prompt("s1"));
        assert!(broker.submit_input("s1", "fresh"));
        assert_eq!(second.await.unwrap(), Some("fresh".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_independent() {
        let broker = Arc::new(InterruptBroker::new());
        let a = spawn_request(&broker, "a", Duration::from_secs(300));
        let b = spawn_request(&broker, "b", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(broker.submit_input("b", "bee"));
        assert!(broker.has_pending_prompt("a"));
        assert!(broker.submit_input("a", "ay"));
        assert_eq!(a.await.unwrap(), Some("ay".to_string()));
        assert_eq!(b.await.unwrap(), Some("bee".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_clears_prompt() {
        let broker = Arc::new(InterruptBroker::new());
        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(broker.has_pending_prompt("s1"));

        handle.abort();
        let _ = handle.await;
        assert!(!broker.has_pending_prompt("s1"));
        assert!(!broker.submit_input("s1", "x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_session_resolves_pending() {
        let broker = Arc::new(InterruptBroker::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        broker.register_transport("s1", Arc::new(RecordingTransport { tx }));
        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;

        broker.cancel_session("s1");
        assert_eq!(handle.await.unwrap(), None);
        assert!(!broker.has_pending_prompt("s1"));
        assert!(broker.transports().contains_key("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_delivered_to_registered_transport() {
        let broker = Arc::new(InterruptBroker::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        broker.register_transport("s1", Arc::new(RecordingTransport { tx }));

        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));
        let (session, event) = rx.recv().await.unwrap();
        assert_eq!(session, "s1");
        assert_eq!(
            event,
            PromptEvent::InputRequired {
                prompt_type: "otp".to_string(),
                message: "Enter code".to_string(),
                field_name: "otp_field".to_string(),
            }
        );

        broker.submit_input("s1", "42");
        assert_eq!(handle.await.unwrap(), Some("42".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_still_waits() {
        let broker = Arc::new(InterruptBroker::new());
        broker.register_transport("s1", Arc::new(BrokenTransport));
        let handle = spawn_request(&broker, "s1", Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(broker.submit_input("s1", "via rest"));
        assert_eq!(handle.await.unwrap(), Some("via rest".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transport_does_not_extend_timeout() {
        let broker = Arc::new(InterruptBroker::new());
        broker.register_transport("s1", Arc::new(StalledTransport));

        let started = tokio::time::Instant::now();
        let value = broker
            .request_input("s1", "otp", "Enter code", "otp_field", Duration::from_secs(5))
            .await;

        assert_eq!(value, None);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(!broker.has_pending_prompt("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_during_stalled_delivery_is_returned() {
        let broker = Arc::new(InterruptBroker::new());
        broker.register_transport("s1", Arc::new(StalledTransport));
        let handle = spawn_request(&broker, "s1", Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(broker.submit_input("s1", "early"));
        assert_eq!(handle.await.unwrap(), Some("early".to_string()));
    }

    #[test]
    fn test_unregister_only_removes_matching_transport() {
        let broker = InterruptBroker::new();
        let first: Arc<dyn PromptTransport> = Arc::new(BrokenTransport);
        let second: Arc<dyn PromptTransport> = Arc::new(BrokenTransport);
        broker.register_transport("s1", Arc::clone(&first));
        broker.register_transport("s1", Arc::clone(&second));

        broker.unregister_transport("s1", &first);
        assert!(broker.transports().contains_key("s1"));
        broker.unregister_transport("s1", &second);
        assert!(!broker.transports().contains_key("s1"));
    }
}
