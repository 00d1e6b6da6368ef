//! Per-run session context.
//!
//! One `SessionContext` is built for each automation run and handed to the
//! orchestrator explicitly. It carries the session id, the caller's
//! cancellation token, the wall-clock limit, and handles to the shared
//! prompt broker and this session's progress reporter.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::interrupt::InterruptBroker;
use crate::progress::ProgressReporter;

#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub cancel: CancellationToken,
    pub time_limit: Duration,
    pub broker: Arc<InterruptBroker>,
    pub progress: Arc<ProgressReporter>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        time_limit: Duration,
        broker: Arc<InterruptBroker>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            cancel: CancellationToken::new(),
            time_limit,
            broker,
            progress,
        }
    }

    /// A context with a fresh random session id and its own broker/reporter.
    pub fn standalone(time_limit: Duration) -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            time_limit,
            Arc::new(InterruptBroker::new()),
            Arc::new(ProgressReporter::new()),
        )
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Abort the run. Suspended planner, tool and prompt waits all return.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("time_limit", &self.time_limit)
            .finish()
    }
}
