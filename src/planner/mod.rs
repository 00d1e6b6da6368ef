//! The external planning capability and how the loop talks to it.
//!
//! A [`PlanningCapability`] turns a [`PlanRequest`] into raw text. The reply
//! is parsed into a [`PlannerDecision`]; call failures and unparseable
//! replies are retried a bounded number of times by [`plan_with_retry`].

mod decision;
mod request;

pub use decision::PlannerDecision;
pub use request::{HistoryEntry, PlanRequest};

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::PlannerError;

/// Source of next-action decisions (an LLM client, a scripted replay).
#[async_trait]
pub trait PlanningCapability: Send + Sync {
    /// Return the raw reply for `request`.
    async fn complete(&self, request: &PlanRequest) -> anyhow::Result<String>;
}

/// Ask the planner up to `attempts` times, sleeping `backoff` between tries.
pub async fn plan_with_retry(
    planner: &dyn PlanningCapability,
    request: &PlanRequest,
    attempts: u32,
    backoff: Duration,
) -> Result<PlannerDecision, PlannerError> {
    let mut last = String::from("no attempts configured");

    for attempt in 1..=attempts {
        let error = match planner.complete(request).await {
            Ok(raw) => match PlannerDecision::parse(&raw) {
                Ok(decision) => return Ok(decision),
                Err(e) => e,
            },
            Err(e) => PlannerError::Call(e),
        };

        tracing::warn!(attempt, max_attempts = attempts, error = %error, "Planner attempt failed");
        last = error.to_string();
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(PlannerError::Exhausted { attempts, last })
}
