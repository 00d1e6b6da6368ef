//! Second opinion on key checkout steps.
//!
//! After a successful step whose label matches a configured [`GateRule`], the
//! loop asks a [`VerificationCapability`] whether the page really is where it
//! should be. A rejection fails the task; `terminate` ends it as complete.
//! The same capability supplies advice when the surface asks for help.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::config::GateRule;
use crate::surface::Observation;

/// Answer to a gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default = "default_approved")]
    pub approved: bool,
    /// The goal is already met; stop with success
    #[serde(default)]
    pub terminate: bool,
    #[serde(default)]
    pub feedback: String,
}

fn default_approved() -> bool {
    true
}

impl Verdict {
    pub fn approve() -> Self {
        Self {
            approved: true,
            terminate: false,
            feedback: String::new(),
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            terminate: false,
            feedback: feedback.into(),
        }
    }
}

/// Reviewer of step results (an LLM critique, a scripted replay).
#[async_trait]
pub trait VerificationCapability: Send + Sync {
    /// Judge whether `step` really passed `gate` given what the surface reported.
    async fn verify(
        &self,
        gate: &str,
        step: &str,
        observation: &Observation,
    ) -> anyhow::Result<Verdict>;

    /// Suggest how to retry `step` after the surface asked for assistance.
    async fn advise(&self, step: &str, observation: &Observation) -> anyhow::Result<String>;
}

/// Gate name for a step label, by the first rule whose pattern it contains.
pub fn gate_for<'a>(rules: &'a [GateRule], label: &str) -> Option<&'a str> {
    let label = label.to_lowercase();
    rules
        .iter()
        .find(|rule| label.contains(&rule.pattern.to_lowercase()))
        .map(|rule| rule.gate.as_str())
}
