use serde::{Deserialize, Serialize};

use crate::errors::PlannerError;
use crate::surface::Action;
use crate::util::{extract_json_object, truncate};

/// What the planner wants to happen next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannerDecision {
    /// Run one tool
    Action(Action),
    /// The goal is reached
    Complete {
        #[serde(default)]
        message: String,
    },
    /// The planner gives up
    Abort {
        #[serde(default)]
        reason: String,
    },
}

impl PlannerDecision {
    /// Parse a planner reply, tolerating prose or code fences around the JSON.
    pub fn parse(raw: &str) -> Result<Self, PlannerError> {
        let Some(json) = extract_json_object(raw) else {
            return Err(PlannerError::Unparseable {
                reason: "no JSON object in response".to_string(),
                raw: truncate(raw, 500),
            });
        };

        let decision: PlannerDecision =
            serde_json::from_str(json).map_err(|e| PlannerError::Unparseable {
                reason: e.to_string(),
                raw: truncate(raw, 500),
            })?;

        if let PlannerDecision::Action(action) = &decision
            && action.tool.trim().is_empty()
        {
            return Err(PlannerError::Unparseable {
                reason: "action has an empty tool name".to_string(),
                raw: truncate(raw, 500),
            });
        }

        Ok(decision)
    }
}
