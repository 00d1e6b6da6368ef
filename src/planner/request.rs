use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::surface::ToolSpec;
use crate::util::truncate;

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else, in one of these shapes:
{"type": "action", "tool": "<tool name>", "params": {...}, "step": "<what this step does>"}
{"type": "complete", "message": "<summary of the final state>"}
{"type": "abort", "reason": "<why the goal cannot be reached>"}

Rules:
- Use only tools from the catalog above.
- Choose exactly one next action.
- Reply "complete" only once the goal is actually reached.
- Do not repeat an action that just failed without changing something."#;

/// One executed action as the planner sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u32,
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub success: bool,
    pub message: String,
}

/// Everything the planner is given for one decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub goal: String,
    /// Customer data snapshot; opaque to the loop
    #[serde(default)]
    pub customer: Value,
    pub tools: Vec<ToolSpec>,
    pub history: Vec<HistoryEntry>,
    /// Loop-detector summary (or a recovery note) for this decision only
    #[serde(default)]
    pub stuck_context: Option<String>,
}

impl PlanRequest {
    /// Render the request as a single prompt.
    pub fn render(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("You are automating an online checkout.\n\n## Goal\n");
        prompt.push_str(&self.goal);
        prompt.push_str("\n\n");

        if !self.customer.is_null() {
            prompt.push_str("## Customer Data\n");
            let customer =
                serde_json::to_string_pretty(&self.customer).unwrap_or_else(|_| self.customer.to_string());
            prompt.push_str(&customer);
            prompt.push_str("\n\n");
        }

        prompt.push_str("## Tools\n");
        for tool in &self.tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        prompt.push('\n');

        prompt.push_str("## Action History\n");
        if self.history.is_empty() {
            prompt.push_str("(none yet)\n");
        }
        for entry in &self.history {
            let mark = if entry.success { "✓" } else { "✗" };
            prompt.push_str(&format!(
                "{}. {} {} {} -> {}\n",
                entry.step,
                mark,
                entry.tool,
                Value::Object(entry.params.clone()),
                truncate(&entry.message, 200)
            ));
        }
        prompt.push('\n');

        if let Some(stuck) = &self.stuck_context {
            prompt.push_str("## Warning\n");
            prompt.push_str(stuck);
            prompt.push_str("\n\n");
        }

        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> PlanRequest {
        PlanRequest {
            goal: "Buy the blue shirt".to_string(),
            customer: json!({"email": "pat@example.com"}),
            tools: vec![ToolSpec::new("click", "Click an element")],
            history: vec![HistoryEntry {
                step: 1,
                tool: "click".to_string(),
                params: Map::new(),
                success: false,
                message: "Element not found".to_string(),
            }],
            stuck_context: None,
        }
    }

    #[test]
    fn test_render_contains_sections() {
        let prompt = request().render();
        assert!(prompt.contains("## Goal\nBuy the blue shirt"));
        assert!(prompt.contains("pat@example.com"));
        assert!(prompt.contains("- click: Click an element"));
        assert!(prompt.contains("1. ✗ click {} -> Element not found"));
        assert!(!prompt.contains("## Warning"));
        assert!(prompt.contains(r#""type": "action""#));
    }

    #[test]
    fn test_render_includes_stuck_context() {
        let mut req = request();
        req.stuck_context = Some("STUCK IN LOOP: 3 consecutive failures.".to_string());
        let prompt = req.render();
        assert!(prompt.contains("## Warning\nSTUCK IN LOOP"));
    }

    #[test]
    fn test_render_empty_history_and_customer() {
        let req = PlanRequest {
            goal: "g".to_string(),
            ..Default::default()
        };
        let prompt = req.render();
        assert!(prompt.contains("(none yet)"));
        assert!(!prompt.contains("## Customer Data"));
    }
}
