//! Scripted planner and surface driven by a JSON scenario file.
//!
//! `cartpilot replay <scenario.json>` runs the real orchestrator against
//! these doubles for offline dry runs; the integration tests use them too.
//!
//! # Scenario Format
//!
//! ```json
//! {
//!   "goal": "Check out the cart",
//!   "customer": {"email": "pat@example.com"},
//!   "start_url": "https://shop.example.com/cart",
//!   "max_steps": 10,
//!   "decisions": [
//!     {"type": "action", "tool": "click", "params": {"ref": "checkout"}},
//!     "not json at all",
//!     {"type": "complete", "message": "Order placed"}
//!   ],
//!   "outcomes": {
//!     "click": [{"success": false, "message": "Element not found"}]
//!   },
//!   "pages": {"https://shop.example.com/checkout": "Shipping address"},
//!   "elements": {"https://shop.example.com/cart": [{"ref_id": "go", "text": "Checkout"}]},
//!   "click_targets": {"go": "https://shop.example.com/checkout"},
//!   "answers": {"otp": "123456"},
//!   "verdicts": [{"approved": true, "feedback": "Item is in the cart"}],
//!   "advice": ["Use the side cart instead"]
//! }
//! ```
//!
//! Decisions are replayed in order; string entries are returned verbatim so
//! unparseable replies can be scripted. Tools without a queued outcome
//! succeed. An outcome with `"error"` makes the surface call itself fail.
//! Gate checks beyond the scripted verdicts are approved.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::{SurfaceError, SurfaceResult};
use crate::interrupt::{InterruptBroker, PromptEvent, PromptTransport};
use crate::orchestrator::Task;
use crate::planner::{PlanRequest, PlanningCapability};
use crate::surface::{
    Action, ElementInfo, Observation, SCRIPT_INTERACTIVE_ELEMENTS, SCRIPT_PAGE_SNAPSHOT, ToolSpec,
    ToolSurface,
};
use crate::verification::{Verdict, VerificationCapability};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted result of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedOutcome {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Value,
    /// Page the surface lands on after this tool runs
    #[serde(default)]
    pub navigate_to: Option<String>,
    /// Simulated latency before the outcome is returned
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Simulate a crashing surface implementation
    #[serde(default)]
    pub panic: bool,
    /// Fail the surface call itself with this message
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub goal: String,
    #[serde(default)]
    pub customer: Value,
    pub start_url: String,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub decisions: Vec<Value>,
    #[serde(default)]
    pub outcomes: HashMap<String, Vec<ScriptedOutcome>>,
    #[serde(default)]
    pub pages: HashMap<String, String>,
    #[serde(default)]
    pub elements: HashMap<String, Vec<ElementInfo>>,
    #[serde(default)]
    pub click_targets: HashMap<String, String>,
    /// Scripted answers to prompts, keyed by field name
    #[serde(default)]
    pub answers: HashMap<String, String>,
    /// Gate verdicts, consumed in order
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
    /// Advice returned to assistance requests, consumed in order
    #[serde(default)]
    pub advice: Vec<String>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid scenario file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario =
            serde_json::from_str(content).context("Failed to parse scenario JSON")?;
        if scenario.goal.trim().is_empty() {
            anyhow::bail!("Scenario goal must not be empty");
        }
        Ok(scenario)
    }

    /// The task this scenario describes, with `default_max_steps` when the
    /// file sets none.
    pub fn task(&self, default_max_steps: u32) -> Task {
        Task::new(
            self.goal.clone(),
            self.customer.clone(),
            self.max_steps.unwrap_or(default_max_steps),
        )
    }

    pub fn planner(&self) -> ScriptedPlanner {
        ScriptedPlanner::new(self.decisions.iter().map(render_decision).collect())
    }

    pub fn surface(&self) -> ScriptedSurface {
        ScriptedSurface::from_scenario(self)
    }

    /// A verifier, when the scenario scripts verdicts or advice.
    pub fn verifier(&self) -> Option<ScriptedVerifier> {
        if self.verdicts.is_empty() && self.advice.is_empty() {
            return None;
        }
        Some(ScriptedVerifier::new(
            self.verdicts.clone(),
            self.advice.clone(),
        ))
    }
}

fn render_decision(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Planner that replays a fixed list of replies.
pub struct ScriptedPlanner {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<PlanRequest>>,
}

impl ScriptedPlanner {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<PlanRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl PlanningCapability for ScriptedPlanner {
    async fn complete(&self, request: &PlanRequest) -> Result<String> {
        lock(&self.requests).push(request.clone());
        lock(&self.replies)
            .pop_front()
            .context("Planner script exhausted")
    }
}

const DEFAULT_TOOLS: &[(&str, &str)] = &[
    ("navigate", "Open a URL. params: {url}"),
    ("click", "Click an element. params: {ref}"),
    ("fill_field", "Type into a form field. params: {field, value}"),
    ("select_variant", "Pick a product option. params: {variant_type, value}"),
    ("provide_input", "Enter a value a prompt asked for. params: {field_name, value}"),
    ("place_order", "Submit the order"),
];

/// In-memory site that records everything done to it.
pub struct ScriptedSurface {
    tools: Vec<ToolSpec>,
    current: Mutex<String>,
    outcomes: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    pages: HashMap<String, String>,
    elements: HashMap<String, Vec<ElementInfo>>,
    click_targets: HashMap<String, String>,
    navigations: Mutex<Vec<String>>,
    clicks: Mutex<Vec<String>>,
    executed: Mutex<Vec<Action>>,
}

impl ScriptedSurface {
    pub fn from_scenario(scenario: &Scenario) -> Self {
        let tools = if scenario.tools.is_empty() {
            DEFAULT_TOOLS
                .iter()
                .map(|(name, description)| ToolSpec::new(*name, *description))
                .collect()
        } else {
            scenario.tools.clone()
        };
        Self {
            tools,
            current: Mutex::new(scenario.start_url.clone()),
            outcomes: Mutex::new(
                scenario
                    .outcomes
                    .iter()
                    .map(|(tool, queue)| (tool.clone(), queue.iter().cloned().collect()))
                    .collect(),
            ),
            pages: scenario.pages.clone(),
            elements: scenario.elements.clone(),
            click_targets: scenario.click_targets.clone(),
            navigations: Mutex::new(Vec::new()),
            clicks: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> String {
        lock(&self.current).clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        lock(&self.navigations).clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        lock(&self.clicks).clone()
    }

    pub fn executed(&self) -> Vec<Action> {
        lock(&self.executed).clone()
    }

    fn go(&self, url: &str) {
        *lock(&self.current) = url.to_string();
    }
}

#[async_trait]
impl ToolSurface for ScriptedSurface {
    fn catalog(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn current_url(&self, _timeout: Duration) -> SurfaceResult<String> {
        Ok(self.url())
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> SurfaceResult<()> {
        lock(&self.navigations).push(url.to_string());
        self.go(url);
        Ok(())
    }

    async fn evaluate(
        &self,
        script_id: &str,
        _args: Value,
        _timeout: Duration,
    ) -> SurfaceResult<Value> {
        let url = self.url();
        match script_id {
            SCRIPT_PAGE_SNAPSHOT => Ok(json!({
                "url": url,
                "text": self.pages.get(&url).cloned().unwrap_or_default(),
            })),
            SCRIPT_INTERACTIVE_ELEMENTS => {
                let elements = self.elements.get(&url).cloned().unwrap_or_default();
                serde_json::to_value(elements).map_err(|e| SurfaceError::Failed(e.to_string()))
            }
            other => Err(SurfaceError::NotFound(format!("script '{}'", other))),
        }
    }

    async fn click(&self, ref_id: &str, _timeout: Duration) -> SurfaceResult<()> {
        lock(&self.clicks).push(ref_id.to_string());
        if let Some(target) = self.click_targets.get(ref_id) {
            self.go(target);
            return Ok(());
        }
        let url = self.url();
        let on_page = self
            .elements
            .get(&url)
            .is_some_and(|elements| elements.iter().any(|e| e.ref_id == ref_id));
        if on_page {
            Ok(())
        } else {
            Err(SurfaceError::NotFound(ref_id.to_string()))
        }
    }

    async fn execute(&self, action: &Action, _timeout: Duration) -> SurfaceResult<Observation> {
        lock(&self.executed).push(action.clone());
        let scripted = lock(&self.outcomes)
            .get_mut(&action.tool)
            .and_then(VecDeque::pop_front);

        let Some(outcome) = scripted else {
            if action.tool == "navigate"
                && let Some(url) = action.param_str("url")
            {
                lock(&self.navigations).push(url.to_string());
                self.go(url);
                return Ok(Observation::ok(format!("Navigated to {}", url)));
            }
            return Ok(Observation::ok(format!("{} done", action.tool)));
        };

        if let Some(delay) = outcome.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if outcome.panic {
            panic!("scripted surface panic in {}", action.tool);
        }
        if let Some(error) = outcome.error {
            return Err(SurfaceError::Failed(error));
        }
        if let Some(url) = &outcome.navigate_to {
            self.go(url);
        }
        Ok(Observation {
            success: outcome.success,
            message: outcome.message,
            details: outcome.details,
        })
    }
}

/// Verifier that replays scripted verdicts and advice.
pub struct ScriptedVerifier {
    verdicts: Mutex<VecDeque<Verdict>>,
    advice: Mutex<VecDeque<String>>,
    gates: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new(verdicts: Vec<Verdict>, advice: Vec<String>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            advice: Mutex::new(advice.into()),
            gates: Mutex::new(Vec::new()),
        }
    }

    /// Gates checked so far, in order.
    pub fn gates(&self) -> Vec<String> {
        lock(&self.gates).clone()
    }
}

#[async_trait]
impl VerificationCapability for ScriptedVerifier {
    async fn verify(&self, gate: &str, _step: &str, _observation: &Observation) -> Result<Verdict> {
        lock(&self.gates).push(gate.to_string());
        Ok(lock(&self.verdicts)
            .pop_front()
            .unwrap_or_else(Verdict::approve))
    }

    async fn advise(&self, step: &str, _observation: &Observation) -> Result<String> {
        lock(&self.advice)
            .pop_front()
            .with_context(|| format!("No scripted advice left for '{}'", step))
    }
}

/// Prompt transport that answers from the scenario's `answers` table.
pub struct ScriptedResponder {
    broker: Weak<InterruptBroker>,
    answers: HashMap<String, String>,
}

impl ScriptedResponder {
    pub fn new(broker: &Arc<InterruptBroker>, answers: HashMap<String, String>) -> Self {
        Self {
            broker: Arc::downgrade(broker),
            answers,
        }
    }
}

#[async_trait]
impl PromptTransport for ScriptedResponder {
    async fn send(&self, session_id: &str, event: &PromptEvent) -> Result<()> {
        let PromptEvent::InputRequired {
            prompt_type,
            field_name,
            ..
        } = event;
        let broker = self.broker.upgrade().context("Prompt broker is gone")?;
        match self.answers.get(field_name) {
            Some(value) => {
                tracing::info!(session_id, prompt_type = %prompt_type, field_name = %field_name, "Answering prompt from script");
                broker.submit_input(session_id, value);
            }
            None => {
                tracing::warn!(session_id, field_name = %field_name, "No scripted answer; prompt will wait for a human or time out");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface;

    const SCENARIO: &str = r#"{
        "goal": "Check out",
        "start_url": "https://shop.example.com/cart",
        "decisions": [{"type": "complete", "message": "ok"}, "garbage"],
        "outcomes": {"click": [{"success": false, "message": "nope"}]},
        "pages": {"https://shop.example.com/cart": "Your cart"},
        "elements": {"https://shop.example.com/cart": [{"ref_id": "go", "text": "Checkout"}]},
        "click_targets": {"go": "https://shop.example.com/checkout"}
    }"#;

    #[tokio::test]
    async fn test_verifier_replays_then_approves() {
        let scenario = Scenario::parse(
            r#"{
                "goal": "Add a shirt",
                "start_url": "https://shop.example.com/p/1",
                "decisions": [],
                "verdicts": [{"approved": false, "feedback": "Wrong size"}],
                "advice": ["Close the popup first"]
            }"#,
        )
        .unwrap();
        let verifier = scenario.verifier().unwrap();
        let obs = Observation::ok("added");

        let first = verifier.verify("cart_addition", "Add to cart", &obs).await.unwrap();
        assert_eq!(first, Verdict::reject("Wrong size"));
        assert!(verifier.verify("cart_addition", "Add to cart", &obs).await.unwrap().approved);
        assert_eq!(verifier.gates(), vec!["cart_addition", "cart_addition"]);

        assert_eq!(
            verifier.advise("Add to cart", &obs).await.unwrap(),
            "Close the popup first"
        );
        assert!(verifier.advise("Add to cart", &obs).await.is_err());
        assert!(Scenario::parse(SCENARIO).unwrap().verifier().is_none());
    }

    #[tokio::test]
    async fn test_scripted_error_fails_the_call() {
        let surface = Scenario::parse(
            r#"{
                "goal": "Check out",
                "start_url": "https://shop.example.com/cart",
                "decisions": [],
                "outcomes": {"click": [{"error": "connection reset"}]}
            }"#,
        )
        .unwrap()
        .surface();

        let err = surface
            .execute(&Action::new("click"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, SurfaceError::Failed("connection reset".to_string()));
    }

    #[test]
    fn test_parse_scenario_and_task() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let task = scenario.task(20);
        assert_eq!(task.goal, "Check out");
        assert_eq!(task.max_steps, 20);
        assert!(Scenario::parse(r#"{"goal": " ", "start_url": "x", "decisions": []}"#).is_err());
    }

    #[tokio::test]
    async fn test_planner_replays_in_order_then_errors() {
        let planner = Scenario::parse(SCENARIO).unwrap().planner();
        let req = PlanRequest::default();
        assert!(planner.complete(&req).await.unwrap().contains("complete"));
        assert_eq!(planner.complete(&req).await.unwrap(), "garbage");
        assert!(planner.complete(&req).await.is_err());
        assert_eq!(planner.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_surface_scripted_and_default_outcomes() {
        let surface = Scenario::parse(SCENARIO).unwrap().surface();
        let t = Duration::from_secs(1);

        let obs = surface.execute(&Action::new("click"), t).await.unwrap();
        assert!(!obs.success);
        let obs = surface.execute(&Action::new("click"), t).await.unwrap();
        assert!(obs.success);

        let obs = surface
            .execute(
                &Action::new("navigate").with_param("url", "https://shop.example.com/x"),
                t,
            )
            .await
            .unwrap();
        assert!(obs.success);
        assert_eq!(surface.url(), "https://shop.example.com/x");
        assert_eq!(surface.executed().len(), 3);
        assert_eq!(surface.catalog().len(), DEFAULT_TOOLS.len());
    }

    #[tokio::test]
    async fn test_surface_page_scripts_and_clicks() {
        let surface = Scenario::parse(SCENARIO).unwrap().surface();
        let t = Duration::from_secs(1);

        let page = surface::page_snapshot(&surface, t).await.unwrap();
        assert_eq!(page.text, "Your cart");
        let elements = surface::interactive_elements(&surface, t).await.unwrap();
        assert_eq!(elements[0].ref_id, "go");

        assert!(surface.click("missing", t).await.unwrap_err().is_not_found());
        surface.click("go", t).await.unwrap();
        assert_eq!(surface.url(), "https://shop.example.com/checkout");
    }

    #[tokio::test]
    async fn test_responder_submits_known_answers() {
        let broker = Arc::new(InterruptBroker::new());
        let answers = HashMap::from([("otp".to_string(), "123456".to_string())]);
        broker.register_transport("s1", Arc::new(ScriptedResponder::new(&broker, answers)));

        let value = broker
            .request_input("s1", "otp", "Enter code", "otp", Duration::from_secs(5))
            .await;
        assert_eq!(value.as_deref(), Some("123456"));
    }
}
