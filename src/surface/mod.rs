//! The interactive tool surface the control loop drives.
//!
//! A `ToolSurface` is a black box (a browser session, a scripted replay, a
//! test double) that may fail or hang on any call. Every method takes its own
//! timeout and returns a [`SurfaceResult`], so callers can tell "the element
//! is not there" apart from "the call did not complete".

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{SurfaceError, SurfaceResult};

/// Script id for a `{url, text}` snapshot of the current page.
pub const SCRIPT_PAGE_SNAPSHOT: &str = "page_snapshot";

/// Script id for the list of visible interactive elements on the page.
pub const SCRIPT_INTERACTIVE_ELEMENTS: &str = "interactive_elements";

/// One tool invocation chosen by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Human-readable description of what this step is for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl Action {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: Map::new(),
            step: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// String parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Label used for progress and loop bookkeeping.
    pub fn label(&self) -> String {
        self.step.clone().unwrap_or_else(|| self.tool.clone())
    }
}

/// Input the surface asked for while executing a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequirement {
    #[serde(default = "default_prompt_type")]
    pub prompt_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub field_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_prompt_type() -> String {
    "otp".to_string()
}

fn default_required() -> bool {
    true
}

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl Observation {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// The surface flagged this outcome as one no retry can fix.
    pub fn is_unrecoverable(&self) -> bool {
        self.details
            .get("unrecoverable")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The surface is stuck on this step and wants advice before a retry.
    pub fn assistance_requested(&self) -> bool {
        self.details
            .get("assistance_requested")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Human input the surface needs before it can go on.
    pub fn input_required(&self) -> Option<InputRequirement> {
        let raw = self.details.get("input_required")?;
        serde_json::from_value(raw.clone()).ok()
    }
}

impl From<SurfaceError> for Observation {
    fn from(err: SurfaceError) -> Self {
        Observation::failed(err.to_string())
    }
}

/// Catalog entry describing one tool to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Visible state of the current page as the classifier sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    #[serde(default)]
    pub text: String,
}

/// A visible interactive element (button, link, role=button).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Surface-specific handle passed back to [`ToolSurface::click`]
    pub ref_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Inside a nav, header or footer region
    #[serde(default)]
    pub in_chrome: bool,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

/// The externally controlled surface a session acts on.
///
/// Implementations must be safe to call from a spawned task; the
/// orchestrator runs tool execution off its own task so a panic in here
/// becomes a failed [`Observation`].
#[async_trait]
pub trait ToolSurface: Send + Sync {
    /// Tools the planner may choose from.
    fn catalog(&self) -> Vec<ToolSpec>;

    async fn current_url(&self, timeout: Duration) -> SurfaceResult<String>;

    async fn navigate(&self, url: &str, timeout: Duration) -> SurfaceResult<()>;

    /// Run a named page script. See [`SCRIPT_PAGE_SNAPSHOT`] and
    /// [`SCRIPT_INTERACTIVE_ELEMENTS`] for the ids the core relies on.
    async fn evaluate(&self, script_id: &str, args: Value, timeout: Duration)
    -> SurfaceResult<Value>;

    async fn click(&self, ref_id: &str, timeout: Duration) -> SurfaceResult<()>;

    /// Execute a planner-chosen tool.
    async fn execute(&self, action: &Action, timeout: Duration) -> SurfaceResult<Observation>;
}

/// Bound a surface call by `timeout`, mapping expiry to [`SurfaceError::Timeout`].
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> SurfaceResult<T>
where
    F: Future<Output = SurfaceResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SurfaceError::Timeout(timeout)),
    }
}

/// Fetch a page snapshot through [`SCRIPT_PAGE_SNAPSHOT`].
pub async fn page_snapshot(
    surface: &dyn ToolSurface,
    timeout: Duration,
) -> SurfaceResult<PageSnapshot> {
    let value = bounded(
        timeout,
        surface.evaluate(SCRIPT_PAGE_SNAPSHOT, Value::Null, timeout),
    )
    .await?;
    serde_json::from_value(value)
        .map_err(|e| SurfaceError::Failed(format!("Malformed page snapshot: {}", e)))
}

/// Fetch visible interactive elements through [`SCRIPT_INTERACTIVE_ELEMENTS`].
pub async fn interactive_elements(
    surface: &dyn ToolSurface,
    timeout: Duration,
) -> SurfaceResult<Vec<ElementInfo>> {
    let value = bounded(
        timeout,
        surface.evaluate(SCRIPT_INTERACTIVE_ELEMENTS, Value::Null, timeout),
    )
    .await?;
    serde_json::from_value(value)
        .map_err(|e| SurfaceError::Failed(format!("Malformed element list: {}", e)))
}
