//! Configuration for cartpilot.
//!
//! Settings are read from `.cartpilot/cartpilot.toml` and layered as
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [orchestrator]
//! max_steps = 20
//! planner_retries = 3
//! planner_backoff_ms = 2000
//! tool_timeout_secs = 30
//! session_timeout_secs = 900
//! max_total_failures = 10
//! history_window = 8
//! max_recoveries = 3
//!
//! [loop_detection]
//! window_size = 5
//! threshold = 3
//!
//! [recovery]
//! candidate_paths = ["/checkout", "/checkout/shipping", "/secure/checkout"]
//! attempt_timeout_secs = 10
//! settle_ms = 1000
//! click_settle_ms = 2000
//! total_budget_secs = 60
//! affordance_keywords = ["checkout", "proceed"]
//!
//! [interrupts]
//! input_timeout_secs = 300
//! require_confirmation = false
//! confirm_tools = ["place_order", "submit_order", "complete_order"]
//!
//! [[verification.gates]]
//! pattern = "add to cart"
//! gate = "cart_addition"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project configuration directory.
pub const CONFIG_DIR: &str = ".cartpilot";

/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "cartpilot.toml";

/// Control-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Upper bound on loop iterations per task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Planner attempts per iteration before the task fails
    #[serde(default = "default_planner_retries")]
    pub planner_retries: u32,
    /// Pause between planner attempts
    #[serde(default = "default_planner_backoff_ms")]
    pub planner_backoff_ms: u64,
    /// Per-call bound on tool execution
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Wall-clock bound on a whole session
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Failed observations tolerated per task before giving up
    #[serde(default = "default_max_total_failures")]
    pub max_total_failures: u32,
    /// Number of history entries rendered into each planning prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Recovery runs allowed per task
    #[serde(default = "default_max_recoveries")]
    pub max_recoveries: u32,
}

fn default_max_steps() -> u32 {
    20
}

fn default_planner_retries() -> u32 {
    3
}

fn default_planner_backoff_ms() -> u64 {
    2000
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_session_timeout_secs() -> u64 {
    900
}

fn default_max_total_failures() -> u32 {
    10
}

fn default_history_window() -> usize {
    8
}

fn default_max_recoveries() -> u32 {
    3
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            planner_retries: default_planner_retries(),
            planner_backoff_ms: default_planner_backoff_ms(),
            tool_timeout_secs: default_tool_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            max_total_failures: default_max_total_failures(),
            history_window: default_history_window(),
            max_recoveries: default_max_recoveries(),
        }
    }
}

/// Stuck-loop detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionSection {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

fn default_window_size() -> usize {
    5
}

fn default_threshold() -> usize {
    3
}

impl Default for LoopDetectionSection {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            threshold: default_threshold(),
        }
    }
}

/// Page-state recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    /// Paths probed against the current origin, in order
    #[serde(default = "default_candidate_paths")]
    pub candidate_paths: Vec<String>,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Wait after a navigation before classifying the page
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Wait after clicking an affordance before checking where we landed
    #[serde(default = "default_click_settle_ms")]
    pub click_settle_ms: u64,
    #[serde(default = "default_total_budget_secs")]
    pub total_budget_secs: u64,
    /// Text fragments that mark a checkout affordance
    #[serde(default = "default_affordance_keywords")]
    pub affordance_keywords: Vec<String>,
}

fn default_candidate_paths() -> Vec<String> {
    [
        "/checkout",
        "/checkout/",
        "/checkout/shipping",
        "/checkout/information",
        "/checkout/contact",
        "/secure/checkout",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_click_settle_ms() -> u64 {
    2000
}

fn default_total_budget_secs() -> u64 {
    60
}

fn default_affordance_keywords() -> Vec<String> {
    vec!["checkout".to_string(), "proceed".to_string()]
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            candidate_paths: default_candidate_paths(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            settle_ms: default_settle_ms(),
            click_settle_ms: default_click_settle_ms(),
            total_budget_secs: default_total_budget_secs(),
            affordance_keywords: default_affordance_keywords(),
        }
    }
}

/// Human-in-the-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptsSection {
    #[serde(default = "default_input_timeout_secs")]
    pub input_timeout_secs: u64,
    /// Ask a human before running any tool in `confirm_tools`
    #[serde(default)]
    pub require_confirmation: bool,
    #[serde(default = "default_confirm_tools")]
    pub confirm_tools: Vec<String>,
}

fn default_input_timeout_secs() -> u64 {
    300
}

fn default_confirm_tools() -> Vec<String> {
    vec![
        "place_order".to_string(),
        "submit_order".to_string(),
        "complete_order".to_string(),
    ]
}

impl Default for InterruptsSection {
    fn default() -> Self {
        Self {
            input_timeout_secs: default_input_timeout_secs(),
            require_confirmation: false,
            confirm_tools: default_confirm_tools(),
        }
    }
}

/// Step label fragment that triggers a named verification gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRule {
    /// Case-insensitive substring of the step label
    pub pattern: String,
    pub gate: String,
}

impl GateRule {
    pub fn new(pattern: impl Into<String>, gate: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            gate: gate.into(),
        }
    }
}

/// Verification gates checked after key steps. First matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSection {
    #[serde(default = "default_gates")]
    pub gates: Vec<GateRule>,
}

fn default_gates() -> Vec<GateRule> {
    vec![
        GateRule::new("select variant", "variant_selection"),
        GateRule::new("add to cart", "cart_addition"),
        GateRule::new("fill email", "checkout_info"),
        GateRule::new("fill address", "checkout_info"),
        GateRule::new("payment", "payment_info"),
    ]
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            gates: default_gates(),
        }
    }
}

/// Progress/prompt transport server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3142
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Complete `cartpilot.toml` structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PilotToml {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub loop_detection: LoopDetectionSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub interrupts: InterruptsSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub verification: VerificationSection,
}

impl PilotToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cartpilot.toml")
    }

    /// Load from `<config_dir>/cartpilot.toml`, or defaults when absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize cartpilot.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `CARTPILOT_*` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u32>("CARTPILOT_MAX_STEPS") {
            self.orchestrator.max_steps = v;
        }
        if let Some(v) = env_parse::<u64>("CARTPILOT_INPUT_TIMEOUT_SECS") {
            self.interrupts.input_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("CARTPILOT_SESSION_TIMEOUT_SECS") {
            self.orchestrator.session_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u16>("CARTPILOT_PORT") {
            self.server.port = v;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.orchestrator.max_steps == 0 {
            warnings.push("orchestrator.max_steps is 0: no action will ever run".to_string());
        }
        if self.orchestrator.planner_retries == 0 {
            warnings.push(
                "orchestrator.planner_retries is 0: the planner is never called".to_string(),
            );
        }
        if self.loop_detection.window_size == 0 {
            warnings.push("loop_detection.window_size must be at least 1".to_string());
        }
        if self.loop_detection.threshold == 0 {
            warnings.push(
                "loop_detection.threshold is 0: every state would count as stuck".to_string(),
            );
        }
        if self.loop_detection.threshold > self.loop_detection.window_size {
            warnings.push(format!(
                "loop_detection.threshold ({}) exceeds window_size ({}): only consecutive failures can trigger",
                self.loop_detection.threshold, self.loop_detection.window_size
            ));
        }
        if self.recovery.candidate_paths.is_empty() {
            warnings.push(
                "recovery.candidate_paths is empty: direct URL probing is disabled".to_string(),
            );
        }
        for path in &self.recovery.candidate_paths {
            if !path.starts_with('/') {
                warnings.push(format!(
                    "recovery.candidate_paths entry '{}' should start with '/'",
                    path
                ));
            }
        }
        for rule in &self.verification.gates {
            if rule.pattern.trim().is_empty() {
                warnings.push(format!(
                    "verification gate '{}' has an empty pattern and matches every step",
                    rule.gate
                ));
            }
        }
        if self.interrupts.input_timeout_secs == 0 {
            warnings.push(
                "interrupts.input_timeout_secs is 0: prompts expire immediately".to_string(),
            );
        }

        warnings
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Resolved runtime configuration (file → env → CLI).
#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: PilotToml,
    pub verbose: bool,
}

impl PilotConfig {
    /// Load configuration for a project directory, applying env overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = PilotToml::load_or_default(&config_dir)?;
        toml.apply_env();

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
        })
    }

    /// Load configuration and apply CLI overrides on top.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_steps: Option<u32>,
        port: Option<u16>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(max_steps) = max_steps {
            config.toml.orchestrator.max_steps = max_steps;
        }
        if let Some(port) = port {
            config.toml.server.port = port;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.tool_timeout_secs)
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.interrupts.input_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.session_timeout_secs)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_documented_values() {
        let toml = PilotToml::default();
        assert_eq!(toml.orchestrator.max_steps, 20);
        assert_eq!(toml.orchestrator.planner_retries, 3);
        assert_eq!(toml.orchestrator.max_total_failures, 10);
        assert_eq!(toml.loop_detection.window_size, 5);
        assert_eq!(toml.loop_detection.threshold, 3);
        assert_eq!(toml.interrupts.input_timeout_secs, 300);
        assert_eq!(toml.recovery.candidate_paths[0], "/checkout");
        assert_eq!(toml.server.port, 3142);
        assert!(!toml.interrupts.require_confirmation);
    }

    #[test]
    fn test_parse_partial_file_fills_defaults() {
        let toml = PilotToml::parse(
            r#"
[loop_detection]
threshold = 2

[recovery]
candidate_paths = ["/checkout"]
"#,
        )
        .unwrap();
        assert_eq!(toml.loop_detection.threshold, 2);
        assert_eq!(toml.loop_detection.window_size, 5);
        assert_eq!(toml.recovery.candidate_paths, vec!["/checkout".to_string()]);
        assert_eq!(toml.recovery.attempt_timeout_secs, 10);
        assert_eq!(toml.orchestrator.max_steps, 20);
    }

    #[test]
    fn test_parse_verification_gates() {
        let toml = PilotToml::parse(
            r#"
[[verification.gates]]
pattern = "apply coupon"
gate = "discount"
"#,
        )
        .unwrap();
        assert_eq!(
            toml.verification.gates,
            vec![GateRule::new("apply coupon", "discount")]
        );
        assert_eq!(PilotToml::default().verification.gates.len(), 5);
    }

    #[test]
    fn test_parse_invalid_toml_errors() {
        let result = PilotToml::parse("[orchestrator\nmax_steps = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip_preserves_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = PilotToml::default();
        toml.orchestrator.max_steps = 7;
        toml.interrupts.confirm_tools = vec!["buy_now".to_string()];
        toml.save(&path).unwrap();

        let loaded = PilotToml::load(&path).unwrap();
        assert_eq!(loaded.orchestrator.max_steps, 7);
        assert_eq!(loaded.interrupts.confirm_tools, vec!["buy_now".to_string()]);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = PilotToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.orchestrator.max_steps, 20);
    }

    #[test]
    fn test_validate_defaults_are_clean() {
        assert!(PilotToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut toml = PilotToml::default();
        toml.loop_detection.window_size = 2;
        toml.loop_detection.threshold = 4;
        toml.recovery.candidate_paths = vec!["checkout".to_string()];
        toml.orchestrator.max_steps = 0;
        toml.verification.gates = vec![GateRule::new(" ", "anything")];

        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("empty pattern")));
        assert!(warnings.iter().any(|w| w.contains("exceeds window_size")));
        assert!(warnings.iter().any(|w| w.contains("should start with '/'")));
        assert!(warnings.iter().any(|w| w.contains("max_steps is 0")));
    }

    #[test]
    fn test_cli_args_override_file() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE),
            "[orchestrator]\nmax_steps = 12\n[server]\nport = 4000\n",
        )
        .unwrap();

        let from_file = PilotConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(from_file.toml.orchestrator.max_steps, 12);

        let config =
            PilotConfig::with_cli_args(dir.path().to_path_buf(), true, Some(4), Some(5000))
                .unwrap();
        assert!(config.verbose);
        assert_eq!(config.toml.orchestrator.max_steps, 4);
        assert_eq!(config.toml.server.port, 5000);
        assert_eq!(
            config.config_file(),
            dir.path()
                .canonicalize()
                .unwrap()
                .join(".cartpilot/cartpilot.toml")
        );
    }

    #[test]
    fn test_duration_accessors() {
        let dir = tempdir().unwrap();
        let config = PilotConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.tool_timeout(), Duration::from_secs(30));
        assert_eq!(config.input_timeout(), Duration::from_secs(300));
    }
}
