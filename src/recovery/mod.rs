//! Page-state recovery after navigation drift or a stalled loop.
//!
//! [`RecoveryStrategist::recover`] tries, in order:
//!
//! | Strategy | What it does |
//! |----------|--------------|
//! | `already_there` | Classify the current page; succeed without navigating if it already matches |
//! | `direct_url` | Navigate to each configured candidate path on the current origin |
//! | `affordance_click` | Click the first visible checkout-intent element outside page chrome |
//!
//! Every surface call carries its own timeout and the whole run is bounded
//! by a total budget. Exhausting all strategies yields method `none`; the
//! caller decides what to do about it.

mod classifier;

pub use classifier::{PageCategory, PageClassifier};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::RecoverySection;
use crate::errors::{RecoveryError, SurfaceError};
use crate::surface::{self, ElementInfo, PageSnapshot, ToolSurface};
use crate::util;

/// How a recovery run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    AlreadyThere,
    DirectUrl,
    AffordanceClick,
    None,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMethod::AlreadyThere => "already_there",
            RecoveryMethod::DirectUrl => "direct_url",
            RecoveryMethod::AffordanceClick => "affordance_click",
            RecoveryMethod::None => "none",
        }
    }
}

impl std::fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single probe within a recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched,
    NotMatched,
    NotFound,
    TimedOut,
    Failed(String),
}

impl From<SurfaceError> for AttemptOutcome {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::NotFound(_) => AttemptOutcome::NotFound,
            SurfaceError::Timeout(_) => AttemptOutcome::TimedOut,
            SurfaceError::Failed(msg) => AttemptOutcome::Failed(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryAttempt {
    pub strategy_name: &'static str,
    pub candidate: String,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub url: Option<String>,
    pub method: RecoveryMethod,
    pub attempts: Vec<RecoveryAttempt>,
}

impl RecoveryOutcome {
    /// The exhaustion error for a failed run, for callers that report it.
    pub fn error(&self) -> Option<RecoveryError> {
        (!self.success).then(|| RecoveryError::Exhausted {
            attempts: self.attempts.len(),
        })
    }

    pub fn summary(&self) -> String {
        match (&self.error(), &self.url) {
            (None, Some(url)) => format!("recovered via {} at {}", self.method, url),
            (None, None) => format!("recovered via {}", self.method),
            (Some(err), _) => err.to_string(),
        }
    }
}

/// Tunables for a [`RecoveryStrategist`].
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub candidate_paths: Vec<String>,
    pub attempt_timeout: Duration,
    pub settle: Duration,
    pub click_settle: Duration,
    pub total_budget: Duration,
    pub affordance_keywords: Vec<String>,
}

impl From<&RecoverySection> for RecoverySettings {
    fn from(section: &RecoverySection) -> Self {
        Self {
            candidate_paths: section.candidate_paths.clone(),
            attempt_timeout: Duration::from_secs(section.attempt_timeout_secs),
            settle: Duration::from_millis(section.settle_ms),
            click_settle: Duration::from_millis(section.click_settle_ms),
            total_budget: Duration::from_secs(section.total_budget_secs),
            affordance_keywords: section
                .affordance_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self::from(&RecoverySection::default())
    }
}

/// Per-session recovery runner.
pub struct RecoveryStrategist {
    surface: Arc<dyn ToolSurface>,
    settings: RecoverySettings,
    classifier: PageClassifier,
}

/// Bookkeeping for one `recover` call.
struct Run {
    deadline: Instant,
    attempt_timeout: Duration,
    attempts: Vec<RecoveryAttempt>,
}

impl Run {
    /// Per-call timeout clipped to what is left of the total budget, or
    /// `None` once the budget is spent.
    fn timeout(&self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then(|| remaining.min(self.attempt_timeout))
    }

    fn record(
        &mut self,
        strategy_name: &'static str,
        candidate: &str,
        outcome: AttemptOutcome,
        started: Instant,
    ) {
        tracing::debug!(strategy = strategy_name, candidate, ?outcome, "Recovery attempt");
        self.attempts.push(RecoveryAttempt {
            strategy_name,
            candidate: candidate.to_string(),
            outcome,
            elapsed: started.elapsed(),
        });
    }
}

impl RecoveryStrategist {
    pub fn new(surface: Arc<dyn ToolSurface>, settings: RecoverySettings) -> Self {
        Self {
            surface,
            settings,
            classifier: PageClassifier::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: PageClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    /// Try to regain a page of the category named by `expected_hint`
    /// (checkout when absent).
    pub async fn recover(&self, current_url: &str, expected_hint: Option<&str>) -> RecoveryOutcome {
        let target = PageCategory::from_hint(expected_hint);
        let mut run = Run {
            deadline: Instant::now() + self.settings.total_budget,
            attempt_timeout: self.settings.attempt_timeout,
            attempts: Vec::new(),
        };
        tracing::info!(current_url, target = target.as_str(), "Starting page recovery");

        if let Some(url) = self.already_there(&mut run, current_url, target).await {
            return finish(run, true, Some(url), RecoveryMethod::AlreadyThere);
        }
        if let Some(url) = self.direct_url(&mut run, current_url, target).await {
            return finish(run, true, Some(url), RecoveryMethod::DirectUrl);
        }
        if let Some(url) = self.affordance_click(&mut run, current_url).await {
            return finish(run, true, Some(url), RecoveryMethod::AffordanceClick);
        }

        finish(run, false, None, RecoveryMethod::None)
    }

    async fn already_there(
        &self,
        run: &mut Run,
        current_url: &str,
        target: PageCategory,
    ) -> Option<String> {
        let started = Instant::now();
        let timeout = run.timeout()?;
        // Fall back to URL-only classification when the page can't be read.
        let page = match surface::page_snapshot(self.surface.as_ref(), timeout).await {
            Ok(page) if !page.url.is_empty() => page,
            Ok(page) => PageSnapshot {
                url: current_url.to_string(),
                text: page.text,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Page snapshot unavailable; classifying by URL");
                PageSnapshot {
                    url: current_url.to_string(),
                    text: String::new(),
                }
            }
        };

        let matched = self.classifier.matches(&page, target);
        let outcome = if matched {
            AttemptOutcome::Matched
        } else {
            AttemptOutcome::NotMatched
        };
        run.record("already_there", &page.url, outcome, started);
        matched.then_some(page.url)
    }

    async fn direct_url(
        &self,
        run: &mut Run,
        current_url: &str,
        target: PageCategory,
    ) -> Option<String> {
        // Candidate paths are checkout entry points.
        if target != PageCategory::Checkout {
            tracing::debug!(target = target.as_str(), "Skipping candidate paths for non-checkout target");
            return None;
        }
        let Some(origin) = util::origin_of(current_url) else {
            tracing::debug!(current_url, "No origin to probe candidate paths against");
            return None;
        };

        for path in &self.settings.candidate_paths {
            let candidate = format!("{}{}", origin, path);
            let started = Instant::now();
            let Some(timeout) = run.timeout() else {
                tracing::warn!("Recovery budget spent during candidate probing");
                return None;
            };

            if let Err(e) = surface::bounded(timeout, self.surface.navigate(&candidate, timeout)).await
            {
                run.record("direct_url", &candidate, e.into(), started);
                continue;
            }
            tokio::time::sleep(self.settings.settle).await;

            let Some(timeout) = run.timeout() else {
                run.record("direct_url", &candidate, AttemptOutcome::TimedOut, started);
                return None;
            };
            let page = match surface::page_snapshot(self.surface.as_ref(), timeout).await {
                Ok(page) => page,
                Err(e) => {
                    run.record("direct_url", &candidate, e.into(), started);
                    continue;
                }
            };
            let page = if page.url.is_empty() {
                PageSnapshot {
                    url: candidate.clone(),
                    ..page
                }
            } else {
                page
            };

            if self.classifier.matches(&page, target) {
                run.record("direct_url", &candidate, AttemptOutcome::Matched, started);
                return Some(page.url);
            }
            run.record("direct_url", &candidate, AttemptOutcome::NotMatched, started);
        }

        None
    }

    async fn affordance_click(&self, run: &mut Run, current_url: &str) -> Option<String> {
        // Probing may have left us on a candidate page; scan the page we started from.
        if run.attempts.iter().any(|a| a.strategy_name == "direct_url") {
            let timeout = run.timeout()?;
            if let Err(e) = surface::bounded(timeout, self.surface.navigate(current_url, timeout)).await {
                tracing::debug!(error = %e, "Could not return to starting page before affordance scan");
            } else {
                tokio::time::sleep(self.settings.settle).await;
            }
        }

        let started = Instant::now();
        let timeout = run.timeout()?;
        let elements = match surface::interactive_elements(self.surface.as_ref(), timeout).await {
            Ok(elements) => elements,
            Err(e) => {
                run.record("affordance_click", "scan", e.into(), started);
                return None;
            }
        };

        let before = self.current_url(run).await.unwrap_or_else(|| current_url.to_string());

        for element in elements.iter().filter(|e| self.is_affordance(e)) {
            let started = Instant::now();
            let timeout = run.timeout()?;
            let label = if element.text.is_empty() {
                element.ref_id.clone()
            } else {
                element.text.clone()
            };

            if let Err(e) = surface::bounded(timeout, self.surface.click(&element.ref_id, timeout)).await {
                run.record("affordance_click", &label, e.into(), started);
                continue;
            }
            tokio::time::sleep(self.settings.click_settle).await;

            let after = self.current_url(run).await;
            return match after {
                Some(after) if after != before => {
                    run.record("affordance_click", &label, AttemptOutcome::Matched, started);
                    Some(after)
                }
                _ => {
                    run.record("affordance_click", &label, AttemptOutcome::NotMatched, started);
                    None
                }
            };
        }

        if !run.attempts.iter().any(|a| a.strategy_name == "affordance_click") {
            run.record("affordance_click", "scan", AttemptOutcome::NotFound, started);
        }
        None
    }

    async fn current_url(&self, run: &Run) -> Option<String> {
        let timeout = run.timeout()?;
        surface::bounded(timeout, self.surface.current_url(timeout))
            .await
            .ok()
    }

    fn is_affordance(&self, element: &ElementInfo) -> bool {
        if !element.visible || element.in_chrome {
            return false;
        }
        let text = element.text.to_lowercase();
        self.settings
            .affordance_keywords
            .iter()
            .any(|k| text.contains(k))
            || element
                .href
                .as_deref()
                .is_some_and(|href| href.to_lowercase().contains("checkout"))
    }
}

fn finish(run: Run, success: bool, url: Option<String>, method: RecoveryMethod) -> RecoveryOutcome {
    if success {
        tracing::info!(method = method.as_str(), url = ?url, "Page recovery succeeded");
    } else {
        tracing::warn!(attempts = run.attempts.len(), "Page recovery exhausted all strategies");
    }
    RecoveryOutcome {
        success,
        url,
        method,
        attempts: run.attempts,
    }
}
