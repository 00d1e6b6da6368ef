//! Variant selection (size, color, ...) routed by site.
//!
//! Site-specific [`VariantStrategy`] implementations are registered against a
//! domain. A lookup for a page URL picks the strategy with the longest
//! matching domain, then always falls back to [`GenericVariantStrategy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::surface::{self, ElementInfo, Observation, ToolSurface};
use crate::util;

/// Result of one strategy's attempt at selecting a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOutcome {
    pub success: bool,
    pub strategy: String,
    pub message: String,
}

impl VariantOutcome {
    pub fn ok(strategy: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            strategy: strategy.to_string(),
            message: message.into(),
        }
    }

    pub fn failed(strategy: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy: strategy.to_string(),
            message: message.into(),
        }
    }
}

impl From<VariantOutcome> for Observation {
    fn from(outcome: VariantOutcome) -> Self {
        let details = serde_json::json!({ "strategy": outcome.strategy });
        if outcome.success {
            Observation::ok(outcome.message).with_details(details)
        } else {
            Observation::failed(outcome.message).with_details(details)
        }
    }
}

#[async_trait]
pub trait VariantStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(
        &self,
        surface: &dyn ToolSurface,
        variant_type: &str,
        variant_value: &str,
        timeout: Duration,
    ) -> VariantOutcome;
}

/// Clicks the visible element whose text best matches the wanted value.
///
/// An exact (case-insensitive) text match wins over a substring match.
#[derive(Debug, Default)]
pub struct GenericVariantStrategy;

impl GenericVariantStrategy {
    fn pick<'a>(elements: &'a [ElementInfo], value: &str) -> Option<&'a ElementInfo> {
        let wanted = value.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        let candidates = || elements.iter().filter(|e| e.visible && !e.in_chrome);
        candidates()
            .find(|e| e.text.trim().to_lowercase() == wanted)
            .or_else(|| candidates().find(|e| e.text.to_lowercase().contains(&wanted)))
    }
}

#[async_trait]
impl VariantStrategy for GenericVariantStrategy {
    fn name(&self) -> &str {
        "generic"
    }

    async fn attempt(
        &self,
        surface: &dyn ToolSurface,
        variant_type: &str,
        variant_value: &str,
        timeout: Duration,
    ) -> VariantOutcome {
        let elements = match surface::interactive_elements(surface, timeout).await {
            Ok(elements) => elements,
            Err(e) => return VariantOutcome::failed(self.name(), e.to_string()),
        };

        let Some(element) = Self::pick(&elements, variant_value) else {
            return VariantOutcome::failed(
                self.name(),
                format!("No {} option matching '{}'", variant_type, variant_value),
            );
        };

        match surface::bounded(timeout, surface.click(&element.ref_id, timeout)).await {
            Ok(()) => VariantOutcome::ok(
                self.name(),
                format!("Selected {} '{}'", variant_type, element.text.trim()),
            ),
            Err(e) => VariantOutcome::failed(self.name(), e.to_string()),
        }
    }
}

/// Domain → strategy table with a generic fallback.
pub struct VariantRegistry {
    sites: Vec<(String, Arc<dyn VariantStrategy>)>,
    fallback: Arc<dyn VariantStrategy>,
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self {
            sites: Vec::new(),
            fallback: Arc::new(GenericVariantStrategy),
        }
    }
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy for `domain` (and its subdomains).
    pub fn register(&mut self, domain: &str, strategy: Arc<dyn VariantStrategy>) {
        let domain = domain.trim().trim_start_matches("www.").to_lowercase();
        self.sites.retain(|(d, _)| *d != domain);
        self.sites.push((domain, strategy));
    }

    /// Strategies to try for `url`, in order. The fallback is always last.
    pub fn resolve(&self, url: &str) -> Vec<Arc<dyn VariantStrategy>> {
        let mut chain = Vec::with_capacity(2);
        if let Some(host) = util::host_of(url)
            && let Some((_, strategy)) = self
                .sites
                .iter()
                .filter(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
                .max_by_key(|(domain, _)| domain.len())
        {
            chain.push(Arc::clone(strategy));
        }
        chain.push(Arc::clone(&self.fallback));
        chain
    }

    /// Try each resolved strategy until one succeeds.
    pub async fn select(
        &self,
        surface: &dyn ToolSurface,
        url: &str,
        variant_type: &str,
        variant_value: &str,
        timeout: Duration,
    ) -> VariantOutcome {
        let mut failures = Vec::new();
        for strategy in self.resolve(url) {
            let outcome = strategy
                .attempt(surface, variant_type, variant_value, timeout)
                .await;
            if outcome.success {
                tracing::info!(strategy = %outcome.strategy, variant_type, variant_value, "Variant selected");
                return outcome;
            }
            tracing::debug!(strategy = %outcome.strategy, message = %outcome.message, "Variant strategy failed");
            failures.push(format!("{}: {}", outcome.strategy, outcome.message));
        }

        VariantOutcome::failed("none", failures.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SurfaceError, SurfaceResult};
    use crate::surface::{Action, ToolSpec, SCRIPT_INTERACTIVE_ELEMENTS};
    use serde_json::Value;
    use std::sync::Mutex;

    struct Named(&'static str, bool);

    #[async_trait]
    impl VariantStrategy for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn attempt(
            &self,
            _surface: &dyn ToolSurface,
            _variant_type: &str,
            _variant_value: &str,
            _timeout: Duration,
        ) -> VariantOutcome {
            if self.1 {
                VariantOutcome::ok(self.0, "picked")
            } else {
                VariantOutcome::failed(self.0, "no luck")
            }
        }
    }

    #[derive(Default)]
    struct Swatches {
        elements: Vec<ElementInfo>,
        clicks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolSurface for Swatches {
        fn catalog(&self) -> Vec<ToolSpec> {
            Vec::new()
        }
        async fn current_url(&self, _t: Duration) -> SurfaceResult<String> {
            Ok("https://shop.example.com/p/1".to_string())
        }
        async fn navigate(&self, _url: &str, _t: Duration) -> SurfaceResult<()> {
            Ok(())
        }
        async fn evaluate(&self, script_id: &str, _args: Value, _t: Duration) -> SurfaceResult<Value> {
            if script_id == SCRIPT_INTERACTIVE_ELEMENTS {
                Ok(serde_json::to_value(&self.elements).unwrap())
            } else {
                Err(SurfaceError::NotFound(script_id.to_string()))
            }
        }
        async fn click(&self, ref_id: &str, _t: Duration) -> SurfaceResult<()> {
            self.clicks.lock().unwrap().push(ref_id.to_string());
            Ok(())
        }
        async fn execute(&self, _a: &Action, _t: Duration) -> SurfaceResult<Observation> {
            Ok(Observation::ok(""))
        }
    }

    fn element(ref_id: &str, text: &str) -> ElementInfo {
        ElementInfo {
            ref_id: ref_id.to_string(),
            text: text.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    fn names(chain: &[Arc<dyn VariantStrategy>]) -> Vec<String> {
        chain.iter().map(|s| s.name().to_string()).collect()
    }

    #[test]
    fn test_longest_domain_wins_and_fallback_is_last() {
        let mut registry = VariantRegistry::new();
        registry.register("example.com", Arc::new(Named("broad", true)));
        registry.register("shop.example.com", Arc::new(Named("narrow", true)));

        assert_eq!(
            names(&registry.resolve("https://www.shop.example.com/p/1")),
            vec!["narrow", "generic"]
        );
        assert_eq!(
            names(&registry.resolve("https://blog.example.com/")),
            vec!["broad", "generic"]
        );
        assert_eq!(
            names(&registry.resolve("https://notexample.com/")),
            vec!["generic"]
        );
        assert_eq!(names(&registry.resolve("garbage")), vec!["generic"]);
    }

    #[test]
    fn test_register_replaces_same_domain() {
        let mut registry = VariantRegistry::new();
        registry.register("www.Shop.com", Arc::new(Named("old", true)));
        registry.register("shop.com", Arc::new(Named("new", true)));
        assert_eq!(
            names(&registry.resolve("https://shop.com/")),
            vec!["new", "generic"]
        );
    }

    #[tokio::test]
    async fn test_site_failure_falls_back_to_generic() {
        let mut registry = VariantRegistry::new();
        registry.register("shop.example.com", Arc::new(Named("site", false)));
        let surface = Swatches {
            elements: vec![element("s", "S"), element("m", "M"), element("xl", "XL")],
            ..Default::default()
        };

        let outcome = registry
            .select(&surface, "https://shop.example.com/p/1", "size", "m", Duration::from_secs(5))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.strategy, "generic");
        assert_eq!(*surface.clicks.lock().unwrap(), vec!["m".to_string()]);
    }

    #[tokio::test]
    async fn test_generic_prefers_exact_match() {
        let surface = Swatches {
            elements: vec![element("navy", "Navy Blue"), element("blue", "Blue")],
            ..Default::default()
        };
        let outcome = GenericVariantStrategy
            .attempt(&surface, "color", "blue", Duration::from_secs(5))
            .await;
        assert!(outcome.success);
        assert_eq!(*surface.clicks.lock().unwrap(), vec!["blue".to_string()]);
    }

    #[tokio::test]
    async fn test_all_strategies_failing_reports_each() {
        let mut registry = VariantRegistry::new();
        registry.register("shop.example.com", Arc::new(Named("site", false)));
        let surface = Swatches::default();

        let outcome = registry
            .select(&surface, "https://shop.example.com/p/1", "size", "XXL", Duration::from_secs(5))
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("site: no luck"));
        assert!(outcome.message.contains("generic: No size option matching 'XXL'"));

        let obs: Observation = outcome.into();
        assert!(!obs.success);
    }
}
