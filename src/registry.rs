//! Registry of named breakers, the composition root for circuits.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::breaker::Breaker;
use crate::circuit::Circuit;
use crate::clock::{Clock, SystemClock};
use crate::config::{BreakerConfig, RegistryConfig};
use crate::fallback::Fallback;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::state::State;

/// Owns one [`Breaker`] per circuit name.
///
/// Breakers are created on first reference and live as long as the registry.
/// Build one registry at start-up and hand it (or an `Arc` of it) to whatever
/// needs circuits.
pub struct CircuitRegistry {
    defaults: BreakerConfig,
    overrides: AHashMap<String, BreakerConfig>,
    breakers: RwLock<AHashMap<String, Arc<Breaker>>>,
    clock: Arc<dyn Clock>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitRegistry {
    /// Creates a registry whose breakers use `defaults`.
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: AHashMap::new(),
            breakers: RwLock::new(AHashMap::new()),
            clock: Arc::new(SystemClock),
            metric_sink: Arc::new(NullMetricSink),
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    /// Creates a registry from loaded configuration.
    pub fn from_config(config: RegistryConfig) -> Self {
        let mut registry = Self::new(config.defaults);
        registry.overrides = config.circuits;
        registry
    }

    /// Sets the clock handed to every breaker.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the metric sink shared by every breaker.
    pub fn with_metric_sink<M: MetricSink>(self, sink: M) -> Self {
        self.with_shared_metric_sink(Arc::new(sink))
    }

    /// Sets an already shared metric sink.
    pub fn with_shared_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Sets the hooks shared by every breaker.
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Overrides the configuration of one circuit name.
    pub fn configure(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<Breaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(name.to_owned()).or_insert_with(|| {
            let config = self.overrides.get(name).unwrap_or(&self.defaults).clone();
            info!(circuit = %name, "circuit registered");
            Arc::new(
                Breaker::builder(name)
                    .config(config)
                    .clock(Arc::clone(&self.clock))
                    .shared_metric_sink(Arc::clone(&self.metric_sink))
                    .hooks(Arc::clone(&self.hooks))
                    .build(),
            )
        });
        Arc::clone(breaker)
    }

    /// The breaker for `name`, if it was already created.
    pub fn get(&self, name: &str) -> Option<Arc<Breaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Builds a circuit over the shared breaker `name`, falling back to `T::default()`.
    pub fn build_circuit<T, E>(&self, name: &str, metrics_key: &str) -> Circuit<T, E>
    where
        T: Default + Send + 'static,
        E: Send + 'static,
    {
        Circuit::new(self.breaker(name), metrics_key)
    }

    /// Builds a circuit over the shared breaker `name` with an explicit fallback.
    pub fn build_circuit_with<T, E, F>(
        &self,
        name: &str,
        metrics_key: &str,
        fallback: F,
    ) -> Circuit<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fallback<T, E> + 'static,
    {
        Circuit::with_fallback(self.breaker(name), metrics_key, fallback)
    }

    /// Current state of every created breaker, sorted by name.
    pub fn states(&self) -> Vec<(String, State)> {
        let mut states: Vec<_> = self
            .breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Names of every created breaker, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of created breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// True when no breaker was created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn same_name_shares_one_breaker() {
        let registry = CircuitRegistry::default();
        let a = registry.breaker("get-categories");
        let b = registry.breaker("get-categories");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        registry.breaker("get-products");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn overrides_apply_per_name() {
        let strict = BreakerConfig::builder()
            .sliding_window_size(10)
            .open_state_delay(Duration::from_secs(1))
            .build()
            .unwrap();
        let registry = CircuitRegistry::default().configure("auth-login", strict.clone());

        assert_eq!(registry.breaker("auth-login").config(), &strict);
        assert_eq!(
            registry.breaker("get-categories").config(),
            &BreakerConfig::default()
        );
    }

    #[test]
    fn states_are_sorted_by_name() {
        let registry = CircuitRegistry::default();
        assert!(registry.is_empty());
        registry.breaker("b");
        registry.breaker("a");
        registry.breaker("b").force_open();

        assert_eq!(
            registry.states(),
            vec![("a".to_string(), State::Closed), ("b".to_string(), State::Open)]
        );
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn loads_overrides_from_toml() {
        let config = RegistryConfig::from_toml_str(
            "[circuits.delete-category]\nopenStateDelay = 500\n",
        )
        .unwrap();
        let registry = CircuitRegistry::from_config(config);
        assert_eq!(
            registry.breaker("delete-category").config().open_state_delay(),
            Duration::from_millis(500)
        );
    }
}
