//! Breaker configuration: validated builder, serde settings and registry files.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Immutable breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub(crate) sliding_window_size: usize,
    pub(crate) minimum_number_of_calls: usize,
    pub(crate) failure_rate_threshold: f64,
    pub(crate) slow_call_duration_threshold: Duration,
    pub(crate) slow_call_rate_threshold: f64,
    pub(crate) permitted_number_of_calls_in_half_open_state: usize,
    pub(crate) open_state_delay: Duration,
    pub(crate) half_open_state_max_delay: Option<Duration>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            sliding_window_size: 6,
            minimum_number_of_calls: 3,
            failure_rate_threshold: 60.0,
            slow_call_duration_threshold: Duration::from_millis(500),
            slow_call_rate_threshold: 50.0,
            permitted_number_of_calls_in_half_open_state: 2,
            open_state_delay: Duration::from_secs(10),
            half_open_state_max_delay: Some(Duration::from_secs(30)),
        }
    }
}

impl BreakerConfig {
    /// Creates a builder seeded with the defaults.
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }

    /// Number of outcomes kept in the sliding window.
    pub fn sliding_window_size(&self) -> usize {
        self.sliding_window_size
    }

    /// Outcomes required before rates are evaluated.
    pub fn minimum_number_of_calls(&self) -> usize {
        self.minimum_number_of_calls
    }

    /// Failure percentage that opens the breaker.
    pub fn failure_rate_threshold(&self) -> f64 {
        self.failure_rate_threshold
    }

    /// Duration above which a call counts as slow.
    pub fn slow_call_duration_threshold(&self) -> Duration {
        self.slow_call_duration_threshold
    }

    /// Slow-call percentage that opens the breaker.
    pub fn slow_call_rate_threshold(&self) -> f64 {
        self.slow_call_rate_threshold
    }

    /// Trial calls admitted while half-open.
    pub fn permitted_number_of_calls_in_half_open_state(&self) -> usize {
        self.permitted_number_of_calls_in_half_open_state
    }

    /// Time spent open before trial calls are admitted.
    pub fn open_state_delay(&self) -> Duration {
        self.open_state_delay
    }

    /// Longest time the breaker may stay half-open, if limited.
    pub fn half_open_state_max_delay(&self) -> Option<Duration> {
        self.half_open_state_max_delay
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sliding_window_size == 0 {
            return Err(invalid("slidingWindowSize", "must be at least 1"));
        }
        if self.minimum_number_of_calls == 0
            || self.minimum_number_of_calls > self.sliding_window_size
        {
            return Err(invalid(
                "minimumNumberOfCalls",
                format!("must be between 1 and {}", self.sliding_window_size),
            ));
        }
        check_percentage("failureRateThreshold", self.failure_rate_threshold)?;
        check_percentage("slowCallRateThreshold", self.slow_call_rate_threshold)?;
        let permitted = self.permitted_number_of_calls_in_half_open_state;
        if permitted == 0 || permitted > self.sliding_window_size {
            return Err(invalid(
                "permittedNumberOfCallsInHalfOpenState",
                format!("must be between 1 and {}", self.sliding_window_size),
            ));
        }
        if self.half_open_state_max_delay == Some(Duration::ZERO) {
            return Err(invalid(
                "halfOpenStateMaxDelay",
                "must be positive, use no limit instead of zero",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_percentage(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value <= 0.0 || value > 100.0 {
        return Err(invalid(field, format!("{value} is not in (0, 100]")));
    }
    Ok(())
}

/// Builder for [`BreakerConfig`].
#[derive(Debug, Clone, Default)]
pub struct BreakerConfigBuilder {
    config: BreakerConfig,
}

impl BreakerConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many recent outcomes the window keeps.
    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    /// Sets how many outcomes must be recorded before rates are evaluated.
    pub fn minimum_number_of_calls(mut self, calls: usize) -> Self {
        self.config.minimum_number_of_calls = calls;
        self
    }

    /// Sets the failure percentage that trips the breaker.
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Sets the duration above which a call is slow.
    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    /// Sets the slow-call percentage that trips the breaker.
    pub fn slow_call_rate_threshold(mut self, percent: f64) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Sets the number of trial calls admitted while half-open.
    pub fn permitted_number_of_calls_in_half_open_state(mut self, calls: usize) -> Self {
        self.config.permitted_number_of_calls_in_half_open_state = calls;
        self
    }

    /// Sets the cool-down before an open breaker admits trial calls.
    pub fn open_state_delay(mut self, delay: Duration) -> Self {
        self.config.open_state_delay = delay;
        self
    }

    /// Limits how long the breaker may stay half-open. `None` removes the limit.
    pub fn half_open_state_max_delay(mut self, delay: Option<Duration>) -> Self {
        self.config.half_open_state_max_delay = delay;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<BreakerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Serializable form of [`BreakerConfig`], durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BreakerSettings {
    /// Outcomes kept in the window.
    pub sliding_window_size: usize,
    /// Outcomes required before evaluation.
    pub minimum_number_of_calls: usize,
    /// Failure percentage that trips.
    pub failure_rate_threshold: f64,
    /// Slow-call threshold in milliseconds.
    pub slow_call_duration_threshold: u64,
    /// Slow-call percentage that trips.
    pub slow_call_rate_threshold: f64,
    /// Trial calls while half-open.
    pub permitted_number_of_calls_in_half_open_state: usize,
    /// Open cool-down in milliseconds.
    pub open_state_delay: u64,
    /// Half-open limit in milliseconds, 0 for none.
    pub half_open_state_max_delay: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for BreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            sliding_window_size: config.sliding_window_size,
            minimum_number_of_calls: config.minimum_number_of_calls,
            failure_rate_threshold: config.failure_rate_threshold,
            slow_call_duration_threshold: millis(config.slow_call_duration_threshold),
            slow_call_rate_threshold: config.slow_call_rate_threshold,
            permitted_number_of_calls_in_half_open_state: config
                .permitted_number_of_calls_in_half_open_state,
            open_state_delay: millis(config.open_state_delay),
            half_open_state_max_delay: config.half_open_state_max_delay.map_or(0, millis),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TryFrom<BreakerSettings> for BreakerConfig {
    type Error = ConfigError;

    fn try_from(settings: BreakerSettings) -> Result<Self, Self::Error> {
        let max_delay = match settings.half_open_state_max_delay {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        BreakerConfig::builder()
            .sliding_window_size(settings.sliding_window_size)
            .minimum_number_of_calls(settings.minimum_number_of_calls)
            .failure_rate_threshold(settings.failure_rate_threshold)
            .slow_call_duration_threshold(Duration::from_millis(
                settings.slow_call_duration_threshold,
            ))
            .slow_call_rate_threshold(settings.slow_call_rate_threshold)
            .permitted_number_of_calls_in_half_open_state(
                settings.permitted_number_of_calls_in_half_open_state,
            )
            .open_state_delay(Duration::from_millis(settings.open_state_delay))
            .half_open_state_max_delay(max_delay)
            .build()
    }
}

/// Breaker settings for a whole registry: shared defaults and per-circuit overrides.
///
/// ```toml
/// [defaults]
/// slidingWindowSize = 6
/// openStateDelay = 10000
///
/// [circuits.get-categories]
/// failureRateThreshold = 50
/// ```
///
/// Fields missing from a circuit table fall back to `[defaults]`, then to the
/// built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub(crate) defaults: BreakerConfig,
    pub(crate) circuits: AHashMap<String, BreakerConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistryConfig {
    #[serde(default)]
    defaults: toml::Table,
    #[serde(default)]
    circuits: HashMap<String, toml::Table>,
}

impl RegistryConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let raw: RawRegistryConfig = toml::from_str(source)?;

        let defaults = settings_from(raw.defaults.clone())?;
        let mut circuits = AHashMap::with_capacity(raw.circuits.len());
        for (name, table) in raw.circuits {
            let mut merged = raw.defaults.clone();
            merged.extend(table);
            circuits.insert(name, settings_from(merged)?);
        }

        Ok(Self { defaults, circuits })
    }

    /// Configuration applied to circuits without an override.
    pub fn defaults(&self) -> &BreakerConfig {
        &self.defaults
    }

    /// Override for `name`, if any.
    pub fn circuit(&self, name: &str) -> Option<&BreakerConfig> {
        self.circuits.get(name)
    }
}

fn settings_from(table: toml::Table) -> Result<BreakerConfig, ConfigError> {
    let settings: BreakerSettings = toml::Value::Table(table).try_into()?;
    BreakerConfig::try_from(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BreakerConfig::builder().build().unwrap();
        assert_eq!(config, BreakerConfig::default());
        assert_eq!(config.sliding_window_size(), 6);
        assert_eq!(config.minimum_number_of_calls(), 3);
        assert_eq!(config.open_state_delay(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_minimum_above_window() {
        let err = BreakerConfig::builder()
            .sliding_window_size(4)
            .minimum_number_of_calls(5)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "minimumNumberOfCalls",
                ..
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_percentages() {
        for bad in [0.0, -5.0, 100.5, f64::NAN] {
            let result = BreakerConfig::builder().failure_rate_threshold(bad).build();
            assert!(result.is_err(), "{bad} accepted");
        }
        assert!(BreakerConfig::builder()
            .slow_call_rate_threshold(100.0)
            .build()
            .is_ok());
    }

    #[test]
    fn rejects_zero_half_open_calls() {
        let result = BreakerConfig::builder()
            .permitted_number_of_calls_in_half_open_state(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn settings_round_trip_through_config() {
        let config = BreakerConfig::builder()
            .half_open_state_max_delay(None)
            .build()
            .unwrap();
        let settings = BreakerSettings::from(&config);
        assert_eq!(settings.half_open_state_max_delay, 0);
        assert_eq!(BreakerConfig::try_from(settings).unwrap(), config);
    }

    #[test]
    fn registry_toml_merges_defaults_into_circuits() {
        let config = RegistryConfig::from_toml_str(
            r#"
            [defaults]
            slidingWindowSize = 10
            minimumNumberOfCalls = 5
            openStateDelay = 2000

            [circuits.get-categories]
            failureRateThreshold = 50.0
            halfOpenStateMaxDelay = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.defaults().sliding_window_size(), 10);
        assert_eq!(config.defaults().failure_rate_threshold(), 60.0);

        let circuit = config.circuit("get-categories").unwrap();
        assert_eq!(circuit.sliding_window_size(), 10);
        assert_eq!(circuit.minimum_number_of_calls(), 5);
        assert_eq!(circuit.failure_rate_threshold(), 50.0);
        assert_eq!(circuit.open_state_delay(), Duration::from_secs(2));
        assert_eq!(circuit.half_open_state_max_delay(), None);
        assert!(config.circuit("unknown").is_none());
    }

    #[test]
    fn registry_toml_reports_unknown_fields() {
        let err = RegistryConfig::from_toml_str("[defaults]\nwindow = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn registry_toml_validates_values() {
        let err = RegistryConfig::from_toml_str("[circuits.a]\nslidingWindowSize = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
