//! Circuit breaker configuration
//!
//! `Config` is the validated, immutable configuration a circuit is built
//! with. `BreakerSettings` is its file-facing form: every field optional,
//! layered over a base `Config` when loading a registry from TOML.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of most recent outcomes kept for the failure rate
    pub sliding_window_size: usize,

    /// Outcomes required in the window before the rate is evaluated
    pub minimum_calls: usize,

    /// Failure percentage (0-100) at or above which the circuit opens
    pub failure_rate_threshold: f64,

    /// Time spent Open before probes are let through; also the deadline
    /// after which an unreported probe slot is reclaimed
    pub wait_duration_in_open: Duration,

    /// Probe calls allowed per half-open trial; all must succeed to close
    pub half_open_permits: usize,

    /// Jitter factor for the open wait (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sliding_window_size: 100,
            minimum_calls: 10,
            failure_rate_threshold: 50.0,
            wait_duration_in_open: Duration::from_secs(60),
            half_open_permits: 3,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    /// Check every option, returning the first violated rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sliding_window_size == 0 {
            return Err(ConfigError::ZeroWindowSize);
        }
        if self.minimum_calls == 0 || self.minimum_calls > self.sliding_window_size {
            return Err(ConfigError::MinimumCallsOutOfRange {
                minimum_calls: self.minimum_calls,
                window_size: self.sliding_window_size,
            });
        }
        // contains() is false for NaN
        if !(0.0..=100.0).contains(&self.failure_rate_threshold) {
            return Err(ConfigError::FailureRateOutOfRange(
                self.failure_rate_threshold,
            ));
        }
        if self.wait_duration_in_open.is_zero() {
            return Err(ConfigError::ZeroWaitDuration);
        }
        if self.half_open_permits == 0 {
            return Err(ConfigError::ZeroHalfOpenPermits);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        Ok(())
    }
}

/// Partial configuration as written in a registry file
///
/// ```toml
/// [defaults]
/// sliding_window_size = 20
/// wait_duration_in_open_secs = 30.0
///
/// [breakers.payment_api]
/// failure_rate_threshold = 25.0
/// half_open_permits = 1
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerSettings {
    pub sliding_window_size: Option<usize>,
    pub minimum_calls: Option<usize>,
    pub failure_rate_threshold: Option<f64>,
    pub wait_duration_in_open_secs: Option<f64>,
    pub half_open_permits: Option<usize>,
    pub jitter_factor: Option<f64>,
}

impl BreakerSettings {
    /// Layer these settings over `base` and validate the result
    pub fn apply(&self, base: &Config) -> Result<Config, ConfigError> {
        let wait_duration_in_open = match self.wait_duration_in_open_secs {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| ConfigError::InvalidWaitDuration(secs))?,
            None => base.wait_duration_in_open,
        };

        let config = Config {
            sliding_window_size: self
                .sliding_window_size
                .unwrap_or(base.sliding_window_size),
            minimum_calls: self.minimum_calls.unwrap_or(base.minimum_calls),
            failure_rate_threshold: self
                .failure_rate_threshold
                .unwrap_or(base.failure_rate_threshold),
            wait_duration_in_open,
            half_open_permits: self.half_open_permits.unwrap_or(base.half_open_permits),
            jitter_factor: self.jitter_factor.unwrap_or(base.jitter_factor),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_minimum_calls_above_window_rejected() {
        let config = Config {
            sliding_window_size: 5,
            minimum_calls: 6,
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::MinimumCallsOutOfRange {
                minimum_calls: 6,
                window_size: 5,
            })
        );
    }

    #[test]
    fn test_each_rule_rejects_bad_values() {
        let cases = [
            (
                Config {
                    sliding_window_size: 0,
                    ..Default::default()
                },
                ConfigError::ZeroWindowSize,
            ),
            (
                Config {
                    failure_rate_threshold: -1.0,
                    ..Default::default()
                },
                ConfigError::FailureRateOutOfRange(-1.0),
            ),
            (
                Config {
                    failure_rate_threshold: 100.5,
                    ..Default::default()
                },
                ConfigError::FailureRateOutOfRange(100.5),
            ),
            (
                Config {
                    wait_duration_in_open: Duration::ZERO,
                    ..Default::default()
                },
                ConfigError::ZeroWaitDuration,
            ),
            (
                Config {
                    half_open_permits: 0,
                    ..Default::default()
                },
                ConfigError::ZeroHalfOpenPermits,
            ),
            (
                Config {
                    jitter_factor: 1.5,
                    ..Default::default()
                },
                ConfigError::JitterOutOfRange(1.5),
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let config = Config {
            failure_rate_threshold: f64::NAN,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::FailureRateOutOfRange(_))
        ));
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        for threshold in [0.0, 100.0] {
            let config = Config {
                failure_rate_threshold: threshold,
                ..Default::default()
            };
            assert_eq!(config.validate(), Ok(()), "threshold {threshold}");
        }
    }

    #[test]
    fn test_settings_layer_over_base() {
        let settings: BreakerSettings = toml::from_str(
            r#"
            minimum_calls = 5
            wait_duration_in_open_secs = 2.5
            "#,
        )
        .unwrap();

        let config = settings.apply(&Config::default()).unwrap();

        assert_eq!(config.minimum_calls, 5);
        assert_eq!(config.wait_duration_in_open, Duration::from_millis(2500));
        assert_eq!(config.sliding_window_size, 100);
        assert_eq!(config.half_open_permits, 3);
    }

    #[test]
    fn test_settings_negative_wait_rejected() {
        let settings = BreakerSettings {
            wait_duration_in_open_secs: Some(-1.0),
            ..Default::default()
        };

        assert_eq!(
            settings.apply(&Config::default()),
            Err(ConfigError::InvalidWaitDuration(-1.0))
        );
    }

    #[test]
    fn test_settings_unknown_field_rejected() {
        let parsed = toml::from_str::<BreakerSettings>("failure_threshold = 5");
        assert!(parsed.is_err());
    }
}
