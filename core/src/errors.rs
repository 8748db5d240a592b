//! Error types for circuit breaker construction and guarded calls

use crate::circuit::{Denial, DenialReason};
use std::time::Duration;
use thiserror::Error;

/// Invalid circuit configuration, reported before any call traffic
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sliding window size must be greater than 0")]
    ZeroWindowSize,

    #[error("minimum calls ({minimum_calls}) must be between 1 and the sliding window size ({window_size})")]
    MinimumCallsOutOfRange {
        minimum_calls: usize,
        window_size: usize,
    },

    #[error("failure rate threshold {0} must be within [0, 100]")]
    FailureRateOutOfRange(f64),

    #[error("wait duration in open must be greater than 0")]
    ZeroWaitDuration,

    #[error("wait duration of {0} seconds is not a valid duration")]
    InvalidWaitDuration(f64),

    #[error("half-open permits must be greater than 0")]
    ZeroHalfOpenPermits,

    #[error("jitter factor {0} must be within [0, 1]")]
    JitterOutOfRange(f64),
}

/// Errors returned by the guarded call helpers
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, calls are being rejected
    #[error("circuit '{circuit}' is open (opened at {opened_at:?})")]
    Open { circuit: String, opened_at: Duration },

    /// All probe slots of the current half-open trial are taken
    #[error("circuit '{circuit}' half-open probe limit reached")]
    HalfOpenLimitReached { circuit: String },

    /// The wrapped operation (or its fallback) failed
    #[error("circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the call was rejected without running the operation
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitError::Execution(_))
    }
}

impl<E> From<Denial> for CircuitError<E> {
    fn from(denial: Denial) -> Self {
        match denial.reason {
            DenialReason::Open => CircuitError::Open {
                circuit: denial.circuit,
                opened_at: denial.opened_at,
            },
            DenialReason::HalfOpenLimitReached => CircuitError::HalfOpenLimitReached {
                circuit: denial.circuit,
            },
        }
    }
}

/// Errors raised while building a registry from a configuration file
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse breaker configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid default breaker configuration: {0}")]
    InvalidDefaults(#[source] ConfigError),

    #[error("invalid configuration for breaker '{name}': {source}")]
    InvalidBreaker {
        name: String,
        #[source]
        source: ConfigError,
    },
}
