//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::{Callbacks, StateTransition},
    circuit::CircuitBreaker,
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    config::Config,
    errors::ConfigError,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration at once
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set how many recent outcomes the failure rate is computed over
    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    /// Set minimum number of recorded calls before the failure rate is evaluated
    pub fn minimum_calls(mut self, calls: usize) -> Self {
        self.config.minimum_calls = calls;
        self
    }

    /// Set the failure percentage (0-100) that opens the circuit
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn wait_duration_in_open(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open = wait;
        self
    }

    /// Set the number of probe calls per half-open trial
    pub fn half_open_permits(mut self, permits: usize) -> Self {
        self.config.half_open_permits = permits;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Set the time source; defaults to a `MonotonicClock`
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier used by `call` and `call_with_fallback`
    ///
    /// The classifier decides whether an error from the wrapped operation
    /// counts against the dependency. Use it to keep "expected" errors like
    /// validation failures or client errors (4xx) out of the failure rate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use callguard::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only slow errors count
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Observe every state change with its previous state and timestamp
    pub fn on_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.callbacks.on_transition = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        Ok(CircuitBreaker::assemble(
            self.name,
            self.config,
            clock,
            self.failure_classifier,
            self.callbacks,
        ))
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("failure_classifier", &self.failure_classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
