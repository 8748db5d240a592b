//! callguard - in-process call guard for failing or slow dependencies
//!
//! This crate provides a circuit breaker built around a strict
//! acquire/record protocol:
//! - State machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Count-based sliding window for rolling failure rates
//! - Bounded half-open probing with reclaimable probe slots
//! - Monotonic, injectable clock so transitions are deterministic under test
//! - Keyed registry for one independent breaker per dependency
//!
//! # Example
//!
//! ```rust
//! use callguard::{CircuitBreaker, Outcome, Permission};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::builder("payment_api")
//!     .sliding_window_size(10)
//!     .minimum_calls(5)
//!     .failure_rate_threshold(50.0)
//!     .wait_duration_in_open(Duration::from_secs(30))
//!     .half_open_permits(3)
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .expect("valid configuration");
//!
//! match breaker.try_acquire() {
//!     Permission::Allowed(permit) => {
//!         // Call the dependency, then report what happened
//!         breaker.record_outcome(permit, Outcome::Success);
//!     }
//!     Permission::Denied(denial) => {
//!         println!("skipping call: {}", denial);
//!     }
//! }
//!
//! // Or let the breaker wrap a closure
//! let result = breaker.call(|| Ok::<_, String>("charged"));
//! assert!(result.is_ok());
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod errors;
pub mod registry;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::StateTransition;
pub use circuit::{
    BreakerState, CircuitBreaker, CircuitMetrics, Denial, DenialReason, Permission, Permit,
};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BreakerSettings, Config};
pub use errors::{CircuitError, ConfigError, RegistryError};
pub use registry::BreakerRegistry;
pub use window::SlidingWindow;

/// Result of a protected call, as reported by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        self == Outcome::Failure
    }
}
