//! Failure classification for the guarded call helpers
//!
//! The circuit itself only ever sees `Outcome`s. When a caller lets
//! `CircuitBreaker::call` run an operation, a classifier decides how an
//! error from that operation is reported: as a `Failure`, or as a `Success`
//! for errors that say nothing about the dependency's health.

use crate::Outcome;
use std::any::Any;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// How long the failed call ran
    pub duration: Duration,
}

/// Decides which outcome an operation error is reported as
///
/// # Examples
///
/// ```rust
/// use callguard::{FailureClassifier, FailureContext, Outcome};
///
/// #[derive(Debug)]
/// struct HttpStatus(u16);
///
/// #[derive(Debug)]
/// struct ServerErrorsOnly;
///
/// impl FailureClassifier for ServerErrorsOnly {
///     fn classify(&self, ctx: &FailureContext<'_>) -> Outcome {
///         match ctx.error.downcast_ref::<HttpStatus>() {
///             Some(HttpStatus(code)) if *code < 500 => Outcome::Success,
///             _ => Outcome::Failure,
///         }
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    fn classify(&self, ctx: &FailureContext<'_>) -> Outcome;
}

/// Reports every error as a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, _ctx: &FailureContext<'_>) -> Outcome {
        Outcome::Failure
    }
}

/// Closure-backed classifier; the predicate returns `true` for errors that
/// count against the dependency
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn classify(&self, ctx: &FailureContext<'_>) -> Outcome {
        if (self.predicate)(ctx) {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier").finish_non_exhaustive()
    }
}
