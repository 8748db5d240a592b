//! Callback system for circuit breaker state transitions
//!
//! Callbacks run after the circuit's critical section has been released, so
//! a callback may safely query or drive the same circuit.

use crate::circuit::BreakerState;
use std::sync::Arc;
use std::time::Duration;

/// A single state change, as delivered to transition observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub circuit: String,
    pub from: BreakerState,
    pub to: BreakerState,
    /// Monotonic time of the change, on the circuit's clock
    pub at: Duration,
}

pub type StateHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type TransitionHook = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Callbacks for circuit breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<StateHook>,
    pub on_close: Option<StateHook>,
    pub on_half_open: Option<StateHook>,
    pub on_transition: Option<TransitionHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the entry hook for the new state, then the transition observer
    pub fn notify(&self, transition: &StateTransition) {
        let hook = match transition.to {
            BreakerState::Open => &self.on_open,
            BreakerState::Closed => &self.on_close,
            BreakerState::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = hook {
            callback(&transition.circuit);
        }

        if let Some(observer) = &self.on_transition {
            observer(transition);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_transition", &self.on_transition.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn transition(to: BreakerState) -> StateTransition {
        StateTransition {
            circuit: "inventory".to_string(),
            from: BreakerState::Closed,
            to,
            at: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_notify_routes_by_target_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut callbacks = Callbacks::new();
        let open_log = seen.clone();
        callbacks.on_open = Some(Arc::new(move |name: &str| {
            open_log.lock().unwrap().push(format!("open:{name}"));
        }));
        let close_log = seen.clone();
        callbacks.on_close = Some(Arc::new(move |name: &str| {
            close_log.lock().unwrap().push(format!("close:{name}"));
        }));

        callbacks.notify(&transition(BreakerState::Open));
        callbacks.notify(&transition(BreakerState::HalfOpen));
        callbacks.notify(&transition(BreakerState::Closed));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["open:inventory".to_string(), "close:inventory".to_string()]
        );
    }

    #[test]
    fn test_transition_observer_sees_every_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        let callbacks = Callbacks {
            on_transition: Some(Arc::new(move |t: &StateTransition| {
                log.lock().unwrap().push((t.from, t.to, t.at));
            })),
            ..Callbacks::new()
        };

        callbacks.notify(&transition(BreakerState::Open));
        callbacks.notify(&transition(BreakerState::HalfOpen));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            (BreakerState::Closed, BreakerState::HalfOpen, Duration::from_secs(1))
        );
    }
}
