//! End-to-end walks through the breaker lifecycle

use callguard::{
    BreakerState, CircuitBreaker, DenialReason, ManualClock, Outcome, Permission, StateTransition,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
    clock: ManualClock,
    breaker: CircuitBreaker,
    transitions: Arc<Mutex<Vec<StateTransition>>>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = transitions.clone();

        let breaker = CircuitBreaker::builder("payment_api")
            .sliding_window_size(10)
            .minimum_calls(5)
            .failure_rate_threshold(50.0)
            .wait_duration_in_open(Duration::from_secs(30))
            .half_open_permits(3)
            .clock(Arc::new(clock.clone()))
            .on_transition(move |t| log.lock().unwrap().push(t.clone()))
            .build()
            .unwrap();

        Self {
            clock,
            breaker,
            transitions,
        }
    }

    fn feed(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            let permit = self.breaker.try_acquire().into_result().unwrap();
            self.breaker.record_outcome(permit, *outcome);
        }
    }

    fn hops(&self) -> Vec<(BreakerState, BreakerState)> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .map(|t| (t.from, t.to))
            .collect()
    }
}

use Outcome::{Failure, Success};

#[test]
fn test_trip_probe_and_recover() {
    let h = Harness::new();

    h.feed(&[Failure, Success, Failure, Success, Failure]);
    assert_eq!(h.breaker.state(), BreakerState::Open);

    match h.breaker.try_acquire() {
        Permission::Denied(denial) => assert_eq!(denial.reason, DenialReason::Open),
        other => panic!("expected denial, got {:?}", other),
    }

    h.clock.advance(Duration::from_secs(30));
    let first = h.breaker.try_acquire().into_result().expect("first probe");
    assert_eq!(h.breaker.state(), BreakerState::HalfOpen);

    let second = h.breaker.try_acquire().into_result().expect("second probe");
    let third = h.breaker.try_acquire().into_result().expect("third probe");
    match h.breaker.try_acquire() {
        Permission::Denied(denial) => {
            assert_eq!(denial.reason, DenialReason::HalfOpenLimitReached)
        }
        other => panic!("expected denial, got {:?}", other),
    }

    for permit in [first, second, third] {
        h.breaker.record_outcome(permit, Success);
    }

    assert_eq!(h.breaker.state(), BreakerState::Closed);
    assert_eq!(h.breaker.metrics().window_size, 0);
    assert_eq!(
        h.hops(),
        vec![
            (BreakerState::Closed, BreakerState::Open),
            (BreakerState::Open, BreakerState::HalfOpen),
            (BreakerState::HalfOpen, BreakerState::Closed),
        ]
    );
}

#[test]
fn test_failed_probe_reopens_and_straggler_is_ignored() {
    let h = Harness::new();

    h.feed(&[Failure, Failure, Failure, Success, Success]);
    assert_eq!(h.breaker.state(), BreakerState::Open);

    h.clock.advance(Duration::from_secs(30));
    let first = h.breaker.try_acquire().into_result().unwrap();
    let second = h.breaker.try_acquire().into_result().unwrap();
    let third = h.breaker.try_acquire().into_result().unwrap();

    h.breaker.record_outcome(first, Success);
    h.clock.advance(Duration::from_secs(2));
    h.breaker.record_outcome(second, Failure);
    assert_eq!(h.breaker.state(), BreakerState::Open);

    let reopened_at = h.transitions.lock().unwrap().last().unwrap().at;
    assert_eq!(reopened_at, Duration::from_secs(32));

    h.breaker.record_outcome(third, Success);
    assert_eq!(h.breaker.state(), BreakerState::Open);

    // Wait is measured from the reopen, not the original trip
    h.clock.advance(Duration::from_secs(29));
    assert!(!h.breaker.try_acquire().is_allowed());
    h.clock.advance(Duration::from_secs(1));
    assert!(h.breaker.try_acquire().is_allowed());

    assert_eq!(
        h.hops(),
        vec![
            (BreakerState::Closed, BreakerState::Open),
            (BreakerState::Open, BreakerState::HalfOpen),
            (BreakerState::HalfOpen, BreakerState::Open),
            (BreakerState::Open, BreakerState::HalfOpen),
        ]
    );
}

#[test]
fn test_next_acquire_after_threshold_observes_open() {
    let h = Harness::new();

    h.feed(&[Success, Success, Success, Success, Success]);
    h.feed(&[Failure, Failure, Failure, Failure]);
    assert_eq!(h.breaker.state(), BreakerState::Closed);

    // 5 failures out of 10
    h.feed(&[Failure]);
    assert!(!h.breaker.try_acquire().is_allowed());
}

#[test]
fn test_fallback_serves_degraded_response() {
    let h = Harness::new();
    h.feed(&[Failure; 5]);

    let mut calls = 0;
    let price = h.breaker.call_with_fallback(
        || {
            calls += 1;
            Ok::<_, String>(42)
        },
        |denial| {
            assert_eq!(denial.circuit, "payment_api");
            Ok(0)
        },
    );

    assert_eq!(price.unwrap(), 0);
    assert_eq!(calls, 0);
}
