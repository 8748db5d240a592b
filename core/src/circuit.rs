//! Circuit breaker implementation using state machines
//!
//! A circuit answers two questions for its caller: may I call the
//! dependency now (`try_acquire`), and how did that call go
//! (`record_outcome`). Both run under one mutex per circuit, and neither
//! ever blocks on the protected operation.

use crate::{
    Outcome,
    callbacks::{Callbacks, StateTransition},
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    config::Config,
    errors::{CircuitError, ConfigError},
    window::SlidingWindow,
};
use state_machines::state_machine;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Observable circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }

    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => BreakerState::Open,
            "HalfOpen" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The circuit is open and its wait has not elapsed
    Open,
    /// Every probe slot of the current half-open trial is in use
    HalfOpenLimitReached,
}

/// Details handed to the caller (and its fallback) when a call is refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub circuit: String,
    pub reason: DenialReason,
    /// When the circuit last opened, on the circuit's clock
    pub opened_at: Duration,
    /// Remaining wait before probes are allowed; `None` while half-open
    pub retry_after: Option<Duration>,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reason, self.retry_after) {
            (DenialReason::Open, Some(wait)) => write!(
                f,
                "circuit '{}' is open, retry in {:?}",
                self.circuit, wait
            ),
            (DenialReason::Open, None) => write!(f, "circuit '{}' is open", self.circuit),
            (DenialReason::HalfOpenLimitReached, _) => write!(
                f,
                "circuit '{}' is half-open and all probe slots are taken",
                self.circuit
            ),
        }
    }
}

/// Proof that a call was allowed; hand it back to `record_outcome`
///
/// Permits cannot be cloned, so one permission yields at most one report.
#[must_use = "an allowed call must report its outcome"]
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    breaker: u64,
    id: u64,
    probe: bool,
}

impl Permit {
    /// True when this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Answer from `try_acquire`
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum Permission {
    Allowed(Permit),
    Denied(Denial),
}

impl Permission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Permission::Allowed(_))
    }

    pub fn into_result(self) -> Result<Permit, Denial> {
        match self {
            Permission::Allowed(permit) => Ok(permit),
            Permission::Denied(denial) => Err(denial),
        }
    }
}

/// Point-in-time view of a circuit's counters
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: BreakerState,
    pub window_size: usize,
    pub window_failures: usize,
    pub failure_rate: f64,
    pub probes_in_flight: usize,
    pub probe_successes: usize,
}

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub window: Arc<Mutex<SlidingWindow>>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        let config = Config::default();
        Self {
            name: String::new(),
            window: Arc::new(Mutex::new(SlidingWindow::new(config.sliding_window_size))),
            clock: Arc::new(MonotonicClock::new()),
            config,
        }
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Duration,
    /// Wait for this trip, after jitter
    pub wait: Duration,
}

/// A probe that has been let through and not yet reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSlot {
    pub permit: u64,
    pub deadline: Duration,
}

/// Data specific to the HalfOpen state: the tally for one trial
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub trial: u64,
    pub opened_at: Duration,
    pub in_flight: Vec<ProbeSlot>,
    pub successes: usize,
    pub failed: bool,
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        force_trip {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [wait_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Failure rate at or above threshold over at least `minimum_calls`
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let window = lock(&ctx.window);
        window.size() >= ctx.config.minimum_calls
            && window.failure_rate() >= ctx.config.failure_rate_threshold
    }
}

impl Circuit<HalfOpen> {
    /// A single failed probe reopens the circuit
    fn should_open(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open().is_some_and(|data| data.failed)
    }

    /// Every probe of the trial reported success
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open().is_some_and(|data| {
            !data.failed && data.successes >= ctx.config.half_open_permits
        })
    }
}

impl Circuit<Open> {
    fn wait_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open().is_some_and(|data| {
            ctx.clock.monotonic_time().saturating_sub(data.opened_at) >= data.wait
        })
    }
}

// Tags permits with the breaker instance that issued them
static NEXT_BREAKER_ID: AtomicU64 = AtomicU64::new(0);

// Scale for the jitter policy, so the factor survives sub-millisecond waits
const JITTER_SCALE_MS: u64 = 1_000_000;

/// Everything mutated under the circuit's lock
struct BreakerCore {
    machine: DynamicCircuit,
    breaker: u64,
    next_permit: u64,
    next_trial: u64,
}

impl BreakerCore {
    fn state(&self) -> BreakerState {
        BreakerState::from_machine(self.machine.current_state())
    }

    fn issue(&mut self, probe: bool) -> Permit {
        let id = self.next_permit;
        self.next_permit += 1;
        Permit {
            breaker: self.breaker,
            id,
            probe,
        }
    }
}

/// Circuit breaker public API
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct CircuitBreaker {
    core: Mutex<BreakerCore>,
    context: CircuitContext,
    classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBreaker {
    /// Create a circuit with default clock and no callbacks (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        Self::builder(name).config(config).build()
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Assemble a circuit from an already validated configuration
    pub(crate) fn assemble(
        name: String,
        config: Config,
        clock: Arc<dyn Clock>,
        classifier: Option<Arc<dyn FailureClassifier>>,
        callbacks: Callbacks,
    ) -> Self {
        let window = Arc::new(Mutex::new(SlidingWindow::new(config.sliding_window_size)));
        let context = CircuitContext {
            name,
            config,
            clock,
            window,
        };

        let core = BreakerCore {
            machine: DynamicCircuit::new(context.clone()),
            breaker: NEXT_BREAKER_ID.fetch_add(1, Ordering::Relaxed),
            next_permit: 0,
            next_trial: 0,
        };

        Self {
            core: Mutex::new(core),
            context,
            classifier,
            callbacks,
        }
    }

    /// Ask whether a call may go to the dependency now
    ///
    /// Never blocks and never fails. An open circuit whose wait has elapsed
    /// moves to HalfOpen here, and this call becomes the trial's first probe.
    pub fn try_acquire(&self) -> Permission {
        let (permission, transition) = {
            let mut core = self.lock_core();
            let now = self.now();
            let mut transition = None;

            if core.state() == BreakerState::Open {
                let opened_at = core.machine.open_data().map(|d| d.opened_at);
                if core.machine.handle(CircuitEvent::AttemptReset).is_ok() {
                    transition = Some(self.begin_trial(&mut core, opened_at, now));
                }
            }

            let permission = match core.state() {
                BreakerState::Closed => Permission::Allowed(core.issue(false)),
                BreakerState::Open => Permission::Denied(self.open_denial(&core, now)),
                BreakerState::HalfOpen => self.acquire_probe(&mut core, now),
            };
            (permission, transition)
        };

        if let Permission::Denied(denial) = &permission {
            debug!(circuit = %self.context.name, reason = ?denial.reason, "call denied");
        }
        self.notify(transition);
        permission
    }

    /// Report how an allowed call went
    ///
    /// Call exactly once per allowed permission, after the operation
    /// completes; a timed-out operation is a `Failure`. Reports that no
    /// longer match the circuit's phase are logged and ignored.
    pub fn record_outcome(&self, permit: Permit, outcome: Outcome) {
        let transition = {
            let mut core = self.lock_core();
            let now = self.now();

            if permit.breaker != core.breaker {
                error!(
                    circuit = %self.context.name,
                    permit = permit.id,
                    ?outcome,
                    "outcome reported with a permit from another circuit; ignoring"
                );
                return;
            }

            match core.state() {
                BreakerState::Closed => self.record_closed(&mut core, permit, outcome, now),
                BreakerState::HalfOpen => self.record_probe(&mut core, permit, outcome, now),
                BreakerState::Open => {
                    error!(
                        circuit = %self.context.name,
                        permit = permit.id,
                        ?outcome,
                        "outcome reported while circuit is open; ignoring"
                    );
                    None
                }
            }
        };

        self.notify(transition);
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Denied calls return `CircuitError::Open` or
    /// `CircuitError::HalfOpenLimitReached` without running `f`.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        match self.try_acquire() {
            Permission::Allowed(permit) => self.run_guarded(permit, f),
            Permission::Denied(denial) => Err(denial.into()),
        }
    }

    /// Like `call`, but a denied call runs `fallback` instead
    ///
    /// The fallback is the caller's substitute result; its error, if any,
    /// comes back as `CircuitError::Execution`.
    pub fn call_with_fallback<T, E, F, G>(&self, f: F, fallback: G) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        G: FnOnce(&Denial) -> Result<T, E>,
        E: 'static,
    {
        match self.try_acquire() {
            Permission::Allowed(permit) => self.run_guarded(permit, f),
            Permission::Denied(denial) => fallback(&denial).map_err(CircuitError::Execution),
        }
    }

    /// Force Closed with an empty window, abandoning any trial
    pub fn reset(&self) {
        let transition = {
            let mut core = self.lock_core();
            let from = core.state();

            core.machine = DynamicCircuit::new(self.context.clone());
            lock(&self.context.window).clear();

            (from != BreakerState::Closed).then(|| {
                info!(circuit = %self.context.name, from = %from, "circuit reset");
                self.transition(from, BreakerState::Closed, self.now())
            })
        };

        self.notify(transition);
    }

    /// Open the circuit now, regardless of the window
    pub fn force_open(&self) {
        let transition = {
            let mut core = self.lock_core();
            let from = core.state();

            if from != BreakerState::Open && core.machine.handle(CircuitEvent::ForceTrip).is_ok() {
                Some(self.mark_open(&mut core, from, self.now()))
            } else {
                None
            }
        };

        self.notify(transition);
    }

    pub fn state(&self) -> BreakerState {
        self.lock_core().state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == BreakerState::HalfOpen
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// The configuration this circuit was built with; never changes
    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let core = self.lock_core();
        let window = lock(&self.context.window);
        let trial = core.machine.half_open_data();

        CircuitMetrics {
            state: core.state(),
            window_size: window.size(),
            window_failures: window.failures(),
            failure_rate: window.failure_rate(),
            probes_in_flight: trial.map_or(0, |d| d.in_flight.len()),
            probe_successes: trial.map_or(0, |d| d.successes),
        }
    }

    fn run_guarded<T, E, F>(&self, permit: Permit, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let start = self.now();

        match f() {
            Ok(value) => {
                self.record_outcome(permit, Outcome::Success);
                Ok(value)
            }
            Err(e) => {
                let outcome = match &self.classifier {
                    Some(classifier) => classifier.classify(&FailureContext {
                        circuit_name: &self.context.name,
                        error: &e,
                        duration: self.now().saturating_sub(start),
                    }),
                    None => Outcome::Failure,
                };
                self.record_outcome(permit, outcome);
                Err(CircuitError::Execution(e))
            }
        }
    }

    fn record_closed(
        &self,
        core: &mut BreakerCore,
        permit: Permit,
        outcome: Outcome,
        now: Duration,
    ) -> Option<StateTransition> {
        if permit.probe {
            warn!(
                circuit = %self.context.name,
                permit = permit.id,
                "probe outcome reported after its trial ended; ignoring"
            );
            return None;
        }

        lock(&self.context.window).record(outcome);

        if core.machine.handle(CircuitEvent::Trip).is_ok() {
            Some(self.mark_open(core, BreakerState::Closed, now))
        } else {
            None
        }
    }

    fn record_probe(
        &self,
        core: &mut BreakerCore,
        permit: Permit,
        outcome: Outcome,
        now: Duration,
    ) -> Option<StateTransition> {
        let data = core.machine.half_open_data_mut()?;

        let Some(slot) = data.in_flight.iter().position(|s| s.permit == permit.id) else {
            warn!(
                circuit = %self.context.name,
                permit = permit.id,
                trial = data.trial,
                "outcome does not match an in-flight probe; ignoring"
            );
            return None;
        };
        data.in_flight.swap_remove(slot);

        match outcome {
            Outcome::Success => {
                data.successes += 1;
                if core.machine.handle(CircuitEvent::Close).is_ok() {
                    lock(&self.context.window).clear();
                    info!(circuit = %self.context.name, "all probes succeeded, circuit closed");
                    Some(self.transition(BreakerState::HalfOpen, BreakerState::Closed, now))
                } else {
                    None
                }
            }
            Outcome::Failure => {
                data.failed = true;
                if core.machine.handle(CircuitEvent::Trip).is_ok() {
                    Some(self.mark_open(core, BreakerState::HalfOpen, now))
                } else {
                    None
                }
            }
        }
    }

    fn acquire_probe(&self, core: &mut BreakerCore, now: Duration) -> Permission {
        let id = core.next_permit;
        let permits = self.context.config.half_open_permits;
        let deadline = now.saturating_add(self.context.config.wait_duration_in_open);

        let Some(data) = core.machine.half_open_data_mut() else {
            return Permission::Denied(self.half_open_denial(Duration::ZERO));
        };

        let before = data.in_flight.len();
        data.in_flight.retain(|slot| slot.deadline > now);
        let reclaimed = before - data.in_flight.len();
        if reclaimed > 0 {
            warn!(
                circuit = %self.context.name,
                trial = data.trial,
                reclaimed,
                "reclaimed probe slots that were never reported"
            );
        }

        if data.in_flight.len() + data.successes >= permits {
            return Permission::Denied(self.half_open_denial(data.opened_at));
        }

        data.in_flight.push(ProbeSlot {
            permit: id,
            deadline,
        });
        core.next_permit += 1;
        Permission::Allowed(Permit {
            breaker: core.breaker,
            id,
            probe: true,
        })
    }

    /// HalfOpen bookkeeping after a successful attempt_reset
    fn begin_trial(
        &self,
        core: &mut BreakerCore,
        opened_at: Option<Duration>,
        now: Duration,
    ) -> StateTransition {
        let trial = core.next_trial;
        core.next_trial += 1;

        if let Some(data) = core.machine.half_open_data_mut() {
            data.trial = trial;
            data.opened_at = opened_at.unwrap_or_default();
        }

        info!(circuit = %self.context.name, trial, "wait elapsed, circuit half-open");
        self.transition(BreakerState::Open, BreakerState::HalfOpen, now)
    }

    /// Apply Open-state bookkeeping (timestamp + jittered wait)
    fn mark_open(
        &self,
        core: &mut BreakerCore,
        from: BreakerState,
        now: Duration,
    ) -> StateTransition {
        let wait = self.open_wait();
        if let Some(data) = core.machine.open_data_mut() {
            data.opened_at = now;
            data.wait = wait;
        }

        info!(
            circuit = %self.context.name,
            from = %from,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "circuit opened"
        );
        self.transition(from, BreakerState::Open, now)
    }

    fn open_wait(&self) -> Duration {
        let config = &self.context.config;
        if config.jitter_factor <= 0.0 {
            return config.wait_duration_in_open;
        }

        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: JITTER_SCALE_MS,
            multiplier: 1.0,
            max_delay_ms: JITTER_SCALE_MS,
        };
        let scale = policy.calculate_delay(1, config.jitter_factor) as f64 / JITTER_SCALE_MS as f64;

        let wait = config.wait_duration_in_open;
        Duration::try_from_secs_f64(wait.as_secs_f64() * scale.clamp(0.0, 1.0))
            .map_or(wait, |jittered| jittered.min(wait))
    }

    fn open_denial(&self, core: &BreakerCore, now: Duration) -> Denial {
        let (opened_at, wait) = core
            .machine
            .open_data()
            .map(|d| (d.opened_at, d.wait))
            .unwrap_or_default();

        Denial {
            circuit: self.context.name.clone(),
            reason: DenialReason::Open,
            opened_at,
            retry_after: Some(opened_at.saturating_add(wait).saturating_sub(now)),
        }
    }

    fn half_open_denial(&self, opened_at: Duration) -> Denial {
        Denial {
            circuit: self.context.name.clone(),
            reason: DenialReason::HalfOpenLimitReached,
            opened_at,
            retry_after: None,
        }
    }

    fn transition(&self, from: BreakerState, to: BreakerState, at: Duration) -> StateTransition {
        StateTransition {
            circuit: self.context.name.clone(),
            from,
            to,
            at,
        }
    }

    fn notify(&self, transition: Option<StateTransition>) {
        if let Some(transition) = transition {
            self.callbacks.notify(&transition);
        }
    }

    fn now(&self) -> Duration {
        self.context.clock.monotonic_time()
    }

    fn lock_core(&self) -> MutexGuard<'_, BreakerCore> {
        lock(&self.core)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("config", &self.context.config)
            .field("state", &self.state())
            .field("classifier", &self.classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

// A panicking callback or caller must not wedge the circuit
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
