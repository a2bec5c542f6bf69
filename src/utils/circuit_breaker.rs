use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Circuit Breaker Pattern Implementation
// ============================================================================
//
// Named, shared protective state machine in front of one downstream
// dependency. Tracks the last N call outcomes in a sliding window and derives
// failure and slow-call rates from it.
//
// States:
// - Closed: calls pass through, outcomes fill the window
// - Open: calls are rejected without touching the dependency
// - HalfOpen: a fixed budget of trial calls decides between Closed and Open
//
// Transitions:
// - Closed -> Open      window holds >= minimum_calls and a rate meets its threshold
// - Open -> HalfOpen    wait_duration_in_open_state elapsed since opening
// - HalfOpen -> Closed  every permitted trial call succeeded, none slow
// - HalfOpen -> Open    any trial call failed or was slow
//
// All phase and window updates happen under one mutex; the protected call
// itself runs outside of it. Each permit is stamped with the generation it was
// issued in, so a call that was in flight across a transition completes
// normally but cannot move the new phase.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "Closed",
            CircuitPhase::Open => "Open",
            CircuitPhase::HalfOpen => "HalfOpen",
        }
    }

    /// Gauge encoding (0=Closed, 1=Open, 2=HalfOpen)
    pub fn gauge_value(&self) -> i64 {
        match self {
            CircuitPhase::Closed => 0,
            CircuitPhase::Open => 1,
            CircuitPhase::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure rate (%) at or above which the circuit opens
    pub failure_rate_threshold: f64,
    /// Slow-call rate (%) at or above which the circuit opens
    pub slow_call_rate_threshold: f64,
    /// Successful calls taking longer than this count as slow
    pub slow_call_duration_threshold: Duration,
    /// Time spent Open before trial calls are admitted
    pub wait_duration_in_open_state: Duration,
    /// Trial call budget while HalfOpen
    pub permitted_calls_in_half_open: u32,
    /// Calls the window must hold before rates are evaluated
    pub minimum_calls: u32,
    /// Number of most recent outcomes retained
    pub sliding_window_size: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(2),
            wait_duration_in_open_state: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
            minimum_calls: 10,
            sliding_window_size: 20,
        }
    }
}

impl CircuitBreakerConfig {
    fn window_size(&self) -> usize {
        self.sliding_window_size.max(1) as usize
    }

    // A minimum larger than the window could never be reached
    fn effective_minimum_calls(&self) -> usize {
        (self.minimum_calls.max(1) as usize).min(self.window_size())
    }

    fn half_open_budget(&self) -> u32 {
        self.permitted_calls_in_half_open.max(1)
    }
}

/// Classification of one completed protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Slow,
    Failure,
}

impl CallOutcome {
    pub fn classify(succeeded: bool, elapsed: Duration, slow_threshold: Duration) -> Self {
        if !succeeded {
            CallOutcome::Failure
        } else if elapsed > slow_threshold {
            CallOutcome::Slow
        } else {
            CallOutcome::Success
        }
    }
}

/// Observable record of a phase change.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub name: String,
    pub from: CircuitPhase,
    pub to: CircuitPhase,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
}

/// Write-only sink notified after every phase change.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &StateTransition);
}

/// Read-only view of a breaker at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub phase: CircuitPhase,
    pub buffered_calls: usize,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
}

/// Admission ticket for one protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPermit {
    generation: u64,
    phase: CircuitPhase,
}

impl CallPermit {
    /// Phase the breaker was in when the call was admitted.
    pub fn phase(&self) -> CircuitPhase {
        self.phase
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

/// Returns the permit of a call admitted by `CircuitBreaker::call`.
///
/// If the call's future is dropped before it completes (a timeout, a
/// cancelled request) the call is recorded as a failure, so a half-open
/// trial never holds its slot forever.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<CallPermit>,
}

impl PermitGuard<'_> {
    fn complete(mut self, outcome: CallOutcome) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record_outcome(permit, outcome);
        }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            tracing::warn!(
                breaker = %self.breaker.name(),
                admitted_in = %permit.phase(),
                "Protected call dropped before completing, counting it as a failure"
            );
            self.breaker.record_outcome(permit, CallOutcome::Failure);
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}

// ============================================================================
// Sliding Window
// ============================================================================

struct OutcomeWindow {
    outcomes: VecDeque<CallOutcome>,
    capacity: usize,
    failures: usize,
    slow: usize,
}

impl OutcomeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
            failures: 0,
            slow: 0,
        }
    }

    fn push(&mut self, outcome: CallOutcome) {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                self.adjust(evicted, false);
            }
        }
        self.outcomes.push_back(outcome);
        self.adjust(outcome, true);
    }

    fn adjust(&mut self, outcome: CallOutcome, added: bool) {
        let counter = match outcome {
            CallOutcome::Failure => &mut self.failures,
            CallOutcome::Slow => &mut self.slow,
            CallOutcome::Success => return,
        };
        if added {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
        self.slow = 0;
    }

    fn len(&self) -> usize {
        self.outcomes.len()
    }

    fn rate(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / total as f64
        }
    }

    fn failure_rate(&self) -> f64 {
        Self::rate(self.failures, self.len())
    }

    fn slow_call_rate(&self) -> f64 {
        Self::rate(self.slow, self.len())
    }
}

// ============================================================================
// Breaker
// ============================================================================

struct BreakerState {
    phase: CircuitPhase,
    window: OutcomeWindow,
    opened_at: Option<Instant>,
    generation: u64,
    half_open_admitted: u32,
    half_open_succeeded: u32,
    rates_at_open: (f64, f64),
}

struct BreakerInner {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    listeners: RwLock<Vec<Arc<dyn TransitionListener>>>,
}

/// Cheap to clone; clones share one state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = OutcomeWindow::new(config.window_size());
        Self {
            inner: Arc::new(BreakerInner {
                name: name.into(),
                config,
                state: Mutex::new(BreakerState {
                    phase: CircuitPhase::Closed,
                    window,
                    opened_at: None,
                    generation: 0,
                    half_open_admitted: 0,
                    half_open_succeeded: 0,
                    rates_at_open: (0.0, 0.0),
                }),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    pub fn add_listener(&self, listener: Arc<dyn TransitionListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let guard = match self.try_acquire() {
            Some(permit) => PermitGuard {
                breaker: self,
                permit: Some(permit),
            },
            None => return Err(CircuitBreakerError::CircuitOpen),
        };

        let started = Instant::now();
        let result = operation.await;
        let outcome = CallOutcome::classify(
            result.is_ok(),
            started.elapsed(),
            self.inner.config.slow_call_duration_threshold,
        );
        guard.complete(outcome);

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Ask for admission of one call. `None` means the circuit is open
    /// (or the half-open trial budget is spent) and the call must not run.
    ///
    /// Every permit must be handed back through `record_outcome`; a permit
    /// that is never returned keeps its half-open trial slot.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let mut transitions = Vec::new();
        let permit = {
            let mut state = self.inner.state.lock();
            self.expire_open(&mut state, &mut transitions);

            let phase = state.phase;
            match phase {
                CircuitPhase::Closed => Some(CallPermit {
                    generation: state.generation,
                    phase: CircuitPhase::Closed,
                }),
                CircuitPhase::Open => None,
                CircuitPhase::HalfOpen => {
                    if state.half_open_admitted < self.inner.config.half_open_budget() {
                        state.half_open_admitted += 1;
                        Some(CallPermit {
                            generation: state.generation,
                            phase: CircuitPhase::HalfOpen,
                        })
                    } else {
                        None
                    }
                }
            }
        };
        self.notify(transitions);

        if permit.is_none() {
            tracing::debug!(breaker = %self.inner.name, "Circuit breaker rejected call");
        }
        permit
    }

    /// Feed the outcome of an admitted call back into the state machine.
    pub fn record_outcome(&self, permit: CallPermit, outcome: CallOutcome) {
        let mut transitions = Vec::new();
        {
            let mut state = self.inner.state.lock();

            if permit.generation != state.generation {
                tracing::debug!(
                    breaker = %self.inner.name,
                    outcome = ?outcome,
                    admitted_in = %permit.phase,
                    current = %state.phase,
                    "Ignoring outcome of call admitted before the last transition"
                );
                return;
            }

            let phase = state.phase;
            match phase {
                CircuitPhase::Closed => {
                    state.window.push(outcome);
                    if state.window.len() >= self.inner.config.effective_minimum_calls() {
                        let failure_rate = state.window.failure_rate();
                        let slow_call_rate = state.window.slow_call_rate();
                        if failure_rate >= self.inner.config.failure_rate_threshold
                            || slow_call_rate >= self.inner.config.slow_call_rate_threshold
                        {
                            self.transition(&mut state, CircuitPhase::Open, &mut transitions);
                        }
                    }
                }
                CircuitPhase::HalfOpen => {
                    state.window.push(outcome);
                    if outcome != CallOutcome::Success {
                        self.transition(&mut state, CircuitPhase::Open, &mut transitions);
                    } else {
                        state.half_open_succeeded += 1;
                        if state.half_open_succeeded >= self.inner.config.half_open_budget() {
                            self.transition(&mut state, CircuitPhase::Closed, &mut transitions);
                        }
                    }
                }
                // Open issues no permits of its own generation
                CircuitPhase::Open => {}
            }
        }
        self.notify(transitions);
    }

    /// Current phase, applying the Open -> HalfOpen timeout if it has elapsed.
    pub fn current_phase(&self) -> CircuitPhase {
        let mut transitions = Vec::new();
        let phase = {
            let mut state = self.inner.state.lock();
            self.expire_open(&mut state, &mut transitions);
            state.phase
        };
        self.notify(transitions);
        phase
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let phase = self.current_phase();
        let state = self.inner.state.lock();
        BreakerSnapshot {
            name: self.inner.name.clone(),
            phase,
            buffered_calls: state.window.len(),
            failure_rate: state.window.failure_rate(),
            slow_call_rate: state.window.slow_call_rate(),
        }
    }

    fn expire_open(&self, state: &mut BreakerState, transitions: &mut Vec<StateTransition>) {
        if state.phase != CircuitPhase::Open {
            return;
        }
        let elapsed = state
            .opened_at
            .map(|opened_at| opened_at.elapsed() >= self.inner.config.wait_duration_in_open_state)
            .unwrap_or(true);
        if elapsed {
            self.transition(state, CircuitPhase::HalfOpen, transitions);
        }
    }

    fn transition(
        &self,
        state: &mut BreakerState,
        to: CircuitPhase,
        transitions: &mut Vec<StateTransition>,
    ) {
        let from = state.phase;
        let (failure_rate, slow_call_rate) = if from == CircuitPhase::Open {
            state.rates_at_open
        } else {
            (state.window.failure_rate(), state.window.slow_call_rate())
        };

        state.phase = to;
        state.generation += 1;
        state.window.clear();
        state.half_open_admitted = 0;
        state.half_open_succeeded = 0;
        if to == CircuitPhase::Open {
            state.opened_at = Some(Instant::now());
            state.rates_at_open = (failure_rate, slow_call_rate);
        } else {
            state.opened_at = None;
        }

        transitions.push(StateTransition {
            name: self.inner.name.clone(),
            from,
            to,
            failure_rate,
            slow_call_rate,
        });
    }

    fn notify(&self, transitions: Vec<StateTransition>) {
        if transitions.is_empty() {
            return;
        }
        let listeners = self.inner.listeners.read().clone();
        for transition in &transitions {
            if transition.to == CircuitPhase::Open {
                tracing::warn!(
                    breaker = %transition.name,
                    from = %transition.from,
                    to = %transition.to,
                    failure_rate = transition.failure_rate,
                    slow_call_rate = transition.slow_call_rate,
                    "Circuit breaker opened"
                );
            } else {
                tracing::info!(
                    breaker = %transition.name,
                    from = %transition.from,
                    to = %transition.to,
                    failure_rate = transition.failure_rate,
                    slow_call_rate = transition.slow_call_rate,
                    "Circuit breaker state transition"
                );
            }
            for listener in &listeners {
                listener.on_transition(transition);
            }
        }
    }
}

// ============================================================================
// Registry - one breaker per protected-call name, for the process lifetime
// ============================================================================

#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    listeners: RwLock<Vec<Arc<dyn TransitionListener>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener attached to every breaker created from now on.
    pub fn add_listener(&self, listener: Arc<dyn TransitionListener>) {
        self.listeners.write().push(listener);
    }

    /// Return the breaker registered under `name`, creating it with `config`
    /// on first use. Later calls ignore `config`.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let breaker = CircuitBreaker::new(name, config);
                for listener in self.listeners.read().iter() {
                    breaker.add_listener(listener.clone());
                }
                tracing::info!(breaker = name, "Registered circuit breaker");
                breaker
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    pub fn all(&self) -> Vec<CircuitBreaker> {
        self.breakers.read().values().cloned().collect()
    }
}
