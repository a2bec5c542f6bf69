pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerSnapshot, CallOutcome, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerError, CircuitBreakerRegistry, CircuitPhase, StateTransition,
    TransitionListener,
};
pub use retry::{RetryExecutor, RetryObserver, RetryOutcome, RetryPolicy, RetryResult};
