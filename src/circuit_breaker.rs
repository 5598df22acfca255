use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Circuit breaker guarding lead-sink database operations.
///
/// The duplicate gate refreshes from the sink on a timer and the
/// orchestrator appends to it per accepted lead; when the database is
/// down, the breaker fails those calls fast instead of stacking up
/// timeouts behind the pipeline.
pub type SinkCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates the sink circuit breaker.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_sink_circuit_breaker() -> SinkCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
