use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Circuit breaker type guarding catalog lookups.
pub type CatalogBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for catalog autocomplete lookups.
///
/// Autocomplete fires on every settled keystroke; when the catalog endpoint
/// is down this stops the client from issuing a doomed request per keystroke.
///
/// # Configuration
///
/// - **Failure threshold**: 3 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 5s to 30s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, lookups pass through.
/// - **OPEN**: Too many failures, lookups are skipped.
/// - **HALF_OPEN**: Testing if the catalog recovered.
pub fn create_catalog_circuit_breaker() -> CatalogBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(5),  // Initial delay
        Duration::from_secs(30), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(3, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
