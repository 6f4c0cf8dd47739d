use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Breaker guarding ancillary provider lookups.
pub type UpstreamCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates the breaker used for place-detail lookups.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures open the circuit.
/// - **Backoff**: exponential, 10s growing to 60s, before a trial call is let through.
///
/// Search pages are not wrapped: a search must see the provider's real error on page one.
pub fn create_upstream_circuit_breaker() -> UpstreamCircuitBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_opens_after_five_failures() {
        let cb = create_upstream_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("provider down"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn test_four_failures_keep_circuit_closed() {
        let cb = create_upstream_circuit_breaker();

        for _ in 0..4 {
            let _: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("provider down"));
        }

        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(7));
        assert!(matches!(result, Ok(7)));
    }
}
