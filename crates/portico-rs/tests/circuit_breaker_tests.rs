use portico_rs::models::config::CircuitBreakerSettings;
use portico_rs::services::circuit_breaker::{
    CircuitBreaker, CircuitState, Outcome, Permit,
};
use portico_rs::services::events::EventBus;
use portico_rs::services::metrics::GatewayMetrics;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn breaker(settings: CircuitBreakerSettings) -> Arc<CircuitBreaker> {
    CircuitBreaker::new(
        "upstream".to_string(),
        settings,
        Arc::new(EventBus::with_logging()),
        Arc::new(GatewayMetrics::new()),
    )
}

#[tokio::test]
async fn stays_closed_on_success() {
    let cb = breaker(CircuitBreakerSettings {
        failure_threshold: 3,
        ..CircuitBreakerSettings::default()
    });
    for _ in 0..10 {
        let permit = cb.try_acquire().expect("closed breaker admits");
        cb.record(permit, Outcome::Success);
    }
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn opens_after_consecutive_failures_and_blocks() {
    let cb = breaker(CircuitBreakerSettings {
        failure_threshold: 2,
        open_timeout: 60_000,
        ..CircuitBreakerSettings::default()
    });

    let permit = cb.try_acquire().unwrap();
    cb.record(permit, Outcome::Failure);
    assert_eq!(cb.state(), CircuitState::Closed);

    let permit = cb.try_acquire().unwrap();
    cb.record(permit, Outcome::Failure);
    assert_eq!(cb.state(), CircuitState::Open);

    // No admission while open: zero outbound calls can happen.
    assert!(cb.try_acquire().is_err());
    assert!(cb.try_acquire().is_err());
}

#[tokio::test]
async fn timed_half_open_then_success_threshold_closes() {
    let cb = breaker(CircuitBreakerSettings {
        failure_threshold: 1,
        open_timeout: 100,
        success_threshold: 2,
        half_open_allowed_requests: 1,
        ..CircuitBreakerSettings::default()
    });

    let permit = cb.try_acquire().unwrap();
    cb.record(permit, Outcome::Failure);
    assert_eq!(cb.state(), CircuitState::Open);

    // Before the timeout: still rejected.
    assert!(cb.try_acquire().is_err());

    sleep(Duration::from_millis(150)).await;

    // The next arriving request drives the transition and is the probe.
    let probe = cb.try_acquire().unwrap();
    assert_eq!(probe, Permit::Probe);
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    cb.record(probe, Outcome::Success);

    let probe = cb.try_acquire().unwrap();
    cb.record(probe, Outcome::Success);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn probe_failure_restarts_the_open_timer() {
    let cb = breaker(CircuitBreakerSettings {
        failure_threshold: 1,
        open_timeout: 100,
        ..CircuitBreakerSettings::default()
    });

    let permit = cb.try_acquire().unwrap();
    cb.record(permit, Outcome::Failure);

    sleep(Duration::from_millis(150)).await;
    let probe = cb.try_acquire().unwrap();
    cb.record(probe, Outcome::Failure);
    assert_eq!(cb.state(), CircuitState::Open);

    // Timer restarted: immediate acquire is rejected again.
    assert!(cb.try_acquire().is_err());
}

#[tokio::test]
async fn half_open_with_single_slot_admits_exactly_one_probe() {
    let cb = breaker(CircuitBreakerSettings {
        failure_threshold: 1,
        open_timeout: 0,
        half_open_allowed_requests: 1,
        success_threshold: 5,
        ..CircuitBreakerSettings::default()
    });

    let permit = cb.try_acquire().unwrap();
    cb.record(permit, Outcome::Failure);

    let probe = cb.try_acquire().unwrap();
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    // While the probe is outstanding, everything else short-circuits.
    for _ in 0..5 {
        assert!(cb.try_acquire().is_err());
    }

    // Completion frees the slot.
    cb.record(probe, Outcome::Success);
    assert!(cb.try_acquire().is_ok());
}

#[tokio::test]
async fn concurrent_probe_completions_settle_on_one_transition() {
    let cb = breaker(CircuitBreakerSettings {
        failure_threshold: 1,
        open_timeout: 0,
        half_open_allowed_requests: 2,
        success_threshold: 1,
        ..CircuitBreakerSettings::default()
    });

    let permit = cb.try_acquire().unwrap();
    cb.record(permit, Outcome::Failure);

    let probe_a = cb.try_acquire().unwrap();
    let probe_b = cb.try_acquire().unwrap();

    // First completion closes; the second observes the post-transition
    // state without reopening or double-closing.
    cb.record(probe_a, Outcome::Success);
    assert_eq!(cb.state(), CircuitState::Closed);
    cb.record(probe_b, Outcome::Success);
    assert_eq!(cb.state(), CircuitState::Closed);
}
