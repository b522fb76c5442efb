//! Failure injection tests: breakers, health damping and retries under
//! partial failure.

use serde_json::json;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use rpc_resilience::config::RetryConfig;
use rpc_resilience::health::{HealthChecker, TcpConnectProbe};
use rpc_resilience::{
    CircuitState, Context, HealthStatus, LoadBalancer, Policy, ResilienceError, ResilienceEvent, ResilientClient,
    ServiceInstance,
};

mod common;

use common::{MockTransport, ScriptedProbe};

fn retries() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_exclude_then_single_trial() {
    let lb = LoadBalancer::new(
        common::balancer_config(Policy::RoundRobin, Some(common::breaker(5, 60_000))),
        Context::new(),
    );
    lb.add_instance(ServiceInstance::new("a", "10.0.0.1", 9000));
    lb.add_instance(ServiceInstance::new("b", "10.0.0.2", 9000));
    let client = ResilientClient::new(Arc::new(lb), MockTransport::default(), retries());
    client.transport().fail("10.0.0.1:9000");

    for _ in 0..5 {
        let err = client.call_target("a", &json!({}), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Transport(_)));
    }
    let breaker = client.balancer().circuit_breaker("a").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Rejected before any network attempt.
    let err = client.call_target("a", &json!({}), Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
    assert_eq!(client.transport().calls().len(), 5);

    // Excluded from balanced selection.
    for _ in 0..10 {
        assert_eq!(client.balancer().select_instance(None).as_deref(), Some("10.0.0.2:9000"));
    }

    tokio::time::advance(Duration::from_millis(60_000)).await;
    client.transport().recover("10.0.0.1:9000");

    let only_a = vec!["10.0.0.1:9000".to_string()];
    assert_eq!(client.balancer().select_instance(Some(&only_a)).as_deref(), Some("10.0.0.1:9000"));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(client.balancer().select_instance(Some(&only_a)), None);

    client
        .balancer()
        .record_request_result("a", Duration::from_millis(3), false)
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(client.call_target("a", &json!({}), Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens() {
    let lb = LoadBalancer::new(
        common::balancer_config(Policy::RoundRobin, Some(common::breaker(2, 1_000))),
        Context::new(),
    );
    lb.add_instance(ServiceInstance::new("a", "10.0.0.1", 9000));
    lb.record_request_result("a", Duration::ZERO, true).unwrap();
    lb.record_request_result("a", Duration::ZERO, true).unwrap();

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(lb.select_instance(None).is_some());
    lb.record_request_result("a", Duration::ZERO, true).unwrap();

    let breaker = lb.circuit_breaker("a").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(lb.select_instance(None), None);
    assert_eq!(breaker.retry_after(), Duration::from_millis(1_000));
}

#[test]
fn test_concurrent_callers_get_one_trial() {
    let lb = Arc::new(LoadBalancer::new(
        common::balancer_config(Policy::RoundRobin, Some(common::breaker(1, 200))),
        Context::new(),
    ));
    lb.add_instance(ServiceInstance::new("a", "10.0.0.1", 9000));
    lb.record_request_result("a", Duration::ZERO, true).unwrap();
    let breaker = lb.circuit_breaker("a").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(250));

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lb = lb.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                lb.select_instance(None).is_some()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_instance_never_selected() {
    let ctx = Context::new();
    let probe = ScriptedProbe::new();
    let checker = Arc::new(HealthChecker::new(common::health_config(1_000), probe.clone(), ctx.clone()));
    let lb = LoadBalancer::with_health_checker(common::balancer_config(Policy::RoundRobin, None), checker.clone(), ctx);
    lb.add_instance(ServiceInstance::new("a", "10.0.0.1", 9000));
    lb.add_instance(ServiceInstance::new("b", "10.0.0.2", 9000));

    // Unknown until the first check.
    assert_eq!(lb.select_instance(None), None);

    checker.check_all_targets().await;
    assert_eq!(lb.instance("b").unwrap().health(), HealthStatus::Healthy);

    probe.fail("b");
    checker.check_all_targets().await;
    checker.check_all_targets().await;
    // Two failures are damped.
    assert_eq!(lb.instance("b").unwrap().health(), HealthStatus::Healthy);
    checker.check_all_targets().await;
    assert_eq!(lb.instance("b").unwrap().health(), HealthStatus::Unhealthy);

    for _ in 0..20 {
        assert_eq!(lb.select_instance(None).as_deref(), Some("10.0.0.1:9000"));
    }

    probe.recover("b");
    checker.check_all_targets().await;
    assert_eq!(lb.instance("b").unwrap().health(), HealthStatus::Unhealthy);
    checker.check_all_targets().await;
    assert_eq!(lb.instance("b").unwrap().health(), HealthStatus::Healthy);

    let picks: Vec<_> = (0..4).map(|_| lb.select_instance(None).unwrap()).collect();
    assert!(picks.contains(&"10.0.0.2:9000".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_health_loop_drives_selection() {
    let ctx = Context::new();
    let mut events = ctx.subscribe();
    let probe = ScriptedProbe::new();
    let checker = Arc::new(HealthChecker::new(common::health_config(1_000), probe.clone(), ctx.clone()));
    let lb = LoadBalancer::with_health_checker(common::balancer_config(Policy::RoundRobin, None), checker, ctx);
    lb.add_instance(ServiceInstance::new("a", "10.0.0.1", 9000));
    probe.fail("a");

    lb.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(lb.select_instance(None), None);

    probe.recover("a");
    // Two more cycles satisfy the healthy threshold.
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(lb.select_instance(None).as_deref(), Some("10.0.0.1:9000"));
    lb.stop().await;

    let calls = probe.calls();
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(probe.calls(), calls);

    let mut flips = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ResilienceEvent::HealthChanged { current, .. } = event {
            flips.push(current);
        }
    }
    assert_eq!(flips, [HealthStatus::Unhealthy, HealthStatus::Healthy]);
}

#[tokio::test]
async fn test_tcp_probe_against_live_and_dead_ports() {
    let (live, backend) = common::start_tcp_backend().await;
    let dead = common::closed_port().await;

    let ctx = Context::new();
    let mut config = common::balancer_config(Policy::RoundRobin, None);
    config.health_check = Some(common::health_config(50));
    let lb = LoadBalancer::from_config(config, Arc::new(TcpConnectProbe), ctx);
    lb.add_instance(ServiceInstance::new("live", live.ip().to_string(), live.port()));
    lb.add_instance(ServiceInstance::new("dead", dead.ip().to_string(), dead.port()));

    let checker = lb.health_checker().unwrap().clone();
    checker.check_all_targets().await;

    assert_eq!(checker.status("live"), Some(HealthStatus::Healthy));
    assert_eq!(checker.status("dead"), Some(HealthStatus::Unhealthy));
    assert!(checker.result("dead").unwrap().error.is_some());
    for _ in 0..5 {
        assert_eq!(lb.select_instance(None), Some(live.to_string()));
    }
    backend.abort();
}

#[tokio::test(start_paused = true)]
async fn test_client_routes_around_failing_instance() {
    let lb = LoadBalancer::new(
        common::balancer_config(Policy::RoundRobin, Some(common::breaker(2, 30_000))),
        Context::new(),
    );
    lb.add_instance(ServiceInstance::new("a", "10.0.0.1", 9000));
    lb.add_instance(ServiceInstance::new("b", "10.0.0.2", 9000));
    let client = ResilientClient::new(Arc::new(lb), MockTransport::default(), retries());
    client.transport().fail("10.0.0.1:9000");

    for _ in 0..6 {
        let response = client.call(&json!({"method": "ping"}), Duration::from_secs(1)).await.unwrap();
        assert_eq!(response["target"], "10.0.0.2:9000");
    }

    // "a" was tried until its breaker opened, then left alone.
    let calls_to_a = client
        .transport()
        .calls()
        .iter()
        .filter(|t| t.as_str() == "10.0.0.1:9000")
        .count();
    assert_eq!(calls_to_a, 2);
    assert_eq!(client.balancer().circuit_breaker("a").unwrap().state(), CircuitState::Open);
}
