//! Load tests: distribution and bounds under concurrent use.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rpc_resilience::{ConnectionPool, Context, LoadBalancer, Policy, ServiceInstance};

mod common;

use common::MockConnector;

fn balancer(policy: Policy, weights: &[(&str, Option<u32>)]) -> Arc<LoadBalancer> {
    let lb = LoadBalancer::new(common::balancer_config(policy, None), Context::new());
    for (i, (id, weight)) in weights.iter().enumerate() {
        let mut instance = ServiceInstance::new(*id, format!("10.0.0.{}", i + 1), 9000);
        instance.weight = *weight;
        lb.add_instance(instance);
    }
    Arc::new(lb)
}

async fn tally(lb: &Arc<LoadBalancer>, tasks: usize, per_task: usize) -> HashMap<String, usize> {
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let lb = lb.clone();
            tokio::spawn(async move {
                (0..per_task)
                    .filter_map(|_| lb.select(None).map(|i| i.id.clone()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut counts = HashMap::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts
}

#[tokio::test]
async fn test_round_robin_order() {
    let lb = balancer(Policy::RoundRobin, &[("a", None), ("b", None), ("c", None)]);
    let picks: Vec<_> = (0..6).map(|_| lb.select(None).unwrap().id.clone()).collect();
    assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_robin_is_even_under_concurrency() {
    let lb = balancer(Policy::RoundRobin, &[("a", None), ("b", None), ("c", None)]);
    let counts = tally(&lb, 10, 30).await;
    assert_eq!(counts["a"], 100);
    assert_eq!(counts["b"], 100);
    assert_eq!(counts["c"], 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_weighted_round_robin_split() {
    let lb = balancer(Policy::WeightedRoundRobin, &[("a", Some(1)), ("b", Some(3))]);
    let counts = tally(&lb, 8, 50).await;
    assert_eq!(counts["a"], 100);
    assert_eq!(counts["b"], 300);
}

#[tokio::test]
async fn test_fastest_response_converges() {
    let lb = balancer(Policy::FastestResponse, &[("slow", None), ("fast", None)]);
    for _ in 0..20 {
        lb.record_request_result("slow", Duration::from_millis(250), false).unwrap();
        lb.record_request_result("fast", Duration::from_millis(20), false).unwrap();
    }
    let counts = tally(&lb, 4, 25).await;
    assert_eq!(counts.get("fast"), Some(&100));
    assert!((lb.instance("fast").unwrap().response_time() - 20.0).abs() < 3.0);
}

#[tokio::test]
async fn test_least_requests_balances_reported_load() {
    let lb = balancer(Policy::LeastRequests, &[("a", None), ("b", None), ("c", None)]);
    for _ in 0..30 {
        let instance = lb.select(None).unwrap();
        lb.record_request_result(&instance.id, Duration::from_millis(1), false).unwrap();
    }
    for instance in lb.instances() {
        assert_eq!(instance.request_count(), 10);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_never_exceeds_max_under_load() {
    let connector = MockConnector {
        connect_delay: Some(Duration::from_millis(5)),
        ..MockConnector::default()
    };
    let pool = Arc::new(ConnectionPool::new(
        common::pool_config(1, 4, 1),
        "db:5432",
        connector,
        Context::new(),
    ));
    pool.initialize().await.unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let conn = pool.get_connection(None).await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release_connection(conn).await;
                Ok::<_, rpc_resilience::ResilienceError>(())
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.total <= 4);
    assert_eq!(stats.leased, 0);
    assert!(pool.connector().peak_live.load(Ordering::SeqCst) <= 4);
    pool.close().await;
    assert_eq!(pool.connector().live.load(Ordering::SeqCst), 0);
}
