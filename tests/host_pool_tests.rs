// Integration tests for the lease-based destination host pool
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vmshift::client_pool::ClientPool;
use vmshift::fakes::{FakeConnector, FakeThumbprinter, FakeVim};
use vmshift::host_pool::{HostPool, HostPoolConfig};
use vmshift::MigrateError;

fn pool_with_hosts(hosts: &[(&str, bool)]) -> (Arc<FakeVim>, HostPool) {
    let backend = FakeVim::new("uuid-target");
    backend.add_cluster("DC2", "C2");
    for (name, maintenance) in hosts {
        backend.add_host("DC2", "C2", name, *maintenance);
    }

    let connector = FakeConnector::new();
    connector.register("vc2", Arc::clone(&backend));

    let mut clients = ClientPool::new(connector, Arc::new(FakeThumbprinter("AA:BB".into())));
    clients.add_target("az1", "vc2", "admin", "pw", "DC2", false);

    let config = HostPoolConfig {
        azs: HashMap::from([("az1".to_string(), vec!["C2".to_string()])]),
    };
    (backend, HostPool::new(Arc::new(clients), config))
}

#[tokio::test]
async fn test_initialize_skips_maintenance_hosts() {
    let (_backend, pool) = pool_with_hosts(&[("h1", false), ("h2", true), ("h3", false)]);
    pool.initialize().await.unwrap();

    let mut leased = 0;
    while pool.lease_available_host("az1").unwrap().is_some() {
        leased += 1;
    }
    assert_eq!(leased, 2);
}

#[tokio::test]
async fn test_lease_returns_none_at_cap() {
    let (_backend, pool) = pool_with_hosts(&[("h1", false)]);
    pool.initialize().await.unwrap();

    let host = pool.lease_available_host("az1").unwrap().unwrap();
    assert_eq!(host.name, "h1");
    assert_eq!(pool.lease_count("az1", "h1"), Some(1));

    // the only host is at the cap now
    assert!(pool.lease_available_host("az1").unwrap().is_none());

    pool.release(&host);
    assert_eq!(pool.lease_count("az1", "h1"), Some(0));
    assert!(pool.lease_available_host("az1").unwrap().is_some());
}

#[tokio::test]
async fn test_lease_respects_configured_cap() {
    let (_backend, mut pool_parts) = pool_with_hosts(&[("h1", false)]);
    pool_parts.max_lease_per_host = 2;
    let pool = pool_parts;
    pool.initialize().await.unwrap();

    assert!(pool.lease_available_host("az1").unwrap().is_some());
    assert!(pool.lease_available_host("az1").unwrap().is_some());
    assert!(pool.lease_available_host("az1").unwrap().is_none());
    assert_eq!(pool.lease_count("az1", "h1"), Some(2));
}

#[tokio::test]
async fn test_lease_prefers_least_recently_released_host() {
    let (_backend, pool) = pool_with_hosts(&[("h1", false), ("h2", false)]);
    pool.initialize().await.unwrap();

    let first = pool.lease_available_host("az1").unwrap().unwrap();
    let second = pool.lease_available_host("az1").unwrap().unwrap();
    assert_ne!(first.name, second.name);

    pool.release(&first);
    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.release(&second);

    // the host released first has the oldest release stamp and wins
    let next = pool.lease_available_host("az1").unwrap().unwrap();
    assert_eq!(next.name, first.name);
}

#[tokio::test]
async fn test_lease_unknown_az_is_an_error() {
    let (_backend, pool) = pool_with_hosts(&[("h1", false)]);
    pool.initialize().await.unwrap();

    let err = pool.lease_available_host("az9").unwrap_err();
    assert!(err.to_string().contains("az9"));
}

#[tokio::test]
async fn test_release_of_unknown_host_is_not_fatal() {
    let (_backend, pool) = pool_with_hosts(&[("h1", false)]);
    pool.initialize().await.unwrap();

    let stranger = vmshift::vim::HostInfo {
        name: "ghost".to_string(),
        moref: vmshift::vim::ManagedRef::new("HostSystem", "host-ghost"),
        in_maintenance: false,
    };
    pool.release(&stranger);
    assert_eq!(pool.lease_count("az1", "h1"), Some(0));
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let (_backend, pool) = pool_with_hosts(&[("h1", false)]);
    pool.initialize().await.unwrap();

    let _host = pool.lease_available_host("az1").unwrap().unwrap();
    pool.initialize().await.unwrap();

    // a second initialize must not reset lease state
    assert_eq!(pool.lease_count("az1", "h1"), Some(1));
}

#[tokio::test]
async fn test_wait_for_lease_times_out_with_az_in_error() {
    let (_backend, mut pool_parts) = pool_with_hosts(&[("h1", false)]);
    pool_parts.lease_wait_timeout = Duration::from_millis(120);
    pool_parts.lease_check_interval = Duration::from_millis(40);
    let pool = pool_parts;
    pool.initialize().await.unwrap();

    let _held = pool.lease_available_host("az1").unwrap().unwrap();
    let err = pool.wait_for_lease_available_host("az1").await.unwrap_err();
    assert!(matches!(err, MigrateError::HostLeaseTimeout { .. }));
    assert!(err.to_string().contains("az1"));
}

#[tokio::test]
async fn test_wait_for_lease_proceeds_once_a_host_frees_up() {
    let (_backend, mut pool_parts) = pool_with_hosts(&[("h1", false)]);
    pool_parts.lease_wait_timeout = Duration::from_secs(5);
    pool_parts.lease_check_interval = Duration::from_millis(20);
    let pool = Arc::new(pool_parts);
    pool.initialize().await.unwrap();

    let held = pool.lease_available_host("az1").unwrap().unwrap();

    let releaser = Arc::clone(&pool);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        releaser.release(&held);
    });

    let host = pool.wait_for_lease_available_host("az1").await.unwrap();
    assert_eq!(host.name, "h1");
}

#[tokio::test]
async fn test_concurrent_leases_never_exceed_cap() {
    let (_backend, pool_parts) = pool_with_hosts(&[("h1", false), ("h2", false)]);
    let pool = Arc::new(pool_parts);
    pool.initialize().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                if let Some(host) = pool.lease_available_host("az1").unwrap() {
                    // while held, no host may be over the cap
                    assert!(pool.lease_count("az1", "h1").unwrap() <= 1);
                    assert!(pool.lease_count("az1", "h2").unwrap() <= 1);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    pool.release(&host);
                } else {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(pool.lease_count("az1", "h1"), Some(0));
    assert_eq!(pool.lease_count("az1", "h2"), Some(0));
}
