//! Failure injection: store outages, dropped watches and provider errors.

use lb_manager::provider::memory::Operation;
use lb_manager::provider::MemoryProvider;
use lb_manager::store::MemoryStore;

mod common;

use common::{key, settle, wait_for, Running};

#[tokio::test]
async fn test_dropped_watch_reopens_without_second_read() {
    let store = MemoryStore::new();
    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    let provider = MemoryProvider::new();

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| provider.instances("web") == vec!["i1"]).await);
    assert!(wait_for(|| store.watch_opens() == 1).await);

    store.disconnect_watchers();
    assert!(wait_for(|| store.watch_opens() == 2).await);

    store.set(&key("elb/us-east/web/multiple/i2"), "").unwrap();
    assert!(wait_for(|| provider.instances("web") == vec!["i1", "i2"]).await);
    assert_eq!(store.get_calls(), 1);

    let manager = running.stop().await;
    assert_eq!(
        manager.load_balancer("elb_us-east_web").unwrap().members(),
        vec!["i1", "i2"]
    );
}

#[tokio::test]
async fn test_write_during_reconnect_is_not_lost() {
    let store = MemoryStore::new();
    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    let provider = MemoryProvider::new();

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| provider.instances("web") == vec!["i1"]).await);
    assert!(wait_for(|| store.watch_opens() == 1).await);

    // No await between these: the write lands while no watch is open.
    store.disconnect_watchers();
    store.set(&key("elb/us-east/web/multiple/i2"), "").unwrap();

    assert!(wait_for(|| provider.instances("web") == vec!["i1", "i2"]).await);
    assert_eq!(store.watch_opens(), 2);
    assert_eq!(store.get_calls(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_cleared_history_reopens_from_now() {
    let store = MemoryStore::new();
    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    let provider = MemoryProvider::new();

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| provider.instances("web") == vec!["i1"]).await);
    assert!(wait_for(|| store.watch_opens() == 1).await);

    store.disconnect_watchers();
    store.set(&key("elb/us-east/web/multiple/i2"), "").unwrap();
    store.clear_history();

    // One reopen at the resume index, rejected, then one from now.
    assert!(wait_for(|| store.watch_opens() == 3).await);
    store.set(&key("elb/us-east/web/multiple/i3"), "").unwrap();
    assert!(wait_for(|| provider.instances("web") == vec!["i1", "i3"]).await);
    assert_eq!(store.get_calls(), 1);

    let manager = running.stop().await;
    assert_eq!(
        manager.load_balancer("elb_us-east_web").unwrap().members(),
        vec!["i1", "i3"]
    );
}

#[tokio::test]
async fn test_repeated_disconnects_keep_reopening() {
    let store = MemoryStore::new();
    let provider = MemoryProvider::new();

    let running = Running::start(&store, &provider);
    for opens in 1..=3 {
        assert!(wait_for(|| store.watch_opens() == opens).await);
        store.disconnect_watchers();
    }
    assert!(wait_for(|| store.watch_opens() == 4).await);

    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    assert!(wait_for(|| provider.instances("web") == vec!["i1"]).await);

    running.stop().await;
}

#[tokio::test]
async fn test_store_unavailable_at_startup_runs_watch_only() {
    let store = MemoryStore::new();
    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    store.set_unavailable(true);
    let provider = MemoryProvider::new();

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| store.watch_opens() == 1).await);
    store.set_unavailable(false);

    store.set(&key("elb/us-east/web/multiple/i2"), "").unwrap();
    assert!(wait_for(|| provider.instances("web") == vec!["i2"]).await);
    settle().await;
    assert_eq!(store.get_calls(), 1);

    let manager = running.stop().await;
    // The key written before the outage is only known once it changes again.
    assert_eq!(
        manager.load_balancer("elb_us-east_web").unwrap().members(),
        vec!["i2"]
    );
}

#[tokio::test]
async fn test_failed_register_is_retried_on_next_sync() {
    let store = MemoryStore::new();
    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    let provider = MemoryProvider::new();
    provider.fail_next(Operation::AddMember, 1);

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| provider.count(Operation::AddMember) == 1).await);
    settle().await;
    assert!(provider.instances("web").is_empty());

    store.set(&key("elb/us-east/web/multiple/i2"), "").unwrap();
    assert!(wait_for(|| provider.instances("web") == vec!["i1", "i2"]).await);

    running.stop().await;
}

#[tokio::test]
async fn test_failed_listing_abandons_cycle() {
    let store = MemoryStore::new();
    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    let provider = MemoryProvider::new();
    provider.register_instances("web", &["old"]);
    provider.fail_next(Operation::ListMembers, 1);

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| provider.count(Operation::ListMembers) == 1).await);
    settle().await;
    assert_eq!(provider.instances("web"), vec!["old"]);
    assert_eq!(provider.count(Operation::AddMember), 0);

    store.set(&key("elb/us-east/web/multiple/i1"), "").unwrap();
    assert!(wait_for(|| provider.instances("web") == vec!["i1"]).await);

    running.stop().await;
}

#[tokio::test]
async fn test_failed_record_read_skips_update_until_next_sync() {
    let store = MemoryStore::new();
    store.set(&key("route53/us-east-1/Z1/api.example.com/multiple/10.0.0.1"), "").unwrap();
    let provider = MemoryProvider::new();
    provider.fail_next(Operation::GetRecord, 1);

    let running = Running::start(&store, &provider);
    assert!(wait_for(|| provider.count(Operation::GetRecord) == 1).await);
    settle().await;
    assert_eq!(provider.count(Operation::UpsertRecord), 0);

    store.set(&key("route53/us-east-1/Z1/api.example.com/multiple/10.0.0.2"), "").unwrap();
    assert!(wait_for(|| {
        provider
            .record("Z1", "api.example.com")
            .map(|record| record.values == vec!["10.0.0.1", "10.0.0.2"])
            .unwrap_or(false)
    })
    .await);

    running.stop().await;
}
