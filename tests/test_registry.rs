use std::time::Duration;

use rampart::server::registry::ConnectionRegistry;

#[test]
fn test_register_and_drop_track_active_count() {
    let registry = ConnectionRegistry::new();
    assert_eq!(registry.active(), 0);

    let a = registry.register();
    let b = registry.register();
    assert_eq!(registry.active(), 2);

    drop(a);
    assert_eq!(registry.active(), 1);
    drop(b);
    assert_eq!(registry.active(), 0);
}

#[test]
fn test_evict_idle_respects_limit() {
    let registry = ConnectionRegistry::new();
    let _conns: Vec<_> = (0..5).map(|_| registry.register()).collect();

    std::thread::sleep(Duration::from_millis(1100));
    let evicted = registry.evict_idle(3, Duration::from_secs(0));
    assert_eq!(evicted, 3);
}

#[test]
fn test_evict_idle_skips_active_connections() {
    let registry = ConnectionRegistry::new();
    let active = registry.register();
    let _idle = registry.register();

    std::thread::sleep(Duration::from_millis(1100));
    active.touch();

    let evicted = registry.evict_idle(10, Duration::from_secs(0));
    assert_eq!(evicted, 1);
}

#[tokio::test]
async fn test_eviction_notice_reaches_connection() {
    let registry = ConnectionRegistry::new();
    let conn = registry.register();

    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(registry.evict_idle(1, Duration::from_secs(0)), 1);

    // The notification was stored; the wait resolves immediately.
    tokio::time::timeout(Duration::from_secs(1), conn.evicted())
        .await
        .expect("eviction notice not delivered");
}
