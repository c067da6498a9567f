//! Integration tests for EventPool checkout/release, backpressure and the reaper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use barracuda_common::PoolConfig;
use barracuda_events::{ClassTable, EventClassSpec, EventPool, PoolError, PoolStats};

fn classes() -> Arc<ClassTable> {
    Arc::new(
        ClassTable::new()
            .with(EventClassSpec::control("test.Login"))
            .unwrap()
            .with(EventClassSpec::view("test.Render"))
            .unwrap()
            .with(
                EventClassSpec::control("test.Search")
                    .with_initializer(|event| event.set_param("page", "1")),
            )
            .unwrap(),
    )
}

fn pool(config: PoolConfig) -> Arc<EventPool> {
    Arc::new(EventPool::new(config, classes()))
}

fn small(size: usize) -> PoolConfig {
    PoolConfig {
        size,
        retry_interval: Duration::from_millis(20),
        max_retries: 3,
        ..PoolConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_resets_and_recycles_instance() {
    let pool = pool(small(4));

    let warmup = pool.checkout("test.Login").await.unwrap();
    pool.release(warmup);
    let before = pool.stats("test.Login").unwrap();

    let mut event = pool.checkout("test.Login").await.unwrap();
    let id = event.id();
    event.set_handled(true);
    event.set_param("user", "ann");
    event.put_state("seen", true);
    assert!(pool.release(event));

    assert_eq!(pool.stats("test.Login").unwrap(), before);

    let again = pool.checkout("test.Login").await.unwrap();
    assert_eq!(again.id(), id);
    assert!(!again.is_handled());
    assert!(again.params().is_empty());
    assert!(again.state("seen").is_none());
}

#[tokio::test]
async fn recycled_instance_keeps_initializer_defaults() {
    let pool = pool(small(4));

    let mut first = pool.checkout("test.Search").await.unwrap();
    let id = first.id();
    assert_eq!(first.param("page"), Some("1"));
    first.set_param("page", "7");
    first.set_param("q", "rust");
    assert!(pool.release(first));

    let second = pool.checkout("test.Search").await.unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(second.param("page"), Some("1"));
    assert_eq!(second.param("q"), None);
}

#[tokio::test]
async fn classes_are_pooled_separately() {
    let pool = pool(small(1));
    let _login = pool.checkout("test.Login").await.unwrap();
    let _render = pool.checkout("test.Render").await.unwrap();
    assert_eq!(pool.stats("test.Login"), Some(PoolStats { free: 0, locked: 1 }));
    assert_eq!(pool.stats("test.Render"), Some(PoolStats { free: 0, locked: 1 }));
}

#[tokio::test]
async fn release_is_idempotent() {
    let pool = pool(small(2));
    let event = pool.checkout("test.Login").await.unwrap();
    assert!(pool.release(event));

    // Never checked out: fresh instance of a pooled class.
    let stray = classes().instantiate("test.Login").unwrap();
    assert!(!pool.release(stray));
    assert_eq!(pool.stats("test.Login"), Some(PoolStats { free: 1, locked: 0 }));
}

#[tokio::test]
async fn unknown_class_is_invalid() {
    let pool = pool(small(2));
    let err = pool.checkout("test.Nope").await.unwrap_err();
    assert!(matches!(err, PoolError::InvalidClass(ref name) if name == "test.Nope"));
    assert!(!err.is_capacity());
}

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_pool_fails_after_retries() {
    let config = small(2);
    let pool = pool(config.clone());

    let _a = pool.checkout("test.Login").await.unwrap();
    let _b = pool.checkout("test.Login").await.unwrap();

    let started = Instant::now();
    let err = pool.checkout("test.Login").await.unwrap_err();
    let waited = started.elapsed();

    assert!(err.is_capacity());
    assert!(matches!(err, PoolError::NoAvailableEvents { attempts: 3, .. }));
    assert!(waited >= config.max_checkout_wait());
    assert!(waited < config.retry_interval * config.max_retries * 10);
}

#[tokio::test]
async fn release_from_another_task_unblocks_checkout() {
    let pool = pool(PoolConfig {
        size: 1,
        retry_interval: Duration::from_millis(10),
        max_retries: 50,
        ..PoolConfig::default()
    });

    let held = pool.checkout("test.Login").await.unwrap();
    let held_id = held.id();

    let releaser = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            pool.release(held)
        })
    };

    let next = pool.checkout("test.Login").await.unwrap();
    assert_eq!(next.id(), held_id);
    assert!(releaser.await.unwrap());
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reaper_reclaims_abandoned_checkout() {
    let pool = pool(PoolConfig {
        size: 1,
        checkout_timeout: Duration::from_millis(50),
        retry_interval: Duration::from_millis(10),
        max_retries: 1,
        sweep_interval: Duration::from_millis(20),
        ..PoolConfig::default()
    });
    let reaper = pool.spawn_reaper();

    let leaked = pool.checkout("test.Login").await.unwrap();
    assert!(pool.checkout("test.Login").await.unwrap_err().is_capacity());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let reclaimed = pool.checkout("test.Login").await.unwrap();
    assert_ne!(reclaimed.id(), leaked.id());
    // The leaked instance is no longer tracked; a late release is ignored.
    assert!(!pool.release(leaked));
    assert!(pool.release(reclaimed));

    reaper.shutdown().await;
}

#[tokio::test]
async fn cleanup_leaves_fresh_checkouts_alone() {
    let pool = pool(PoolConfig {
        checkout_timeout: Duration::from_secs(60),
        ..small(2)
    });
    let _fresh = pool.checkout("test.Login").await.unwrap();
    assert_eq!(pool.cleanup_locked_events(), 0);
    assert_eq!(pool.stats("test.Login"), Some(PoolStats { free: 0, locked: 1 }));
}

#[tokio::test]
async fn reaper_stops_on_shutdown() {
    let pool = pool(PoolConfig {
        sweep_interval: Duration::from_millis(10),
        ..small(1)
    });
    let reaper = pool.spawn_reaper();
    assert!(!reaper.is_finished());
    reaper.shutdown().await;

    pool.shutdown();
    assert!(matches!(pool.checkout("test.Login").await, Err(PoolError::ShutDown)));
}
