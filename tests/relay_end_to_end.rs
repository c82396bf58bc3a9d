//! End-to-end relay behavior over in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeCacheCluster, FakeLog, wait_until};
use spurgo::application::ports::{CacheDispatcher, EventStore};
use spurgo::engine::{ConsumerConfig, Relay, RelayConfig, RetentionConfig, SequencerConfig};

const SERVERS: [i64; 2] = [11, 12];

fn fast_config() -> RelayConfig {
    RelayConfig {
        sequencer: SequencerConfig {
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(20),
            ..Default::default()
        },
        consumer: ConsumerConfig {
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(20),
            ..Default::default()
        },
        retention: RetentionConfig {
            interval: Duration::from_millis(100),
            ..Default::default()
        },
    }
}

fn start(log: &Arc<FakeLog>, cluster: &Arc<FakeCacheCluster>, config: RelayConfig) -> Relay {
    Relay::start(
        Arc::clone(log) as Arc<dyn EventStore>,
        Arc::clone(cluster) as Arc<dyn CacheDispatcher>,
        config,
    )
}

#[tokio::test]
async fn idle_relay_leaves_zero_offsets_and_dispatches_nothing() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));

    let relay = start(&log, &cluster, fast_config());
    tokio::time::sleep(Duration::from_millis(500)).await;
    relay.shutdown();

    for server_id in SERVERS {
        let offset = log.offset(&format!("redis:{server_id}"));
        assert!(offset.is_none() || offset == Some(0));
    }
    assert_eq!(cluster.total_calls(), 0);
}

#[tokio::test]
async fn deletes_keys_on_every_server_and_commits_offsets() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));

    cluster.seed_key(11, "key01");
    cluster.seed_key(11, "key02");
    cluster.seed_key(12, "key03");

    let relay = start(&log, &cluster, fast_config());

    log.insert("key01,key02");
    log.insert("key03");
    relay.notify();

    let check = Arc::clone(&log);
    wait_until(move || {
        check.offset("redis:11") == Some(2) && check.offset("redis:12") == Some(2)
    })
    .await;

    for server_id in SERVERS {
        assert!(!cluster.has_key(server_id, "key01"));
        assert!(!cluster.has_key(server_id, "key02"));
        assert!(!cluster.has_key(server_id, "key03"));
    }

    relay.shutdown();
}

#[tokio::test]
async fn retention_trims_the_log_towards_the_cap() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));

    let config = RelayConfig {
        sequencer: SequencerConfig {
            reload_limit: 512,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(20),
            ..Default::default()
        },
        consumer: ConsumerConfig {
            fetch_limit: 32,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(20),
            ..Default::default()
        },
        retention: RetentionConfig {
            max_total_events: 64,
            delete_batch_size: 4,
            interval: Duration::from_millis(50),
        },
    };

    let relay = start(&log, &cluster, config);

    for i in 1..=128 {
        log.insert(&format!("key{i:03}"));
    }
    relay.notify();

    let check = Arc::clone(&log);
    wait_until(move || {
        check.offset("redis:11") == Some(128)
            && check.offset("redis:12") == Some(128)
            && check.min_seq().is_some_and(|min_seq| min_seq > 128 - 64 - 5)
    })
    .await;

    assert_eq!(log.offset("redis:11"), Some(128));
    assert_eq!(log.offset("redis:12"), Some(128));
    assert!(log.min_seq().is_some_and(|min_seq| min_seq > 59));

    relay.shutdown();
}

#[tokio::test]
async fn lagging_consumer_blocks_retention_but_not_the_healthy_one() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));
    cluster.fail_server(12, true);

    let config = RelayConfig {
        // Far below the backlog, so only the stalled consumer is
        // holding retention back.
        retention: RetentionConfig {
            max_total_events: 4,
            delete_batch_size: 4,
            interval: Duration::from_millis(50),
        },
        ..fast_config()
    };
    let relay = start(&log, &cluster, config);

    for i in 1..=10 {
        log.insert(&format!("key{i:02}"));
    }
    relay.notify();

    let check = Arc::clone(&log);
    wait_until(move || check.offset("redis:11") == Some(10)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(log.offset("redis:11"), Some(10));
    assert_eq!(log.offset("redis:12"), Some(0));
    assert_eq!(log.event_count(), 10);

    relay.shutdown();
}

#[tokio::test]
async fn crash_between_dispatch_and_commit_redelivers_the_batch() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));
    cluster.seed_key(11, "key01");
    cluster.seed_key(12, "key01");

    let relay = start(&log, &cluster, fast_config());

    // Let both consumers write their initial zero offsets first.
    let check = Arc::clone(&log);
    wait_until(move || {
        check.offset("redis:11") == Some(0) && check.offset("redis:12") == Some(0)
    })
    .await;

    // Offset commits now fail: the dispatch lands but progress is lost.
    log.fail_offset_writes(true);
    log.insert("key01");
    relay.notify();

    let check = Arc::clone(&cluster);
    wait_until(move || check.calls_for(11).len() >= 1 && check.calls_for(12).len() >= 1).await;

    // "Crash" while the commit keeps failing.
    relay.shutdown();
    relay.join().await;
    assert_eq!(log.offset("redis:11"), Some(0));

    // Restart against the healed store: the batch is delivered again.
    log.fail_offset_writes(false);
    let relay = start(&log, &cluster, fast_config());

    let check = Arc::clone(&log);
    wait_until(move || {
        check.offset("redis:11") == Some(1) && check.offset("redis:12") == Some(1)
    })
    .await;

    assert!(cluster.calls_for(11).len() >= 2);
    assert!(!cluster.has_key(11, "key01"));
    assert!(!cluster.has_key(12, "key01"));

    relay.shutdown();
}

#[tokio::test]
async fn oversized_event_is_delivered_alone() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&[11]));

    let big_key = "x".repeat(10 * 1024 * 1024);
    log.insert(&big_key);
    for i in 1..=5 {
        log.insert(&format!("small{i}"));
    }

    let relay = start(&log, &cluster, fast_config());
    relay.notify();

    let check = Arc::clone(&log);
    wait_until(move || check.offset("redis:11") == Some(6)).await;

    let calls = cluster.calls_for(11);
    assert_eq!(calls.len(), 2);
    // The 10 MiB event exceeds the 1 MiB batch budget on its own.
    assert_eq!(calls[0].len(), 1);
    assert_eq!(calls[0][0].len(), 10 * 1024 * 1024);
    // The small events batch normally behind it.
    assert_eq!(
        calls[1],
        vec!["small1", "small2", "small3", "small4", "small5"]
    );

    relay.shutdown();
}

#[tokio::test]
async fn rapid_signals_coalesce_into_few_scans() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));

    let relay = start(&log, &cluster, fast_config());

    // Wait out the startup scan.
    let check = Arc::clone(&log);
    wait_until(move || check.scan_count() >= 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = log.scan_count();

    let signals = 50;
    for _ in 0..signals {
        relay.notify();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let scans = log.scan_count() - before;
    assert!(scans >= 1, "at least one scan should follow a signal");
    assert!(
        scans <= signals + 1,
        "{signals} rapid signals caused {scans} scans"
    );

    relay.shutdown();
}

#[tokio::test]
async fn restarting_the_relay_converges_to_the_same_offsets() {
    let log = Arc::new(FakeLog::default());
    let cluster = Arc::new(FakeCacheCluster::new(&SERVERS));

    let relay = start(&log, &cluster, fast_config());
    for i in 1..=6 {
        log.insert(&format!("key{i:02}"));
    }
    relay.notify();

    let check = Arc::clone(&log);
    wait_until(move || check.offset("redis:11") == Some(6)).await;
    relay.shutdown();
    relay.join().await;

    // A fresh process over the same durable state settles in place.
    let relay = start(&log, &cluster, fast_config());
    let check = Arc::clone(&log);
    wait_until(move || {
        check.offset("redis:11") == Some(6) && check.offset("redis:12") == Some(6)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(log.offset("redis:11"), Some(6));
    assert_eq!(log.offset("redis:12"), Some(6));

    relay.shutdown();
}
