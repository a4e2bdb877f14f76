//! Scheduling properties of the broker: concurrency bound, FIFO admission,
//! timeouts, redirects, observer delivery and shutdown, driven through a
//! scripted transport.

mod support;

use std::sync::Arc;
use std::time::Duration;

use modrepo_broker::{
    AccountTier, Broker, Credentials, Exchange, FailureKind, RequestKind, RequestOptions,
    StaticCredentials, TransportError,
};
use support::{ScriptedTransport, USER_ID, broker_with, config_for, credentials, registry};

const BASE: &str = "http://api.test/v1";

#[tokio::test]
async fn test_in_flight_never_exceeds_max_concurrent() {
    let transport = ScriptedTransport::empty_files(Duration::from_millis(50));
    let mut config = config_for(BASE);
    config.max_concurrent = 3;
    let broker = broker_with(transport.clone(), config);

    let tickets: Vec<_> = (1..=10)
        .map(|id| broker.request_files("skyrimse", id, RequestOptions::new()).unwrap())
        .collect();
    for ticket in tickets {
        assert!(ticket.outcome().await.unwrap().is_success());
    }

    assert_eq!(transport.call_count(), 10);
    assert_eq!(transport.peak(), 3);
}

#[tokio::test]
async fn test_stats_report_queue_depth() {
    let transport = ScriptedTransport::empty_files(Duration::from_millis(200));
    let mut config = config_for(BASE);
    config.max_concurrent = 2;
    let broker = broker_with(transport, config);
    let mut stats = broker.watch_stats();

    let tickets: Vec<_> = (1..=5)
        .map(|id| broker.request_mod_info("skyrimse", id, RequestOptions::new()).unwrap())
        .collect();

    tokio::time::timeout(
        Duration::from_secs(1),
        stats.wait_for(|s| s.active == 2 && s.requests_queued == 3),
    )
    .await
    .expect("stats should show two active and three queued")
    .unwrap();

    for ticket in tickets {
        ticket.outcome().await.unwrap();
    }
    tokio::time::timeout(
        Duration::from_secs(1),
        stats.wait_for(|s| s.active == 0 && s.requests_queued == 0),
    )
    .await
    .expect("stats should drain to zero")
    .unwrap();
}

#[tokio::test]
async fn test_admission_is_fifo() {
    let transport = ScriptedTransport::empty_files(Duration::from_millis(5));
    let mut config = config_for(BASE);
    config.max_concurrent = 1;
    let broker = broker_with(transport.clone(), config);

    let tickets: Vec<_> = (1..=5)
        .map(|id| broker.request_files("skyrimse", id, RequestOptions::new()).unwrap())
        .collect();
    for ticket in tickets {
        ticket.outcome().await.unwrap();
    }

    let expected: Vec<_> = (1..=5)
        .map(|id| format!("{BASE}/games/skyrimspecialedition/mods/{id}/files"))
        .collect();
    assert_eq!(transport.urls(), expected);
}

#[tokio::test]
async fn test_request_ids_are_distinct_and_increasing() {
    let transport = ScriptedTransport::empty_files(Duration::ZERO);
    let broker = broker_with(transport, config_for(BASE));

    let ids: Vec<_> = (1..=5)
        .map(|id| {
            broker
                .request_files("skyrimse", id, RequestOptions::new())
                .unwrap()
                .id()
        })
        .collect();

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
}

#[tokio::test]
async fn test_timed_out_request_fails_and_frees_its_slot() {
    let transport = ScriptedTransport::empty_files(Duration::from_secs(30));
    let mut config = config_for(BASE);
    config.max_concurrent = 1;
    config.request_timeout = Duration::from_millis(100);
    let broker = broker_with(transport.clone(), config);

    let first = broker.request_files("skyrimse", 1, RequestOptions::new()).unwrap();
    let second = broker.request_files("skyrimse", 2, RequestOptions::new()).unwrap();

    for ticket in [first, second] {
        let outcome = tokio::time::timeout(Duration::from_secs(5), ticket.outcome())
            .await
            .expect("timeout monitor should end the request")
            .unwrap();
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(failure.status, 0);
        assert_eq!(failure.message, "operation canceled");
    }
    assert_eq!(transport.call_count(), 2);

    // The aborted calls are really gone, not just forgotten.
    for _ in 0..50 {
        if transport.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.in_flight(), 0);
}

#[tokio::test]
async fn test_each_request_gets_exactly_one_event_across_redirects() {
    let transport = ScriptedTransport::new(Duration::from_millis(5), |call| {
        if call.url.contains("/moved/") {
            Exchange::response(call.url.clone(), 200)
                .with_body(r#"{"files":[],"file_updates":[]}"#)
        } else {
            Exchange::response(call.url.clone(), 301)
                .with_redirect(call.url.replacen("/games/", "/moved/", 1))
        }
    });
    let broker = broker_with(transport.clone(), config_for(BASE));
    let mut events = broker.subscribe(RequestKind::Files);

    let tickets: Vec<_> = (1..=4)
        .map(|id| broker.request_files("skyrimse", id, RequestOptions::new()).unwrap())
        .collect();
    let mut ids = Vec::new();
    for ticket in tickets {
        let outcome = ticket.outcome().await.unwrap();
        assert!(outcome.is_success());
        ids.push(outcome.id);
    }

    let mut seen = Vec::new();
    while let Ok(outcome) = events.try_recv() {
        seen.push(outcome.id);
    }
    seen.sort();
    assert_eq!(seen, ids);
    assert_eq!(transport.call_count(), 8);
}

#[tokio::test]
async fn test_quota_exhaustion_does_not_block_admission() {
    let transport = ScriptedTransport::new(Duration::from_millis(5), |call| {
        let mut exchange = Exchange::response(call.url.clone(), 429)
            .with_header("x-rl-daily-remaining", "0")
            .with_header("x-rl-hourly-remaining", "0");
        exchange.error = TransportError::from_status(&call.url, 429, None);
        exchange
    });
    let broker = broker_with(transport.clone(), config_for(BASE));

    let tickets: Vec<_> = (1..=3)
        .map(|id| broker.request_files("skyrimse", id, RequestOptions::new()).unwrap())
        .collect();
    for ticket in tickets {
        let outcome = ticket.outcome().await.unwrap();
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::RateLimited);
    }
    assert_eq!(transport.call_count(), 3);
    assert!(broker.stats().limits.unwrap().is_exhausted());
}

#[tokio::test]
async fn test_dropping_every_handle_still_finishes_accepted_work() {
    let transport = ScriptedTransport::empty_files(Duration::from_millis(50));
    let broker = broker_with(transport.clone(), config_for(BASE));

    let ticket = broker.request_files("skyrimse", 1, RequestOptions::new()).unwrap();
    drop(broker);

    let outcome = tokio::time::timeout(Duration::from_secs(2), ticket.outcome())
        .await
        .expect("in-flight request should finish after shutdown")
        .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_late_reader_receives_every_outcome() {
    let transport = ScriptedTransport::empty_files(Duration::ZERO);
    let broker = broker_with(transport, config_for(BASE));
    let mut events = broker.subscribe(RequestKind::Files);

    let tickets: Vec<_> = (1..=300)
        .map(|id| broker.request_files("skyrimse", id, RequestOptions::new()).unwrap())
        .collect();
    let mut ids = Vec::new();
    for ticket in tickets {
        ids.push(ticket.outcome().await.unwrap().id);
    }

    // Nothing was read while the requests ran.
    let mut seen = Vec::new();
    while let Ok(outcome) = events.try_recv() {
        seen.push(outcome.id);
    }
    seen.sort();
    assert_eq!(seen.len(), 300);
    assert_eq!(seen, ids);
}

#[tokio::test]
async fn test_unsendable_api_key_fails_without_a_call() {
    let transport = ScriptedTransport::empty_files(Duration::ZERO);
    let broker = Broker::builder()
        .config(config_for(BASE))
        .registry(registry())
        .credentials(Arc::new(StaticCredentials::new(Credentials::new(
            "bad\nkey",
            USER_ID,
            AccountTier::Regular,
        ))))
        .transport(transport.clone())
        .build()
        .unwrap();
    let mut failures = broker.subscribe_failures();

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        broker
            .request_files("skyrimse", 1, RequestOptions::new())
            .unwrap()
            .outcome(),
    )
    .await
    .expect("refused request should still complete")
    .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Protocol);
    assert_eq!(failure.status, 0);
    assert!(failure.message.contains("apikey"), "{}", failure.message);
    assert!(!failure.message.contains("bad"), "{}", failure.message);
    assert_eq!(failures.recv().await.unwrap().id, outcome.id);
    assert_eq!(transport.call_count(), 0);
    assert_eq!(broker.stats().active, 0);
}

#[tokio::test]
async fn test_cache_directory_is_left_to_the_application() {
    let root = tempfile::tempdir().unwrap();
    let cache = root.path().join("cache");
    let transport = ScriptedTransport::empty_files(Duration::ZERO);
    let broker = Broker::builder()
        .config(config_for(BASE))
        .registry(registry())
        .credentials(credentials(AccountTier::Regular))
        .transport(transport)
        .cache_dir(&cache)
        .build()
        .unwrap();

    for id in 1..=3 {
        let ticket = broker.request_files("skyrimse", id, RequestOptions::new()).unwrap();
        assert!(ticket.outcome().await.unwrap().is_success());
    }
    assert!(cache.is_dir());
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);

    std::fs::write(cache.join("app-entry"), b"cached by the application").unwrap();
    broker.clear_cache().unwrap();

    assert!(cache.is_dir());
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);
}
