//! Shared helpers for broker integration tests.
//!
//! `scripted_transport` stands in for the network when a test needs control
//! over timing (slow calls, calls that never finish) or wants to count how many
//! calls overlap. `broker_for` wires a broker to a wiremock server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modrepo_broker::{
    AccountTier, ApiCall, Broker, BrokerConfig, Credentials, Exchange, GameDescriptor,
    StaticCredentials, StaticGameRegistry, Transport,
};

pub const API_KEY: &str = "test-api-key";
pub const USER_ID: u64 = 42;

pub fn registry() -> Arc<StaticGameRegistry> {
    Arc::new(
        StaticGameRegistry::new()
            .with_game(GameDescriptor::new("skyrimse", "skyrimspecialedition"))
            .with_game(GameDescriptor::new("fallout4", "fallout4")),
    )
}

pub fn credentials(tier: AccountTier) -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(Credentials::new(API_KEY, USER_ID, tier)))
}

pub fn config_for(base_url: &str) -> BrokerConfig {
    BrokerConfig {
        api_base_url: base_url.to_string(),
        ..BrokerConfig::default()
    }
}

/// Broker talking HTTP to `base_url` with a regular account.
pub fn broker_for(base_url: &str) -> Broker {
    Broker::builder()
        .config(config_for(base_url))
        .registry(registry())
        .credentials(credentials(AccountTier::Regular))
        .build()
        .expect("broker should build")
}

/// Broker over a scripted transport.
pub fn broker_with(transport: Arc<ScriptedTransport>, config: BrokerConfig) -> Broker {
    Broker::builder()
        .config(config)
        .registry(registry())
        .credentials(credentials(AccountTier::Regular))
        .transport(transport)
        .build()
        .expect("broker should build")
}

type Responder = Box<dyn Fn(&ApiCall) -> Exchange + Send + Sync>;

/// Transport that answers from a closure after a fixed delay.
///
/// Tracks how many calls are in flight and the highest overlap seen.
pub struct ScriptedTransport {
    responder: Responder,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<ApiCall>>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("delay", &self.delay)
            .field("peak", &self.peak())
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn new(
        delay: Duration,
        responder: impl Fn(&ApiCall) -> Exchange + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers every call with `200` and an empty file list.
    pub fn empty_files(delay: Duration) -> Arc<Self> {
        Self::new(delay, |call| {
            Exchange::response(call.url.clone(), 200)
                .with_body(r#"{"files":[],"file_updates":[]}"#)
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.url.clone())
            .collect()
    }
}

/// Decrements the in-flight counter even when the call is aborted mid-sleep.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, call: ApiCall) -> Exchange {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        self.calls.lock().unwrap().push(call.clone());
        tokio::time::sleep(self.delay).await;
        (self.responder)(&call)
    }
}
