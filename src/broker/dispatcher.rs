//! Dispatcher task.
//!
//! One task owns the pending queue, the active set and the stats tracker;
//! submissions, transport completions and timer expiries all arrive as
//! messages, so none of that state is shared or locked. After every retirement
//! the loop runs admission again, which keeps the active set full whenever
//! requests are waiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::{
    CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, PRAGMA, USER_AGENT,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::active::{ActiveEntry, ActiveSet, Signal, TimeoutMonitor};
use super::classifier::{Classifier, Verdict};
use super::events::{Failure, FailureKind, Observers, Outcome, Payload};
use super::queue::PendingQueue;
use super::stats::{RateLimits, StatsTracker};
use crate::config::BrokerConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::request::endpoint::{Endpoint, endpoint};
use crate::request::{Descriptor, RequestId};
use crate::transport::{ApiCall, Exchange, Transport};
use crate::user_agent::api_user_agent;

/// Messages from [`Broker`](super::Broker) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        descriptor: Descriptor,
        reply: oneshot::Sender<Outcome>,
    },
}

pub(crate) struct Dispatcher {
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    classifier: Classifier,
    queue: PendingQueue,
    active: ActiveSet,
    waiters: HashMap<RequestId, oneshot::Sender<Outcome>>,
    observers: Arc<Observers>,
    stats: StatsTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
}

impl Dispatcher {
    pub(crate) fn new(
        config: BrokerConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        observers: Arc<Observers>,
        stats: StatsTracker,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            classifier: Classifier::new(config.max_redirect_hops),
            active: ActiveSet::new(config.max_concurrent),
            config,
            transport,
            credentials,
            queue: PendingQueue::new(),
            waiters: HashMap::new(),
            observers,
            stats,
            commands,
            signals_tx,
            signals_rx,
        }
    }

    /// Runs until every handle is dropped and all accepted work has finished.
    pub(crate) async fn run(mut self) {
        info!(
            max_concurrent = self.config.max_concurrent,
            timeout_secs = self.config.request_timeout.as_secs_f64(),
            base_url = %self.config.api_base_url,
            "request broker started"
        );
        let mut accepting = true;

        loop {
            if !accepting && self.queue.is_empty() && self.active.is_empty() {
                break;
            }

            tokio::select! {
                command = self.commands.recv(), if accepting => match command {
                    Some(Command::Submit { descriptor, reply }) => self.accept(descriptor, reply),
                    None => {
                        debug!("all broker handles dropped; draining");
                        accepting = false;
                    }
                },
                Some(signal) = self.signals_rx.recv() => self.on_signal(signal),
                else => break,
            }
        }

        info!("request broker stopped");
    }

    fn accept(&mut self, descriptor: Descriptor, reply: oneshot::Sender<Outcome>) {
        debug!(id = %descriptor.id, kind = %descriptor.kind(), queued = self.queue.len() + 1, "request queued");
        self.waiters.insert(descriptor.id, reply);
        self.queue.enqueue(descriptor);
        self.admit_next();
    }

    /// Moves waiting requests into the active set while there is room.
    fn admit_next(&mut self) {
        while self.active.has_capacity() {
            let Some(descriptor) = self.queue.dequeue_front() else {
                break;
            };
            self.dispatch(descriptor);
        }
        self.stats.set_depth(self.queue.len(), self.active.len());
    }

    fn dispatch(&mut self, descriptor: Descriptor) {
        let credentials = self.credentials.credentials();
        let endpoint = match endpoint(
            &descriptor,
            &self.config.api_base_url,
            &credentials,
            unix_now(),
        ) {
            Ok(endpoint) => endpoint,
            Err(refusal) => {
                warn!(id = %descriptor.id, kind = %descriptor.kind(), "{refusal}");
                self.waiters.remove(&descriptor.id);
                return;
            }
        };

        let call = match self.build_call(&descriptor, endpoint, &credentials) {
            Ok(call) => call,
            Err(message) => {
                warn!(id = %descriptor.id, kind = %descriptor.kind(), "{message}; request not sent");
                let failure = Failure::new(FailureKind::Protocol, 0, message);
                self.complete(descriptor, Err(failure), None);
                return;
            }
        };
        let url = call.url.clone();
        let dispatch = self.active.next_dispatch_id();
        debug!(
            id = %descriptor.id,
            dispatch,
            method = %call.method,
            url = %url,
            rerouted = descriptor.is_rerouted(),
            "dispatching request"
        );

        let transport = Arc::clone(&self.transport);
        let signals = self.signals_tx.clone();
        let handle = tokio::spawn(async move {
            let exchange = transport.execute(call).await;
            let _ = signals.send(Signal::Finished { dispatch, exchange });
        });
        let monitor = TimeoutMonitor::start(
            dispatch,
            self.config.request_timeout,
            self.signals_tx.clone(),
        );

        self.active.insert(
            dispatch,
            ActiveEntry {
                descriptor,
                url,
                transport: handle,
                monitor,
            },
        );
    }

    fn build_call(
        &self,
        descriptor: &Descriptor,
        endpoint: Endpoint,
        credentials: &Credentials,
    ) -> Result<ApiCall, String> {
        let mut headers = HeaderMap::new();
        let user_agent = api_user_agent(
            &self.config.application_name,
            &self.config.application_version,
            descriptor.options.submodule.as_deref(),
        );

        set_header(&mut headers, HeaderName::from_static("apikey"), &credentials.api_key, true)?;
        set_header(&mut headers, USER_AGENT, &user_agent, false)?;
        set_header(&mut headers, CONTENT_TYPE, "application/json", false)?;
        set_header(
            &mut headers,
            HeaderName::from_static("protocol-version"),
            &self.config.protocol_version,
            false,
        )?;
        set_header(
            &mut headers,
            HeaderName::from_static("application-name"),
            &self.config.application_name,
            false,
        )?;
        set_header(
            &mut headers,
            HeaderName::from_static("application-version"),
            &self.config.application_version,
            false,
        )?;
        set_header(&mut headers, CACHE_CONTROL, "no-cache", false)?;
        set_header(&mut headers, PRAGMA, "no-cache", false)?;

        Ok(ApiCall {
            method: endpoint.method,
            url: endpoint.url,
            headers,
            body: endpoint.body.map(|body| body.to_string().into_bytes()),
        })
    }

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Finished { dispatch, exchange } => {
                let Some(entry) = self.active.remove(dispatch) else {
                    debug!(dispatch, "completion for a retired request; ignoring");
                    return;
                };
                drop(entry.monitor);
                self.retire(entry.descriptor, &exchange);
            }
            Signal::TimedOut { dispatch } => {
                let Some(entry) = self.active.remove(dispatch) else {
                    return;
                };
                warn!(
                    id = %entry.descriptor.id,
                    url = %entry.url,
                    timeout_secs = self.config.request_timeout.as_secs_f64(),
                    "request timed out; aborting"
                );
                let (descriptor, exchange) = entry.abort();
                self.retire(descriptor, &exchange);
            }
        }
        self.admit_next();
    }

    fn retire(&mut self, descriptor: Descriptor, exchange: &Exchange) {
        match self.classifier.classify(&descriptor, exchange) {
            Verdict::Reroute { target } => {
                self.queue.enqueue(descriptor.reroute(target));
            }
            Verdict::Complete { result, limits } => self.complete(descriptor, result, limits),
        }
    }

    /// Delivers the single terminal outcome of `descriptor`.
    fn complete(
        &mut self,
        descriptor: Descriptor,
        result: Result<Payload, Failure>,
        limits: Option<RateLimits>,
    ) {
        if let Some(limits) = limits {
            self.stats.record_limits(limits);
        }
        let outcome = Outcome {
            id: descriptor.id,
            kind: descriptor.kind(),
            game: descriptor.request.game().map(str::to_string),
            mod_id: descriptor.request.mod_id(),
            file_id: descriptor.request.file_id(),
            user_data: descriptor.options.user_data,
            result,
        };
        debug!(id = %outcome.id, kind = %outcome.kind, success = outcome.is_success(), "request finished");
        if let Some(waiter) = self.waiters.remove(&outcome.id) {
            let _ = waiter.send(outcome.clone());
        }
        self.observers.publish(&outcome);
    }
}

/// Inserts a header, refusing values that cannot go on the wire. The value
/// never appears in the error, since it may be the API key.
fn set_header(
    headers: &mut HeaderMap,
    name: HeaderName,
    value: &str,
    sensitive: bool,
) -> Result<(), String> {
    let mut value =
        HeaderValue::from_str(value).map_err(|_| format!("invalid value for header '{name}'"))?;
    value.set_sensitive(sensitive);
    headers.insert(name, value);
    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
