//! Active set and per-request timeout monitors.
//!
//! Each dispatched request gets a fresh [`DispatchId`]; completion and timeout
//! signals carry it, so a signal for an entry that was already retired (the
//! exchange finished just as its timer fired) finds nothing and is ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::request::Descriptor;
use crate::transport::Exchange;

/// Identifies one dispatch of one descriptor. A rerouted request gets a new one.
pub(crate) type DispatchId = u64;

/// Internal events fed back into the dispatcher loop.
#[derive(Debug)]
pub(crate) enum Signal {
    Finished {
        dispatch: DispatchId,
        exchange: Exchange,
    },
    TimedOut {
        dispatch: DispatchId,
    },
}

/// Watchdog for one in-flight call. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct TimeoutMonitor {
    timer: JoinHandle<()>,
}

impl TimeoutMonitor {
    pub(crate) fn start(
        dispatch: DispatchId,
        deadline: Duration,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = signals.send(Signal::TimedOut { dispatch });
        });
        Self { timer }
    }
}

impl Drop for TimeoutMonitor {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// A descriptor in flight with its transport task and timer.
#[derive(Debug)]
pub(crate) struct ActiveEntry {
    pub(crate) descriptor: Descriptor,
    /// URL the call was issued against.
    pub(crate) url: String,
    pub(crate) transport: JoinHandle<()>,
    pub(crate) monitor: TimeoutMonitor,
}

impl ActiveEntry {
    /// Aborts the transport task and returns the exchange the classifier sees.
    pub(crate) fn abort(self) -> (Descriptor, Exchange) {
        self.transport.abort();
        drop(self.monitor);
        let exchange = Exchange::aborted(self.url);
        (self.descriptor, exchange)
    }
}

/// In-flight requests, bounded by `capacity`.
#[derive(Debug)]
pub(crate) struct ActiveSet {
    entries: HashMap<DispatchId, ActiveEntry>,
    capacity: usize,
    next_dispatch: DispatchId,
}

impl ActiveSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            next_dispatch: 0,
        }
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.entries.len() < self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reserves the id for the next dispatch.
    pub(crate) fn next_dispatch_id(&mut self) -> DispatchId {
        self.next_dispatch += 1;
        self.next_dispatch
    }

    pub(crate) fn insert(&mut self, dispatch: DispatchId, entry: ActiveEntry) {
        debug_assert!(self.has_capacity(), "active set over capacity");
        debug!(dispatch, id = %entry.descriptor.id, active = self.entries.len() + 1, "request active");
        self.entries.insert(dispatch, entry);
    }

    /// Removes the entry; `None` if it was already retired.
    pub(crate) fn remove(&mut self, dispatch: DispatchId) -> Option<ActiveEntry> {
        self.entries.remove(&dispatch)
    }
}
