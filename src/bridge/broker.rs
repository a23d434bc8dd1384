//! Correlation Broker
//!
//! Owns every outstanding call until it is settled. Flow:
//! 1. A tool handler calls `submit()` and awaits the returned [`PendingResponse`]
//! 2. The worker polls; the poll route calls `claim_next()` to hand out the
//!    oldest unclaimed request
//! 3. The worker reports back; the response route calls `resolve()` or `reject()`
//! 4. Requests nobody answers are rejected by their expiry task, by
//!    `sweep_expired()`, or by `clear_all()` when the channel goes away
//!
//! Whichever path removes a request from the map first settles it; every later
//! attempt for the same id is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::correlation::CorrelationId;
use super::error::BridgeError;

/// Per-request timeout used when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(120_000);

type Settlement = Result<Value, BridgeError>;

/// One outstanding call awaiting a worker-produced result
struct PendingRequest {
    endpoint: String,
    payload: Value,
    created_at: Instant,
    /// Insertion order, breaks ties between identical `created_at` values
    seq: u64,
    in_flight: bool,
    sender: oneshot::Sender<Settlement>,
    expiry: Option<AbortHandle>,
}

impl PendingRequest {
    fn finish(mut self, id: CorrelationId, outcome: Settlement) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
        if self.sender.send(outcome).is_err() {
            debug!(
                correlation_id = %id,
                endpoint = %self.endpoint,
                "Caller dropped before settlement"
            );
        }
    }
}

/// Public view of a claimed request, handed to the worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedRequest {
    pub id: CorrelationId,
    pub endpoint: String,
    pub payload: Value,
}

/// Lifetime counters for the broker
#[derive(Debug, Default)]
pub struct BrokerStats {
    pub total_submitted: AtomicU64,
    pub total_resolved: AtomicU64,
    pub total_rejected: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub total_cleared: AtomicU64,
}

/// Point-in-time copy of [`BrokerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_submitted: u64,
    pub total_resolved: u64,
    pub total_rejected: u64,
    pub total_timeouts: u64,
    pub total_cleared: u64,
}

impl BrokerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            total_resolved: self.total_resolved.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_cleared: self.total_cleared.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct PendingSet {
    requests: HashMap<CorrelationId, PendingRequest>,
    next_seq: u64,
}

struct Shared {
    pending: Mutex<PendingSet>,
    request_timeout: Duration,
    stats: BrokerStats,
}

impl Shared {
    /// Fired by a request's expiry task. The entry may already be gone.
    fn expire(&self, id: CorrelationId) {
        let removed = self.pending.lock().requests.remove(&id);
        if let Some(mut request) = removed {
            // Running inside the expiry task itself; nothing left to cancel.
            request.expiry = None;
            warn!(
                correlation_id = %id,
                endpoint = %request.endpoint,
                timeout_ms = self.request_timeout.as_millis() as u64,
                "Request timed out"
            );
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            request.finish(id, Err(self.timeout_error()));
        }
    }

    fn timeout_error(&self) -> BridgeError {
        BridgeError::Timeout {
            timeout_ms: self.request_timeout.as_millis() as u64,
        }
    }
}

/// Awaitable result of a submitted call
///
/// Resolves with the worker's result, or with the error that settled the
/// request (timeout, channel teardown, worker failure).
#[derive(Debug)]
pub struct PendingResponse {
    id: CorrelationId,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingResponse {
    /// Correlation id assigned to this call
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped unsettled: the broker itself went away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::ConnectionClosed(
                "Bridge shut down".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Thread-safe request-correlation broker
///
/// Cheap to clone; all clones share one pending set.
#[derive(Clone)]
pub struct CorrelationBroker {
    shared: Arc<Shared>,
}

impl CorrelationBroker {
    /// Create a broker with the default 120s request timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(PendingSet::default()),
                request_timeout,
                stats: BrokerStats::default(),
            }),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.shared.request_timeout
    }

    /// Queue a call for the worker and return a handle to await its result.
    ///
    /// Must be called from within a tokio runtime (the expiry is a spawned task).
    pub fn submit(&self, endpoint: impl Into<String>, payload: Value) -> PendingResponse {
        let id = CorrelationId::new();
        let endpoint = endpoint.into();
        let (tx, rx) = oneshot::channel();

        {
            let mut set = self.shared.pending.lock();
            let seq = set.next_seq;
            set.next_seq += 1;

            // The expiry task blocks on this lock, so it cannot observe the
            // set before the entry is inserted.
            let expiry = self.schedule_expiry(id);
            set.requests.insert(
                id,
                PendingRequest {
                    endpoint: endpoint.clone(),
                    payload,
                    created_at: Instant::now(),
                    seq,
                    in_flight: false,
                    sender: tx,
                    expiry: Some(expiry),
                },
            );
        }
        self.shared.stats.total_submitted.fetch_add(1, Ordering::Relaxed);

        debug!(correlation_id = %id, endpoint = %endpoint, "Submitted request");

        PendingResponse { id, rx }
    }

    fn schedule_expiry(&self, id: CorrelationId) -> AbortHandle {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let timeout = self.shared.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(id);
            }
        })
        .abort_handle()
    }

    /// Hand out the oldest request not yet claimed, marking it in flight.
    ///
    /// A claimed request stays pending until settled but is never handed out again.
    pub fn claim_next(&self) -> Option<ClaimedRequest> {
        let mut set = self.shared.pending.lock();
        let (id, request) = set
            .requests
            .iter_mut()
            .filter(|(_, request)| !request.in_flight)
            .min_by_key(|(_, request)| (request.created_at, request.seq))?;

        request.in_flight = true;
        debug!(correlation_id = %id, endpoint = %request.endpoint, "Claimed request");

        Some(ClaimedRequest {
            id: *id,
            endpoint: request.endpoint.clone(),
            payload: request.payload.clone(),
        })
    }

    /// Fulfil a pending call. Returns false if the id is no longer pending.
    pub fn resolve(&self, id: CorrelationId, result: Value) -> bool {
        match self.settle(id, Ok(result)) {
            Ok(()) => {
                self.shared.stats.total_resolved.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %id, "Resolved request");
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring response");
                false
            }
        }
    }

    /// Fail a pending call. Returns false if the id is no longer pending.
    pub fn reject(&self, id: CorrelationId, error: BridgeError) -> bool {
        match self.settle(id, Err(error)) {
            Ok(()) => {
                self.shared.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %id, "Rejected request");
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring error response");
                false
            }
        }
    }

    fn settle(&self, id: CorrelationId, outcome: Settlement) -> Result<(), BridgeError> {
        let request = self
            .shared
            .pending
            .lock()
            .requests
            .remove(&id)
            .ok_or(BridgeError::UnknownCorrelationId(id))?;
        request.finish(id, outcome);
        Ok(())
    }

    /// Reject every request older than the request timeout.
    ///
    /// Independent of the per-request expiry tasks. Returns the number evicted.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let timeout = self.shared.request_timeout;
        let expired: Vec<(CorrelationId, PendingRequest)> = {
            let mut set = self.shared.pending.lock();
            let ids: Vec<CorrelationId> = set
                .requests
                .iter()
                .filter(|(_, request)| now.saturating_duration_since(request.created_at) > timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| set.requests.remove(&id).map(|request| (id, request)))
                .collect()
        };

        let removed = expired.len();
        for (id, request) in expired {
            warn!(
                correlation_id = %id,
                endpoint = %request.endpoint,
                "Sweeping expired request"
            );
            request.finish(id, Err(self.shared.timeout_error()));
        }
        self.shared
            .stats
            .total_timeouts
            .fetch_add(removed as u64, Ordering::Relaxed);

        removed
    }

    /// Reject every pending request, claimed or not, with `ConnectionClosed`.
    ///
    /// Returns the number evicted.
    pub fn clear_all(&self, reason: &str) -> usize {
        let mut drained: Vec<(CorrelationId, PendingRequest)> =
            self.shared.pending.lock().requests.drain().collect();
        drained.sort_by_key(|(_, request)| request.seq);

        let removed = drained.len();
        for (id, request) in drained {
            request.finish(id, Err(BridgeError::ConnectionClosed(reason.to_string())));
        }
        self.shared
            .stats
            .total_cleared
            .fetch_add(removed as u64, Ordering::Relaxed);

        if removed > 0 {
            info!(removed, reason, "Cleared pending requests");
        }
        removed
    }

    /// Number of requests awaiting settlement, claimed or not
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().requests.len()
    }

    /// Number of claimed requests awaiting the worker's answer
    pub fn in_flight_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .requests
            .values()
            .filter(|request| request.in_flight)
            .count()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.shared.pending.lock().requests.contains_key(id)
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.shared.stats
    }
}

impl Default for CorrelationBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task running `sweep_expired` on a fixed cadence
pub fn spawn_sweeper(broker: CorrelationBroker, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let removed = broker.sweep_expired(Instant::now());
            if removed > 0 {
                debug!(removed, "Swept expired requests");
            }
        }
    })
}
