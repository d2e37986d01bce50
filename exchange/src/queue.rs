//! [`PendingRequestQueue`]: bridges local outgoing calls to a `poll://...` endpoint with the
//! remote polling peer that eventually claims and answers them. See the data model's invariants:
//! an entry is `pending`, `claimed`, or `completed`; transitions only forward, and at most one
//! consumer (one `dequeue` call) ever sees a given entry.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use wire::{RequestMessage, ResponseMessage};

use crate::error::ExchangeError;

const STATE_PENDING: u8 = 0;
const STATE_CLAIMED: u8 = 1;
const STATE_COMPLETED: u8 = 2;
/// Terminal state for an entry that was cancelled, or timed out, before any consumer claimed it.
/// Distinct from `COMPLETED` so a late `dequeue` popping it from the front of the deque can tell
/// "already answered" apart from "never going to be answered" purely for log clarity; both are
/// simply skipped.
const STATE_TOMBSTONED: u8 = 3;

struct Entry {
    request: RequestMessage,
    state: AtomicU8,
    claimed: Notify,
    sender: StdMutex<Option<oneshot::Sender<ResponseMessage>>>,
}

/// A single consumer's claim on an enqueued request: the request itself plus the means to
/// complete it. Dropping a `PendingRequest` without calling [`PendingRequest::complete`] leaves
/// the producer waiting until its response deadline elapses — the remote polling peer is expected
/// to always complete what it claims, but a transport failure on the polling side will still
/// surface to the producer as a timeout rather than hang forever.
pub struct PendingRequest {
    entry: Arc<Entry>,
}

impl PendingRequest {
    pub fn request(&self) -> &RequestMessage {
        &self.entry.request
    }

    /// Realizes `ApplyResponse`: signals the waiting producer with `response`. A no-op if the
    /// entry was already completed (defensive — a well-behaved caller completes each
    /// `PendingRequest` exactly once).
    pub fn complete(self, response: ResponseMessage) {
        if self
            .entry
            .state
            .compare_exchange(STATE_CLAIMED, STATE_COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(sender) = self.entry.sender.lock().unwrap().take() {
                let _ = sender.send(response);
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Arc<Entry>>,
}

/// Per-subscription-URI queue of requests awaiting a polling peer. See [`QueueMap`] for the
/// lazily-created, idempotent-per-URI map callers actually look these up through.
pub struct PendingRequestQueue {
    inner: Mutex<Inner>,
    pushed: Notify,
}

impl Default for PendingRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequestQueue {
    pub fn new() -> PendingRequestQueue {
        PendingRequestQueue {
            inner: Mutex::new(Inner::default()),
            pushed: Notify::new(),
        }
    }

    /// Enqueues `request` and waits for it to be claimed and answered, or for either deadline to
    /// elapse or `cancellation` to fire. `collection_deadline` bounds the wait for a consumer to
    /// claim the entry; `response_deadline` bounds the wait, once claimed, for the response.
    pub async fn queue_and_wait(
        &self,
        request: RequestMessage,
        collection_deadline: Duration,
        response_deadline: Duration,
        cancellation: CancellationToken,
    ) -> Result<ResponseMessage, ExchangeError> {
        let (sender, receiver) = oneshot::channel();
        let entry = Arc::new(Entry {
            request,
            state: AtomicU8::new(STATE_PENDING),
            claimed: Notify::new(),
            sender: StdMutex::new(Some(sender)),
        });

        {
            let mut inner = self.inner.lock().await;
            inner.entries.push_back(entry.clone());
        }
        self.pushed.notify_one();

        if entry.state.load(Ordering::Acquire) == STATE_PENDING {
            let claimed = entry.claimed.notified();
            tokio::pin!(claimed);

            tokio::select! {
                _ = cancellation.cancelled() => {
                    entry
                        .state
                        .compare_exchange(STATE_PENDING, STATE_TOMBSTONED, Ordering::AcqRel, Ordering::Acquire)
                        .ok();
                    return Err(ExchangeError::ShuttingDown);
                }
                _ = &mut claimed => {}
                _ = tokio::time::sleep(collection_deadline) => {
                    let tombstoned = entry
                        .state
                        .compare_exchange(STATE_PENDING, STATE_TOMBSTONED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    if tombstoned {
                        return Err(ExchangeError::CollectionTimeout);
                    }
                    // Claimed concurrently right at the deadline; fall through to phase 2.
                }
            }
        }

        tokio::select! {
            _ = cancellation.cancelled() => Err(ExchangeError::ShuttingDown),
            result = tokio::time::timeout(response_deadline, receiver) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(ExchangeError::Cancelled),
                Err(_) => Err(ExchangeError::ResponseTimeout),
            },
        }
    }

    /// Waits up to `max_wait` for an enqueued entry, claims the first live one it finds (skipping
    /// any tombstoned or already-claimed stragglers left at the front), and returns it. Returns
    /// `None` if nothing was claimable within `max_wait`.
    pub async fn dequeue(&self, max_wait: Duration) -> Option<PendingRequest> {
        let deadline = Instant::now() + max_wait;

        loop {
            if let Some(entry) = self.claim_one().await {
                // `notify_one`, not `notify_waiters` — the latter only wakes a waiter already
                // registered at the moment it's called and leaves no permit behind, so a producer
                // whose `notified()` call lands just after this would miss the wake entirely and
                // block out the full collection deadline. `notify_one` stores a permit if nobody
                // is listening yet, which is exactly this entry's single-producer case.
                entry.claimed.notify_one();
                return Some(PendingRequest { entry });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            let pushed = self.pushed.notified();
            tokio::pin!(pushed);

            tokio::select! {
                _ = &mut pushed => {}
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    /// Pops entries off the front until it claims a pending one (dropping tombstoned entries as
    /// it goes — the amortized O(1) compaction point for cancelled/timed-out entries) or the
    /// queue is empty.
    async fn claim_one(&self) -> Option<Arc<Entry>> {
        let mut inner = self.inner.lock().await;
        while let Some(entry) = inner.entries.pop_front() {
            if entry
                .state
                .compare_exchange(STATE_PENDING, STATE_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(entry);
            }
        }
        None
    }

    /// Number of entries still sitting in the queue, including any not-yet-compacted tombstones.
    /// Exposed for tests.
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

/// Lazily-populated map from subscription URI to its [`PendingRequestQueue`], shared by the
/// runtime dispatcher (producers calling `poll://...`) and the listener (consumers arriving as
/// `MX-SUBSCRIBER`). Creation is idempotent: concurrent first references to the same URI all
/// observe the same queue.
#[derive(Default)]
pub struct QueueMap {
    queues: Mutex<HashMap<String, Arc<PendingRequestQueue>>>,
}

impl QueueMap {
    pub fn new() -> QueueMap {
        QueueMap::default()
    }

    pub async fn get_or_create(&self, subscription_uri: &str) -> Arc<PendingRequestQueue> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(subscription_uri.to_string())
            .or_insert_with(|| Arc::new(PendingRequestQueue::new()))
            .clone()
    }

    /// Returns the queue for `subscription_uri` only if it already exists, without creating one.
    pub async fn get(&self, subscription_uri: &str) -> Option<Arc<PendingRequestQueue>> {
        self.queues.lock().await.get(subscription_uri).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire::{ActivityId, Endpoint, Value};

    fn sample_request() -> RequestMessage {
        RequestMessage::new(
            ActivityId::new(),
            Endpoint::poll("poll://SQ-TEST"),
            "IEchoService",
            "SayHello",
            vec![Value::Str("Paul".to_string())],
        )
    }

    #[tokio::test]
    async fn collection_timeout_when_nobody_claims() {
        let queue = PendingRequestQueue::new();
        let result = queue
            .queue_and_wait(sample_request(), Duration::from_millis(20), Duration::from_secs(5), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExchangeError::CollectionTimeout)));
        assert_eq!(queue.len().await, 1, "tombstoned entry stays until the next dequeue compacts it");
    }

    #[tokio::test]
    async fn claim_then_complete_round_trips_response() {
        let queue = Arc::new(PendingRequestQueue::new());
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .queue_and_wait(sample_request(), Duration::from_secs(5), Duration::from_secs(5), CancellationToken::new())
                    .await
            })
        };

        let pending = loop {
            if let Some(p) = queue.dequeue(Duration::from_secs(1)).await {
                break p;
            }
        };

        assert_eq!(pending.request().method_name(), "SayHello");
        let request_id = pending.request().request_id();
        pending.complete(ResponseMessage::success(request_id, Value::Str("Paul...".to_string())));

        let response = producer.await.unwrap().unwrap();
        assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));
    }

    #[tokio::test]
    async fn dequeue_returns_none_when_empty() {
        let queue = PendingRequestQueue::new();
        let got = queue.dequeue(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn each_entry_is_claimed_by_exactly_one_consumer() {
        let queue = Arc::new(PendingRequestQueue::new());
        let _producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let _ = queue
                    .queue_and_wait(sample_request(), Duration::from_secs(5), Duration::from_secs(5), CancellationToken::new())
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;

        let (a, b) = tokio::join!(
            queue.dequeue(Duration::from_millis(50)),
            queue.dequeue(Duration::from_millis(50))
        );
        let claimed_count = [a, b].into_iter().flatten().count();
        assert_eq!(claimed_count, 1);
    }

    #[tokio::test]
    async fn queue_map_creation_is_idempotent_across_concurrent_lookups() {
        let map = Arc::new(QueueMap::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = map.clone();
            handles.push(tokio::spawn(async move {
                Arc::as_ptr(&map.get_or_create("poll://SQ-SHARED").await) as usize
            }));
        }

        let mut pointers = Vec::new();
        for handle in handles {
            pointers.push(handle.await.unwrap());
        }

        assert!(pointers.windows(2).all(|w| w[0] == w[1]), "all lookups must return the same queue");
    }
}
