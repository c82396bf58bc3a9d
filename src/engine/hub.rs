//! Subscription hub: fans the sequenced stream out to pull subscribers.
//!
//! Recent events are served from the in-memory ring; a subscriber that
//! has fallen below the ring backfills from the store until it catches
//! up. Subscribers park on a watch of the published head and are woken
//! whenever the sequencer publishes a batch.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::application::ports::{EventStore, StoreError};
use crate::domain::InvalidationEvent;

use super::lock::mutex_lock;
use super::ring::EventRing;

const SOURCE: &str = "engine::hub";

/// Per-fetch batch caps. A batch never exceeds `max_count` events or
/// `max_bytes` of payload, except that a single oversized event is still
/// delivered alone so the subscriber always makes progress.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_count: usize,
    pub max_bytes: u64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("subscription cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(StoreError),
}

pub struct SubscriptionHub {
    ring: Mutex<EventRing>,
    store: Arc<dyn EventStore>,
    head_tx: watch::Sender<i64>,
}

impl SubscriptionHub {
    pub fn new(store: Arc<dyn EventStore>, ring_capacity: usize) -> Arc<Self> {
        let (head_tx, _) = watch::channel(0);
        Arc::new(Self {
            ring: Mutex::new(EventRing::new(ring_capacity)),
            store,
            head_tx,
        })
    }

    /// Seed the ring with the tail of the durable log (ascending by seq).
    /// Called by the sequencer on cold start and after a conflict reload.
    pub(crate) fn install(&self, events: Vec<InvalidationEvent>) {
        let head = events.last().map(InvalidationEvent::sequence);
        mutex_lock(&self.ring, SOURCE, "install").load(events);
        if let Some(head) = head {
            self.advance_head(head);
        }
    }

    /// Publish one sequencer pass as a single atomic batch: subscribers
    /// observe either none or all of it.
    pub(crate) fn publish(&self, batch: &[InvalidationEvent]) {
        let Some(last) = batch.last() else {
            return;
        };
        mutex_lock(&self.ring, SOURCE, "publish").append(batch);
        self.advance_head(last.sequence());
    }

    /// Highest published sequence number, `None` before the first batch.
    pub fn head_seq(&self) -> Option<i64> {
        let head = *self.head_tx.borrow();
        (head > 0).then_some(head)
    }

    pub fn subscribe(self: &Arc<Self>, from_seq: i64, limits: FetchLimits) -> Subscription {
        Subscription {
            head_rx: self.head_tx.subscribe(),
            hub: Arc::clone(self),
            next_seq: from_seq.max(1),
            limits,
        }
    }

    fn advance_head(&self, head: i64) {
        self.head_tx.send_if_modified(|current| {
            if head > *current {
                *current = head;
                true
            } else {
                false
            }
        });
    }
}

/// Cursor over the sequenced stream for one consumer.
pub struct Subscription {
    hub: Arc<SubscriptionHub>,
    head_rx: watch::Receiver<i64>,
    next_seq: i64,
    limits: FetchLimits,
}

enum ServePlan {
    /// Nothing at or beyond the cursor yet; park until publish.
    Wait,
    /// Cursor is below the ring; read the gap from the store.
    Backfill { ring_lowest: i64 },
    Batch(Vec<InvalidationEvent>),
}

impl Subscription {
    /// Next cursor position: the seq immediately after the last event
    /// returned by `fetch`.
    pub fn next_seq(&self) -> i64 {
        self.next_seq
    }

    /// Return the next batch of events with `seq >= next_seq`, blocking
    /// until at least one is available or `cancel` fires.
    ///
    /// Returned batches are strictly increasing and gap-free across
    /// consecutive calls.
    pub async fn fetch(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<InvalidationEvent>, FetchError> {
        loop {
            let plan = {
                let ring = mutex_lock(&self.hub.ring, SOURCE, "fetch");
                match ring.lowest_seq() {
                    None => ServePlan::Wait,
                    Some(lowest) if self.next_seq < lowest => {
                        ServePlan::Backfill { ring_lowest: lowest }
                    }
                    Some(_) => {
                        let batch = take_batch(ring.iter(), self.next_seq, self.limits);
                        if batch.is_empty() {
                            ServePlan::Wait
                        } else {
                            ServePlan::Batch(batch)
                        }
                    }
                }
            };

            match plan {
                ServePlan::Batch(batch) => return Ok(self.advance(batch)),
                ServePlan::Backfill { ring_lowest } => {
                    let events = self
                        .hub
                        .store
                        .get_events_from(self.next_seq, self.limits.max_count as u64)
                        .await
                        .map_err(FetchError::Store)?;
                    let batch = take_batch(events.iter(), self.next_seq, self.limits);
                    if !batch.is_empty() {
                        return Ok(self.advance(batch));
                    }
                    // The store no longer holds anything between the
                    // cursor and the ring: those events were trimmed.
                    // Skip ahead rather than spin.
                    warn!(
                        from_seq = self.next_seq,
                        ring_lowest, "Events below the ring are gone from the store; skipping ahead"
                    );
                    self.next_seq = ring_lowest;
                }
                ServePlan::Wait => {
                    let target = self.next_seq;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        result = self.head_rx.wait_for(|head| *head >= target) => {
                            if result.is_err() {
                                return Err(FetchError::Cancelled);
                            }
                        }
                    }
                }
            }
        }
    }

    fn advance(&mut self, batch: Vec<InvalidationEvent>) -> Vec<InvalidationEvent> {
        if let Some(last) = batch.last() {
            self.next_seq = last.sequence() + 1;
        }
        batch
    }
}

/// Collect events with `seq >= from_seq` under the count and byte caps.
/// Events below the cursor (ring/store overlap) are elided by seq. The
/// first event is always taken so an oversized payload cannot stall the
/// stream.
fn take_batch<'a>(
    events: impl Iterator<Item = &'a InvalidationEvent>,
    from_seq: i64,
    limits: FetchLimits,
) -> Vec<InvalidationEvent> {
    let mut batch = Vec::new();
    let mut bytes = 0u64;

    for event in events {
        if event.sequence() < from_seq {
            continue;
        }
        if batch.len() >= limits.max_count.max(1) {
            break;
        }
        let size = event.size();
        if !batch.is_empty() && bytes.saturating_add(size) > limits.max_bytes {
            break;
        }
        bytes = bytes.saturating_add(size);
        batch.push(event.clone());
    }

    batch
}
