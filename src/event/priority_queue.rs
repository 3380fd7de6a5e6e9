//! # Cancellable Priority Queue
//!
//! A thread-safe min-heap of events keyed by timestamp.
//!
//! Cancellation only flips a flag on the queued entry. The entry stays in the heap
//! until it reaches the head, where `pop` discards it. Cancelling is therefore O(n)
//! for the predicate scan but never touches heap order, while `is_empty` has to scan
//! for a live entry.
//!
//! Events with equal timestamps pop in insertion order: every push takes the next value
//! of a per-queue sequence counter, which is the secondary sort key.
//!
//! All operations take one coarse lock for their whole duration. Predicates run while
//! that lock is held and must not call back into the same queue.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use thiserror::Error;
use tokio::sync::{futures::Notified, Notify};
use tracing::trace;

use super::types::Event;
use crate::timestamp::Timestamp;

/// An event as held by the queue.
///
/// Returned by `push`, `cancel` and `get` for inspection. Only the cancelled flag can
/// change after insertion, and only through [`PriorityQueue::cancel`].
pub struct ScheduledEvent {
    timestamp: Timestamp,
    sequence: u64,
    cancelled: AtomicBool,
    event: Arc<dyn Event>,
}

impl ScheduledEvent {
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn name(&self) -> &str {
        self.event.name()
    }

    pub fn event(&self) -> &Arc<dyn Event> {
        &self.event
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// Returns `true` only for the call that actually cancelled the entry.
    fn cancel(&self) -> bool {
        !self.cancelled.swap(true, AtomicOrdering::SeqCst)
    }

    fn sort_key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.sequence)
    }
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("name", &self.name())
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct HeapEntry(Arc<ScheduledEvent>);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.sort_key() == other.0.sort_key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap; reverse so the earliest (timestamp, sequence) wins.
        other.0.sort_key().cmp(&self.0.sort_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No live event is queued. Callers should retry later.
    #[error("Event queue is empty")]
    Empty,
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    next_sequence: u64,
}

#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    pushed: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // The heap stays consistent even if a predicate panicked mid-scan, so a poisoned
    // lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: Arc<dyn Event>) -> Arc<ScheduledEvent> {
        let scheduled = {
            let mut state = self.lock();
            let scheduled = Arc::new(ScheduledEvent {
                timestamp: event.timestamp(),
                sequence: state.next_sequence,
                cancelled: AtomicBool::new(false),
                event,
            });
            state.next_sequence += 1;
            state.heap.push(HeapEntry(scheduled.clone()));
            scheduled
        };
        trace!("Pushed {:?}", scheduled);
        self.pushed.notify_one();
        scheduled
    }

    /// Removes and returns the earliest live event, discarding cancelled entries found
    /// at the head on the way.
    pub fn pop(&self) -> QueueResult<Arc<ScheduledEvent>> {
        let mut state = self.lock();
        while let Some(HeapEntry(scheduled)) = state.heap.pop() {
            if scheduled.is_cancelled() {
                trace!("Discarded cancelled {:?}", scheduled);
                continue;
            }
            return Ok(scheduled);
        }
        Err(QueueError::Empty)
    }

    /// `true` iff no live event remains. O(n).
    pub fn is_empty(&self) -> bool {
        self.lock().heap.iter().all(|entry| entry.0.is_cancelled())
    }

    /// Marks every live event matching `predicate` as cancelled and returns them.
    ///
    /// Entries that were already cancelled are not passed to the predicate and are not
    /// returned again, so repeating a call cancels nothing new.
    pub fn cancel<P>(&self, predicate: P) -> Vec<Arc<ScheduledEvent>>
    where
        P: Fn(&ScheduledEvent) -> bool,
    {
        let state = self.lock();
        let mut cancelled: Vec<Arc<ScheduledEvent>> = state
            .heap
            .iter()
            .filter(|entry| !entry.0.is_cancelled() && predicate(entry.0.as_ref()))
            .filter(|entry| entry.0.cancel())
            .map(|entry| entry.0.clone())
            .collect();
        drop(state);
        cancelled.sort_by_key(|scheduled| scheduled.sort_key());
        trace!("Cancelled {} events", cancelled.len());
        cancelled
    }

    pub fn contains<P>(&self, predicate: P) -> bool
    where
        P: Fn(&ScheduledEvent) -> bool,
    {
        self.lock()
            .heap
            .iter()
            .any(|entry| !entry.0.is_cancelled() && predicate(entry.0.as_ref()))
    }

    /// Live events matching `predicate`, in pop order.
    pub fn get<P>(&self, predicate: P) -> Vec<Arc<ScheduledEvent>>
    where
        P: Fn(&ScheduledEvent) -> bool,
    {
        let mut matching: Vec<Arc<ScheduledEvent>> = self
            .lock()
            .heap
            .iter()
            .filter(|entry| !entry.0.is_cancelled() && predicate(entry.0.as_ref()))
            .map(|entry| entry.0.clone())
            .collect();
        matching.sort_by_key(|scheduled| scheduled.sort_key());
        matching
    }

    /// Physical number of entries, cancelled ones included.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Number of live entries.
    pub fn pending(&self) -> usize {
        self.lock()
            .heap
            .iter()
            .filter(|entry| !entry.0.is_cancelled())
            .count()
    }

    /// Timestamp of the event the next `pop` would return.
    pub fn peek_timestamp(&self) -> Option<Timestamp> {
        self.lock()
            .heap
            .iter()
            .filter(|entry| !entry.0.is_cancelled())
            .map(|entry| entry.0.timestamp)
            .min()
    }

    /// Resolves after the next `push`, or immediately if a push happened since the last
    /// wake-up was consumed.
    pub fn notified(&self) -> Notified<'_> {
        self.pushed.notified()
    }
}

impl fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .field("pending", &self.pending())
            .finish()
    }
}
