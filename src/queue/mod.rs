//! Priority-ordered holding queue for requests that cannot be admitted
//! immediately.
//!
//! Ordering is `(priority desc, arrival asc)` over a binary heap, giving
//! O(log n) enqueue/dequeue. The payload is opaque to the queue. A single
//! mutex guards structural mutation; nothing here touches I/O.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::UserTier;

pub const MAX_PRIORITY: u8 = 100;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Depth beyond which `is_over_capacity` advises shedding load.
    pub capacity_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity_threshold: 100,
        }
    }
}

#[derive(Debug)]
pub struct QueuedRequest<T> {
    pub request_id: Uuid,
    pub priority: u8,
    pub enqueued_at: Instant,
    pub submitted_at: DateTime<Utc>,
    pub tier: UserTier,
    pub payload: T,
}

struct HeapEntry<T> {
    request: QueuedRequest<T>,
    seq: u64,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.seq == other.seq
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority wins; on ties the lower sequence
        // number (earlier arrival) wins.
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Snapshot over current contents; the histogram sums to `total_queued`
/// and `avg_wait` covers only entries still queued.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total_queued: usize,
    pub by_priority: BTreeMap<u8, usize>,
    pub avg_wait: Duration,
    pub queue_depth: usize,
}

struct QueueInner<T> {
    heap: BinaryHeap<HeapEntry<T>>,
    next_seq: u64,
}

pub struct PriorityQueue<T> {
    config: QueueConfig,
    inner: Mutex<QueueInner<T>>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<T> PriorityQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Priority is clamped to 0-100. Returns the assigned request id.
    pub fn enqueue(&self, payload: T, priority: u8, tier: UserTier) -> Uuid {
        let request_id = Uuid::new_v4();
        let request = QueuedRequest {
            request_id,
            priority: priority.min(MAX_PRIORITY),
            enqueued_at: Instant::now(),
            submitted_at: Utc::now(),
            tier,
            payload,
        };

        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(HeapEntry { request, seq });
        request_id
    }

    /// Enqueues at the tier's base priority.
    pub fn enqueue_for_tier(&self, payload: T, tier: UserTier) -> Uuid {
        self.enqueue(payload, tier.base_priority(), tier)
    }

    /// Highest priority out first; FIFO within equal priority. `None`
    /// when empty.
    pub fn dequeue_highest(&self) -> Option<QueuedRequest<T>> {
        self.lock().heap.pop().map(|entry| entry.request)
    }

    /// Removes a queued entry, e.g. when the client disconnects before
    /// admission. O(n) rebuild; cancellation is rare next to enqueue.
    pub fn cancel(&self, request_id: Uuid) -> Option<QueuedRequest<T>> {
        let mut inner = self.lock();
        let entries = std::mem::take(&mut inner.heap).into_vec();
        let mut cancelled = None;
        for entry in entries {
            if entry.request.request_id == request_id {
                cancelled = Some(entry.request);
            } else {
                inner.heap.push(entry);
            }
        }
        cancelled
    }

    pub fn drain(&self) -> Vec<QueuedRequest<T>> {
        let mut inner = self.lock();
        std::mem::take(&mut inner.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.request)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Advisory load-shedding signal: depth strictly above the configured
    /// threshold.
    pub fn is_over_capacity(&self) -> bool {
        self.len() > self.config.capacity_threshold
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let total_queued = inner.heap.len();

        let mut by_priority = BTreeMap::new();
        let mut total_wait = Duration::ZERO;
        for entry in inner.heap.iter() {
            *by_priority.entry(entry.request.priority).or_insert(0) += 1;
            total_wait += entry.request.enqueued_at.elapsed();
        }

        let avg_wait = if total_queued == 0 {
            Duration::ZERO
        } else {
            total_wait / total_queued as u32
        };

        QueueStats {
            total_queued,
            by_priority,
            avg_wait,
            queue_depth: total_queued,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_priority_first() {
        let queue = PriorityQueue::default();
        queue.enqueue("req-a", 25, UserTier::Free);
        queue.enqueue("req-b", 100, UserTier::Enterprise);

        let first = queue.dequeue_highest().unwrap();
        assert_eq!(first.payload, "req-b");
        let second = queue.dequeue_highest().unwrap();
        assert_eq!(second.payload, "req-a");
    }

    #[test]
    fn test_fifo_within_equal_priority() {
        let queue = PriorityQueue::default();
        queue.enqueue("first", 50, UserTier::Standard);
        queue.enqueue("second", 50, UserTier::Standard);
        queue.enqueue("third", 50, UserTier::Standard);

        assert_eq!(queue.dequeue_highest().unwrap().payload, "first");
        assert_eq!(queue.dequeue_highest().unwrap().payload, "second");
        assert_eq!(queue.dequeue_highest().unwrap().payload, "third");
    }

    #[test]
    fn test_empty_dequeue() {
        let queue: PriorityQueue<&str> = PriorityQueue::default();
        assert!(queue.dequeue_highest().is_none());
    }

    #[test]
    fn test_priority_clamped() {
        let queue = PriorityQueue::default();
        queue.enqueue("over", 250, UserTier::Enterprise);
        assert_eq!(queue.dequeue_highest().unwrap().priority, MAX_PRIORITY);
    }

    #[test]
    fn test_enqueue_for_tier() {
        let queue = PriorityQueue::default();
        queue.enqueue_for_tier("pro", UserTier::Pro);
        let entry = queue.dequeue_highest().unwrap();
        assert_eq!(entry.priority, UserTier::Pro.base_priority());
        assert_eq!(entry.tier, UserTier::Pro);
    }

    #[test]
    fn test_cancel_removes_entry() {
        let queue = PriorityQueue::default();
        let keep = queue.enqueue("keep", 50, UserTier::Standard);
        let gone = queue.enqueue("gone", 90, UserTier::Pro);

        let cancelled = queue.cancel(gone).unwrap();
        assert_eq!(cancelled.payload, "gone");
        assert!(queue.cancel(gone).is_none());

        let remaining = queue.dequeue_highest().unwrap();
        assert_eq!(remaining.request_id, keep);
    }

    #[test]
    fn test_stats_histogram_sums_to_total() {
        let queue = PriorityQueue::default();
        queue.enqueue("a", 10, UserTier::Free);
        queue.enqueue("b", 10, UserTier::Free);
        queue.enqueue("c", 90, UserTier::Enterprise);

        let stats = queue.stats();
        assert_eq!(stats.total_queued, 3);
        assert_eq!(stats.queue_depth, 3);
        assert_eq!(stats.by_priority.values().sum::<usize>(), stats.total_queued);
        assert_eq!(stats.by_priority[&10], 2);
        assert_eq!(stats.by_priority[&90], 1);
    }

    #[test]
    fn test_stats_avg_wait_grows() {
        let queue = PriorityQueue::default();
        queue.enqueue("a", 10, UserTier::Free);
        std::thread::sleep(Duration::from_millis(15));

        let stats = queue.stats();
        assert!(stats.avg_wait >= Duration::from_millis(10));
    }

    #[test]
    fn test_over_capacity_threshold() {
        let queue = PriorityQueue::new(QueueConfig {
            capacity_threshold: 2,
        });
        queue.enqueue("a", 10, UserTier::Free);
        queue.enqueue("b", 10, UserTier::Free);
        assert!(!queue.is_over_capacity());

        queue.enqueue("c", 10, UserTier::Free);
        assert!(queue.is_over_capacity());
    }

    #[test]
    fn test_drain_returns_priority_order() {
        let queue = PriorityQueue::default();
        queue.enqueue("low", 10, UserTier::Free);
        queue.enqueue("high", 90, UserTier::Enterprise);
        queue.enqueue("mid", 50, UserTier::Standard);

        let drained: Vec<_> = queue.drain().into_iter().map(|r| r.payload).collect();
        assert_eq!(drained, vec!["high", "mid", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_enqueue_dequeue() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(PriorityQueue::default());

        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.enqueue(worker * 100 + i, (i % 100) as u8, UserTier::Standard);
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = 0;
                    while queue.dequeue_highest().is_some() {
                        taken += 1;
                    }
                    taken
                })
            })
            .collect();

        let total: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 200);
        assert!(queue.is_empty());
    }
}
