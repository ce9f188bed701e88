//! Bounded drop-oldest queue between ingestion and the emit task.
//!
//! The pushing side never blocks and never grows the buffer past capacity:
//! on overflow the oldest unsent record is dropped and the drop counter
//! increments. The popping side awaits quietly until a record or close
//! arrives.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::sync::Notify;
use tracing::debug;

use crate::classify::TrafficRecord;

pub struct RecordQueue {
    buf: Mutex<VecDeque<TrafficRecord>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl RecordQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push a record, dropping the oldest queued one on overflow.
    /// Never blocks.
    pub fn push(&self, record: TrafficRecord) {
        {
            let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
            if buf.len() == self.capacity {
                buf.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    event_name = "ringbuf.record_dropped",
                    capacity = self.capacity,
                    dropped_total = dropped,
                    "emit queue full, dropped oldest unsent record"
                );
            }
            buf.push_back(record);
        }
        self.notify.notify_one();
    }

    /// Pop the oldest record, waiting until one arrives. Returns `None`
    /// once the queue is closed and drained.
    pub async fn pop(&self) -> Option<TrafficRecord> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register the waiter before checking state, so a push or close
            // landing between the check and the await cannot be missed.
            notified.as_mut().enable();
            {
                let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(record) = buf.pop_front() {
                    return Some(record);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue. Queued records stay poppable; `pop` returns `None`
    /// only after the buffer drains.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Discard everything still queued, counting each record as a drop.
    /// For stop paths where the consumer has been given up on.
    pub fn abandon(&self) -> u64 {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let abandoned = buf.len() as u64;
        buf.clear();
        if abandoned > 0 {
            self.dropped.fetch_add(abandoned, Ordering::Relaxed);
        }
        abandoned
    }

    /// Records dropped to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use tokio::time::{Duration, timeout};

    use super::*;
    use crate::classify::{Endpoint, ProtocolLabel};

    fn record(tag: u32) -> TrafficRecord {
        TrafficRecord {
            timestamp: SystemTime::now(),
            protocol: ProtocolLabel::Udp,
            src: Endpoint::none(),
            dst: Endpoint::none(),
            wire_len: tag,
            summary: String::new(),
        }
    }

    #[tokio::test]
    async fn push_pop_preserves_order() {
        let queue = RecordQueue::new(8);
        queue.push(record(1));
        queue.push(record(2));
        assert_eq!(queue.pop().await.unwrap().wire_len, 1);
        assert_eq!(queue.pop().await.unwrap().wire_len, 2);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let queue = RecordQueue::new(2);
        queue.push(record(1));
        queue.push(record(2));
        queue.push(record(3));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await.unwrap().wire_len, 2);
        assert_eq!(queue.pop().await.unwrap().wire_len, 3);
    }

    #[tokio::test]
    async fn pushing_never_blocks_with_no_consumer() {
        let queue = RecordQueue::new(4);
        for i in 0..1000 {
            queue.push(record(i));
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.dropped(), 996);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = RecordQueue::new(8);
        queue.push(record(1));
        queue.close();

        assert_eq!(queue.pop().await.unwrap().wire_len, 1);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_push_from_another_task() {
        let queue = Arc::new(RecordQueue::new(8));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(record(7));

        let got = timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop wakes")
            .expect("task joins");
        assert_eq!(got.unwrap().wire_len, 7);
    }

    #[tokio::test]
    async fn abandon_discards_and_counts_queued_records() {
        let queue = RecordQueue::new(8);
        queue.push(record(1));
        queue.push(record(2));

        assert_eq!(queue.abandon(), 2);
        assert_eq!(queue.dropped(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_never_misses_a_racing_close() {
        // Close immediately after spawning the popper, repeatedly, so the
        // close regularly lands between the popper's empty-buffer check and
        // its await.
        for _ in 0..100 {
            let queue = Arc::new(RecordQueue::new(4));
            let popper = {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await })
            };
            queue.close();

            let got = timeout(Duration::from_secs(1), popper)
                .await
                .expect("pop wakes")
                .expect("task joins");
            assert!(got.is_none());
        }
    }

    #[tokio::test]
    async fn pop_wakes_on_close() {
        let queue = Arc::new(RecordQueue::new(8));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let got = timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop wakes")
            .expect("task joins");
        assert!(got.is_none());
    }
}
