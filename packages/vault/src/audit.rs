//! Bounded best-effort audit queue. Per spec.md §5 ("multi-producer,
//! single-consumer queue; dropping *oldest* on overflow with a
//! dropped-events counter"), a full queue evicts the event that has been
//! waiting longest, not the new arrival — the opposite of a bounded
//! `mpsc` channel's `try_send`, which rejects the newest arrival instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::types::TokenEvent;

pub struct AuditQueue {
    capacity: usize,
    inner: Mutex<VecDeque<TokenEvent>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl AuditQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `event`, evicting the oldest queued event first if full.
    pub fn push(&self, event: TokenEvent) {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Dequeue the oldest event, waiting if the queue is currently empty.
    pub async fn pop(&self) -> TokenEvent {
        loop {
            if let Some(event) = self.inner.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    /// Count of events evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
