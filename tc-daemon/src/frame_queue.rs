//! Bounded drop-oldest frame queue
//!
//! Producers never block: when the queue is full the oldest entry is
//! discarded. Consumers can poll, wait with a timeout, or take only the
//! newest entry.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

pub struct FrameQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> FrameQueue<T> {
    /// Capacity is clamped to at least one slot
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue, evicting the oldest item when full
    ///
    /// Returns false once the queue is closed.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
        }
        inner.items.push_back(item);
        drop(inner);
        self.ready.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Wait up to `timeout` for an item; `None` on timeout or when closed and empty
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.closed {
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.items.pop_front()
    }

    /// Empty the queue and return only the newest item
    pub fn drain_latest(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let latest = inner.items.pop_back();
        inner.items.clear();
        latest
    }

    /// Stop accepting items and wake any waiter
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_bound_drops_oldest() {
        let q = FrameQueue::new(3);
        for i in 0..10 {
            assert!(q.push(i));
            assert!(q.len() <= 3);
        }
        assert_eq!(q.dropped(), 7);
        assert_eq!(q.try_pop(), Some(7));
        assert_eq!(q.try_pop(), Some(8));
        assert_eq!(q.try_pop(), Some(9));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_drain_latest_delivers_newest() {
        let q = FrameQueue::new(5);
        for i in 0..4 {
            q.push(i);
        }
        assert_eq!(q.drain_latest(), Some(3));
        assert!(q.is_empty());
        assert_eq!(q.drain_latest(), None);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let q = FrameQueue::new(0);
        assert_eq!(q.capacity(), 1);
        q.push("a");
        q.push("b");
        assert_eq!(q.try_pop(), Some("b"));
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let q = Arc::new(FrameQueue::new(2));
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.push(42u32);
            })
        };
        assert_eq!(q.pop_timeout(Duration::from_secs(5)), Some(42));
        producer.join().unwrap();
    }

    #[test]
    fn test_close_rejects_and_wakes() {
        let q: Arc<FrameQueue<u8>> = Arc::new(FrameQueue::new(2));
        let waiter = {
            let q = q.clone();
            thread::spawn(move || q.pop_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(!q.push(1));
        assert!(q.is_closed());
    }
}
