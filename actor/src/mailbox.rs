// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox queue
//!
//! [`MailboxQueue`] is the thread-safe, double-ended queue behind every actor mailbox and
//! behind every outbound network connection.
//!
//! ## Ordering
//!
//! - Items inserted with [`MailboxQueue::append`] are taken from the head in FIFO order.
//! - Items inserted with [`MailboxQueue::prepend`] go in front of everything already
//!   queued. Control messages use this to overtake regular traffic.
//! - [`MailboxQueue::try_take_tail`] removes the most recently inserted item that is still
//!   queued, regardless of which end it was inserted at, leaving the order of the
//!   remaining items untouched.
//!
//! ## Ownership
//!
//! The queue owns every item until a take operation hands it to the caller. No
//! reference to a queued item ever escapes the internal lock.
//!
//! ## Blocking
//!
//! Only [`MailboxQueue::try_take_head_for`] blocks, and only inside a timed condition
//! variable wait. Inserting into an empty queue wakes one parked consumer.
//! [`MailboxQueue::close`] wakes all of them; it is the signal used when a queue's owner
//! goes away while a worker is parked on it.
//!
//! [`MailboxQueue::empty`] reads an atomic counter without taking the lock. It is a
//! snapshot that can be stale under concurrent mutation and is meant for heuristics.
//!

use parking_lot::{Condvar, Mutex};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Queued item tagged with its insertion sequence number.
struct Slot<T> {
    seq: u64,
    item: T,
}

struct Inner<T> {
    items: VecDeque<Slot<T>>,
    next_seq: u64,
}

impl<T> Inner<T> {
    fn slot(&mut self, item: T) -> Slot<T> {
        let seq = self.next_seq;
        self.next_seq += 1;
        Slot { seq, item }
    }
}

/// Thread-safe double-ended queue guarded by a single mutex.
pub struct MailboxQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    len: AtomicUsize,
    closed: AtomicBool,
}

impl<T> Default for MailboxQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MailboxQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                next_seq: 0,
            }),
            available: Condvar::new(),
            len: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends `item` at the tail in O(1).
    pub fn append(&self, item: T) {
        let mut inner = self.inner.lock();
        let slot = inner.slot(item);
        let was_empty = inner.items.is_empty();
        inner.items.push_back(slot);
        self.len.store(inner.items.len(), Ordering::Release);
        if was_empty {
            self.available.notify_one();
        }
    }

    /// Inserts `item` at the head in O(1), ahead of everything already queued.
    pub fn prepend(&self, item: T) {
        let mut inner = self.inner.lock();
        let slot = inner.slot(item);
        let was_empty = inner.items.is_empty();
        inner.items.push_front(slot);
        self.len.store(inner.items.len(), Ordering::Release);
        if was_empty {
            self.available.notify_one();
        }
    }

    /// Removes the head item, if any, without blocking.
    pub fn try_take_head(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        self.pop_head(&mut inner)
    }

    /// Removes the head item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` once the timeout elapses with the queue still empty, or as soon
    /// as the queue is closed and drained. A timeout too large to form a deadline
    /// waits without one.
    pub fn try_take_head_for(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !self.is_closed() {
            match deadline {
                Some(deadline) => {
                    if self
                        .available
                        .wait_until(&mut inner, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.available.wait(&mut inner),
            }
        }
        self.pop_head(&mut inner)
    }

    /// Removes the most recently inserted item still in the queue.
    ///
    /// Every insertion lands on one of the two ends and removals only happen at the
    /// ends, so that item is always at the head or at the tail.
    pub fn try_take_tail(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let front = inner.items.front().map(|slot| slot.seq)?;
        let back = inner.items.back().map(|slot| slot.seq)?;
        let slot = if front > back {
            inner.items.pop_front()
        } else {
            inner.items.pop_back()
        };
        self.len.store(inner.items.len(), Ordering::Release);
        slot.map(|slot| slot.item)
    }

    /// Lock-free, possibly stale emptiness check.
    pub fn empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    /// Number of queued items, possibly stale.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Marks the queue closed and wakes every parked consumer.
    ///
    /// Queued items stay available to non-blocking takes.
    pub fn close(&self) {
        let _inner = self.inner.lock();
        self.closed.store(true, Ordering::Release);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Removes every queued item, in head to tail order.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let items = inner.items.drain(..).map(|slot| slot.item).collect();
        self.len.store(0, Ordering::Release);
        items
    }

    fn pop_head(&self, inner: &mut Inner<T>) -> Option<T> {
        let slot = inner.items.pop_front()?;
        self.len.store(inner.items.len(), Ordering::Release);
        Some(slot.item)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = MailboxQueue::new();
        assert!(queue.empty());
        queue.append(1);
        queue.append(2);
        queue.append(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_take_head(), Some(1));
        assert_eq!(queue.try_take_head(), Some(2));
        assert_eq!(queue.try_take_head(), Some(3));
        assert_eq!(queue.try_take_head(), None);
        assert!(queue.empty());
    }

    #[test]
    fn test_prepend_overtakes_appended() {
        let queue = MailboxQueue::new();
        queue.append("a");
        queue.append("b");
        queue.prepend("exit");
        assert_eq!(queue.try_take_head(), Some("exit"));
        assert_eq!(queue.try_take_head(), Some("a"));
        assert_eq!(queue.try_take_head(), Some("b"));
    }

    #[test]
    fn test_prepend_is_lifo() {
        let queue = MailboxQueue::new();
        queue.prepend(1);
        queue.prepend(2);
        assert_eq!(queue.try_take_head(), Some(2));
        assert_eq!(queue.try_take_head(), Some(1));
    }

    #[test]
    fn test_take_tail_removes_most_recent_insert() {
        let queue = MailboxQueue::new();
        queue.append(1);
        queue.append(2);
        queue.prepend(0);
        // Most recent insertion was the prepend.
        assert_eq!(queue.try_take_tail(), Some(0));
        // Then the last append.
        assert_eq!(queue.try_take_tail(), Some(2));
        queue.append(3);
        queue.append(4);
        assert_eq!(queue.try_take_tail(), Some(4));
        // Remaining order is untouched.
        assert_eq!(queue.try_take_head(), Some(1));
        assert_eq!(queue.try_take_head(), Some(3));
        assert_eq!(queue.try_take_tail(), None);
    }

    #[test]
    fn test_timed_take_receives_late_item() {
        let queue = Arc::new(MailboxQueue::new());
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.append(42);
        });
        let item = queue.try_take_head_for(Duration::from_secs(5));
        assert_eq!(item, Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_parked_consumer() {
        let queue: Arc<MailboxQueue<u32>> = Arc::new(MailboxQueue::new());
        let consumer = queue.clone();
        let start = Instant::now();
        let handle =
            thread::spawn(move || consumer.try_take_head_for(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(handle.join().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_unbounded_timeout_waits_without_deadline() {
        let queue = Arc::new(MailboxQueue::new());
        queue.append(1);
        assert_eq!(queue.try_take_head_for(Duration::MAX), Some(1));

        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.append(2);
        });
        assert_eq!(queue.try_take_head_for(Duration::MAX), Some(2));
        handle.join().unwrap();

        let consumer = queue.clone();
        let parked = thread::spawn(move || consumer.try_take_head_for(Duration::MAX));
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(parked.join().unwrap(), None);
    }

    #[test]
    fn test_closed_queue_still_drains() {
        let queue = MailboxQueue::new();
        queue.append(1);
        queue.append(2);
        queue.close();
        assert_eq!(queue.try_take_head_for(Duration::from_secs(1)), Some(1));
        assert_eq!(queue.drain(), vec![2]);
        assert!(queue.empty());
    }
}
