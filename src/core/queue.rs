//! Thread-safe work queue feeding the copy workers
//!
//! A FIFO with a terminal "done" signal. Producers push file jobs, any
//! number of worker threads pop them. Once `set_done` is called and the
//! queue drains, blocked consumers wake up and observe the end of work.
//! Consumers may also push items back (a worker that cannot admit a job
//! because its buffer pool is momentarily exhausted returns it here).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    done: bool,
}

/// Multi-producer, multi-consumer FIFO with a done flag
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                done: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Push a single item and wake one waiter
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock().expect("work queue mutex poisoned");
            inner.queue.push_back(item);
        }
        self.cond.notify_one();
    }

    /// Push a batch of items and wake all waiters
    pub fn push_bulk(&self, items: impl IntoIterator<Item = T>) {
        {
            let mut inner = self.inner.lock().expect("work queue mutex poisoned");
            inner.queue.extend(items);
        }
        self.cond.notify_all();
    }

    /// Pop the front item without blocking
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("work queue mutex poisoned");
        inner.queue.pop_front()
    }

    /// Pop the front item, blocking until one is available.
    ///
    /// Returns `None` only once the queue is done **and** empty.
    pub fn wait_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("work queue mutex poisoned");
        loop {
            if let Some(item) = inner.queue.pop_front() {
                return Some(item);
            }
            if inner.done {
                return None;
            }
            inner = self
                .cond
                .wait(inner)
                .expect("work queue mutex poisoned");
        }
    }

    /// Signal that no more items will be produced
    pub fn set_done(&self) {
        {
            let mut inner = self.inner.lock().expect("work queue mutex poisoned");
            inner.done = true;
        }
        self.cond.notify_all();
    }

    /// True once the done flag is set and the queue has drained
    pub fn is_done(&self) -> bool {
        let inner = self.inner.lock().expect("work queue mutex poisoned");
        inner.done && inner.queue.is_empty()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("work queue mutex poisoned");
        inner.queue.len()
    }

    /// True if no items are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_push_bulk() {
        let queue = WorkQueue::new();
        queue.push_bulk(vec![10, 20, 30]);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some(10));
    }

    #[test]
    fn test_done_semantics() {
        let queue = WorkQueue::new();
        queue.push(1);
        queue.set_done();

        // Done flag alone is not enough; the queue must also be empty.
        assert!(!queue.is_done());
        assert_eq!(queue.wait_pop(), Some(1));
        assert!(queue.is_done());
        assert_eq!(queue.wait_pop(), None::<i32>);
    }

    #[test]
    fn test_wait_pop_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        queue.push(42);
        assert_eq!(consumer.join().expect("consumer panicked"), Some(42));
    }

    #[test]
    fn test_wait_pop_wakes_on_done() {
        let queue: Arc<WorkQueue<i32>> = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        queue.set_done();
        assert_eq!(consumer.join().expect("consumer panicked"), None);
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        let queue = Arc::new(WorkQueue::new());
        let total: u64 = 1000;

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..(total / 4) {
                        queue.push(p * (total / 4) + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut count = 0u64;
                    while queue.wait_pop().is_some() {
                        count += 1;
                    }
                    count
                })
            })
            .collect();

        for p in producers {
            p.join().expect("producer panicked");
        }
        queue.set_done();

        let consumed: u64 = consumers
            .into_iter()
            .map(|c| c.join().expect("consumer panicked"))
            .sum();
        assert_eq!(consumed, total);
    }
}
