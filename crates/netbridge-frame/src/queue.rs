use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Thread-safe FIFO with a bounded blocking pop.
///
/// Producers never block. Consumers either poll with [`try_pop`] or wait at
/// most a given timeout with [`pop_timeout`].
///
/// [`try_pop`]: DatagramQueue::try_pop
/// [`pop_timeout`]: DatagramQueue::pop_timeout
#[derive(Debug)]
pub struct DatagramQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for DatagramQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DatagramQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panicking producer cannot leave a VecDeque half-updated.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an item and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Put an item back at the head of the queue.
    pub fn push_front(&self, item: T) {
        self.lock().push_front(item);
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// May return `None` before the timeout when woken by [`wake_all`] or
    /// spuriously; callers poll in a loop and re-check their own state.
    ///
    /// [`wake_all`]: DatagramQueue::wake_all
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.lock();
        if items.is_empty() {
            items = self
                .ready
                .wait_timeout(items, timeout)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        items.pop_front()
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wake every waiting consumer without pushing anything.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }
}

/// A resettable flag that threads can wait on.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        *self.raised.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }

    /// Wait up to `timeout` for the signal and clear it.
    ///
    /// Returns `true` if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.raised.lock().unwrap_or_else(|e| e.into_inner());
        let (mut raised, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *raised, false)
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let queue = DatagramQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push_front(0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue: DatagramQueue<u8> = DatagramQueue::new();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn pop_timeout_wakes_on_push_from_other_thread() {
        let queue = Arc::new(DatagramQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push("hello");
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        let got = loop {
            if let Some(item) = queue.pop_timeout(Duration::from_millis(100)) {
                break Some(item);
            }
            if Instant::now() >= deadline {
                break None;
            }
        };
        assert_eq!(got, Some("hello"));
        producer.join().expect("producer should finish");
    }

    #[test]
    fn signal_is_cleared_by_wait() {
        let signal = Signal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.wait_timeout(Duration::from_millis(5)));
        assert!(!signal.is_raised());
    }

    #[test]
    fn signal_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let raiser = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.raise();
            })
        };
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        raiser.join().expect("raiser should finish");
    }
}
