//! Cross-thread FIFOs feeding the selector threads.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Multi-producer FIFO drained by a single owner thread.
///
/// Producers may also take an item back out by predicate: the close
/// handshake enqueues first and only then checks whether the consumer is
/// still alive, so "un-enqueue if nobody will ever drain this" must be a
/// first-class operation.
pub struct Fifo<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Fifo<T> {
    pub fn new() -> Fifo<T> {
        Fifo {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Remove and return the first item matching `pred`.
    pub fn remove(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut queue = self.inner.lock();
        let at = queue.iter().position(|item| pred(item))?;
        queue.remove(at)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Fifo::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Fifo;
    use std::sync::Arc;

    #[test]
    fn drains_in_push_order() {
        let fifo = Fifo::new();
        fifo.push(1);
        fifo.push(2);
        fifo.push(3);
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), Some(3));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn remove_takes_first_match_only() {
        let fifo = Fifo::new();
        fifo.push(1);
        fifo.push(2);
        fifo.push(2);
        assert_eq!(fifo.remove(|v| *v == 2), Some(2));
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.remove(|v| *v == 9), None);
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let fifo = Arc::new(Fifo::new());
        let mut handles = Vec::new();
        for producer in 0..4 {
            let fifo = fifo.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    fifo.push(producer * 100 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Some(v) = fifo.pop() {
            seen.push(v);
        }
        seen.sort_unstable();
        assert_eq!(seen.len(), 400);
        assert_eq!(seen, (0..400).collect::<Vec<_>>());
    }
}
