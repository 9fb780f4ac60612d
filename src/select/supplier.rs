use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::select::worker::SocketSelector;

/// Picks the worker selector that receives the next accepted channel.
pub trait WorkerSupplier: Send + Sync {
    fn next_worker(&self) -> Arc<SocketSelector>;
}

impl<F> WorkerSupplier for F
where
    F: Fn() -> Arc<SocketSelector> + Send + Sync,
{
    fn next_worker(&self) -> Arc<SocketSelector> {
        self()
    }
}

/// Rotates over a fixed worker set.
pub struct RoundRobinSupplier {
    workers: Vec<Arc<SocketSelector>>,
    next: AtomicUsize,
}

impl RoundRobinSupplier {
    pub fn new(workers: Vec<Arc<SocketSelector>>) -> RoundRobinSupplier {
        assert!(!workers.is_empty(), "need at least one worker selector");
        RoundRobinSupplier {
            workers,
            next: AtomicUsize::new(0),
        }
    }
}

impl WorkerSupplier for RoundRobinSupplier {
    fn next_worker(&self) -> Arc<SocketSelector> {
        let at = self.next.fetch_add(1, Ordering::Relaxed);
        self.workers[at % self.workers.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeRaw, RecordingSocketHandler};

    #[test]
    fn rotates_over_all_workers() {
        let workers: Vec<_> = (0..3)
            .map(|_| {
                SocketSelector::with_raw(
                    Arc::new(RecordingSocketHandler::new()),
                    Arc::new(FakeRaw::new()),
                )
            })
            .collect();
        let supplier = RoundRobinSupplier::new(workers.clone());

        for round in 0..2 {
            for expected in &workers {
                let picked = supplier.next_worker();
                assert!(
                    Arc::ptr_eq(&picked, expected),
                    "round {round}: wrong worker"
                );
            }
        }
    }
}
