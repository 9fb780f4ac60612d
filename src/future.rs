//! One-shot completions: settle at most once, listeners fire exactly once.

use std::mem;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::SelectError;

type Listener<T> = Box<dyn FnOnce(T) + Send>;

enum State<T> {
    Pending(Vec<Listener<T>>),
    Done(T),
}

/// A cell that is completed at most once. Listeners registered before
/// completion fire on the completing thread; listeners registered after
/// fire immediately on the registering thread. Either way each listener
/// runs exactly once.
pub struct OneShot<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T: Clone> OneShot<T> {
    pub fn new() -> OneShot<T> {
        OneShot {
            state: Mutex::new(State::Pending(Vec::new())),
            cond: Condvar::new(),
        }
    }

    /// Settle the cell. The first caller wins and gets `true`.
    pub fn complete(&self, value: T) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending(listeners) => {
                    let listeners = mem::take(listeners);
                    *state = State::Done(value.clone());
                    self.cond.notify_all();
                    listeners
                }
            }
        };
        for listener in listeners {
            listener(value.clone());
        }
        true
    }

    pub fn on_complete(&self, listener: impl FnOnce(T) + Send + 'static) {
        {
            let mut state = self.state.lock();
            if let State::Pending(listeners) = &mut *state {
                listeners.push(Box::new(listener));
                return;
            }
        }
        // Already settled; the state can never go back to pending.
        let value = match &*self.state.lock() {
            State::Done(value) => value.clone(),
            State::Pending(_) => return,
        };
        listener(value);
    }

    pub fn get(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Done(value) => Some(value.clone()),
            State::Pending(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(_))
    }

    /// Block until the cell settles.
    pub fn wait(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let State::Done(value) = &*state {
                return value.clone();
            }
            self.cond.wait(&mut state);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let State::Done(value) = &*state {
                return Some(value.clone());
            }
            if self.cond.wait_for(&mut state, timeout).timed_out() {
                return match &*state {
                    State::Done(value) => Some(value.clone()),
                    State::Pending(_) => None,
                };
            }
        }
    }
}

impl<T: Clone> Default for OneShot<T> {
    fn default() -> Self {
        OneShot::new()
    }
}

/// Signalled once when a selector loop has started.
pub type RunningFuture = OneShot<()>;

/// Signalled once when a channel has fully closed.
pub type CloseFuture = OneShot<()>;

/// Outcome of a connection channel's connect handshake.
pub struct ConnectFuture {
    inner: OneShot<Result<(), SelectError>>,
}

impl ConnectFuture {
    pub fn new() -> ConnectFuture {
        ConnectFuture {
            inner: OneShot::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.inner.get(), Some(Ok(())))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner.get(), Some(Err(_)))
    }

    /// The stored failure, if the handshake failed.
    pub fn failure(&self) -> Option<SelectError> {
        match self.inner.get() {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn set_complete(&self) -> bool {
        self.inner.complete(Ok(()))
    }

    pub(crate) fn set_failed(&self, err: SelectError) -> bool {
        self.inner.complete(Err(err))
    }

    pub fn on_complete(&self, listener: impl FnOnce(Result<(), SelectError>) + Send + 'static) {
        self.inner.on_complete(listener);
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), SelectError>> {
        self.inner.wait_timeout(timeout)
    }
}

impl Default for ConnectFuture {
    fn default() -> Self {
        ConnectFuture::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn first_completion_wins() {
        let cell = OneShot::new();
        assert!(cell.complete(1));
        assert!(!cell.complete(2));
        assert_eq!(cell.get(), Some(1));
    }

    #[test]
    fn listener_fires_exactly_once() {
        let cell = OneShot::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counted = fired.clone();
        cell.on_complete(move |v: u32| {
            assert_eq!(v, 7);
            counted.fetch_add(1, Ordering::SeqCst);
        });
        cell.complete(7);
        cell.complete(8);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Registered after settling: fires immediately.
        let counted = fired.clone();
        cell.on_complete(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wait_sees_completion_from_another_thread() {
        let cell = Arc::new(OneShot::new());
        let other = cell.clone();
        let handle = std::thread::spawn(move || other.wait());
        cell.complete(42);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn connect_future_is_sticky() {
        let future = ConnectFuture::new();
        assert!(!future.is_complete());
        assert!(future.set_failed(SelectError::ChannelClosed));
        assert!(!future.set_complete());
        assert!(future.is_failed());
        assert!(matches!(future.failure(), Some(SelectError::ChannelClosed)));
    }
}
