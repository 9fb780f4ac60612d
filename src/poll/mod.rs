//! The readiness primitive behind a selector.
//!
//! Production code runs on [`MioSelector`]; the [`RawSelector`] trait is
//! the seam that lets tests drive a selector with scripted readiness.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::error::SelectError;
use crate::ops::Ops;

/// Token reserved for the wakeup channel inside the mio backend.
const WAKE: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// One readiness notification from a poll pass.
#[derive(Debug, Clone, Copy)]
pub struct ReadyKey {
    pub token: Token,
    pub ready: Ops,
}

/// An OS-level multiplexed readiness facility: register sockets with a
/// set of interests, poll with a timeout, wake a blocked poll from
/// another thread.
///
/// `register`/`reregister`/`deregister`/`select` are called only by the
/// owning selector thread; `wake` and `close` are safe from any thread.
pub trait RawSelector: Send + Sync {
    fn register(&self, source: &mut dyn Source, token: Token, ops: Ops)
        -> Result<(), SelectError>;

    fn reregister(
        &self,
        source: &mut dyn Source,
        token: Token,
        ops: Ops,
    ) -> Result<(), SelectError>;

    fn deregister(&self, source: &mut dyn Source) -> Result<(), SelectError>;

    /// Block up to `timeout`, appending readiness to `out`.
    ///
    /// Fails with [`SelectError::SelectorClosed`] once `close` has run.
    fn select(&self, timeout: Duration, out: &mut Vec<ReadyKey>) -> Result<(), SelectError>;

    /// Unblock a concurrent `select`.
    fn wake(&self) -> Result<(), SelectError>;

    /// Shut the facility down; every later `select` fails closed.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// mio-backed implementation.
pub struct MioSelector {
    inner: Mutex<Inner>,
    waker: Waker,
    open: AtomicBool,
}

struct Inner {
    poll: Poll,
    events: Events,
}

impl MioSelector {
    pub fn new() -> Result<MioSelector, SelectError> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE)?;
        Ok(MioSelector {
            inner: Mutex::new(Inner {
                poll,
                events: Events::with_capacity(EVENTS_CAPACITY),
            }),
            waker,
            open: AtomicBool::new(true),
        })
    }

    /// mio rejects empty interest sets, so a registration with no ops
    /// falls back to READABLE; every channel arms its real interest in
    /// the registration hook of the same loop turn.
    fn interest(ops: Ops) -> Interest {
        let readable = ops.intersects(Ops::READ.with(Ops::ACCEPT));
        let writable = ops.intersects(Ops::WRITE.with(Ops::CONNECT));
        match (readable, writable) {
            (_, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (true, true) => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

impl RawSelector for MioSelector {
    fn register(
        &self,
        source: &mut dyn Source,
        token: Token,
        ops: Ops,
    ) -> Result<(), SelectError> {
        if !self.is_open() {
            return Err(SelectError::SelectorClosed);
        }
        let inner = self.inner.lock();
        inner
            .poll
            .registry()
            .register(source, token, Self::interest(ops))?;
        Ok(())
    }

    fn reregister(
        &self,
        source: &mut dyn Source,
        token: Token,
        ops: Ops,
    ) -> Result<(), SelectError> {
        if !self.is_open() {
            return Err(SelectError::SelectorClosed);
        }
        let inner = self.inner.lock();
        inner
            .poll
            .registry()
            .reregister(source, token, Self::interest(ops))?;
        Ok(())
    }

    fn deregister(&self, source: &mut dyn Source) -> Result<(), SelectError> {
        let inner = self.inner.lock();
        inner.poll.registry().deregister(source)?;
        Ok(())
    }

    fn select(&self, timeout: Duration, out: &mut Vec<ReadyKey>) -> Result<(), SelectError> {
        if !self.is_open() {
            return Err(SelectError::SelectorClosed);
        }
        let mut inner = self.inner.lock();
        let Inner { poll, events } = &mut *inner;
        match poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        if !self.is_open() {
            // Closed while we were blocked; readiness is no longer meaningful.
            return Err(SelectError::SelectorClosed);
        }
        for event in events.iter() {
            if event.token() == WAKE {
                continue;
            }
            let mut ready = Ops::empty();
            if event.is_readable() || event.is_read_closed() {
                ready |= Ops::READ;
            }
            if event.is_writable() || event.is_write_closed() {
                ready |= Ops::WRITE;
            }
            if event.is_error() {
                ready |= Ops::READ | Ops::WRITE;
            }
            if !ready.is_empty() {
                out.push(ReadyKey {
                    token: event.token(),
                    ready,
                });
            }
        }
        Ok(())
    }

    fn wake(&self) -> Result<(), SelectError> {
        if !self.is_open() {
            return Ok(());
        }
        self.waker.wake()?;
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.waker.wake();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn select_fails_closed_after_close() {
        let raw = MioSelector::new().unwrap();
        assert!(raw.is_open());
        raw.close();
        let mut out = Vec::new();
        let err = raw.select(Duration::from_millis(1), &mut out).unwrap_err();
        assert!(err.is_selector_closed());
    }

    #[test]
    fn wake_unblocks_a_poller() {
        let raw = std::sync::Arc::new(MioSelector::new().unwrap());
        let polling = raw.clone();
        let handle = std::thread::spawn(move || {
            let mut out = Vec::new();
            polling.select(Duration::from_secs(30), &mut out).unwrap();
            out
        });
        // Give the poller a moment to block, then wake it.
        std::thread::sleep(Duration::from_millis(50));
        raw.wake().unwrap();
        let out = handle.join().unwrap();
        // The wake token itself is filtered out of the results.
        assert!(out.is_empty());
    }

    #[test]
    fn listener_readiness_reports_read() {
        let raw = MioSelector::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut listener = mio::net::TcpListener::bind(addr).unwrap();
        raw.register(&mut listener, Token(7), Ops::ACCEPT).unwrap();

        let target = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(target).unwrap();

        let mut out = Vec::new();
        for _ in 0..50 {
            raw.select(Duration::from_millis(100), &mut out).unwrap();
            if !out.is_empty() {
                break;
            }
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token, Token(7));
        assert!(out[0].ready.contains(Ops::READ));
    }
}
