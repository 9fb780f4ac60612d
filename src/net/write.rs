//! The write pipeline: producer-facing operations and the per-channel
//! buffer they drain through.

use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::error::SelectError;
use crate::net::socket::SocketChannel;
use crate::net::stub::SocketStub;

/// Signalled exactly once with the outcome of a [`WriteOperation`].
pub type WriteListener = Box<dyn FnOnce(Result<(), SelectError>) + Send>;

/// A producer write request: one or more buffers bound for a channel,
/// plus a completion listener.
///
/// The buffers are reference-counted slices; after the operation is
/// queued the producer must not rely on observing further mutations.
pub struct WriteOperation {
    id: u64,
    channel: Arc<SocketChannel>,
    buffers: Vec<Bytes>,
    listener: Option<WriteListener>,
}

impl WriteOperation {
    pub fn new(
        channel: Arc<SocketChannel>,
        buffers: Vec<Bytes>,
        listener: impl FnOnce(Result<(), SelectError>) + Send + 'static,
    ) -> WriteOperation {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WriteOperation {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            channel,
            buffers,
            listener: Some(Box::new(listener)),
        }
    }

    pub fn single(
        channel: Arc<SocketChannel>,
        buffer: Bytes,
        listener: impl FnOnce(Result<(), SelectError>) + Send + 'static,
    ) -> WriteOperation {
        WriteOperation::new(channel, vec![buffer], listener)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &Arc<SocketChannel> {
        &self.channel
    }

    pub(crate) fn fail(mut self, err: SelectError) {
        if let Some(listener) = self.listener.take() {
            listener(Err(err));
        }
    }

    fn into_flush(mut self) -> FlushOperation {
        FlushOperation {
            buffers: self.buffers.drain(..).collect(),
            listener: self.listener.take(),
        }
    }
}

/// A write operation being drained to the socket, with its progress
/// cursor. Partially written buffers are advanced in place.
struct FlushOperation {
    buffers: VecDeque<Bytes>,
    listener: Option<WriteListener>,
}

impl FlushOperation {
    /// Push as many bytes as the socket takes. `Ok(true)` once every
    /// buffer is fully written.
    fn write_to(&mut self, socket: &mut dyn SocketStub) -> io::Result<bool> {
        while !self.buffers.is_empty() {
            let mut written = {
                let slices: Vec<IoSlice<'_>> =
                    self.buffers.iter().map(|b| IoSlice::new(b)).collect();
                socket.write_vectored(&slices)?
            };
            if written == 0 {
                return Ok(false);
            }
            while written > 0 {
                let front = match self.buffers.front_mut() {
                    Some(front) => front,
                    None => break,
                };
                if written >= front.len() {
                    written -= front.len();
                    self.buffers.pop_front();
                } else {
                    front.advance(written);
                    written = 0;
                }
            }
        }
        Ok(true)
    }

    fn complete(mut self) {
        if let Some(listener) = self.listener.take() {
            listener(Ok(()));
        }
    }

    fn fail(mut self, err: SelectError) {
        if let Some(listener) = self.listener.take() {
            listener(Err(err));
        }
    }
}

/// Per-channel queue of writes awaiting the socket. Only the owning
/// selector thread touches it.
pub struct WriteContext {
    queued: VecDeque<FlushOperation>,
}

impl WriteContext {
    pub(crate) fn new() -> WriteContext {
        WriteContext {
            queued: VecDeque::new(),
        }
    }

    pub(crate) fn queue(&mut self, op: WriteOperation) {
        self.queued.push_back(op.into_flush());
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Drain queued operations into the socket. `Ok(true)` when nothing
    /// is left; `Ok(false)` when the socket stopped taking bytes. An I/O
    /// failure fails the operation it hit and is returned to the caller;
    /// operations behind it stay queued for the close path.
    pub(crate) fn flush(&mut self, socket: &mut dyn SocketStub) -> Result<bool, SelectError> {
        while let Some(front) = self.queued.front_mut() {
            match front.write_to(socket) {
                Ok(true) => {
                    if let Some(op) = self.queued.pop_front() {
                        op.complete();
                    }
                }
                Ok(false) => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => {
                    let failure = SelectError::from(err);
                    if let Some(op) = self.queued.pop_front() {
                        op.fail(failure.clone());
                    }
                    return Err(failure);
                }
            }
        }
        Ok(true)
    }

    /// Fail every queued operation with `err`. Used on channel teardown.
    pub(crate) fn clear(&mut self, err: SelectError) {
        for op in self.queued.drain(..) {
            op.fail(err.clone());
        }
    }
}
