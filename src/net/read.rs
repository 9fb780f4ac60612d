//! Per-channel read state: accumulate off the socket, hand chunks to the
//! installed consumer.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::net::socket::SocketChannel;
use crate::net::stub::SocketStub;

/// Invoked on the selector thread with each chunk read off the socket.
pub type ReadConsumer = Box<dyn FnMut(&Arc<SocketChannel>, Bytes) + Send>;

const READ_CHUNK: usize = 8 * 1024;

/// What a read pass observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The socket ran dry; more may arrive later.
    More(usize),
    /// The peer closed its side after `usize` bytes.
    Eof(usize),
}

/// Selector-thread-only read buffer for one connection channel.
pub struct ReadContext {
    buffer: BytesMut,
    consumer: Option<ReadConsumer>,
}

impl ReadContext {
    pub(crate) fn new() -> ReadContext {
        ReadContext {
            buffer: BytesMut::new(),
            consumer: None,
        }
    }

    pub(crate) fn set_consumer(&mut self, consumer: ReadConsumer) {
        self.consumer = Some(consumer);
    }

    /// Read until the socket would block or the peer hangs up. The
    /// readiness backend is edge-triggered, so a single pass must drain
    /// everything that is currently available.
    pub(crate) fn read_from(
        &mut self,
        channel: &Arc<SocketChannel>,
        socket: &mut dyn SocketStub,
    ) -> io::Result<ReadOutcome> {
        let mut total = 0;
        loop {
            let start = self.buffer.len();
            self.buffer.resize(start + READ_CHUNK, 0);
            match socket.read(&mut self.buffer[start..]) {
                Ok(0) => {
                    self.buffer.truncate(start);
                    self.deliver(channel);
                    return Ok(ReadOutcome::Eof(total));
                }
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    total += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.buffer.truncate(start);
                    self.deliver(channel);
                    return Ok(ReadOutcome::More(total));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    self.buffer.truncate(start);
                }
                Err(err) => {
                    self.buffer.truncate(start);
                    return Err(err);
                }
            }
        }
    }

    fn deliver(&mut self, channel: &Arc<SocketChannel>) {
        if self.buffer.is_empty() {
            return;
        }
        let chunk = self.buffer.split_to(self.buffer.len()).freeze();
        match &mut self.consumer {
            Some(consumer) => consumer(channel, chunk),
            // No consumer installed: the bytes are dropped, which keeps a
            // half-configured channel from buffering without bound.
            None => {}
        }
    }
}
