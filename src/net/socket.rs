use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::error::SelectError;
use crate::future::{CloseFuture, ConnectFuture};
use crate::net::channel::{ChannelCore, ChannelId, ChannelState, EngineChannel};
use crate::net::read::{ReadConsumer, ReadContext, ReadOutcome};
use crate::net::stub::SocketStub;
use crate::net::write::WriteContext;
use crate::ops::Ops;
use crate::select::worker::SocketSelector;

/// A connection channel: one TCP socket owned, after registration, by a
/// single worker selector.
pub struct SocketChannel {
    core: ChannelCore,
    socket: Mutex<Box<dyn SocketStub>>,
    remote: SocketAddr,
    connect: ConnectFuture,
    write_ctx: Mutex<WriteContext>,
    read_ctx: Mutex<ReadContext>,
    selector: OnceLock<Weak<SocketSelector>>,
    weak_self: Weak<SocketChannel>,
}

impl SocketChannel {
    pub fn new(socket: Box<dyn SocketStub>, remote: SocketAddr) -> Arc<SocketChannel> {
        Arc::new_cyclic(|weak_self| SocketChannel {
            core: ChannelCore::new(),
            socket: Mutex::new(socket),
            remote,
            connect: ConnectFuture::new(),
            write_ctx: Mutex::new(WriteContext::new()),
            read_ctx: Mutex::new(ReadContext::new()),
            selector: OnceLock::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The interest set currently armed for this channel.
    pub fn interest_ops(&self) -> Ops {
        self.core.interest()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.lock().local_addr().ok()
    }

    /// The worker selector that owns this channel, once registered.
    pub fn owner(&self) -> Option<Arc<SocketSelector>> {
        self.selector.get().and_then(Weak::upgrade)
    }

    pub fn close_future(&self) -> Arc<CloseFuture> {
        self.core.close_future()
    }

    pub fn connect_future(&self) -> &ConnectFuture {
        &self.connect
    }

    pub fn is_connect_complete(&self) -> bool {
        self.connect.is_complete()
    }

    pub fn is_writable(&self) -> bool {
        self.core.state() == ChannelState::Registered && self.is_connect_complete()
    }

    pub fn is_readable(&self) -> bool {
        self.core.state() == ChannelState::Registered && self.is_connect_complete()
    }

    /// Install the consumer that receives everything read off this
    /// channel. Chunks arrive on the selector thread.
    pub fn set_read_consumer(&self, consumer: ReadConsumer) {
        self.read_ctx.lock().set_consumer(consumer);
    }

    /// Claim the channel for `selector` and register the socket with its
    /// readiness backend. `Ok(false)` means another selector won the
    /// claim earlier and nothing was done.
    pub(crate) fn register(&self, selector: &SocketSelector) -> Result<bool, SelectError> {
        let this = match self.weak_self.upgrade() {
            Some(this) => this,
            None => return Ok(false),
        };
        if !self.core.mark_registered() {
            return Ok(false);
        }
        let _ = self.selector.set(selector.weak_self());
        self.core.set_raw(selector.raw_arc());
        let token = selector.insert_token(this);
        let registered = {
            let mut socket = self.socket.lock();
            selector
                .raw_arc()
                .register(socket.as_source(), token, Ops::empty())
        };
        match registered {
            Ok(()) => {
                self.core.set_token(token);
                Ok(true)
            }
            Err(err) => {
                selector.remove_token(token);
                Err(err)
            }
        }
    }

    /// Drive the connect handshake forward. Idempotent once terminal: a
    /// completed connect keeps returning `Ok(true)`, a failed one keeps
    /// re-raising the stored cause.
    pub fn finish_connect(&self) -> Result<bool, SelectError> {
        if self.connect.is_complete() {
            return Ok(true);
        }
        if let Some(err) = self.connect.failure() {
            return Err(err);
        }
        let probe = self.socket.lock().finish_connect();
        match probe {
            Ok(true) => {
                self.connect.set_complete();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                let err = SelectError::from(err);
                self.connect.set_failed(err.clone());
                Err(err)
            }
        }
    }

    /// Drain queued writes into the socket. Selector thread only.
    /// `Ok(true)` once the write queue is empty.
    pub fn flush_writes(&self) -> Result<bool, SelectError> {
        let mut ctx = self.write_ctx.lock();
        let mut socket = self.socket.lock();
        ctx.flush(&mut **socket)
    }

    /// Read everything currently available. Selector thread only.
    pub fn read_pending(&self) -> Result<ReadOutcome, SelectError> {
        let this = match self.weak_self.upgrade() {
            Some(this) => this,
            None => return Ok(ReadOutcome::More(0)),
        };
        let mut ctx = self.read_ctx.lock();
        let mut socket = self.socket.lock();
        ctx.read_from(&this, &mut **socket)
            .map_err(SelectError::from)
    }

    pub(crate) fn write_context(&self) -> MutexGuard<'_, WriteContext> {
        self.write_ctx.lock()
    }

    pub(crate) fn has_queued_writes(&self) -> bool {
        self.write_ctx.lock().has_queued()
    }

    pub(crate) fn socket(&self) -> MutexGuard<'_, Box<dyn SocketStub>> {
        self.socket.lock()
    }

    pub(crate) fn core(&self) -> &ChannelCore {
        &self.core
    }

    /// Request a close from any thread. The close future completes once
    /// the channel has fully closed, whichever path gets there.
    pub fn close_async(&self) -> Arc<CloseFuture> {
        let future = self.core.close_future();
        if self.core.state() >= ChannelState::Closing {
            return future;
        }
        match (self.owner(), self.weak_self.upgrade()) {
            (Some(selector), Some(this)) if self.core.state() == ChannelState::Registered => {
                self.core.advance(ChannelState::Closing);
                if selector.queue_channel_close(this).is_err() {
                    // The selector shut down before it saw the request.
                    self.close_local();
                }
            }
            _ => self.close_local(),
        }
        future
    }

    /// Tear the channel down on its owning selector thread: fail queued
    /// writes, detach from the readiness backend, close the socket.
    pub fn close_from_selector(&self) {
        self.teardown();
    }

    /// Close a channel no selector is responsible for.
    pub(crate) fn close_local(&self) {
        if !self.core.claim_close_hook() {
            return;
        }
        self.teardown();
        self.core.close_future().complete(());
    }

    fn teardown(&self) {
        self.core.advance(ChannelState::Closing);
        self.write_ctx.lock().clear(SelectError::ChannelClosed);
        if let Some(raw) = self.core.raw() {
            if self.core.take_token().is_some() {
                let mut socket = self.socket.lock();
                if let Err(err) = raw.deregister(socket.as_source()) {
                    debug!("deregister failed for channel {:?}: {}", self.core.id(), err);
                }
            }
        }
        if let Err(err) = self.socket.lock().close() {
            debug!("socket close failed for channel {:?}: {}", self.core.id(), err);
        }
        self.core.advance(ChannelState::Closed);
    }
}

impl EngineChannel for SocketChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }
}
