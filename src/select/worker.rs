//! The selector that owns connection sockets: connect/read/write
//! readiness, plus the cross-thread write pipeline.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::trace;

use crate::error::SelectError;
use crate::future::RunningFuture;
use crate::handler::SocketEventHandler;
use crate::net::channel::ChannelState;
use crate::net::interest;
use crate::net::socket::SocketChannel;
use crate::net::write::WriteOperation;
use crate::ops::Ops;
use crate::poll::{MioSelector, RawSelector, ReadyKey};
use crate::queues::Fifo;
use crate::select::base::{EventLoop, SelectorBase, DEFAULT_SELECT_TIMEOUT};

pub struct SocketSelector {
    base: SelectorBase<SocketChannel>,
    pub(crate) new_channels: Fifo<Arc<SocketChannel>>,
    pub(crate) queued_writes: Fifo<WriteOperation>,
    handler: Arc<dyn SocketEventHandler>,
    weak: Weak<SocketSelector>,
}

impl SocketSelector {
    pub fn new(handler: Arc<dyn SocketEventHandler>) -> Result<Arc<SocketSelector>, SelectError> {
        Ok(SocketSelector::with_raw(
            handler,
            Arc::new(MioSelector::new()?),
        ))
    }

    /// Build over an explicit readiness backend.
    pub fn with_raw(
        handler: Arc<dyn SocketEventHandler>,
        raw: Arc<dyn RawSelector>,
    ) -> Arc<SocketSelector> {
        Arc::new_cyclic(|weak| SocketSelector {
            base: SelectorBase::new(raw, DEFAULT_SELECT_TIMEOUT),
            new_channels: Fifo::new(),
            queued_writes: Fifo::new(),
            handler,
            weak: weak.clone(),
        })
    }

    /// Run the loop on the calling thread until the selector is closed.
    /// A second starter gets [`SelectError::AlreadyRunning`].
    pub fn run(&self) -> Result<(), SelectError> {
        EventLoop::run(self)
    }

    /// Shut down and wait for the loop to exit.
    pub fn close(&self, interrupt: bool) {
        self.base.close(interrupt);
    }

    pub fn is_open(&self) -> bool {
        self.base.is_open()
    }

    pub fn is_running(&self) -> bool {
        self.base.is_running()
    }

    pub fn running_future(&self) -> Arc<RunningFuture> {
        self.base.running()
    }

    pub fn wake(&self) {
        self.base.wake();
    }

    /// Live view of the channels this selector currently owns.
    pub fn registered_channels(&self) -> Vec<Arc<SocketChannel>> {
        self.base.registered_channels()
    }

    /// Hand a connection channel to this selector. It is registered, and
    /// its connect handshake driven, on the next loop turn.
    pub fn register_socket_channel(&self, channel: Arc<SocketChannel>) -> Result<(), SelectError> {
        let id = channel.id();
        self.new_channels.push(channel);
        if self
            .base
            .ensure_open_for_enqueuing(&self.new_channels, |c| c.id() == id)
            .is_err()
        {
            return Err(SelectError::SelectorClosed);
        }
        self.base.wake();
        Ok(())
    }

    /// Schedule a channel close, processed by the selector thread.
    pub fn queue_channel_close(&self, channel: Arc<SocketChannel>) -> Result<(), SelectError> {
        self.base.queue_channel_close(channel)
    }

    /// Queue a write from any thread. The operation's listener is
    /// signalled exactly once: success after the bytes drain through the
    /// channel buffer, failure otherwise — including the case where this
    /// selector closed concurrently and would never have seen the write.
    /// The selector thread itself may keep enqueuing during shutdown; its
    /// writes are settled by `cleanup`.
    pub fn queue_write(&self, op: WriteOperation) {
        let id = op.id();
        self.queued_writes.push(op);
        match self
            .base
            .ensure_open_for_enqueuing(&self.queued_writes, |o| o.id() == id)
        {
            Ok(()) => self.base.wake(),
            Err(op) => op.fail(SelectError::SelectorClosed),
        }
    }

    /// Move a write straight into its channel's buffer and arm WRITE
    /// interest. Channel buffers belong to the selector thread, so this
    /// must only be called there.
    pub fn queue_write_in_channel_buffer(&self, op: WriteOperation) {
        debug_assert!(
            self.base.on_selector_thread(),
            "channel buffers are selector-thread-only"
        );
        let channel = op.channel().clone();
        if let Err(err) = interest::set_write_interested(&channel) {
            op.fail(err);
            return;
        }
        channel.write_context().queue(op);
    }

    pub(crate) fn raw_arc(&self) -> Arc<dyn RawSelector> {
        self.base.raw.clone()
    }

    pub(crate) fn weak_self(&self) -> Weak<SocketSelector> {
        self.weak.clone()
    }

    pub(crate) fn insert_token(&self, channel: Arc<SocketChannel>) -> mio::Token {
        self.base.insert_token(channel)
    }

    pub(crate) fn remove_token(&self, token: mio::Token) {
        self.base.remove_token(token);
    }

    fn setup_new_channels(&self) {
        while let Some(channel) = self.new_channels.pop() {
            self.setup_channel(channel);
        }
    }

    fn setup_channel(&self, channel: Arc<SocketChannel>) {
        match channel.register(self) {
            Ok(true) => {
                self.base.insert_registered(channel.clone());
                if let Err(err) = self.handler.handle_registration(&channel) {
                    self.handler.registration_exception(&channel, err);
                    return;
                }
                self.attempt_connect(&channel);
            }
            Ok(false) => trace!("socket channel {:?} already claimed", channel.id()),
            Err(err) => self.handler.registration_exception(&channel, err),
        }
    }

    fn attempt_connect(&self, channel: &Arc<SocketChannel>) {
        match channel.finish_connect() {
            Ok(true) => self.handler.handle_connect(channel),
            Ok(false) => {
                // Still in flight; watch for CONNECT readiness.
                if let Err(err) = interest::set_connect_interested(channel) {
                    self.handler.connect_exception(channel, err);
                }
            }
            Err(err) => self.handler.connect_exception(channel, err),
        }
    }

    fn handle_queued_writes(&self) {
        while let Some(op) = self.queued_writes.pop() {
            if op.channel().is_writable() {
                self.queue_write_in_channel_buffer(op);
            } else {
                op.fail(SelectError::ChannelClosed);
            }
        }
    }

    fn process_key(&self, key: ReadyKey) {
        let channel = match self.base.channel_for(key.token) {
            Some(channel) => channel,
            None => {
                trace!("readiness for unknown token {:?}", key.token);
                return;
            }
        };
        if channel.state() > ChannelState::Registered {
            self.handler
                .generic_channel_exception(&channel, SelectError::CancelledKey);
            return;
        }
        let mut ready = key.ready;
        // The backend reports connect completion as write readiness.
        if !channel.is_connect_complete() && ready.contains(Ops::WRITE) {
            ready |= Ops::CONNECT;
        }
        if ready.contains(Ops::CONNECT) {
            self.attempt_connect(&channel);
        }
        // Half-open sockets take no reads or writes.
        if channel.is_connect_complete() {
            if ready.contains(Ops::WRITE) {
                if let Err(err) = self.handler.handle_write(&channel) {
                    self.handler.write_exception(&channel, err);
                }
            }
            if ready.contains(Ops::READ) {
                if let Err(err) = self.handler.handle_read(&channel) {
                    self.handler.read_exception(&channel, err);
                }
            }
        }
    }
}

impl EventLoop for SocketSelector {
    type Channel = SocketChannel;

    fn base(&self) -> &SelectorBase<SocketChannel> {
        &self.base
    }

    fn do_select(&self, timeout: Duration) -> Result<(), SelectError> {
        self.setup_new_channels();
        self.handle_queued_writes();
        let mut keys = Vec::new();
        self.base.raw.select(timeout, &mut keys)?;
        for key in keys {
            self.process_key(key);
        }
        Ok(())
    }

    fn cleanup(&self) {
        while let Some(op) = self.queued_writes.pop() {
            op.fail(SelectError::SelectorClosed);
        }
        while let Some(channel) = self.new_channels.pop() {
            self.base.channels_to_close.push(channel);
        }
        for channel in self.base.registered_channels() {
            self.base.channels_to_close.push(channel);
        }
        self.base
            .close_pending_channels(&|channel| self.close_hook(channel));
    }

    fn close_hook(&self, channel: &Arc<SocketChannel>) {
        self.handler.handle_close(channel);
    }

    fn on_select_error(&self, err: SelectError) {
        self.handler.select_exception(err);
    }

    fn on_panic(&self, payload: Box<dyn Any + Send>) {
        self.handler.uncaught_exception(payload);
    }
}
