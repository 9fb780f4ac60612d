//! The selector that owns listening sockets and turns ACCEPT readiness
//! into accepted connection channels.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::trace;

use crate::error::SelectError;
use crate::future::RunningFuture;
use crate::handler::AcceptorEventHandler;
use crate::net::channel::ChannelState;
use crate::net::server::ServerChannel;
use crate::ops::Ops;
use crate::poll::{MioSelector, RawSelector, ReadyKey};
use crate::queues::Fifo;
use crate::select::base::{EventLoop, SelectorBase, DEFAULT_SELECT_TIMEOUT};

pub struct AcceptingSelector {
    base: SelectorBase<ServerChannel>,
    pub(crate) new_channels: Fifo<Arc<ServerChannel>>,
    handler: Arc<dyn AcceptorEventHandler>,
    weak: Weak<AcceptingSelector>,
}

impl AcceptingSelector {
    pub fn new(handler: Arc<dyn AcceptorEventHandler>) -> Result<Arc<AcceptingSelector>, SelectError> {
        Ok(AcceptingSelector::with_raw(
            handler,
            Arc::new(MioSelector::new()?),
        ))
    }

    /// Build over an explicit readiness backend.
    pub fn with_raw(
        handler: Arc<dyn AcceptorEventHandler>,
        raw: Arc<dyn RawSelector>,
    ) -> Arc<AcceptingSelector> {
        Arc::new_cyclic(|weak| AcceptingSelector {
            base: SelectorBase::new(raw, DEFAULT_SELECT_TIMEOUT),
            new_channels: Fifo::new(),
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
    pub fn registered_channels(&self) -> Vec<Arc<ServerChannel>> {
        self.base.registered_channels()
    }

    /// Hand a listening channel to this selector. It is registered on the
    /// next loop turn.
    pub fn register_server_channel(&self, channel: Arc<ServerChannel>) -> Result<(), SelectError> {
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
    pub fn queue_channel_close(&self, channel: Arc<ServerChannel>) -> Result<(), SelectError> {
        self.base.queue_channel_close(channel)
    }

    pub(crate) fn raw_arc(&self) -> Arc<dyn RawSelector> {
        self.base.raw.clone()
    }

    pub(crate) fn weak_self(&self) -> Weak<AcceptingSelector> {
        self.weak.clone()
    }

    pub(crate) fn insert_token(&self, channel: Arc<ServerChannel>) -> mio::Token {
        self.base.insert_token(channel)
    }

    pub(crate) fn remove_token(&self, token: mio::Token) {
        self.base.remove_token(token);
    }

    fn setup_new_channels(&self) {
        while let Some(channel) = self.new_channels.pop() {
            match channel.register(self) {
                Ok(true) => {
                    self.base.insert_registered(channel.clone());
                    self.handler.server_channel_registered(&channel);
                }
                Ok(false) => trace!("server channel {:?} already claimed", channel.id()),
                Err(err) => self
                    .handler
                    .generic_server_channel_exception(&channel, err),
            }
        }
    }

    fn accept_ready(&self, key: ReadyKey) {
        let channel = match self.base.channel_for(key.token) {
            Some(channel) => channel,
            None => {
                trace!("readiness for unknown token {:?}", key.token);
                return;
            }
        };
        if channel.state() > ChannelState::Registered {
            self.handler
                .generic_server_channel_exception(&channel, SelectError::CancelledKey);
            return;
        }
        if key.ready.intersects(Ops::ACCEPT.with(Ops::READ)) {
            if let Err(err) = self.handler.accept_channel(&channel) {
                self.handler.accept_exception(&channel, err);
            }
        }
    }
}

impl EventLoop for AcceptingSelector {
    type Channel = ServerChannel;

    fn base(&self) -> &SelectorBase<ServerChannel> {
        &self.base
    }

    fn do_select(&self, timeout: Duration) -> Result<(), SelectError> {
        self.setup_new_channels();
        let mut keys = Vec::new();
        self.base.raw.select(timeout, &mut keys)?;
        for key in keys {
            self.accept_ready(key);
        }
        Ok(())
    }

    fn cleanup(&self) {
        for channel in self.base.registered_channels() {
            self.base.channels_to_close.push(channel);
        }
        self.base
            .close_pending_channels(&|channel| self.close_hook(channel));
    }

    fn close_hook(&self, channel: &Arc<ServerChannel>) {
        self.handler.handle_close(channel);
    }

    fn on_select_error(&self, err: SelectError) {
        self.handler.select_exception(err);
    }

    fn on_panic(&self, payload: Box<dyn Any + Send>) {
        self.handler.uncaught_exception(payload);
    }
}
