//! The surface the selectors drive. Every hook executes on the selector
//! thread and must not block; the default bodies are the production
//! behaviour, so an implementation overrides only what it extends.

pub mod tcp;

use std::any::Any;
use std::io;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::error::SelectError;
use crate::net::interest;
use crate::net::read::ReadOutcome;
use crate::net::server::ServerChannel;
use crate::net::socket::SocketChannel;
use crate::ops::Ops;

pub use tcp::{OpenChannels, TcpAcceptorHandler, TcpSocketHandler};

/// Drain a listening channel's backlog: wrap each accepted socket via the
/// channel's factory, show it to `observe`, then hand it to the worker
/// picked by the channel's supplier.
pub fn accept_pending(
    channel: &Arc<ServerChannel>,
    mut observe: impl FnMut(&Arc<SocketChannel>),
) -> Result<(), SelectError> {
    loop {
        let (socket, remote) = match channel.accept() {
            Ok(pair) => pair,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        debug!("accepted connection from {remote}");
        let accepted = channel.factory().accepted(socket, remote);
        observe(&accepted);
        let worker = channel.supplier().next_worker();
        if let Err(err) = worker.register_socket_channel(accepted.clone()) {
            accepted.close_async();
            return Err(err);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Hooks invoked by an accepting selector.
pub trait AcceptorEventHandler: Send + Sync {
    /// A listening channel finished registering; called once per channel.
    fn server_channel_registered(&self, channel: &Arc<ServerChannel>) {
        if let Err(err) = interest::set_accept_interested(channel) {
            self.generic_server_channel_exception(channel, err);
        }
    }

    /// The channel signalled it can accept a connection; all accept logic
    /// happens here.
    fn accept_channel(&self, channel: &Arc<ServerChannel>) -> Result<(), SelectError> {
        accept_pending(channel, |_| {})
    }

    fn accept_exception(&self, channel: &Arc<ServerChannel>, err: SelectError) {
        debug!("accept failed on channel {:?}: {err}", channel.id());
    }

    /// Event handling on the channel failed unexpectedly, e.g. its
    /// registration token turned out to be cancelled.
    fn generic_server_channel_exception(&self, channel: &Arc<ServerChannel>, err: SelectError) {
        debug!("server channel {:?} event failed: {err}", channel.id());
    }

    /// Tear the channel down; runs on the selector thread, once.
    fn handle_close(&self, channel: &Arc<ServerChannel>) {
        channel.close_from_selector();
    }

    fn select_exception(&self, err: SelectError) {
        warn!("select failed: {err}");
    }

    fn uncaught_exception(&self, payload: Box<dyn Any + Send>) {
        error!("selector turn panicked: {}", panic_message(&*payload));
    }
}

/// Hooks invoked by a worker selector.
pub trait SocketEventHandler: Send + Sync {
    /// A connection channel finished registering; called once per channel.
    fn handle_registration(&self, channel: &Arc<SocketChannel>) -> Result<(), SelectError> {
        interest::set_read_interested(channel)
    }

    fn registration_exception(&self, channel: &Arc<SocketChannel>, err: SelectError) {
        debug!("registration failed for channel {:?}: {err}", channel.id());
        channel.close_async();
    }

    /// The connect handshake completed; the channel is now readable and
    /// writable.
    fn handle_connect(&self, channel: &Arc<SocketChannel>) {
        if channel.interest_ops().contains(Ops::CONNECT) {
            if let Err(err) = interest::clear_connect_interested(channel) {
                debug!(
                    "clearing connect interest failed on channel {:?}: {err}",
                    channel.id()
                );
            }
        }
    }

    fn connect_exception(&self, channel: &Arc<SocketChannel>, err: SelectError) {
        debug!("connect failed for channel {:?}: {err}", channel.id());
        channel.close_async();
    }

    fn handle_read(&self, channel: &Arc<SocketChannel>) -> Result<(), SelectError> {
        match channel.read_pending()? {
            ReadOutcome::More(_) => Ok(()),
            ReadOutcome::Eof(_) => {
                channel.close_async();
                Ok(())
            }
        }
    }

    fn read_exception(&self, channel: &Arc<SocketChannel>, err: SelectError) {
        debug!("read failed on channel {:?}: {err}", channel.id());
        channel.close_async();
    }

    fn handle_write(&self, channel: &Arc<SocketChannel>) -> Result<(), SelectError> {
        if channel.flush_writes()? {
            interest::clear_write_interested(channel)?;
        }
        Ok(())
    }

    fn write_exception(&self, channel: &Arc<SocketChannel>, err: SelectError) {
        debug!("write failed on channel {:?}: {err}", channel.id());
        channel.close_async();
    }

    /// Tear the channel down; runs on the selector thread, once.
    fn handle_close(&self, channel: &Arc<SocketChannel>) {
        channel.close_from_selector();
    }

    /// Event handling on the channel failed unexpectedly, e.g. its
    /// registration token turned out to be cancelled.
    fn generic_channel_exception(&self, channel: &Arc<SocketChannel>, err: SelectError) {
        debug!("channel {:?} event failed: {err}", channel.id());
        channel.close_async();
    }

    fn select_exception(&self, err: SelectError) {
        warn!("select failed: {err}");
    }

    fn uncaught_exception(&self, payload: Box<dyn Any + Send>) {
        error!("selector turn panicked: {}", panic_message(&*payload));
    }
}
