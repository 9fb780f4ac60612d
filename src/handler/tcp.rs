//! Production handlers over plain TCP channels, plus the registry of
//! everything currently open.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::SelectError;
use crate::handler::{accept_pending, AcceptorEventHandler, SocketEventHandler};
use crate::net::channel::ChannelId;
use crate::net::interest;
use crate::net::server::ServerChannel;
use crate::net::socket::SocketChannel;

/// Book-keeping of live channels across the whole transport: server
/// channels as they register, accepted channels as they arrive. Channels
/// remove themselves through their close futures.
pub struct OpenChannels {
    servers: Mutex<HashMap<ChannelId, Arc<ServerChannel>>>,
    sockets: Mutex<HashMap<ChannelId, Arc<SocketChannel>>>,
}

impl OpenChannels {
    pub fn new() -> Arc<OpenChannels> {
        Arc::new(OpenChannels {
            servers: Mutex::new(HashMap::new()),
            sockets: Mutex::new(HashMap::new()),
        })
    }

    pub fn server_channel_opened(&self, channel: &Arc<ServerChannel>) {
        self.servers.lock().insert(channel.id(), channel.clone());
    }

    pub fn accepted_channel_opened(&self, channel: &Arc<SocketChannel>) {
        self.sockets.lock().insert(channel.id(), channel.clone());
    }

    pub fn channel_closed(&self, id: ChannelId) {
        self.servers.lock().remove(&id);
        self.sockets.lock().remove(&id);
    }

    pub fn server_count(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Ask every live channel to close. The closes complete asynchronously
    /// on the owning selector threads.
    pub fn close_all(&self) {
        let servers: Vec<_> = self.servers.lock().values().cloned().collect();
        let sockets: Vec<_> = self.sockets.lock().values().cloned().collect();
        for channel in servers {
            channel.close_async();
        }
        for channel in sockets {
            channel.close_async();
        }
    }
}

/// Acceptor-side production handler: accepts through the channel's
/// factory, records everything in [`OpenChannels`], hands accepted
/// channels to the channel's worker supplier.
pub struct TcpAcceptorHandler {
    open_channels: Arc<OpenChannels>,
}

impl TcpAcceptorHandler {
    pub fn new(open_channels: Arc<OpenChannels>) -> TcpAcceptorHandler {
        TcpAcceptorHandler { open_channels }
    }
}

impl AcceptorEventHandler for TcpAcceptorHandler {
    fn server_channel_registered(&self, channel: &Arc<ServerChannel>) {
        if let Err(err) = interest::set_accept_interested(channel) {
            self.generic_server_channel_exception(channel, err);
            return;
        }
        debug!(
            "server channel {:?} listening on {:?}",
            channel.id(),
            channel.local_addr()
        );
        self.open_channels.server_channel_opened(channel);
        let registry = self.open_channels.clone();
        let id = channel.id();
        channel.close_future().on_complete(move |_| {
            registry.channel_closed(id);
        });
    }

    fn accept_channel(&self, channel: &Arc<ServerChannel>) -> Result<(), SelectError> {
        accept_pending(channel, |accepted| {
            self.open_channels.accepted_channel_opened(accepted);
            let registry = self.open_channels.clone();
            let id = accepted.id();
            accepted.close_future().on_complete(move |_| {
                registry.channel_closed(id);
            });
        })
    }
}

/// Worker-side production handler; the trait defaults are the production
/// behaviour already.
pub struct TcpSocketHandler;

impl SocketEventHandler for TcpSocketHandler {}
