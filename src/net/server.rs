use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::error::SelectError;
use crate::future::CloseFuture;
use crate::net::channel::{ChannelCore, ChannelId, ChannelState, EngineChannel};
use crate::net::read::ReadConsumer;
use crate::net::socket::SocketChannel;
use crate::net::stub::{ListenerStub, MioListener, MioSocket, SocketStub};
use crate::ops::Ops;
use crate::select::acceptor::AcceptingSelector;
use crate::select::supplier::WorkerSupplier;

/// Produces connection channels, in both directions: wrapping sockets a
/// listener accepted, and opening outbound connections.
pub trait ChannelFactory: Send + Sync {
    fn accepted(&self, socket: Box<dyn SocketStub>, remote: SocketAddr) -> Arc<SocketChannel>;

    fn open(&self, remote: SocketAddr) -> Result<Arc<SocketChannel>, SelectError>;
}

/// Factory over plain mio TCP sockets. A consumer factory, when present,
/// installs a read consumer on every channel it produces.
pub struct TcpChannelFactory {
    consumers: Option<Box<dyn Fn() -> ReadConsumer + Send + Sync>>,
}

impl TcpChannelFactory {
    pub fn new() -> TcpChannelFactory {
        TcpChannelFactory { consumers: None }
    }

    pub fn with_consumers(
        consumers: impl Fn() -> ReadConsumer + Send + Sync + 'static,
    ) -> TcpChannelFactory {
        TcpChannelFactory {
            consumers: Some(Box::new(consumers)),
        }
    }

    fn build(&self, socket: Box<dyn SocketStub>, remote: SocketAddr) -> Arc<SocketChannel> {
        let channel = SocketChannel::new(socket, remote);
        if let Some(consumers) = &self.consumers {
            channel.set_read_consumer(consumers());
        }
        channel
    }
}

impl Default for TcpChannelFactory {
    fn default() -> Self {
        TcpChannelFactory::new()
    }
}

impl ChannelFactory for TcpChannelFactory {
    fn accepted(&self, socket: Box<dyn SocketStub>, remote: SocketAddr) -> Arc<SocketChannel> {
        self.build(socket, remote)
    }

    fn open(&self, remote: SocketAddr) -> Result<Arc<SocketChannel>, SelectError> {
        let socket = MioSocket::connect(remote)?;
        Ok(self.build(Box::new(socket), remote))
    }
}

/// A listening channel: one TCP listener owned, after registration, by an
/// acceptor selector. Holds the factory that wraps accepted sockets and
/// the supplier that picks a worker for each of them.
pub struct ServerChannel {
    core: ChannelCore,
    listener: Mutex<Box<dyn ListenerStub>>,
    factory: Arc<dyn ChannelFactory>,
    supplier: Arc<dyn WorkerSupplier>,
    selector: OnceLock<Weak<AcceptingSelector>>,
    weak_self: Weak<ServerChannel>,
}

impl ServerChannel {
    pub fn new(
        listener: Box<dyn ListenerStub>,
        factory: Arc<dyn ChannelFactory>,
        supplier: Arc<dyn WorkerSupplier>,
    ) -> Arc<ServerChannel> {
        Arc::new_cyclic(|weak_self| ServerChannel {
            core: ChannelCore::new(),
            listener: Mutex::new(listener),
            factory,
            supplier,
            selector: OnceLock::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn bind(
        addr: SocketAddr,
        factory: Arc<dyn ChannelFactory>,
        supplier: Arc<dyn WorkerSupplier>,
    ) -> Result<Arc<ServerChannel>, SelectError> {
        let listener = MioListener::bind(addr)?;
        Ok(ServerChannel::new(Box::new(listener), factory, supplier))
    }

    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().local_addr().ok()
    }

    /// The interest set currently armed for this channel.
    pub fn interest_ops(&self) -> Ops {
        self.core.interest()
    }

    pub fn factory(&self) -> &Arc<dyn ChannelFactory> {
        &self.factory
    }

    pub fn supplier(&self) -> &Arc<dyn WorkerSupplier> {
        &self.supplier
    }

    pub fn owner(&self) -> Option<Arc<AcceptingSelector>> {
        self.selector.get().and_then(Weak::upgrade)
    }

    pub fn close_future(&self) -> Arc<CloseFuture> {
        self.core.close_future()
    }

    /// Take one waiting connection off the listener. `WouldBlock` means
    /// the backlog is drained for now.
    pub fn accept(&self) -> io::Result<(Box<dyn SocketStub>, SocketAddr)> {
        self.listener.lock().accept()
    }

    pub(crate) fn register(&self, selector: &AcceptingSelector) -> Result<bool, SelectError> {
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
            let mut listener = self.listener.lock();
            selector
                .raw_arc()
                .register(listener.as_source(), token, Ops::empty())
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

    pub fn close_async(&self) -> Arc<CloseFuture> {
        let future = self.core.close_future();
        if self.core.state() >= ChannelState::Closing {
            return future;
        }
        match (self.owner(), self.weak_self.upgrade()) {
            (Some(selector), Some(this)) if self.core.state() == ChannelState::Registered => {
                self.core.advance(ChannelState::Closing);
                if selector.queue_channel_close(this).is_err() {
                    self.close_local();
                }
            }
            _ => self.close_local(),
        }
        future
    }

    pub fn close_from_selector(&self) {
        self.teardown();
    }

    pub(crate) fn close_local(&self) {
        if !self.core.claim_close_hook() {
            return;
        }
        self.teardown();
        self.core.close_future().complete(());
    }

    pub(crate) fn listener(&self) -> MutexGuard<'_, Box<dyn ListenerStub>> {
        self.listener.lock()
    }

    pub(crate) fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn teardown(&self) {
        self.core.advance(ChannelState::Closing);
        if let Some(raw) = self.core.raw() {
            if self.core.take_token().is_some() {
                let mut listener = self.listener.lock();
                if let Err(err) = raw.deregister(listener.as_source()) {
                    debug!(
                        "deregister failed for server channel {:?}: {}",
                        self.core.id(),
                        err
                    );
                }
            }
        }
        if let Err(err) = self.listener.lock().close() {
            debug!(
                "listener close failed for server channel {:?}: {}",
                self.core.id(),
                err
            );
        }
        self.core.advance(ChannelState::Closed);
    }
}

impl EngineChannel for ServerChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }
}
