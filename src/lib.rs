//! Readiness-driven non-blocking TCP engine.
//!
//! Two single-threaded selector loops drive all socket I/O: an accepting
//! selector owns listening sockets and hands accepted connections to
//! worker selectors, which own connection sockets and their buffers.
//! Producers on other threads enqueue work (register a channel, queue a
//! write, request a close); the owning selector drains it, so kernel
//! state and per-channel buffers are only ever touched by one thread.

pub mod error; // error taxonomy
pub mod future; // one-shot completions
pub mod handler; // event-handler surface
pub mod net; // channel objects
pub mod ops; // interest/ready bits
pub mod poll; // readiness backend
pub mod queues; // cross-thread fifos
pub mod select; // the selector loops


pub use error::SelectError;
pub use future::{CloseFuture, ConnectFuture, OneShot, RunningFuture};
pub use handler::{
    AcceptorEventHandler, OpenChannels, SocketEventHandler, TcpAcceptorHandler, TcpSocketHandler,
};
pub use net::{
    ChannelFactory, ChannelId, ChannelState, ReadOutcome, ServerChannel, SocketChannel,
    TcpChannelFactory, WriteOperation,
};
pub use ops::Ops;
pub use poll::{MioSelector, RawSelector, ReadyKey};
pub use select::{AcceptingSelector, RoundRobinSupplier, SocketSelector, WorkerSupplier};
