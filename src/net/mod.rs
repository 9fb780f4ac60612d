//! Channel objects: the per-socket state machines and their helpers.

pub mod channel;
pub mod interest;
pub mod read;
pub mod server;
pub mod socket;
pub mod stub;
pub mod write;

pub use channel::{ChannelId, ChannelState};
pub use read::{ReadConsumer, ReadOutcome};
pub use server::{ChannelFactory, ServerChannel, TcpChannelFactory};
pub use socket::SocketChannel;
pub use stub::{ListenerStub, MioListener, MioSocket, SocketStub};
pub use write::{WriteListener, WriteOperation};
