//! The selector event loops: a shared single-threaded loop skeleton with
//! an accepting flavour for listening sockets and a worker flavour for
//! connection sockets.

pub mod acceptor;
pub(crate) mod base;
pub mod supplier;
pub mod worker;

pub use acceptor::AcceptingSelector;
pub use supplier::{RoundRobinSupplier, WorkerSupplier};
pub use worker::SocketSelector;
