//! Minimal echo server assembled from the selector engine: one acceptor
//! selector, N worker selectors, each on its own thread.
//!
//! Usage: echo [host:port] [workers]

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use evio::{
    AcceptingSelector, OpenChannels, RoundRobinSupplier, ServerChannel, SocketChannel,
    SocketSelector, TcpAcceptorHandler, TcpChannelFactory, TcpSocketHandler, WriteOperation,
};

fn main() {
    let mut args = env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:8000".to_string())
        .parse()
        .expect("failed to parse host:port");
    let worker_count: usize = args
        .next()
        .map(|raw| raw.parse().expect("failed to parse worker count"))
        .unwrap_or(2)
        .max(1);

    let handler = Arc::new(TcpSocketHandler);
    let workers: Vec<Arc<SocketSelector>> = (0..worker_count)
        .map(|_| SocketSelector::new(handler.clone()).expect("failed to create worker selector"))
        .collect();
    for worker in &workers {
        let worker = worker.clone();
        thread::spawn(move || {
            if let Err(err) = worker.run() {
                eprintln!("worker selector failed: {err}");
            }
        });
    }

    // Everything read off a connection is queued straight back onto it.
    let factory = Arc::new(TcpChannelFactory::with_consumers(|| {
        Box::new(|channel: &Arc<SocketChannel>, chunk: Bytes| {
            if let Some(worker) = channel.owner() {
                worker.queue_write(WriteOperation::single(channel.clone(), chunk, |_| {}));
            }
        })
    }));
    let supplier = Arc::new(RoundRobinSupplier::new(workers));
    let open_channels = OpenChannels::new();
    let acceptor = AcceptingSelector::new(Arc::new(TcpAcceptorHandler::new(open_channels)))
        .expect("failed to create acceptor selector");

    let server =
        ServerChannel::bind(addr, factory, supplier).expect("failed to bind listening socket");
    acceptor
        .register_server_channel(server)
        .expect("failed to register listening socket");

    println!("echo server listening on {addr}");
    if let Err(err) = acceptor.run() {
        eprintln!("acceptor selector failed: {err}");
    }
}
