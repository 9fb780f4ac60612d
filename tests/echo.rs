//! End-to-end runs of the engine over real loopback sockets.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use evio::{
    AcceptingSelector, ChannelFactory, OpenChannels, RoundRobinSupplier, ServerChannel,
    SocketSelector, TcpAcceptorHandler, TcpChannelFactory, TcpSocketHandler, WriteOperation,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn spawn_worker() -> Arc<SocketSelector> {
    let worker = SocketSelector::new(Arc::new(TcpSocketHandler)).unwrap();
    let running = worker.clone();
    thread::spawn(move || running.run());
    worker
        .running_future()
        .wait_timeout(DEADLINE)
        .expect("worker loop never started");
    worker
}

#[test]
fn echo_round_trip_and_registry_pruning() {
    let worker = spawn_worker();

    let factory = Arc::new(TcpChannelFactory::with_consumers(|| {
        Box::new(|channel: &Arc<evio::SocketChannel>, chunk: Bytes| {
            if let Some(owner) = channel.owner() {
                owner.queue_write(WriteOperation::single(channel.clone(), chunk, |_| {}));
            }
        })
    }));
    let supplier = Arc::new(RoundRobinSupplier::new(vec![worker.clone()]));
    let open_channels = OpenChannels::new();
    let acceptor =
        AcceptingSelector::new(Arc::new(TcpAcceptorHandler::new(open_channels.clone()))).unwrap();
    let running = acceptor.clone();
    thread::spawn(move || running.run());
    acceptor
        .running_future()
        .wait_timeout(DEADLINE)
        .expect("acceptor loop never started");

    let server = ServerChannel::bind("127.0.0.1:0".parse().unwrap(), factory, supplier).unwrap();
    let addr = server.local_addr().expect("bound listener has an address");
    acceptor.register_server_channel(server.clone()).unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(DEADLINE)).unwrap();
    client.write_all(b"hello, selector").unwrap();

    let mut echoed = [0u8; 15];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hello, selector");

    assert_eq!(open_channels.server_count(), 1);
    assert_eq!(open_channels.socket_count(), 1);
    assert_eq!(worker.registered_channels().len(), 1);

    // Peer hang-up closes the channel and prunes the registry.
    drop(client);
    assert!(wait_until(|| open_channels.socket_count() == 0));
    assert!(wait_until(|| worker.registered_channels().is_empty()));

    acceptor.close(false);
    worker.close(false);
    assert!(!acceptor.is_open());
    assert!(!worker.is_open());
    assert!(server.close_future().is_done());
}

#[test]
fn outbound_connect_write_and_close() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        buf.to_vec()
    });

    let worker = spawn_worker();
    let factory = TcpChannelFactory::new();
    let channel = factory.open(addr).unwrap();
    worker.register_socket_channel(channel.clone()).unwrap();

    let connected = channel
        .connect_future()
        .wait_timeout(DEADLINE)
        .expect("connect never finished");
    connected.expect("connect failed");

    let (tx, rx) = mpsc::channel();
    worker.queue_write(WriteOperation::single(
        channel.clone(),
        Bytes::from_static(b"probe"),
        move |result| {
            let _ = tx.send(result);
        },
    ));
    rx.recv_timeout(DEADLINE)
        .expect("write listener never signalled")
        .expect("write failed");
    assert_eq!(peer.join().unwrap(), b"probe");

    let close = channel.close_async();
    assert!(close.wait_timeout(DEADLINE).is_some());
    assert!(wait_until(|| worker.registered_channels().is_empty()));

    worker.close(false);
    assert!(!worker.is_open());
}
