//! Raw-socket seams. Production code wraps mio sockets; tests script
//! the results instead of touching the kernel.

use std::io::{self, IoSlice, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};

/// The operations a connection channel needs from its socket.
pub trait SocketStub: Send {
    fn as_source(&mut self) -> &mut dyn Source;

    /// Probe the non-blocking connect. `Ok(true)` once established,
    /// `Ok(false)` while still in flight.
    fn finish_connect(&mut self) -> io::Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn close(&mut self) -> io::Result<()>;
}

/// The operations a listening channel needs from its socket.
pub trait ListenerStub: Send {
    fn as_source(&mut self) -> &mut dyn Source;

    fn accept(&mut self) -> io::Result<(Box<dyn SocketStub>, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn close(&mut self) -> io::Result<()>;
}

pub struct MioSocket {
    stream: TcpStream,
}

impl MioSocket {
    pub fn new(stream: TcpStream) -> MioSocket {
        MioSocket { stream }
    }

    /// Start a non-blocking connect to `remote`. The handshake completes
    /// later, via `finish_connect` on CONNECT readiness.
    pub fn connect(remote: SocketAddr) -> io::Result<MioSocket> {
        Ok(MioSocket {
            stream: TcpStream::connect(remote)?,
        })
    }
}

impl SocketStub for MioSocket {
    fn as_source(&mut self) -> &mut dyn Source {
        &mut self.stream
    }

    fn finish_connect(&mut self) -> io::Result<bool> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(err)
                if err.kind() == io::ErrorKind::NotConnected
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.stream.write_vectored(bufs)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for MioSocket {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub struct MioListener {
    listener: TcpListener,
}

impl MioListener {
    pub fn bind(addr: SocketAddr) -> io::Result<MioListener> {
        Ok(MioListener {
            listener: TcpListener::bind(addr)?,
        })
    }
}

impl ListenerStub for MioListener {
    fn as_source(&mut self) -> &mut dyn Source {
        &mut self.listener
    }

    fn accept(&mut self) -> io::Result<(Box<dyn SocketStub>, SocketAddr)> {
        let (stream, remote) = self.listener.accept()?;
        Ok((Box::new(MioSocket::new(stream)), remote))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn close(&mut self) -> io::Result<()> {
        // The listening socket closes when the channel drops it.
        Ok(())
    }
}
