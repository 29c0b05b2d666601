// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};

use super::{Connection, Listener, TransportProvider};

pub struct TcpProvider;

impl TransportProvider for TcpProvider {
    fn bind(&self, host: &str, port: u16) -> io::Result<(Box<dyn Listener>, String, u16)> {
        let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, "invalid tcp bind address")
        })?;
        let listener = TcpListener::bind(addr)?;
        let bound_port = listener.local_addr()?.port();

        Ok((Box::new(TcpListenerHandle(listener)), host.to_owned(), bound_port))
    }

    fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn Connection>> {
        let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, "invalid tcp connect address")
        })?;
        let stream = TcpStream::connect(addr)?;

        Ok(Box::new(TcpConnectionHandle(stream)))
    }
}

struct TcpListenerHandle(TcpListener);

impl Listener for TcpListenerHandle {
    fn accept(&mut self) -> io::Result<Option<(Box<dyn Connection>, String)>> {
        match self.0.accept() {
            Ok((stream, peer)) => Ok(Some((Box::new(TcpConnectionHandle(stream)), peer.to_string()))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Source for TcpListenerHandle {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.0.deregister(registry)
    }
}

struct TcpConnectionHandle(TcpStream);

impl Connection for TcpConnectionHandle {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.0.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
        match self.0.write(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Source for TcpConnectionHandle {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.0.deregister(registry)
    }
}
