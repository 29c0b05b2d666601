// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

use std::io::{self, ErrorKind, Read, Write};

use mio::event::Source;
use mio::net::{UnixListener, UnixStream};
use mio::{Interest, Registry, Token};

use super::{Connection, Listener, TransportProvider};

pub struct IpcProvider;

impl TransportProvider for IpcProvider {
    fn bind(&self, path: &str, _port: u16) -> io::Result<(Box<dyn Listener>, String, u16)> {
        // A stale socket file from an unclean shutdown would otherwise make
        // bind fail with AddrInUse; best effort cleanup before binding.
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path)?;

        Ok((Box::new(UnixListenerHandle { inner: listener, path: path.to_owned() }), path.to_owned(), 0))
    }

    fn connect(&self, path: &str, _port: u16) -> io::Result<Box<dyn Connection>> {
        let stream = UnixStream::connect(path)?;

        Ok(Box::new(UnixConnectionHandle(stream)))
    }
}

struct UnixListenerHandle {
    inner: UnixListener,
    path: String,
}

impl Listener for UnixListenerHandle {
    fn accept(&mut self) -> io::Result<Option<(Box<dyn Connection>, String)>> {
        match self.inner.accept() {
            Ok((stream, _addr)) => Ok(Some((Box::new(UnixConnectionHandle(stream)), self.path.clone()))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        // Local IPC endpoints are filesystem paths; clean up on close.
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

impl Source for UnixListenerHandle {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}

impl Drop for UnixListenerHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct UnixConnectionHandle(UnixStream);

impl Connection for UnixConnectionHandle {
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

impl Source for UnixConnectionHandle {
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
