// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Transport abstraction. Grounded on `transport/mod.rs`'s
//! `Connection`/`Listener` traits and `create_transport(scheme)`,
//! modernized from mio 0.6's `EventSet`/`PollOpt` to mio 0.8's
//! `Interest`/`Token`/`Poll`.

mod ipc;
mod tcp;

use std::io;

use mio::event::Source;

use crate::global::Transport as TransportKind;

/// A bound or connected endpoint carrying raw bytes.
///
/// `try_read`/`try_write` return `Ok(None)` on `WouldBlock`. `Send` is a
/// supertrait (not present in the teacher, whose sockets never crossed a
/// thread boundary) so a whole `Agent` — and the pipes it owns — can move
/// into the dedicated OS thread each agent runs on (OQ-1 in DESIGN.md).
pub trait Connection: Source + Send {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<Option<usize>>;
}

/// A passive endpoint that accepts incoming connections.
pub trait Listener: Source + Send {
    /// Accepts a pending connection. Returns `Ok(None)` on `WouldBlock`.
    fn accept(&mut self) -> io::Result<Option<(Box<dyn Connection>, String)>>;
    /// Releases any OS resources the listener owns (e.g. an IPC socket
    /// file cleaned up from disk).
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Binds/connects over a concrete transport. `bind` with port 0 lets the OS
/// assign a port and reports the concrete address back.
pub trait TransportProvider {
    fn bind(&self, host: &str, port: u16) -> io::Result<(Box<dyn Listener>, String, u16)>;
    fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn Connection>>;
}

pub fn create_transport(kind: TransportKind) -> Box<dyn TransportProvider> {
    match kind {
        TransportKind::Tcp => Box::new(tcp::TcpProvider),
        TransportKind::Ipc => Box::new(ipc::IpcProvider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::Transport as TransportKind;

    #[test]
    fn tcp_bind_port_zero_is_assigned() {
        let provider = create_transport(TransportKind::Tcp);
        let (_listener, host, port) = provider.bind("127.0.0.1", 0).unwrap();

        assert_eq!(host, "127.0.0.1");
        assert_ne!(port, 0);
    }

    #[test]
    fn tcp_roundtrip_sends_bytes() {
        let provider = create_transport(TransportKind::Tcp);
        let (mut listener, host, port) = provider.bind("127.0.0.1", 0).unwrap();

        let mut client = provider.connect(&host, port).unwrap();

        // Spin until the listener's accept stops blocking; this is a
        // synchronous smoke test, not using mio::Poll.
        let mut server = loop {
            if let Some((conn, _peer)) = listener.accept().unwrap() {
                break conn;
            }
        };

        loop {
            match client.try_write(b"ping") {
                Ok(Some(n)) => {
                    assert_eq!(n, 4);
                    break;
                }
                Ok(None) => continue,
                Err(e) => panic!("write failed: {e}"),
            }
        }

        let mut buf = [0u8; 4];
        loop {
            match server.try_read(&mut buf) {
                Ok(Some(n)) => {
                    assert_eq!(n, 4);
                    break;
                }
                Ok(None) => continue,
                Err(e) => panic!("read failed: {e}"),
            }
        }

        assert_eq!(&buf, b"ping");
    }
}
