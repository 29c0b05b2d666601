// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! `Proxy`: the operator-side client of an agent's control channel (§6),
//! one-to-one with the control verbs of §4.5. Grounded on the teacher's
//! `socket_facade.rs` (`SocketFacade` as a thin synchronous client wrapping
//! a command channel with a blocking reply receive) — here the "channel"
//! is a real socket dial rather than an in-process `mpsc`, since an agent
//! is a separate OS thread (or host) a `Proxy` may not share memory with.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::agent::handler::RemoteHandler;
use crate::codec::Codec;
use crate::control::{self, Envelope, Request, Response};
use crate::error::{AgentError, AgentResult};
use crate::global::{Address, Role, Transport as TransportKind};

/// A blocking byte stream dialed to an agent's control address. TCP and
/// Unix-domain sockets both qualify; `Proxy` doesn't care which.
trait Dialed: Read + Write {}
impl Dialed for TcpStream {}
impl Dialed for UnixStream {}

fn dial(addr: &Address) -> std::io::Result<Box<dyn Dialed>> {
    match addr.transport {
        TransportKind::Tcp => {
            let stream = TcpStream::connect((addr.host.as_str(), addr.port))?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        TransportKind::Ipc => Ok(Box::new(UnixStream::connect(&addr.host)?)),
    }
}

/// A client handle to one agent's control channel. One-to-one with the
/// verbs in §4.5: `call`, `get`/`set`, `bind`, `connect`, `close`,
/// `shutdown`. Every operation dials fresh (remote invocation is
/// synchronous, one request/one reply, §4.5) rather than holding a
/// long-lived connection open, since a `Proxy` may outlive long idle
/// stretches between operator calls.
#[derive(Clone)]
pub struct Proxy {
    name: String,
    addr: Address,
    auth: Option<Vec<u8>>,
    codec: Codec,
}

impl Proxy {
    pub(crate) fn new(name: impl Into<String>, addr: Address, auth: Option<Vec<u8>>, codec: Codec) -> Proxy {
        Proxy { name: name.into(), addr, auth, codec }
    }

    /// The name this agent registered (or will register) under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The control address this proxy dials for every request.
    pub fn control_address(&self) -> &Address {
        &self.addr
    }

    fn roundtrip(&self, request: Request) -> AgentResult<Response> {
        let envelope = Envelope { auth: self.auth.clone(), request };
        let bytes = bincode::serialize(&envelope).map_err(|e| AgentError::Io(invalid_data_io_error_dyn(e)))?;

        let mut stream = dial(&self.addr).map_err(|source| AgentError::ConnectFailed { addr: self.addr.to_string(), source })?;
        stream.write_all(&control::frame(&bytes)).map_err(AgentError::Io)?;

        let response_bytes = control::read_frame(&mut stream).map_err(AgentError::Io)?;
        bincode::deserialize(&response_bytes).map_err(|e| AgentError::Io(invalid_data_io_error_dyn(e)))
    }

    /// Raw form of `call`: sends already-encoded bytes, returns the
    /// already-encoded reply bytes untouched. Used by `NameServer`, whose
    /// wire protocol is private to this crate and independent of whatever
    /// codec the caller configured this `Proxy` with.
    pub(crate) fn call_raw(&self, method: &str, payload: Vec<u8>) -> AgentResult<Vec<u8>> {
        match self.roundtrip(Request::Call { method: method.to_owned(), payload })? {
            Response::Payload(bytes) => Ok(bytes),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for call".to_owned())),
        }
    }

    /// Invokes `method` on the agent, encoding `args` and decoding the
    /// return value with this proxy's configured codec.
    pub fn call<A: Serialize, R: DeserializeOwned>(&self, method: &str, args: &A) -> AgentResult<R> {
        let payload = self.codec.encode(args).map_err(AgentError::Io)?;
        let bytes = self.call_raw(method, payload)?;
        self.codec.decode(&bytes).map_err(AgentError::Io)
    }

    /// Reads an attribute.
    pub fn get_attr<T: DeserializeOwned>(&self, name: &str) -> AgentResult<T> {
        match self.roundtrip(Request::Get { name: name.to_owned() })? {
            Response::Payload(bytes) => self.codec.decode(&bytes).map_err(AgentError::Io),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for get".to_owned())),
        }
    }

    /// Writes an attribute.
    pub fn set_attr<T: Serialize>(&self, name: &str, value: &T) -> AgentResult<()> {
        let payload = self.codec.encode(value).map_err(AgentError::Io)?;
        match self.roundtrip(Request::Set { name: name.to_owned(), payload })? {
            Response::Unit => Ok(()),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for set".to_owned())),
        }
    }

    /// Binds a socket of `role` on the agent, returning the address it
    /// bound (port 0 is assigned by the agent's OS and reported back).
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        &self,
        alias: &str,
        role: Role,
        transport: TransportKind,
        host: &str,
        port: u16,
        codec: Codec,
        handler: Option<RemoteHandler>,
    ) -> AgentResult<Address> {
        let request = Request::Bind {
            alias: alias.to_owned(),
            role: role.as_str().to_owned(),
            transport: transport.as_str().to_owned(),
            host: host.to_owned(),
            port,
            codec: codec.as_str().to_owned(),
            handler,
        };
        match self.roundtrip(request)? {
            Response::Address(addr) => Address::parse(&addr, role, codec).map_err(AgentError::Io),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for bind".to_owned())),
        }
    }

    /// Connects a socket on the agent to `addr` (the twin's bound address).
    pub fn connect(&self, alias: &str, addr: &Address, handler: Option<RemoteHandler>) -> AgentResult<()> {
        let request = Request::Connect {
            alias: alias.to_owned(),
            addr: addr.to_string(),
            role: addr.role.as_str().to_owned(),
            codec: addr.codec.as_str().to_owned(),
            handler,
        };
        match self.roundtrip(request)? {
            Response::Unit => Ok(()),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for connect".to_owned())),
        }
    }

    /// Closes and deregisters a socket by alias.
    pub fn close(&self, alias: &str) -> AgentResult<()> {
        match self.roundtrip(Request::Close { alias: alias.to_owned() })? {
            Response::Unit => Ok(()),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for close".to_owned())),
        }
    }

    /// Requests the agent shut its event loop down and exit.
    pub fn shutdown(&self) -> AgentResult<()> {
        match self.roundtrip(Request::Shutdown)? {
            Response::Unit => Ok(()),
            Response::Err(message) => Err(AgentError::Remote(message)),
            _ => Err(AgentError::Remote("malformed control response for shutdown".to_owned())),
        }
    }

    /// Whether this proxy can still reach the agent's control channel —
    /// a cheap connect probe, used by the name server to decide whether a
    /// `register` collision is a live agent (§3 invariant on registration,
    /// §8 S6).
    pub fn is_reachable(&self, timeout: Duration) -> bool {
        match self.addr.transport {
            TransportKind::Tcp => std::net::TcpStream::connect_timeout(
                &match format!("{}:{}", self.addr.host, self.addr.port).parse() {
                    Ok(sock_addr) => sock_addr,
                    Err(_) => return false,
                },
                timeout,
            )
            .is_ok(),
            TransportKind::Ipc => UnixStream::connect(&self.addr.host).is_ok(),
        }
    }
}

fn invalid_data_io_error_dyn(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_control_address_is_not_reachable() {
        let addr = Address::tcp("127.0.0.1", 1, Role::Rep, Codec::Pickle);
        let proxy = Proxy::new("ghost", addr, None, Codec::Pickle);
        assert!(!proxy.is_reachable(Duration::from_millis(200)));
    }
}
