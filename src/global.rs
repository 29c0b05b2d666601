// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Small, widely shared types: socket roles, addresses, transports, ids.
//! Mirrors `global.rs`'s `SocketType`/`peer()`/`matches()`, `SocketId`,
//! `IdSequence`, and the `*_io_error` helper family.

use std::fmt;
use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Codec;

/// Communication pattern assigned to a socket.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Role {
    Pub,
    Sub,
    Req,
    Rep,
    Push,
    Pull,
    SyncPub,
    SyncSub,
    AsyncReq,
    AsyncRep,
}

impl Role {
    /// The role assigned to the complementary end of a connection.
    pub fn twin(&self) -> Role {
        match *self {
            Role::Pub => Role::Sub,
            Role::Sub => Role::Pub,
            Role::Req => Role::Rep,
            Role::Rep => Role::Req,
            Role::Push => Role::Pull,
            Role::Pull => Role::Push,
            Role::SyncPub => Role::SyncSub,
            Role::SyncSub => Role::SyncPub,
            Role::AsyncReq => Role::AsyncRep,
            Role::AsyncRep => Role::AsyncReq,
        }
    }

    /// Whether binding this role requires a reply-producing handler.
    pub fn requires_reply_handler(&self) -> bool {
        matches!(self, Role::Rep | Role::SyncPub)
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Role::Pub => "PUB",
            Role::Sub => "SUB",
            Role::Req => "REQ",
            Role::Rep => "REP",
            Role::Push => "PUSH",
            Role::Pull => "PULL",
            Role::SyncPub => "SYNC_PUB",
            Role::SyncSub => "SYNC_SUB",
            Role::AsyncReq => "ASYNC_REQ",
            Role::AsyncRep => "ASYNC_REP",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Role, Error> {
        match s {
            "PUB" => Ok(Role::Pub),
            "SUB" => Ok(Role::Sub),
            "REQ" => Ok(Role::Req),
            "REP" => Ok(Role::Rep),
            "PUSH" => Ok(Role::Push),
            "PULL" => Ok(Role::Pull),
            "SYNC_PUB" => Ok(Role::SyncPub),
            "SYNC_SUB" => Ok(Role::SyncSub),
            "ASYNC_REQ" => Ok(Role::AsyncReq),
            "ASYNC_REP" => Ok(Role::AsyncRep),
            _ => Err(invalid_input_io_error("unknown role")),
        }
    }
}

/// The underlying transport protocol.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Ipc,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Transport::Tcp => "tcp",
            Transport::Ipc => "ipc",
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Transport, Error> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "ipc" => Ok(Transport::Ipc),
            _ => Err(invalid_input_io_error("unknown transport")),
        }
    }
}

/// `(host, port, transport, role, codec)` naming one endpoint of a pipe.
///
/// For `Transport::Ipc`, `host` holds the filesystem path and `port` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub role: Role,
    pub codec: Codec,
}

impl Address {
    pub fn tcp(host: impl Into<String>, port: u16, role: Role, codec: Codec) -> Address {
        Address { host: host.into(), port, transport: Transport::Tcp, role, codec }
    }

    pub fn ipc(path: impl Into<String>, role: Role, codec: Codec) -> Address {
        Address { host: path.into(), port: 0, transport: Transport::Ipc, role, codec }
    }

    /// Returns the same address with `role` swapped to its complement.
    pub fn twin(&self) -> Address {
        Address { role: self.role.twin(), ..self.clone() }
    }

    /// Parses `transport://host:port` (TCP) or `ipc://path` (IPC). Role
    /// and codec are supplied separately since they are not carried by
    /// the textual address.
    pub fn parse(s: &str, role: Role, codec: Codec) -> Result<Address, Error> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| invalid_input_io_error("address missing scheme"))?;

        match scheme {
            "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| invalid_input_io_error("tcp address missing port"))?;
                let port: u16 = port
                    .parse()
                    .map_err(|_| invalid_input_io_error("tcp address has invalid port"))?;
                Ok(Address::tcp(host, port, role, codec))
            }
            "ipc" => Ok(Address::ipc(rest, role, codec)),
            _ => Err(invalid_input_io_error("unknown address scheme")),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.transport {
            Transport::Tcp => write!(f, "tcp://{}:{}", self.host, self.port),
            Transport::Ipc => write!(f, "ipc://{}", self.host),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub usize);

impl fmt::Debug for SocketId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// A monotonically increasing id generator, shared by clone
/// (`Arc<AtomicUsize>` rather than the teacher's `Rc<Cell<_>>`: every
/// `Agent` must be `Send` so it can run on its own OS thread, per OQ-1 in
/// DESIGN.md).
#[derive(Clone)]
pub struct IdSequence {
    value: Arc<AtomicUsize>,
}

impl IdSequence {
    pub fn new() -> IdSequence {
        IdSequence { value: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn next(&self) -> usize {
        self.value.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        IdSequence::new()
    }
}

pub fn other_io_error(msg: &'static str) -> Error {
    Error::new(ErrorKind::Other, msg)
}

pub fn invalid_data_io_error(msg: &'static str) -> Error {
    Error::new(ErrorKind::InvalidData, msg)
}

pub fn would_block_io_error(msg: &'static str) -> Error {
    Error::new(ErrorKind::WouldBlock, msg)
}

pub fn invalid_input_io_error(msg: &'static str) -> Error {
    Error::new(ErrorKind::InvalidInput, msg)
}

pub trait ToMillis {
    fn to_millis(&self) -> u64;
}

impl ToMillis for Duration {
    fn to_millis(&self) -> u64 {
        let millis_from_secs = self.as_secs() * 1_000;
        let millis_from_nanos = self.subsec_nanos() as u64 / 1_000_000;

        millis_from_secs + millis_from_nanos
    }
}

/// Constant-time byte equality, used to compare the control channel's
/// shared secret token without leaking timing information about where
/// the mismatch occurred.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_sequence_can_be_cloned() {
        let seq = IdSequence::new();
        let other = seq.clone();

        assert_eq!(0, other.next());
        assert_eq!(1, seq.next());
        assert_eq!(2, seq.next());
        assert_eq!(3, other.next());
    }

    #[test]
    fn role_twin_is_involutive() {
        for role in [
            Role::Pub, Role::Sub, Role::Req, Role::Rep,
            Role::Push, Role::Pull, Role::SyncPub, Role::SyncSub,
        ] {
            assert_eq!(role, role.twin().twin());
        }
    }

    #[test]
    fn address_twin_swaps_role_only() {
        let addr = Address::tcp("127.0.0.1", 5555, Role::Pub, Codec::Pickle);
        let twin = addr.twin();

        assert_eq!(twin.role, Role::Sub);
        assert_eq!(twin.host, addr.host);
        assert_eq!(twin.port, addr.port);
        assert_eq!(twin.twin(), addr);
    }

    #[test]
    fn address_parse_roundtrips_tcp() {
        let addr = Address::parse("tcp://127.0.0.1:5555", Role::Req, Codec::Json).unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 5555);
        assert_eq!(addr.transport, Transport::Tcp);
    }

    #[test]
    fn address_parse_roundtrips_ipc() {
        let addr = Address::parse("ipc:///tmp/a.sock", Role::Push, Codec::Raw).unwrap();
        assert_eq!(addr.host, "/tmp/a.sock");
        assert_eq!(addr.transport, Transport::Ipc);
    }

    #[test]
    fn constant_time_eq_matches_standard_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secre0"));
        assert!(!constant_time_eq(b"secret", b"short"));
    }
}
