// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! A pipe is responsible for handshaking with its peer (exchanging
//! `(role, codec)` so a role mismatch can be rejected before any data
//! flows) and transferring length-prefixed raw frames over a
//! connection. Grounded on `pipe.rs`'s `Pipe`/`PipeState`/`Initial`/
//! `HandshakeTx`/`HandshakeRx`/`Idle`/`RecvOperation`, consolidated from
//! five boxed-trait-object states to one struct with an internal `Phase`
//! enum — this crate is not nanomsg-wire-compatible, so the state count
//! a faithful handshake needs is smaller.

use std::collections::VecDeque;
use std::io;

use byteorder::{BigEndian, ByteOrder};
use mio::event::Event;
use mio::{Interest, Registry, Token};

use crate::codec::Codec;
use crate::global::{invalid_data_io_error, would_block_io_error, Role};
use crate::transport::Connection;

const HANDSHAKE_MAGIC: [u8; 2] = [b'S', b'W'];
const HANDSHAKE_LEN: usize = 4;
const LENGTH_PREFIX_LEN: usize = 4;
/// Frames above this size are rejected as a decode failure rather than
/// allowed to grow the receive buffer without bound.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

fn role_id(role: Role) -> u8 {
    match role {
        Role::Pub => 0,
        Role::Sub => 1,
        Role::Req => 2,
        Role::Rep => 3,
        Role::Push => 4,
        Role::Pull => 5,
        Role::SyncPub => 6,
        Role::SyncSub => 7,
        Role::AsyncReq => 8,
        Role::AsyncRep => 9,
    }
}

fn role_from_id(id: u8) -> io::Result<Role> {
    match id {
        0 => Ok(Role::Pub),
        1 => Ok(Role::Sub),
        2 => Ok(Role::Req),
        3 => Ok(Role::Rep),
        4 => Ok(Role::Push),
        5 => Ok(Role::Pull),
        6 => Ok(Role::SyncPub),
        7 => Ok(Role::SyncSub),
        8 => Ok(Role::AsyncReq),
        9 => Ok(Role::AsyncRep),
        _ => Err(invalid_data_io_error("received bad handshake: unknown role id")),
    }
}

fn codec_id(codec: Codec) -> u8 {
    match codec {
        Codec::Pickle => 0,
        Codec::Json => 1,
        Codec::Raw => 2,
        Codec::Unformatted => 3,
    }
}

fn codec_from_id(id: u8) -> io::Result<Codec> {
    match id {
        0 => Ok(Codec::Pickle),
        1 => Ok(Codec::Json),
        2 => Ok(Codec::Raw),
        3 => Ok(Codec::Unformatted),
        _ => Err(invalid_data_io_error("received bad handshake: unknown codec id")),
    }
}

fn encode_handshake(role: Role, codec: Codec) -> [u8; HANDSHAKE_LEN] {
    [HANDSHAKE_MAGIC[0], HANDSHAKE_MAGIC[1], role_id(role), codec_id(codec)]
}

fn decode_handshake(buf: &[u8; HANDSHAKE_LEN]) -> io::Result<(Role, Codec)> {
    if buf[0] != HANDSHAKE_MAGIC[0] || buf[1] != HANDSHAKE_MAGIC[1] {
        return Err(invalid_data_io_error("received bad handshake: bad magic"));
    }
    Ok((role_from_id(buf[2])?, codec_from_id(buf[3])?))
}

#[derive(Debug)]
enum Phase {
    /// Sending our handshake and/or waiting for the peer's.
    Handshaking { send_done: bool, recv_buf: Vec<u8> },
    /// Handshake complete; framing length-prefixed messages both ways.
    Connected,
    Closed,
}

/// Outcome of a single `ready()` call.
pub struct PipeReady {
    /// Complete frames received this call, oldest first.
    pub frames: Vec<Vec<u8>>,
    /// Fires exactly once, when the handshake completes.
    pub just_connected: Option<(Role, Codec)>,
}

impl PipeReady {
    fn empty() -> PipeReady {
        PipeReady { frames: Vec::new(), just_connected: None }
    }
}

pub struct Pipe {
    token: Token,
    addr: Option<String>,
    connection: Box<dyn Connection>,
    own_role: Role,
    own_codec: Codec,
    phase: Phase,
    send_in_flight: Option<(Vec<u8>, usize)>,
    send_queue: VecDeque<Vec<u8>>,
    /// Bytes received but not yet forming a complete frame.
    carry: Vec<u8>,
}

impl Pipe {
    pub fn new(
        token: Token,
        addr: Option<String>,
        connection: Box<dyn Connection>,
        own_role: Role,
        own_codec: Codec,
    ) -> Pipe {
        Pipe {
            token,
            addr,
            connection,
            own_role,
            own_codec,
            phase: Phase::Handshaking { send_done: false, recv_buf: Vec::with_capacity(HANDSHAKE_LEN) },
            send_in_flight: None,
            send_queue: VecDeque::new(),
            carry: Vec::new(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut SourceMut(&mut *self.connection), self.token, Interest::READABLE | Interest::WRITABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut SourceMut(&mut *self.connection))
    }

    /// Begins the handshake by attempting an immediate, non-blocking send;
    /// the rest completes on subsequent `ready()` calls.
    pub fn open(&mut self) -> io::Result<()> {
        let handshake = encode_handshake(self.own_role, self.own_codec).to_vec();
        let done = self.try_flush(handshake, 0)?;

        if let Phase::Handshaking { send_done, .. } = &mut self.phase {
            *send_done = done;
        }
        Ok(())
    }

    fn try_flush(&mut self, buf: Vec<u8>, offset: usize) -> io::Result<bool> {
        let mut offset = offset;
        loop {
            match self.connection.try_write(&buf[offset..]) {
                Ok(Some(0)) => {
                    self.send_in_flight = Some((buf, offset));
                    return Ok(false);
                }
                Ok(Some(n)) => {
                    offset += n;
                    if offset == buf.len() {
                        return Ok(true);
                    }
                }
                Ok(None) => {
                    self.send_in_flight = Some((buf, offset));
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Queues an already-framed payload for send, prefixed with its length.
    pub fn enqueue_send(&mut self, payload: Vec<u8>) -> io::Result<()> {
        if !matches!(self.phase, Phase::Connected) {
            return Err(would_block_io_error("pipe not yet connected"));
        }
        if payload.len() as u64 > MAX_FRAME_LEN as u64 {
            return Err(invalid_data_io_error("frame too large"));
        }

        let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        framed.extend_from_slice(&[0u8; LENGTH_PREFIX_LEN]);
        BigEndian::write_u32(&mut framed[..LENGTH_PREFIX_LEN], payload.len() as u32);
        framed.extend_from_slice(&payload);

        if self.send_in_flight.is_some() {
            self.send_queue.push_back(framed);
            return Ok(());
        }

        if !self.try_flush(framed, 0)? {
            // partially sent or postponed; try_flush already stashed it
        }
        Ok(())
    }

    fn pump_send_queue(&mut self) -> io::Result<()> {
        loop {
            if let Some((buf, offset)) = self.send_in_flight.take() {
                if !self.try_flush(buf, offset)? {
                    return Ok(());
                }
            }
            match self.send_queue.pop_front() {
                Some(next) => {
                    if !self.try_flush(next, 0)? {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }

    pub fn ready(&mut self, event: &Event) -> io::Result<PipeReady> {
        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            return Err(would_block_io_error("pipe connection closed by peer"));
        }

        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Handshaking { mut send_done, mut recv_buf } => {
                if event.is_writable() && !send_done {
                    if self.send_in_flight.is_some() {
                        let (buf, offset) = self.send_in_flight.take().unwrap();
                        send_done = self.try_flush(buf, offset)?;
                    } else {
                        send_done = true;
                    }
                }

                if event.is_readable() {
                    let mut buf = [0u8; HANDSHAKE_LEN];
                    loop {
                        let need = HANDSHAKE_LEN - recv_buf.len();
                        if need == 0 {
                            break;
                        }
                        match self.connection.try_read(&mut buf[..need])? {
                            Some(0) => break,
                            Some(n) => recv_buf.extend_from_slice(&buf[..n]),
                            None => break,
                        }
                    }
                }

                if recv_buf.len() == HANDSHAKE_LEN && send_done {
                    let mut fixed = [0u8; HANDSHAKE_LEN];
                    fixed.copy_from_slice(&recv_buf);
                    let (peer_role, peer_codec) = decode_handshake(&fixed)?;

                    if peer_role != self.own_role.twin() {
                        return Err(invalid_data_io_error(
                            "received bad handshake: role is not our twin",
                        ));
                    }

                    self.phase = Phase::Connected;
                    return Ok(PipeReady {
                        frames: Vec::new(),
                        just_connected: Some((peer_role, peer_codec)),
                    });
                }

                self.phase = Phase::Handshaking { send_done, recv_buf };
                Ok(PipeReady::empty())
            }
            Phase::Connected => {
                self.phase = Phase::Connected;

                if event.is_writable() {
                    self.pump_send_queue()?;
                }

                let mut frames = Vec::new();
                if event.is_readable() {
                    frames = self.drain_frames()?;
                }

                Ok(PipeReady { frames, just_connected: None })
            }
            Phase::Closed => Ok(PipeReady::empty()),
        }
    }

    fn drain_frames(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match self.connection.try_read(&mut buf)? {
                Some(0) => break,
                Some(n) => self.carry.extend_from_slice(&buf[..n]),
                None => break,
            }
        }

        loop {
            if self.carry.len() < LENGTH_PREFIX_LEN {
                break;
            }
            let len = BigEndian::read_u32(&self.carry[..LENGTH_PREFIX_LEN]) as usize;
            if len as u32 > MAX_FRAME_LEN {
                return Err(invalid_data_io_error("frame too large"));
            }
            if self.carry.len() < LENGTH_PREFIX_LEN + len {
                break;
            }

            let frame = self.carry[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len].to_vec();
            self.carry.drain(..LENGTH_PREFIX_LEN + len);
            out.push(frame);
        }

        Ok(out)
    }

    pub fn close(mut self, registry: &Registry) {
        let _ = self.deregister(registry);
    }
}

/// `mio::event::Source` requires `&mut`; `Box<dyn Connection>` already
/// derefs mutably, this newtype just satisfies the borrow shape for
/// `Registry::register`/`reregister`/`deregister`.
struct SourceMut<'a>(&'a mut dyn Connection);

impl<'a> mio::event::Source for SourceMut<'a> {
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
