// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The control channel: a small FIFO request/reply server an operator
//! process can dial into to `call` a method, `get`/`set` an attribute,
//! or `bind`/`connect`/`close` a socket on this agent without sharing
//! its thread. Every request carries an optional auth token, checked
//! constant-time against the agent's configured shared secret before
//! anything else runs.
//!
//! Frames are length-prefixed the same way `pipe.rs` frames its payload
//! (a 4-byte big-endian length ahead of the bytes), but skip the
//! role/codec handshake: this isn't a PUB/SUB-style socket with a twin
//! role to negotiate, just one fixed request/reply protocol.

use std::collections::{HashMap, VecDeque};
use std::io;

use byteorder::{BigEndian, ByteOrder};
use mio::event::{Event, Source};
use mio::{Interest, Registry, Token};
use serde::{Deserialize, Serialize};

use crate::agent::dispatch;
use crate::agent::handler::RemoteHandler;
use crate::agent::{Agent, TokenOwner};
use crate::error::{AgentError, AgentResult};
use crate::global::{constant_time_eq, invalid_data_io_error, Address, Role, Transport as TransportKind};
use crate::message::Message;
use crate::transport::{Connection, Listener};

const LENGTH_PREFIX_LEN: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Wire envelope/verb/response shapes, shared between this server side and
/// `proxy.rs`'s client side so the two halves can never drift apart.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub(crate) auth: Option<Vec<u8>>,
    pub(crate) request: Request,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Request {
    Call { method: String, payload: Vec<u8> },
    Get { name: String },
    Set { name: String, payload: Vec<u8> },
    Bind { alias: String, role: String, transport: String, host: String, port: u16, codec: String, handler: Option<RemoteHandler> },
    Connect { alias: String, addr: String, role: String, codec: String, handler: Option<RemoteHandler> },
    Close { alias: String },
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Response {
    Payload(Vec<u8>),
    Address(String),
    Unit,
    Err(String),
}

/// Frames `bytes` the same way a pipe frames its payload: a 4-byte
/// big-endian length ahead of the bytes.
pub(crate) fn frame(bytes: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + bytes.len());
    framed.extend_from_slice(&[0u8; LENGTH_PREFIX_LEN]);
    BigEndian::write_u32(&mut framed[..LENGTH_PREFIX_LEN], bytes.len() as u32);
    framed.extend_from_slice(bytes);
    framed
}

/// Reads exactly one length-prefixed frame's payload from a blocking
/// `Read`, as `proxy.rs` does when waiting for a control reply.
pub(crate) fn read_frame(stream: &mut impl io::Read) -> io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
    stream.read_exact(&mut len_bytes)?;
    let len = BigEndian::read_u32(&len_bytes) as usize;
    if len as u32 > MAX_FRAME_LEN {
        return Err(invalid_data_io_error("control frame too large"));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

fn role_from_str(s: &str) -> io::Result<Role> {
    s.parse().map_err(|_| invalid_data_io_error("control request named an unknown role"))
}

fn codec_from_str(s: &str) -> io::Result<crate::codec::Codec> {
    s.parse().map_err(|_| invalid_data_io_error("control request named an unknown codec"))
}

struct ControlConn {
    connection: Box<dyn Connection>,
    carry: Vec<u8>,
    send_in_flight: Option<(Vec<u8>, usize)>,
    send_queue: VecDeque<Vec<u8>>,
}

impl ControlConn {
    fn new(connection: Box<dyn Connection>) -> ControlConn {
        ControlConn { connection, carry: Vec::new(), send_in_flight: None, send_queue: VecDeque::new() }
    }

    fn queue_response(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + bytes.len());
        framed.extend_from_slice(&[0u8; LENGTH_PREFIX_LEN]);
        BigEndian::write_u32(&mut framed[..LENGTH_PREFIX_LEN], bytes.len() as u32);
        framed.extend_from_slice(&bytes);

        if self.send_in_flight.is_some() || !self.send_queue.is_empty() {
            self.send_queue.push_back(framed);
            return Ok(());
        }
        self.try_flush(framed, 0)
    }

    fn try_flush(&mut self, buf: Vec<u8>, mut offset: usize) -> io::Result<()> {
        loop {
            match self.connection.try_write(&buf[offset..]) {
                Ok(Some(0)) | Ok(None) => {
                    self.send_in_flight = Some((buf, offset));
                    return Ok(());
                }
                Ok(Some(n)) => {
                    offset += n;
                    if offset == buf.len() {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn pump_send_queue(&mut self) -> io::Result<()> {
        if let Some((buf, offset)) = self.send_in_flight.take() {
            self.try_flush(buf, offset)?;
            if self.send_in_flight.is_some() {
                return Ok(());
            }
        }
        while let Some(next) = self.send_queue.pop_front() {
            self.try_flush(next, 0)?;
            if self.send_in_flight.is_some() {
                break;
            }
        }
        Ok(())
    }

    /// Reads whatever is available and splits out any complete frames.
    fn drain_frames(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let mut buf = [0u8; 4096];
        loop {
            match self.connection.try_read(&mut buf)? {
                Some(0) => break,
                Some(n) => self.carry.extend_from_slice(&buf[..n]),
                None => break,
            }
        }

        let mut out = Vec::new();
        loop {
            if self.carry.len() < LENGTH_PREFIX_LEN {
                break;
            }
            let len = BigEndian::read_u32(&self.carry[..LENGTH_PREFIX_LEN]) as usize;
            if len as u32 > MAX_FRAME_LEN {
                return Err(invalid_data_io_error("control frame too large"));
            }
            if self.carry.len() < LENGTH_PREFIX_LEN + len {
                break;
            }
            out.push(self.carry[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len].to_vec());
            self.carry.drain(..LENGTH_PREFIX_LEN + len);
        }
        Ok(out)
    }
}

struct ConnSource<'a>(&'a mut dyn Connection);

impl<'a> Source for ConnSource<'a> {
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

pub struct ControlServer {
    listener: Box<dyn Listener>,
    listener_token: Token,
    conns: HashMap<Token, ControlConn>,
}

impl ControlServer {
    pub(crate) fn new(listener: Box<dyn Listener>, listener_token: Token) -> ControlServer {
        ControlServer { listener, listener_token, conns: HashMap::new() }
    }
}

/// Routes one ready event to either the control listener (accept new
/// connections) or one of its accepted connections (service requests).
pub(crate) fn on_event(agent: &mut Agent, token: Token, event: &Event, is_listener: bool) -> AgentResult<()> {
    if is_listener {
        accept_connections(agent)
    } else {
        service_connection(agent, token, event)
    }
}

fn accept_connections(agent: &mut Agent) -> AgentResult<()> {
    loop {
        let accepted = match agent.control.as_mut() {
            Some(control) => control.listener.accept(),
            None => return Ok(()),
        };

        match accepted {
            Ok(Some((mut connection, _peer))) => {
                let token = agent.alloc_token();
                if let Err(e) =
                    agent.registry().register(&mut ConnSource(&mut *connection), token, Interest::READABLE | Interest::WRITABLE)
                {
                    log::warn!("failed to register control connection: {e}");
                    continue;
                }
                agent.set_token_owner(token, TokenOwner::Control { listener: false });
                if let Some(control) = agent.control.as_mut() {
                    control.conns.insert(token, ControlConn::new(connection));
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("control listener accept failed: {e}");
                break;
            }
        }
    }
    Ok(())
}

fn service_connection(agent: &mut Agent, token: Token, event: &Event) -> AgentResult<()> {
    if event.is_error() || event.is_read_closed() || event.is_write_closed() {
        close_connection(agent, token);
        return Ok(());
    }

    let frames = {
        let Some(control) = agent.control.as_mut() else { return Ok(()) };
        let Some(conn) = control.conns.get_mut(&token) else { return Ok(()) };

        let mut failed = false;
        if event.is_writable() {
            if let Err(e) = conn.pump_send_queue() {
                log::warn!("control connection write failed: {e}");
                failed = true;
            }
        }

        let frames = if !failed && event.is_readable() {
            match conn.drain_frames() {
                Ok(frames) => frames,
                Err(e) => {
                    log::warn!("control connection read failed: {e}");
                    failed = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if failed { None } else { Some(frames) }
    };

    let Some(frames) = frames else {
        close_connection(agent, token);
        return Ok(());
    };

    for frame in frames {
        let response_bytes = match bincode::deserialize::<Envelope>(&frame) {
            Ok(envelope) => {
                let response = handle(agent, envelope);
                bincode::serialize(&response).unwrap_or_else(|e| {
                    bincode::serialize(&Response::Err(e.to_string())).unwrap_or_default()
                })
            }
            Err(e) => bincode::serialize(&Response::Err(format!("malformed control request: {e}"))).unwrap_or_default(),
        };

        if let Some(control) = agent.control.as_mut() {
            if let Some(conn) = control.conns.get_mut(&token) {
                if let Err(e) = conn.queue_response(response_bytes) {
                    log::warn!("control connection failed to queue response: {e}");
                    close_connection(agent, token);
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn close_connection(agent: &mut Agent, token: Token) {
    if let Some(control) = agent.control.as_mut() {
        if let Some(mut conn) = control.conns.remove(&token) {
            let _ = agent.registry().deregister(&mut ConnSource(&mut *conn.connection));
        }
    }
    agent.forget_token(token);
}

fn authorized(agent: &Agent, auth: &Option<Vec<u8>>) -> bool {
    match agent.config.shared_secret() {
        None => true,
        Some(secret) => match auth {
            Some(token) => constant_time_eq(secret, token),
            None => false,
        },
    }
}

fn handle(agent: &mut Agent, envelope: Envelope) -> Response {
    if !authorized(agent, &envelope.auth) {
        return Response::Err(AgentError::Unauthorized.to_string());
    }

    match envelope.request {
        Request::Call { method, payload } => match dispatch::invoke_named(agent, &method, Message::with_body(payload)) {
            Ok(outcome) => {
                if let Some(continuation) = outcome.continuation {
                    continuation(agent);
                }
                Response::Payload(outcome.reply.map(Message::to_buffer).unwrap_or_default())
            }
            Err(e) => Response::Err(e.to_string()),
        },
        Request::Get { name } => match agent.attributes.get_raw(&name) {
            Ok(bytes) => Response::Payload(bytes.to_vec()),
            Err(e) => Response::Err(e.to_string()),
        },
        Request::Set { name, payload } => {
            agent.attributes.set_raw(&name, payload);
            Response::Unit
        }
        Request::Bind { alias, role, transport, host, port, codec, handler } => {
            let result = (|| -> AgentResult<Address> {
                let role = role_from_str(&role).map_err(AgentError::Io)?;
                let transport: TransportKind =
                    transport.parse().map_err(|_| AgentError::Io(invalid_data_io_error("unknown transport in control request")))?;
                let codec: crate::codec::Codec = codec.parse().map_err(AgentError::Io)?;
                let handler_spec = handler.map(Into::into);
                agent.bind(alias, role, transport, &host, port, codec, handler_spec)
            })();
            match result {
                Ok(addr) => Response::Address(addr.to_string()),
                Err(e) => Response::Err(e.to_string()),
            }
        }
        Request::Connect { alias, addr, role, codec, handler } => {
            let result = (|| -> AgentResult<()> {
                let role = role_from_str(&role).map_err(AgentError::Io)?;
                let codec = codec_from_str(&codec).map_err(AgentError::Io)?;
                let parsed = Address::parse(&addr, role, codec).map_err(AgentError::Io)?;
                let handler_spec = handler.map(Into::into);
                agent.connect(alias, &parsed, handler_spec)
            })();
            match result {
                Ok(()) => Response::Unit,
                Err(e) => Response::Err(e.to_string()),
            }
        }
        Request::Close { alias } => match agent.close(&alias) {
            Ok(()) => Response::Unit,
            Err(e) => Response::Err(e.to_string()),
        },
        Request::Shutdown => {
            agent.request_shutdown();
            Response::Unit
        }
    }
}

