// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The `Agent`: a named, addressable execution context owning a set of
//! bound/connected sockets, a method dispatch table, an attribute map,
//! and timers, all driven by one `mio::Poll` loop on one OS thread.
//! Generalizes the teacher's `SocketImpl::ready` (the acceptor/pipe
//! dispatch split) to dispatch across many sockets, a control channel,
//! and timers within a single loop iteration.

pub mod attributes;
pub mod dispatch;
pub mod event_loop;
pub mod handler;
pub mod timers;

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Interest, Poll, Registry, Token};

use crate::codec::Codec;
use crate::control::ControlServer;
use crate::error::{AgentError, AgentResult};
use crate::global::{Address, Role, SocketId, Transport as TransportKind};
use crate::message::Message;
use crate::pipe::Pipe;
use crate::protocol::pub_::Pub;
use crate::protocol::pull::Pull;
use crate::protocol::push::Push;
use crate::protocol::rep::Rep;
use crate::protocol::req::Req;
use crate::protocol::sub::Sub;
use crate::protocol::sync_pub::SyncPub;
use crate::protocol::sync_sub::SyncSub;
use crate::protocol::{Inbound, Protocol};
use crate::transport::{self, Listener, TransportProvider};

use self::attributes::Attributes;
use self::handler::HandlerSpec;
use self::timers::Timers;

/// A SYNC_SUB request awaiting its reply or deadline, keyed by
/// `(socket, request_id)` since each SYNC_SUB socket mints its own
/// request ids independently (see `protocol::sync_sub::SyncSub`).
struct PendingSync {
    reply_handler: Option<HandlerSpec>,
    on_error: Option<HandlerSpec>,
}

pub(crate) enum SocketEntry {
    Pub(Pub),
    Sub(Sub),
    Req(Req),
    Rep(Rep),
    Push(Push),
    Pull(Pull),
    SyncPub(SyncPub),
    SyncSub(SyncSub),
}

impl SocketEntry {
    fn role(&self) -> Role {
        match self {
            SocketEntry::Pub(_) => Role::Pub,
            SocketEntry::Sub(_) => Role::Sub,
            SocketEntry::Req(_) => Role::Req,
            SocketEntry::Rep(_) => Role::Rep,
            SocketEntry::Push(_) => Role::Push,
            SocketEntry::Pull(_) => Role::Pull,
            SocketEntry::SyncPub(_) => Role::SyncPub,
            SocketEntry::SyncSub(_) => Role::SyncSub,
        }
    }

    /// Whether this role binds a listener (the "server" side of a pair)
    /// rather than connecting out. SYNC_PUB binds both of its legs.
    fn binds(&self) -> bool {
        matches!(self, SocketEntry::Pub(_) | SocketEntry::Rep(_) | SocketEntry::Pull(_) | SocketEntry::SyncPub(_))
    }
}

/// What one readiness pass on a pipe produced, once role-specific
/// protocol logic (e.g. `Sub`'s topic filter) has already been applied.
pub(crate) enum DispatchItem {
    /// An ordinary message bound for the socket's configured handler.
    Message(Inbound),
    /// The reply to a SYNC_SUB request, routed to that request's own
    /// handler rather than the socket's general subscriber handler.
    SyncReplied { request_id: u64, inbound: Inbound },
}

/// What a pollable `Token` refers back to.
pub(crate) enum TokenOwner {
    Listener { socket: SocketId, reply_leg: bool },
    Pipe { socket: SocketId },
    /// The control channel's own listener, or one of its accepted
    /// connections.
    Control { listener: bool },
}

struct Socket {
    id: SocketId,
    addr: Address,
    handler: Option<HandlerSpec>,
    entry: SocketEntry,
    listener: Option<Box<dyn Listener>>,
    reply_listener: Option<Box<dyn Listener>>,
}

pub struct Agent {
    pub(crate) name: String,
    poll: Poll,
    next_token: usize,
    next_socket_id: usize,
    sockets: HashMap<SocketId, Socket>,
    token_owner: HashMap<Token, TokenOwner>,
    aliases: HashMap<String, SocketId>,
    pub(crate) methods: HashMap<String, handler::HandlerFn>,
    pub(crate) attributes: Attributes,
    pub(crate) timers: Timers,
    pub(crate) config: crate::config::Config,
    pub(crate) control: Option<ControlServer>,
    pending_sync: HashMap<(SocketId, u64), PendingSync>,
    shutting_down: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>, config: crate::config::Config) -> io::Result<Agent> {
        let codec = config.default_codec();
        Ok(Agent {
            name: name.into(),
            poll: Poll::new()?,
            next_token: 0,
            next_socket_id: 0,
            sockets: HashMap::new(),
            token_owner: HashMap::new(),
            aliases: HashMap::new(),
            methods: HashMap::new(),
            attributes: Attributes::new(codec),
            timers: Timers::new(),
            config,
            control: None,
            pending_sync: HashMap::new(),
            shutting_down: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub(crate) fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn alloc_socket_id(&mut self) -> SocketId {
        let id = SocketId(self.next_socket_id);
        self.next_socket_id += 1;
        id
    }

    fn transport_for(&self, kind: TransportKind) -> Box<dyn TransportProvider> {
        transport::create_transport(kind)
    }

    pub(crate) fn register_listener(&mut self, listener: &mut dyn Listener, token: Token) -> io::Result<()> {
        struct ListenerSource<'a>(&'a mut dyn Listener);
        impl<'a> Source for ListenerSource<'a> {
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
        self.registry().register(&mut ListenerSource(listener), token, Interest::READABLE)
    }

    /// Binds a socket of `role` at `host:port` (TCP) or `host` (IPC path),
    /// registering whichever listener(s) the role needs. Returns the
    /// concrete address bound (port 0 is assigned by the OS).
    pub fn bind(
        &mut self,
        alias: impl Into<String>,
        role: Role,
        transport_kind: TransportKind,
        host: &str,
        port: u16,
        codec: Codec,
        handler: Option<HandlerSpec>,
    ) -> AgentResult<Address> {
        let alias = alias.into();
        if self.aliases.contains_key(&alias) {
            return Err(AgentError::AliasInUse { alias });
        }
        if matches!(role, Role::Pub | Role::SyncPub) && !codec.allows_topic_framing() {
            return Err(AgentError::TopicFramingUnsupported { alias });
        }
        if role.requires_reply_handler() && handler.is_none() {
            return Err(AgentError::UnknownMethod { method: format!("{role} binding '{alias}' needs a handler") });
        }

        let provider = self.transport_for(transport_kind);
        let (mut listener, bound_host, bound_port) = provider
            .bind(host, port)
            .map_err(|source| AgentError::BindFailed { addr: format!("{host}:{port}"), source })?;

        let id = self.alloc_socket_id();
        let token = self.alloc_token();
        self.register_listener(listener.as_mut(), token)
            .map_err(|source| AgentError::BindFailed { addr: format!("{bound_host}:{bound_port}"), source })?;
        self.token_owner.insert(token, TokenOwner::Listener { socket: id, reply_leg: false });

        let addr = if transport_kind == TransportKind::Ipc {
            Address::ipc(bound_host, role, codec)
        } else {
            Address::tcp(bound_host, bound_port, role, codec)
        };

        let mut reply_listener = None;
        let entry = match role {
            Role::Pub => SocketEntry::Pub(Pub::new()),
            Role::Rep => SocketEntry::Rep(Rep::new()),
            Role::Pull => SocketEntry::Pull(Pull::new()),
            Role::SyncPub => {
                let reply_host = addr.host.clone();
                let reply_port = bound_port.wrapping_add(1);
                let (mut rl, _h, _p) = provider
                    .bind(&reply_host, reply_port)
                    .map_err(|source| AgentError::BindFailed { addr: format!("{reply_host}:{reply_port}"), source })?;
                let reply_token = self.alloc_token();
                self.register_listener(rl.as_mut(), reply_token)
                    .map_err(|source| AgentError::BindFailed { addr: reply_host.clone(), source })?;
                self.token_owner.insert(reply_token, TokenOwner::Listener { socket: id, reply_leg: true });
                reply_listener = Some(rl);
                SocketEntry::SyncPub(SyncPub::new())
            }
            _ => {
                return Err(AgentError::RoleMismatch {
                    expected: "a binding role (PUB, REP, PULL, SYNC_PUB)".to_owned(),
                    actual: role.to_string(),
                })
            }
        };

        self.sockets.insert(id, Socket { id, addr: addr.clone(), handler, entry, listener: Some(listener), reply_listener });
        self.aliases.insert(alias, id);
        Ok(addr)
    }

    /// Connects a socket of `role` to `addr` (its twin's bound address).
    pub fn connect(
        &mut self,
        alias: impl Into<String>,
        addr: &Address,
        handler: Option<HandlerSpec>,
    ) -> AgentResult<()> {
        let alias = alias.into();
        if self.aliases.contains_key(&alias) {
            return Err(AgentError::AliasInUse { alias });
        }
        if matches!(addr.role.twin(), Role::Sub | Role::SyncSub) && !addr.codec.allows_topic_framing() {
            return Err(AgentError::TopicFramingUnsupported { alias });
        }

        let role = addr.role.twin();
        let provider = self.transport_for(addr.transport);
        let id = self.alloc_socket_id();

        let mut connect_leg = |agent: &mut Agent, host: &str, port: u16, own_role: Role| -> AgentResult<Pipe> {
            let connection = provider
                .connect(host, port)
                .map_err(|source| AgentError::ConnectFailed { addr: format!("{host}:{port}"), source })?;
            let token = agent.alloc_token();
            let mut pipe = Pipe::new(token, Some(format!("{host}:{port}")), connection, own_role, addr.codec);
            pipe.register(agent.registry()).map_err(|source| AgentError::ConnectFailed { addr: host.to_owned(), source })?;
            pipe.open().map_err(|source| AgentError::ConnectFailed { addr: host.to_owned(), source })?;
            agent.token_owner.insert(token, TokenOwner::Pipe { socket: id });
            Ok(pipe)
        };

        let entry = match role {
            Role::Sub => {
                let pipe = connect_leg(self, &addr.host, addr.port, Role::Sub)?;
                let mut sub = Sub::new();
                sub.add_pipe(pipe.token(), pipe).map_err(|source| AgentError::ConnectFailed { addr: addr.to_string(), source })?;
                SocketEntry::Sub(sub)
            }
            Role::Req => {
                let pipe = connect_leg(self, &addr.host, addr.port, Role::Req)?;
                let mut req = Req::new();
                req.add_pipe(pipe.token(), pipe).map_err(|source| AgentError::ConnectFailed { addr: addr.to_string(), source })?;
                SocketEntry::Req(req)
            }
            Role::Push => {
                let pipe = connect_leg(self, &addr.host, addr.port, Role::Push)?;
                let mut push = Push::new();
                push.add_pipe(pipe.token(), pipe).map_err(|source| AgentError::ConnectFailed { addr: addr.to_string(), source })?;
                SocketEntry::Push(push)
            }
            Role::SyncSub => {
                let sub_pipe = connect_leg(self, &addr.host, addr.port, Role::Sub)?;
                let req_pipe = connect_leg(self, &addr.host, addr.port.wrapping_add(1), Role::Req)?;
                let mut sync_sub = SyncSub::new();
                sync_sub.subscribe.add_pipe(sub_pipe.token(), sub_pipe)
                    .map_err(|source| AgentError::ConnectFailed { addr: addr.to_string(), source })?;
                sync_sub.requests.add_pipe(req_pipe.token(), req_pipe)
                    .map_err(|source| AgentError::ConnectFailed { addr: addr.to_string(), source })?;
                SocketEntry::SyncSub(sync_sub)
            }
            _ => {
                return Err(AgentError::RoleMismatch {
                    expected: "a connecting role (SUB, REQ, PUSH, SYNC_SUB)".to_owned(),
                    actual: role.to_string(),
                })
            }
        };

        self.sockets.insert(id, Socket { id, addr: addr.twin(), handler, entry, listener: None, reply_listener: None });
        self.aliases.insert(alias, id);
        Ok(())
    }

    pub fn subscribe(&mut self, alias: &str, topic_prefix: &[u8]) -> AgentResult<()> {
        let id = self.resolve_alias(alias)?;
        match &mut self.sockets.get_mut(&id).unwrap().entry {
            SocketEntry::Sub(sub) => {
                sub.subscribe(topic_prefix);
                Ok(())
            }
            SocketEntry::SyncSub(sync_sub) => {
                sync_sub.subscribe(topic_prefix);
                Ok(())
            }
            other => Err(AgentError::RoleMismatch { expected: "SUB or SYNC_SUB".to_owned(), actual: other.role().to_string() }),
        }
    }

    pub fn publish(&mut self, alias: &str, topic: &[u8], payload: Vec<u8>) -> AgentResult<()> {
        let id = self.resolve_alias(alias)?;
        let socket = self.sockets.get_mut(&id).unwrap();
        let message = Message::with_topic(topic.to_vec(), payload);
        let result = match &mut socket.entry {
            SocketEntry::Pub(p) => p.publish(&message),
            SocketEntry::SyncPub(p) => p.publish(&message),
            other => return Err(AgentError::RoleMismatch { expected: "PUB or SYNC_PUB".to_owned(), actual: other.role().to_string() }),
        };
        result.map_err(AgentError::Io)
    }

    pub fn send_request(&mut self, alias: &str, payload: Vec<u8>) -> AgentResult<()> {
        let id = self.resolve_alias(alias)?;
        let socket = self.sockets.get_mut(&id).unwrap();
        let message = Message::with_body(payload);
        let result = match &mut socket.entry {
            SocketEntry::Req(r) => r.request(&message).map(|_| ()),
            other => return Err(AgentError::RoleMismatch { expected: "REQ".to_owned(), actual: other.role().to_string() }),
        };
        result.map_err(AgentError::Io)
    }

    pub fn send_push(&mut self, alias: &str, payload: Vec<u8>) -> AgentResult<()> {
        let id = self.resolve_alias(alias)?;
        let socket = self.sockets.get_mut(&id).unwrap();
        let message = Message::with_body(payload);
        let result = match &mut socket.entry {
            SocketEntry::Push(p) => p.send(&message).map(|_| ()),
            other => return Err(AgentError::RoleMismatch { expected: "PUSH".to_owned(), actual: other.role().to_string() }),
        };
        result.map_err(AgentError::Io)
    }

    /// Connects this agent's logging output to `logger` (§6 "spawns an
    /// agent with logging extensions"): reads the logger's PULL address
    /// back off its control channel and connects a PUSH leg to it, so
    /// `log_info`/`log_warning`/`log_error` have somewhere to send.
    pub fn set_logger(&mut self, logger: &crate::proxy::Proxy) -> AgentResult<()> {
        let addr: Address = logger.get_attr(crate::logger::LOG_ADDR_ATTR)?;
        self.connect(crate::logger::LOG_PUSH_ALIAS, &addr, None)
    }

    fn log(&mut self, level: crate::logger::LogLevel, message: impl Into<String>) {
        if !self.aliases.contains_key(crate::logger::LOG_PUSH_ALIAS) {
            return;
        }
        let record = crate::logger::LogRecord { level, message: message.into() };
        match Codec::Pickle.encode(&record) {
            Ok(bytes) => {
                if let Err(e) = self.send_push(crate::logger::LOG_PUSH_ALIAS, bytes) {
                    log::warn!("failed to forward log record to logger: {e}");
                }
            }
            Err(e) => log::warn!("failed to encode log record: {e}"),
        }
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(crate::logger::LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log(crate::logger::LogLevel::Warning, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log(crate::logger::LogLevel::Error, message);
    }

    /// Issues a synchronous request on a SYNC_SUB's request leg (§4.8's
    /// `send(alias, request, handler=h, wait=d, on_error=e)`). `reply_handler`
    /// dispatches the eventual reply instead of the socket's general
    /// subscriber handler; `on_error` fires if `timeout` elapses first.
    /// Returns the request id the reply will be correlated against.
    pub fn send_sync_request(
        &mut self,
        alias: &str,
        payload: Vec<u8>,
        timeout: Option<Duration>,
        reply_handler: Option<HandlerSpec>,
        on_error: Option<HandlerSpec>,
    ) -> AgentResult<u64> {
        let id = self.resolve_alias(alias)?;
        let socket = self.sockets.get_mut(&id).unwrap();
        let message = Message::with_body(payload);
        let request_id = match &mut socket.entry {
            SocketEntry::SyncSub(s) => s.request(&message, timeout).map_err(AgentError::Io)?,
            other => return Err(AgentError::RoleMismatch { expected: "SYNC_SUB".to_owned(), actual: other.role().to_string() }),
        };
        self.pending_sync.insert((id, request_id), PendingSync { reply_handler, on_error });
        Ok(request_id)
    }

    /// Looks every bound SYNC_SUB socket's expired pending requests up and
    /// removes their bookkeeping, returning the ones that had an `on_error`
    /// handler registered so the caller can fire them (§4.3 step 4, §4.8
    /// step 5, §7 kind 5). Logs the stable `not receive req` substring
    /// tests and operators grep for.
    pub(crate) fn expire_sync_requests(&mut self) -> Vec<(HandlerSpec, u64)> {
        let mut due = Vec::new();
        for (&socket_id, socket) in self.sockets.iter_mut() {
            if let SocketEntry::SyncSub(sync_sub) = &mut socket.entry {
                for request_id in sync_sub.expire_overdue() {
                    due.push((socket_id, request_id));
                }
            }
        }

        let mut fireable = Vec::new();
        for (socket_id, request_id) in due {
            let message = AgentError::RequestTimeout { request_id: request_id.to_string() }.to_string();
            log::warn!("{message}");
            self.log_warning(message);
            if let Some(pending) = self.pending_sync.remove(&(socket_id, request_id)) {
                if let Some(on_error) = pending.on_error {
                    fireable.push((on_error, request_id));
                }
            }
        }
        fireable
    }

    /// Resolves the reply handler registered for `(socket, request_id)`,
    /// if any — dropped entirely for a late reply whose deadline already
    /// fired `on_error` (open question in spec.md §9, resolved as "dropped").
    pub(crate) fn take_pending_sync_reply(&mut self, socket: SocketId, request_id: u64) -> Option<HandlerSpec> {
        self.pending_sync.remove(&(socket, request_id)).and_then(|p| p.reply_handler)
    }

    fn resolve_alias(&self, alias: &str) -> AgentResult<SocketId> {
        self.aliases.get(alias).copied().ok_or_else(|| AgentError::UnknownAlias { alias: alias.to_owned() })
    }

    pub fn set_method(&mut self, name: impl Into<String>, handler: handler::HandlerFn) {
        self.methods.insert(name.into(), handler);
    }

    pub fn set_attr<T: serde::Serialize>(&mut self, name: &str, value: &T) -> AgentResult<()> {
        self.attributes.set(name, value)
    }

    pub fn get_attr<T: serde::de::DeserializeOwned>(&self, name: &str) -> AgentResult<T> {
        self.attributes.get(name)
    }

    pub fn each(&mut self, period: Duration, alias: impl Into<String>, handler_name: impl Into<String>) {
        self.timers.each(period, alias, handler_name);
    }

    pub fn after(&mut self, delay: Duration, alias: impl Into<String>, handler_name: impl Into<String>) {
        self.timers.after(delay, alias, handler_name);
    }

    pub fn stop_timer(&mut self, alias: &str) -> bool {
        self.timers.stop(alias)
    }

    pub fn close(&mut self, alias: &str) -> AgentResult<()> {
        let id = self.resolve_alias(alias)?;
        self.aliases.retain(|_, v| *v != id);
        if let Some(mut socket) = self.sockets.remove(&id) {
            self.token_owner.retain(|_, owner| !matches!(owner,
                TokenOwner::Listener { socket: s, .. } | TokenOwner::Pipe { socket: s } if *s == id));
            let registry = self.poll.registry();
            if let Some(listener) = socket.listener.as_mut() {
                let _ = listener.close();
            }
            if let Some(listener) = socket.reply_listener.as_mut() {
                let _ = listener.close();
            }
            close_entry(&mut socket.entry, registry);
        }
        Ok(())
    }

    pub fn request_shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn run(&mut self) -> AgentResult<()> {
        event_loop::run(self)
    }

    /// Starts the remote-invocation control channel: a small FIFO
    /// request/reply server an operator process (or another agent) can
    /// use to call a method, get/set an attribute, or bind/connect/close
    /// a socket without sharing this agent's thread.
    pub fn enable_control(&mut self, transport_kind: TransportKind, host: &str, port: u16) -> AgentResult<Address> {
        let provider = self.transport_for(transport_kind);
        let (mut listener, bound_host, bound_port) = provider
            .bind(host, port)
            .map_err(|source| AgentError::BindFailed { addr: format!("{host}:{port}"), source })?;

        let token = self.alloc_token();
        self.register_listener(listener.as_mut(), token)
            .map_err(|source| AgentError::BindFailed { addr: format!("{bound_host}:{bound_port}"), source })?;
        self.token_owner.insert(token, TokenOwner::Control { listener: true });

        let addr = if transport_kind == TransportKind::Ipc {
            Address::ipc(bound_host, Role::Rep, self.config.default_codec())
        } else {
            Address::tcp(bound_host, bound_port, Role::Rep, self.config.default_codec())
        };

        self.control = Some(crate::control::ControlServer::new(listener, token));
        Ok(addr)
    }

    pub(crate) fn poll_mut(&mut self) -> &mut Poll {
        &mut self.poll
    }

    pub(crate) fn set_token_owner(&mut self, token: Token, owner: TokenOwner) {
        self.token_owner.insert(token, owner);
    }

    pub(crate) fn forget_token(&mut self, token: Token) {
        self.token_owner.remove(&token);
    }

    pub(crate) fn token_owner(&self, token: Token) -> Option<&TokenOwner> {
        self.token_owner.get(&token)
    }

    /// Resolves the handler bound on `id` against an inbound message's
    /// topic: a plain `Method`/`Builtin` spec ignores the topic, while a
    /// `TopicMap` picks its longest matching prefix's entry (or no entry,
    /// if none match — the message is then dropped same as an unbound
    /// socket).
    pub(crate) fn socket_handler_spec(&self, id: SocketId, topic: &[u8]) -> Option<HandlerSpec> {
        self.sockets.get(&id)?.handler.as_ref()?.resolve(topic).cloned()
    }

    pub(crate) fn accept_role(&self, id: SocketId, reply_leg: bool) -> Option<Role> {
        self.sockets.get(&id).map(|s| match (&s.entry, reply_leg) {
            (SocketEntry::SyncPub(_), true) => Role::Rep,
            (SocketEntry::SyncPub(_), false) => Role::Pub,
            (other, _) => other.role(),
        })
    }

    pub(crate) fn socket_codec(&self, id: SocketId) -> Option<Codec> {
        self.sockets.get(&id).map(|s| s.addr.codec)
    }

    pub(crate) fn take_listener(&mut self, id: SocketId, reply_leg: bool) -> Option<Box<dyn Listener>> {
        let socket = self.sockets.get_mut(&id)?;
        if reply_leg { socket.reply_listener.take() } else { socket.listener.take() }
    }

    pub(crate) fn restore_listener(&mut self, id: SocketId, reply_leg: bool, listener: Box<dyn Listener>) {
        if let Some(socket) = self.sockets.get_mut(&id) {
            if reply_leg { socket.reply_listener = Some(listener); } else { socket.listener = Some(listener); }
        }
    }

    pub(crate) fn add_pipe_to_socket(&mut self, id: SocketId, reply_leg: bool, pipe: Pipe) -> io::Result<()> {
        let Some(socket) = self.sockets.get_mut(&id) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "socket closed before pipe could be attached"));
        };
        let token = pipe.token();
        match (&mut socket.entry, reply_leg) {
            (SocketEntry::Pub(p), false) => p.add_pipe(token, pipe),
            (SocketEntry::Rep(p), false) => p.add_pipe(token, pipe),
            (SocketEntry::Pull(p), false) => p.add_pipe(token, pipe),
            (SocketEntry::SyncPub(p), false) => p.broadcast.add_pipe(token, pipe),
            (SocketEntry::SyncPub(p), true) => p.replies.add_pipe(token, pipe),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "pipe leg does not match socket entry")),
        }
    }

    /// Drives a single pipe readiness event, returning any messages now
    /// ready for handler dispatch. A SYNC_SUB reply is tagged separately
    /// from an ordinary broadcast so dispatch can route it through the
    /// request's own handler rather than the socket's general subscriber
    /// handler (§4.8 step 4).
    pub(crate) fn pipe_ready(&mut self, id: SocketId, token: Token, event: &mio::event::Event) -> AgentResult<Vec<DispatchItem>> {
        let registry = self.poll.registry();
        let Some(socket) = self.sockets.get_mut(&id) else { return Ok(Vec::new()) };

        let result = match &mut socket.entry {
            SocketEntry::Pub(p) => p.ready(registry, token, event),
            SocketEntry::Sub(p) => p.ready(registry, token, event),
            SocketEntry::Req(p) => p.ready(registry, token, event),
            SocketEntry::Rep(p) => p.ready(registry, token, event),
            SocketEntry::Push(p) => p.ready(registry, token, event),
            SocketEntry::Pull(p) => p.ready(registry, token, event),
            SocketEntry::SyncPub(p) => p.ready(registry, token, event),
            SocketEntry::SyncSub(p) => {
                return Ok(p
                    .ready(registry, token, event)
                    .map_err(AgentError::Io)?
                    .into_iter()
                    .map(|evt| match evt {
                        crate::protocol::sync_sub::SyncSubEvent::Published(inbound) => DispatchItem::Message(inbound),
                        crate::protocol::sync_sub::SyncSubEvent::Replied { request_id, inbound } => {
                            DispatchItem::SyncReplied { request_id, inbound }
                        }
                    })
                    .collect());
            }
        };
        result.map_err(AgentError::Io).map(|messages| messages.into_iter().map(DispatchItem::Message).collect())
    }

    pub(crate) fn send_reply(&mut self, id: SocketId, token: Token, message: &Message) -> AgentResult<()> {
        let Some(socket) = self.sockets.get_mut(&id) else {
            return Err(AgentError::UnknownAlias { alias: format!("socket {id:?}") });
        };
        let result = match &mut socket.entry {
            SocketEntry::Rep(p) => p.reply_to(token, message),
            SocketEntry::SyncPub(p) => p.reply_to(token, message),
            other => {
                return Err(AgentError::RoleMismatch { expected: "REP or SYNC_PUB".to_owned(), actual: other.role().to_string() })
            }
        };
        result.map_err(AgentError::Io)
    }

    pub(crate) fn socket_ids(&self) -> Vec<SocketId> {
        self.sockets.keys().copied().collect()
    }

    pub(crate) fn accept_on_listener(&mut self, id: SocketId, reply_leg: bool) -> AgentResult<()> {
        let Some(mut listener) = self.take_listener(id, reply_leg) else { return Ok(()) };
        let own_role = self.accept_role(id, reply_leg).unwrap_or(Role::Pub);
        let codec = self.socket_codec(id).unwrap_or(Codec::Pickle);

        loop {
            match listener.accept() {
                Ok(Some((connection, peer))) => {
                    let token = self.alloc_token();
                    let mut pipe = Pipe::new(token, Some(peer), connection, own_role, codec);
                    if let Err(e) = pipe.register(self.poll.registry()) {
                        log::warn!("failed to register accepted pipe for socket {id:?}: {e}");
                        continue;
                    }
                    self.token_owner.insert(token, TokenOwner::Pipe { socket: id });
                    if let Err(e) = self.add_pipe_to_socket(id, reply_leg, pipe) {
                        log::warn!("failed to attach accepted pipe to socket {id:?}: {e}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("accept failed on socket {id:?}: {e}");
                    break;
                }
            }
        }

        self.restore_listener(id, reply_leg, listener);
        Ok(())
    }
}

fn close_entry(entry: &mut SocketEntry, registry: &Registry) {
    match entry {
        SocketEntry::Pub(p) => p.close_all(registry),
        SocketEntry::Sub(p) => p.close_all(registry),
        SocketEntry::Req(p) => p.close_all(registry),
        SocketEntry::Rep(p) => p.close_all(registry),
        SocketEntry::Push(p) => p.close_all(registry),
        SocketEntry::Pull(p) => p.close_all(registry),
        SocketEntry::SyncPub(p) => p.close_all(registry),
        SocketEntry::SyncSub(p) => p.close_all(registry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_a_pub_with_unformatted_codec_rejects_topic_framing() {
        let mut agent = Agent::new("t", crate::config::Config::new()).unwrap();
        let err = agent
            .bind("main", Role::Pub, TransportKind::Tcp, "127.0.0.1", 0, Codec::Unformatted, None)
            .unwrap_err();
        assert!(matches!(err, AgentError::TopicFramingUnsupported { .. }));
    }

    #[test]
    fn binding_a_pub_with_pickle_codec_is_unaffected() {
        let mut agent = Agent::new("t", crate::config::Config::new()).unwrap();
        agent.bind("main", Role::Pub, TransportKind::Tcp, "127.0.0.1", 0, Codec::Pickle, None).unwrap();
    }

    #[test]
    fn connecting_a_sub_with_unformatted_codec_rejects_topic_framing() {
        let mut agent = Agent::new("t", crate::config::Config::new()).unwrap();
        let addr = Address::tcp("127.0.0.1", 1, Role::Pub, Codec::Unformatted);
        let err = agent.connect("sub", &addr, None).unwrap_err();
        assert!(matches!(err, AgentError::TopicFramingUnsupported { .. }));
    }
}
