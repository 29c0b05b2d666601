// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Per-role socket behavior. Grounded on `protocol/pbu.rs`'s `Pub` as the
//! template for the shape of `add_pipe`/`remove_pipe`/`ready`; the
//! remaining roles cover the other `SocketType` variants, built out in
//! full here.

pub mod pub_;
pub mod pull;
pub mod push;
pub mod rep;
pub mod req;
pub mod sub;
pub mod sync_pub;
pub mod sync_sub;

use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::Role;
use crate::message::Message;
use crate::pipe::Pipe;

/// A message received on some pipe, tagged with the pipe it arrived on
/// (request/reply protocols need the token to route a reply back).
pub struct Inbound {
    pub token: Token,
    pub message: Message,
}

/// The operations common to every socket role: pipe bookkeeping and
/// readiness dispatch. Role-specific sending (`Pub::publish`,
/// `Req::request`, `Rep::reply_to`, ...) lives as inherent methods on each
/// concrete type, since the roles don't share a send signature.
pub trait Protocol {
    fn role(&self) -> Role;
    fn add_pipe(&mut self, token: Token, pipe: Pipe) -> io::Result<()>;
    fn remove_pipe(&mut self, token: Token) -> Option<Pipe>;
    fn pipe_mut(&mut self, token: Token) -> Option<&mut Pipe>;
    fn pipe_tokens(&self) -> Vec<Token>;

    /// Called once a pipe's handshake completes.
    fn on_connected(&mut self, token: Token);

    /// Drives one pipe's readiness; returns any messages ready for
    /// delivery to the agent's handler dispatch (already role-filtered,
    /// e.g. `Sub` drops messages matching no subscription).
    fn ready(&mut self, registry: &Registry, token: Token, event: &Event) -> io::Result<Vec<Inbound>>;

    fn close_pipe(&mut self, registry: &Registry, token: Token) {
        if let Some(pipe) = self.remove_pipe(token) {
            pipe.close(registry);
        }
    }

    fn close_all(&mut self, registry: &Registry) {
        for token in self.pipe_tokens() {
            self.close_pipe(registry, token);
        }
    }
}

/// Shared helper: feed a pipe's `ready()` outcome back into a protocol,
/// reporting newly-connected pipes via `on_connected` and returning
/// received raw frames decoded into `Message`s.
pub(crate) fn drive_pipe(pipe: &mut Pipe, event: &Event) -> io::Result<(bool, Vec<Message>)> {
    let outcome = pipe.ready(event)?;
    let mut messages = Vec::with_capacity(outcome.frames.len());

    for frame in outcome.frames {
        messages.push(Message::from_framed_buffer(&frame)?);
    }

    Ok((outcome.just_connected.is_some(), messages))
}
