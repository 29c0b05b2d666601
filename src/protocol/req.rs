// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! REQ: sends one request at a time per pipe, round-robin across whichever
//! pipes are not already awaiting a reply.

use std::collections::{HashMap, VecDeque};
use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::{invalid_data_io_error, would_block_io_error, Role};
use crate::message::Message;
use crate::pipe::Pipe;

use super::{drive_pipe, Inbound, Protocol};

pub struct Req {
    pipes: HashMap<Token, Pipe>,
    /// Pipes that have completed their handshake and aren't awaiting a
    /// reply, in round-robin order.
    ready: VecDeque<Token>,
    awaiting: HashMap<Token, ()>,
}

impl Req {
    pub fn new() -> Req {
        Req { pipes: HashMap::new(), ready: VecDeque::new(), awaiting: HashMap::new() }
    }

    /// Sends `message` on the next available pipe, returning the token it
    /// went out on so the caller can match the eventual reply.
    pub fn request(&mut self, message: &Message) -> io::Result<Token> {
        let token = self
            .ready
            .pop_front()
            .ok_or_else(|| would_block_io_error("no REQ pipe available to send on"))?;

        let pipe = self
            .pipes
            .get_mut(&token)
            .ok_or_else(|| invalid_data_io_error("REQ pipe vanished while queued as ready"))?;

        pipe.enqueue_send(message.to_framed_buffer())?;
        self.awaiting.insert(token, ());
        Ok(token)
    }
}

impl Default for Req {
    fn default() -> Self {
        Req::new()
    }
}

impl Protocol for Req {
    fn role(&self) -> Role {
        Role::Req
    }

    fn add_pipe(&mut self, token: Token, pipe: Pipe) -> io::Result<()> {
        match self.pipes.insert(token, pipe) {
            None => Ok(()),
            Some(_) => Err(invalid_data_io_error("a pipe has already been added with that token")),
        }
    }

    fn remove_pipe(&mut self, token: Token) -> Option<Pipe> {
        self.ready.retain(|t| *t != token);
        self.awaiting.remove(&token);
        self.pipes.remove(&token)
    }

    fn pipe_mut(&mut self, token: Token) -> Option<&mut Pipe> {
        self.pipes.get_mut(&token)
    }

    fn pipe_tokens(&self) -> Vec<Token> {
        self.pipes.keys().copied().collect()
    }

    fn on_connected(&mut self, token: Token) {
        self.ready.push_back(token);
    }

    fn ready(&mut self, _registry: &Registry, token: Token, event: &Event) -> io::Result<Vec<Inbound>> {
        let Some(pipe) = self.pipes.get_mut(&token) else {
            return Ok(Vec::new());
        };

        let (just_connected, messages) = drive_pipe(pipe, event)?;
        if just_connected {
            self.on_connected(token);
        }

        if !messages.is_empty() && self.awaiting.remove(&token).is_some() {
            self.ready.push_back(token);
        }

        Ok(messages.into_iter().map(|message| Inbound { token, message }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_no_pipes_would_block() {
        let mut r = Req::new();
        let err = r.request(&Message::with_body(b"hi".to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
