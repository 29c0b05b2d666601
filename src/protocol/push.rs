// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! PUSH: load-balances sends round-robin across connected PULL pipes.
//! Unlike PUB, each message goes to exactly one peer.

use std::collections::{HashMap, VecDeque};
use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::{invalid_data_io_error, would_block_io_error, Role};
use crate::message::Message;
use crate::pipe::Pipe;

use super::{drive_pipe, Inbound, Protocol};

pub struct Push {
    pipes: HashMap<Token, Pipe>,
    round_robin: VecDeque<Token>,
}

impl Push {
    pub fn new() -> Push {
        Push { pipes: HashMap::new(), round_robin: VecDeque::new() }
    }

    pub fn send(&mut self, message: &Message) -> io::Result<Token> {
        let token = self
            .round_robin
            .pop_front()
            .ok_or_else(|| would_block_io_error("no PUSH pipe available to send on"))?;
        self.round_robin.push_back(token);

        let pipe = self
            .pipes
            .get_mut(&token)
            .ok_or_else(|| invalid_data_io_error("PUSH pipe vanished while queued"))?;
        pipe.enqueue_send(message.to_framed_buffer())?;
        Ok(token)
    }
}

impl Default for Push {
    fn default() -> Self {
        Push::new()
    }
}

impl Protocol for Push {
    fn role(&self) -> Role {
        Role::Push
    }

    fn add_pipe(&mut self, token: Token, pipe: Pipe) -> io::Result<()> {
        match self.pipes.insert(token, pipe) {
            None => Ok(()),
            Some(_) => Err(invalid_data_io_error("a pipe has already been added with that token")),
        }
    }

    fn remove_pipe(&mut self, token: Token) -> Option<Pipe> {
        self.round_robin.retain(|t| *t != token);
        self.pipes.remove(&token)
    }

    fn pipe_mut(&mut self, token: Token) -> Option<&mut Pipe> {
        self.pipes.get_mut(&token)
    }

    fn pipe_tokens(&self) -> Vec<Token> {
        self.pipes.keys().copied().collect()
    }

    fn on_connected(&mut self, token: Token) {
        self.round_robin.push_back(token);
    }

    fn ready(&mut self, _registry: &Registry, token: Token, event: &Event) -> io::Result<Vec<Inbound>> {
        let Some(pipe) = self.pipes.get_mut(&token) else {
            return Ok(Vec::new());
        };

        let (just_connected, _messages) = drive_pipe(pipe, event)?;
        if just_connected {
            self.on_connected(token);
        }

        // PUSH has no receive operation; inbound bytes are a peer protocol
        // violation and are dropped rather than surfaced.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_with_no_pipes_would_block() {
        let mut p = Push::new();
        let err = p.send(&Message::with_body(b"x".to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
