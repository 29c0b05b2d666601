// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! PUB: fans a message out to every connected SUB pipe.
//! Grounded directly on `protocol/pbu.rs`.

use std::collections::{HashMap, HashSet};
use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::{invalid_data_io_error, Role};
use crate::message::Message;
use crate::pipe::Pipe;

use super::{drive_pipe, Inbound, Protocol};

pub struct Pub {
    pipes: HashMap<Token, Pipe>,
    connected: HashSet<Token>,
}

impl Pub {
    pub fn new() -> Pub {
        Pub { pipes: HashMap::new(), connected: HashSet::new() }
    }

    /// Broadcasts `message` to every connected subscriber, in send order
    /// (per-subscriber publish ordering is preserved since each pipe is a
    /// FIFO byte stream and sends below are issued in iteration order).
    pub fn publish(&mut self, message: &Message) -> io::Result<()> {
        let framed = message.to_framed_buffer();

        for token in self.connected.iter() {
            if let Some(pipe) = self.pipes.get_mut(token) {
                let _ = pipe.enqueue_send(framed.clone());
            }
        }
        Ok(())
    }
}

impl Default for Pub {
    fn default() -> Self {
        Pub::new()
    }
}

impl Protocol for Pub {
    fn role(&self) -> Role {
        Role::Pub
    }

    fn add_pipe(&mut self, token: Token, pipe: Pipe) -> io::Result<()> {
        match self.pipes.insert(token, pipe) {
            None => Ok(()),
            Some(_) => Err(invalid_data_io_error("a pipe has already been added with that token")),
        }
    }

    fn remove_pipe(&mut self, token: Token) -> Option<Pipe> {
        self.connected.remove(&token);
        self.pipes.remove(&token)
    }

    fn pipe_mut(&mut self, token: Token) -> Option<&mut Pipe> {
        self.pipes.get_mut(&token)
    }

    fn pipe_tokens(&self) -> Vec<Token> {
        self.pipes.keys().copied().collect()
    }

    fn on_connected(&mut self, token: Token) {
        self.connected.insert(token);
    }

    fn ready(&mut self, _registry: &Registry, token: Token, event: &Event) -> io::Result<Vec<Inbound>> {
        let Some(pipe) = self.pipes.get_mut(&token) else {
            return Ok(Vec::new());
        };

        let (just_connected, _messages) = drive_pipe(pipe, event)?;
        if just_connected {
            self.on_connected(token);
        }

        // PUB sockets have no receive operation; any bytes arriving here
        // would be a protocol violation from the peer, so they are
        // silently discarded rather than surfaced as `Inbound`.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_to_no_subscribers_is_a_noop() {
        let mut p = Pub::new();
        assert!(p.publish(&Message::with_topic(b"a".to_vec(), b"hi".to_vec())).is_ok());
    }
}
