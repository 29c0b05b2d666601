// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! REP: receives a request on some pipe and must send exactly one reply
//! back on that same pipe. Handler dispatch enforces the request/reply
//! pairing (the lazy-sequence two-phase contract) by holding the token a
//! request arrived on until `reply_to` is called for it.

use std::collections::HashMap;
use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::{invalid_data_io_error, Role};
use crate::message::Message;
use crate::pipe::Pipe;

use super::{drive_pipe, Inbound, Protocol};

pub struct Rep {
    pipes: HashMap<Token, Pipe>,
}

impl Rep {
    pub fn new() -> Rep {
        Rep { pipes: HashMap::new() }
    }

    pub fn reply_to(&mut self, token: Token, message: &Message) -> io::Result<()> {
        let pipe = self
            .pipes
            .get_mut(&token)
            .ok_or_else(|| invalid_data_io_error("REP pipe closed before reply could be sent"))?;

        pipe.enqueue_send(message.to_framed_buffer())
    }
}

impl Default for Rep {
    fn default() -> Self {
        Rep::new()
    }
}

impl Protocol for Rep {
    fn role(&self) -> Role {
        Role::Rep
    }

    fn add_pipe(&mut self, token: Token, pipe: Pipe) -> io::Result<()> {
        match self.pipes.insert(token, pipe) {
            None => Ok(()),
            Some(_) => Err(invalid_data_io_error("a pipe has already been added with that token")),
        }
    }

    fn remove_pipe(&mut self, token: Token) -> Option<Pipe> {
        self.pipes.remove(&token)
    }

    fn pipe_mut(&mut self, token: Token) -> Option<&mut Pipe> {
        self.pipes.get_mut(&token)
    }

    fn pipe_tokens(&self) -> Vec<Token> {
        self.pipes.keys().copied().collect()
    }

    fn on_connected(&mut self, _token: Token) {}

    fn ready(&mut self, _registry: &Registry, token: Token, event: &Event) -> io::Result<Vec<Inbound>> {
        let Some(pipe) = self.pipes.get_mut(&token) else {
            return Ok(Vec::new());
        };

        let (_just_connected, messages) = drive_pipe(pipe, event)?;

        Ok(messages.into_iter().map(|message| Inbound { token, message }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_to_unknown_pipe_errors() {
        let mut r = Rep::new();
        let err = r.reply_to(Token(0), &Message::with_body(b"ok".to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
