// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! PULL: fair-queues messages arriving from any connected PUSH pipe. No
//! send operation exists on this role.

use std::collections::HashMap;
use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::{invalid_data_io_error, Role};
use crate::pipe::Pipe;

use super::{drive_pipe, Inbound, Protocol};

pub struct Pull {
    pipes: HashMap<Token, Pipe>,
}

impl Pull {
    pub fn new() -> Pull {
        Pull { pipes: HashMap::new() }
    }
}

impl Default for Pull {
    fn default() -> Self {
        Pull::new()
    }
}

impl Protocol for Pull {
    fn role(&self) -> Role {
        Role::Pull
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
