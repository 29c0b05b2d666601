// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! SUB: receives broadcasts from a PUB pipe, filtering client-side by the
//! subscriber's own set of topic prefixes.

use std::collections::HashMap;
use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::{invalid_data_io_error, Role};
use crate::pipe::Pipe;

use super::{drive_pipe, Inbound, Protocol};

pub struct Sub {
    pipes: HashMap<Token, Pipe>,
    /// Topic prefixes this subscriber accepts. An empty set means "none
    /// subscribed"; a single empty-bytes entry means "subscribed to
    /// everything" (the handler map had a catch-all/no-topic handler).
    filters: Vec<Vec<u8>>,
}

impl Sub {
    pub fn new() -> Sub {
        Sub { pipes: HashMap::new(), filters: Vec::new() }
    }

    /// Adds a topic prefix of interest. Calling this with an empty slice
    /// subscribes to every topic.
    pub fn subscribe(&mut self, prefix: &[u8]) {
        let prefix = prefix.to_vec();
        if !self.filters.contains(&prefix) {
            self.filters.push(prefix);
        }
    }

    pub fn unsubscribe(&mut self, prefix: &[u8]) {
        self.filters.retain(|f| f != prefix);
    }

    fn matches(&self, topic: &[u8]) -> bool {
        self.filters.iter().any(|f| topic.starts_with(f.as_slice()))
    }
}

impl Default for Sub {
    fn default() -> Self {
        Sub::new()
    }
}

impl Protocol for Sub {
    fn role(&self) -> Role {
        Role::Sub
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

        Ok(messages
            .into_iter()
            .filter(|m| self.matches(m.topic()))
            .map(|message| Inbound { token, message })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn subscribe_to_empty_prefix_matches_everything() {
        let mut s = Sub::new();
        s.subscribe(b"");

        assert!(s.matches(Message::with_topic(b"anything".to_vec(), vec![]).topic()));
    }

    #[test]
    fn subscribe_filters_by_prefix() {
        let mut s = Sub::new();
        s.subscribe(b"weather.");

        assert!(s.matches(b"weather.berlin"));
        assert!(!s.matches(b"traffic.berlin"));
    }

    #[test]
    fn unsubscribe_removes_a_prefix() {
        let mut s = Sub::new();
        s.subscribe(b"a");
        s.subscribe(b"b");
        s.unsubscribe(b"a");

        assert!(!s.matches(b"a1"));
        assert!(s.matches(b"b1"));
    }
}
