// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! SYNC_PUB: a publisher that, in addition to the ordinary broadcast leg,
//! answers synchronous requests from subscribers on a second, independent
//! leg so a reply can never be observed interleaved into the broadcast
//! ordering a SYNC_SUB sees on its subscribe leg.
//!
//! This is not one mio-registered pipe set but two: a `Pub` broadcasting
//! to every subscriber, and a `Rep` answering whichever subscriber most
//! recently asked a synchronous question. `SyncPub` does not implement
//! `Protocol` itself — the event loop drives each inner leg as the
//! ordinary `Pub`/`Rep` socket it is, and routes by which leg's listener
//! accepted the connection.

use std::io;

use mio::event::Event;
use mio::{Registry, Token};

use crate::message::Message;

use super::pub_::Pub;
use super::rep::Rep;
use super::{Inbound, Protocol};

pub struct SyncPub {
    pub broadcast: Pub,
    pub replies: Rep,
}

impl SyncPub {
    pub fn new() -> SyncPub {
        SyncPub { broadcast: Pub::new(), replies: Rep::new() }
    }

    pub fn publish(&mut self, message: &Message) -> io::Result<()> {
        self.broadcast.publish(message)
    }

    pub fn reply_to(&mut self, token: Token, message: &Message) -> io::Result<()> {
        self.replies.reply_to(token, message)
    }

    /// True if `token` belongs to the broadcast leg rather than the reply
    /// leg; callers use this to route an event to the right inner socket.
    pub fn owns_broadcast_pipe(&self, token: Token) -> bool {
        self.broadcast.pipe_tokens().contains(&token)
    }

    pub fn ready(&mut self, registry: &Registry, token: Token, event: &Event) -> io::Result<Vec<Inbound>> {
        if self.owns_broadcast_pipe(token) {
            self.broadcast.ready(registry, token, event)
        } else {
            self.replies.ready(registry, token, event)
        }
    }

    pub fn close_all(&mut self, registry: &Registry) {
        self.broadcast.close_all(registry);
        self.replies.close_all(registry);
    }
}

impl Default for SyncPub {
    fn default() -> Self {
        SyncPub::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_socket_owns_no_pipes() {
        let s = SyncPub::new();
        assert!(!s.owns_broadcast_pipe(Token(0)));
    }
}
