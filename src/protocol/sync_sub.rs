// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! SYNC_SUB: the twin of `SyncPub` (see that module for why this is two
//! independent legs rather than one). Subscribes to broadcasts on a `Sub`
//! leg and, separately, issues synchronous requests on a `Req` leg,
//! tracking each outstanding request by an id so a late reply arriving
//! after its deadline has passed can be told apart from a fresh one.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::{Registry, Token};

use crate::global::IdSequence;
use crate::message::Message;

use super::req::Req;
use super::sub::Sub;
use super::{Inbound, Protocol};

struct PendingRequest {
    token: Token,
    deadline: Option<Instant>,
}

pub struct SyncSub {
    pub subscribe: Sub,
    pub requests: Req,
    ids: IdSequence,
    pending: HashMap<u64, PendingRequest>,
}

/// Outcome of feeding one readiness event through a `SyncSub`.
pub enum SyncSubEvent {
    /// A broadcast the subscription matched.
    Published(Inbound),
    /// The reply to a previously issued synchronous request, unless its
    /// deadline had already elapsed (in which case it is dropped here and
    /// the caller's earlier timeout handling is authoritative).
    Replied { request_id: u64, inbound: Inbound },
}

impl SyncSub {
    pub fn new() -> SyncSub {
        SyncSub {
            subscribe: Sub::new(),
            requests: Req::new(),
            ids: IdSequence::new(),
            pending: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, prefix: &[u8]) {
        self.subscribe.subscribe(prefix)
    }

    /// Issues a synchronous request, optionally bounded by `timeout`.
    /// Returns the request id the eventual `SyncSubEvent::Replied` will
    /// carry so the caller can match its own bookkeeping (e.g. an
    /// `on_error` callback registered for this id).
    pub fn request(&mut self, message: &Message, timeout: Option<Duration>) -> io::Result<u64> {
        let token = self.requests.request(message)?;
        let id = self.ids.next() as u64;

        self.pending.insert(id, PendingRequest { token, deadline: timeout.map(|d| Instant::now() + d) });
        Ok(id)
    }

    /// Drops any pending request whose deadline has elapsed, returning
    /// the ids that timed out so the caller can fire their `on_error`.
    pub fn expire_overdue(&mut self) -> Vec<u64> {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.map(|d| now >= d).unwrap_or(false))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    pub fn owns_subscribe_pipe(&self, token: Token) -> bool {
        self.subscribe.pipe_tokens().contains(&token)
    }

    pub fn ready(
        &mut self,
        registry: &Registry,
        token: Token,
        event: &Event,
    ) -> io::Result<Vec<SyncSubEvent>> {
        if self.owns_subscribe_pipe(token) {
            return Ok(self
                .subscribe
                .ready(registry, token, event)?
                .into_iter()
                .map(SyncSubEvent::Published)
                .collect());
        }

        let inbound = self.requests.ready(registry, token, event)?;
        let mut out = Vec::with_capacity(inbound.len());

        for item in inbound {
            let request_id = self
                .pending
                .iter()
                .find(|(_, p)| p.token == item.token)
                .map(|(id, _)| *id);

            if let Some(id) = request_id {
                self.pending.remove(&id);
                out.push(SyncSubEvent::Replied { request_id: id, inbound: item });
            }
            // A reply with no matching pending entry already expired and
            // was reported via `expire_overdue`; drop it silently.
        }

        Ok(out)
    }

    pub fn close_all(&mut self, registry: &Registry) {
        self.subscribe.close_all(registry);
        self.requests.close_all(registry);
    }
}

impl Default for SyncSub {
    fn default() -> Self {
        SyncSub::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_overdue_drops_only_elapsed_deadlines() {
        let mut s = SyncSub::new();
        s.pending.insert(1, PendingRequest { token: Token(0), deadline: Some(Instant::now() - Duration::from_secs(1)) });
        s.pending.insert(2, PendingRequest { token: Token(1), deadline: Some(Instant::now() + Duration::from_secs(60)) });
        s.pending.insert(3, PendingRequest { token: Token(2), deadline: None });

        let expired = s.expire_overdue();

        assert_eq!(expired, vec![1]);
        assert!(!s.pending.contains_key(&1));
        assert!(s.pending.contains_key(&2));
        assert!(s.pending.contains_key(&3));
    }
}
