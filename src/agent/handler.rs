// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Handler types invoked by dispatch when a message arrives on a bound
//! socket or a control request names a method.

use serde::{Deserialize, Serialize};

use crate::error::AgentResult;
use crate::message::Message;

use super::Agent;

/// Deferred work run once a reply has already gone out, so slow
/// processing doesn't hold up a REP/SYNC_PUB's reply to its peer. This is
/// the lazy-sequence two-phase contract: phase one produces the reply,
/// phase two (optional) runs after the reply is already on the wire.
pub type Continuation = Box<dyn FnOnce(&mut Agent) + Send>;

pub type HandlerFn = Box<dyn FnMut(&mut Agent, Message) -> AgentResult<HandlerOutcome> + Send>;

/// What a handler produced.
pub struct HandlerOutcome {
    /// The reply payload, for bindings whose role has a reply leg
    /// (REP, SYNC_PUB). `None` for roles with no send-back (SUB, PULL).
    pub reply: Option<Message>,
    pub continuation: Option<Continuation>,
}

impl HandlerOutcome {
    pub fn none() -> HandlerOutcome {
        HandlerOutcome { reply: None, continuation: None }
    }

    pub fn reply(message: Message) -> HandlerOutcome {
        HandlerOutcome { reply: Some(message), continuation: None }
    }

    pub fn with_continuation(mut self, continuation: Continuation) -> HandlerOutcome {
        self.continuation = Some(continuation);
        self
    }
}

/// How a binding's handler is named. A user dispatch table is keyed by
/// method name (`Agent::set_method`); a small fixed set of builtins serve
/// the name server and logger extensions, which don't need a full
/// closure registered by user code for every agent that uses them;
/// `TopicMap` picks one of several handlers per inbound message by the
/// longest subscribed topic prefix that matches it, rather than running
/// the same handler for every topic a SUB/SYNC_SUB socket receives.
#[derive(Debug, Clone)]
pub enum HandlerSpec {
    Method(String),
    Builtin(BuiltinId),
    TopicMap(Vec<(Vec<u8>, HandlerSpec)>),
}

impl HandlerSpec {
    /// Resolves a topic-keyed handler table to the entry whose prefix both
    /// matches (`topic.starts_with(prefix)`) and is the longest among the
    /// matches. `protocol::sub`'s own filter set only asks "does any
    /// prefix match" (a message can be accepted by more than one
    /// subscription); a handler table has to pick exactly one handler to
    /// run, so ties break toward specificity. A plain `Method`/`Builtin`
    /// spec ignores the topic and resolves to itself.
    pub(crate) fn resolve(&self, topic: &[u8]) -> Option<&HandlerSpec> {
        match self {
            HandlerSpec::TopicMap(entries) => entries
                .iter()
                .filter(|(prefix, _)| topic.starts_with(prefix.as_slice()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, spec)| spec),
            other => Some(other),
        }
    }
}

/// A handler bound or connected through the control channel: either a
/// single named method, or a topic-keyed table of named methods matched
/// by longest prefix against each inbound message's topic. Mirrors the
/// subset of `HandlerSpec` an operator can name by string over the wire
/// (a remote caller has no way to name a `Builtin`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteHandler {
    Method(String),
    TopicMap(Vec<(Vec<u8>, String)>),
}

impl From<RemoteHandler> for HandlerSpec {
    fn from(remote: RemoteHandler) -> HandlerSpec {
        match remote {
            RemoteHandler::Method(name) => HandlerSpec::Method(name),
            RemoteHandler::TopicMap(entries) => {
                HandlerSpec::TopicMap(entries.into_iter().map(|(topic, name)| (topic, HandlerSpec::Method(name))).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinId {
    NameServerRegister,
    NameServerLookup,
    NameServerList,
    NameServerShutdown,
    LoggerRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str) -> HandlerSpec {
        HandlerSpec::Method(name.to_owned())
    }

    #[test]
    fn topic_map_picks_the_longest_matching_prefix() {
        let spec = HandlerSpec::TopicMap(vec![
            (b"weather".to_vec(), method("any_weather")),
            (b"weather.berlin".to_vec(), method("berlin_weather")),
        ]);

        match spec.resolve(b"weather.berlin.today") {
            Some(HandlerSpec::Method(name)) => assert_eq!(name, "berlin_weather"),
            other => panic!("expected the longer prefix to win, got {other:?}"),
        }
        match spec.resolve(b"weather.london") {
            Some(HandlerSpec::Method(name)) => assert_eq!(name, "any_weather"),
            other => panic!("expected the shorter prefix to win by elimination, got {other:?}"),
        }
    }

    #[test]
    fn topic_map_resolves_to_nothing_when_no_prefix_matches() {
        let spec = HandlerSpec::TopicMap(vec![(b"a".to_vec(), method("handle_a"))]);
        assert!(spec.resolve(b"b").is_none());
    }

    #[test]
    fn a_plain_method_spec_ignores_the_topic() {
        let spec = method("always");
        match spec.resolve(b"whatever") {
            Some(HandlerSpec::Method(name)) => assert_eq!(name, "always"),
            other => panic!("expected the method spec unchanged, got {other:?}"),
        }
    }
}
