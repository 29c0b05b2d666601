// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The name server (C10): a registry process mapping agent name → control
//! address. Per OQ-2 in `DESIGN.md`, it is not a bespoke protocol but an
//! ordinary `Agent` whose control channel answers four reserved method
//! names (`register`/`lookup`/`list`/`shutdown`) dispatched through the
//! same builtin machinery `logger.rs` uses for its own single verb — see
//! `agent::dispatch::invoke_named`. The registry itself lives in the
//! agent's own attribute map, never shared across threads by value, so
//! the name-server ↔ agent ↔ proxy cycle never needs a lock (§9 "Cyclic
//! references").

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::handler::{BuiltinId, HandlerOutcome};
use crate::agent::Agent;
use crate::codec::Codec;
use crate::error::{AgentError, AgentResult};
use crate::global::Address;
use crate::message::Message;
use crate::proxy::Proxy;

pub(crate) const METHOD_REGISTER: &str = "__ns_register__";
pub(crate) const METHOD_LOOKUP: &str = "__ns_lookup__";
pub(crate) const METHOD_LIST: &str = "__ns_list__";
pub(crate) const METHOD_SHUTDOWN: &str = "__ns_shutdown__";

const REGISTRY_ATTR: &str = "__registry__";

/// How long a liveness probe against a registration collision's existing
/// control address is allowed to take before the name is considered free
/// (§4.9: "a second register with the same name fails unless the
/// previous entry's process is no longer alive").
const LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize, Deserialize)]
struct RegisterRequest {
    name: String,
    addr: Address,
}

/// A handle to a running name server's control channel, with the
/// register/lookup/list/shutdown verbs of §4.9 as typed methods instead of
/// raw `Proxy::call` invocations.
pub struct NameServer {
    proxy: Proxy,
}

impl NameServer {
    pub(crate) fn new(proxy: Proxy) -> NameServer {
        NameServer { proxy }
    }

    /// The underlying control-channel proxy, for operations common to
    /// every agent (e.g. a direct, non-cascading `shutdown`).
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn register(&self, name: &str, addr: &Address) -> AgentResult<()> {
        let payload = Codec::Pickle
            .encode(&RegisterRequest { name: name.to_owned(), addr: addr.clone() })
            .map_err(AgentError::Io)?;
        let reply = self.proxy.call_raw(METHOD_REGISTER, payload)?;
        let result: Result<(), String> = Codec::Pickle.decode(&reply).map_err(AgentError::Io)?;
        result.map_err(|_| AgentError::NameCollision { name: name.to_owned() })
    }

    pub fn lookup(&self, name: &str) -> AgentResult<Address> {
        let payload = Codec::Pickle.encode(&name.to_owned()).map_err(AgentError::Io)?;
        let reply = self.proxy.call_raw(METHOD_LOOKUP, payload)?;
        let result: Result<Address, String> = Codec::Pickle.decode(&reply).map_err(AgentError::Io)?;
        result.map_err(|message| AgentError::RegistryUnavailable { message })
    }

    pub fn list(&self) -> AgentResult<Vec<String>> {
        let reply = self.proxy.call_raw(METHOD_LIST, Vec::new())?;
        Codec::Pickle.decode(&reply).map_err(AgentError::Io)
    }

    /// Cascades a shutdown to every currently registered agent (by
    /// dialing each one's control channel), then the name server itself.
    pub fn shutdown(&self) -> AgentResult<()> {
        self.proxy.call_raw(METHOD_SHUTDOWN, Vec::new())?;
        Ok(())
    }
}

pub(crate) fn dispatch_builtin(agent: &mut Agent, id: BuiltinId, message: Message) -> AgentResult<HandlerOutcome> {
    match id {
        BuiltinId::NameServerRegister => register(agent, message),
        BuiltinId::NameServerLookup => lookup(agent, message),
        BuiltinId::NameServerList => list(agent, message),
        BuiltinId::NameServerShutdown => shutdown(agent),
        BuiltinId::LoggerRecord => unreachable!("logger builtin does not route through the name server"),
    }
}

fn registry(agent: &Agent) -> HashMap<String, Address> {
    agent.get_attr(REGISTRY_ATTR).unwrap_or_default()
}

fn save_registry(agent: &mut Agent, registry: &HashMap<String, Address>) -> AgentResult<()> {
    agent.set_attr(REGISTRY_ATTR, registry)
}

fn is_alive(addr: &Address) -> bool {
    Proxy::new(String::new(), addr.clone(), None, Codec::Pickle).is_reachable(LIVENESS_PROBE_TIMEOUT)
}

fn reply_with<T: Serialize>(value: &T) -> AgentResult<HandlerOutcome> {
    let bytes = Codec::Pickle.encode(value).map_err(AgentError::Io)?;
    Ok(HandlerOutcome::reply(Message::with_body(bytes)))
}

fn register(agent: &mut Agent, message: Message) -> AgentResult<HandlerOutcome> {
    let request: RegisterRequest = Codec::Pickle
        .decode(message.body())
        .map_err(|source| AgentError::DecodeFailed { alias: "register".to_owned(), source })?;

    let mut reg = registry(agent);
    if let Some(existing) = reg.get(&request.name) {
        if is_alive(existing) {
            return reply_with(&Err::<(), String>(format!("name '{}' is already registered", request.name)));
        }
    }

    reg.insert(request.name.clone(), request.addr);
    save_registry(agent, &reg)?;
    reply_with(&Ok::<(), String>(()))
}

fn lookup(agent: &mut Agent, message: Message) -> AgentResult<HandlerOutcome> {
    let name: String = Codec::Pickle
        .decode(message.body())
        .map_err(|source| AgentError::DecodeFailed { alias: "lookup".to_owned(), source })?;

    let reg = registry(agent);
    let result: Result<Address, String> =
        reg.get(&name).cloned().ok_or_else(|| format!("name '{name}' is not registered"));
    reply_with(&result)
}

fn list(agent: &mut Agent, _message: Message) -> AgentResult<HandlerOutcome> {
    let reg = registry(agent);
    let mut names: Vec<String> = reg.into_keys().collect();
    names.sort();
    reply_with(&names)
}

/// Replies immediately so the caller's `shutdown()` doesn't block on the
/// cascade, then (as the two-phase handler contract's continuation) dials
/// every registered agent's control channel before stopping this agent's
/// own loop.
fn shutdown(agent: &mut Agent) -> AgentResult<HandlerOutcome> {
    let reg = registry(agent);
    let config = agent.config.clone();

    let outcome = HandlerOutcome::reply(Message::with_body(
        Codec::Pickle.encode(&Ok::<(), String>(())).map_err(AgentError::Io)?,
    ))
    .with_continuation(Box::new(move |agent: &mut Agent| {
        for (name, addr) in reg {
            let proxy = Proxy::new(name.clone(), addr, config.shared_secret().map(<[u8]>::to_vec), config.default_codec());
            if let Err(e) = proxy.shutdown() {
                log::warn!("name server failed to cascade shutdown to '{name}': {e}");
            }
        }
        agent.request_shutdown();
    }));

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_roundtrips() {
        let mut agent = Agent::new("nameserver", crate::config::Config::new()).unwrap();

        let addr = Address::tcp("127.0.0.1", 5555, crate::global::Role::Rep, Codec::Pickle);
        let payload = Codec::Pickle.encode(&RegisterRequest { name: "a0".to_owned(), addr: addr.clone() }).unwrap();
        let outcome = register(&mut agent, Message::with_body(payload)).unwrap();
        let reply: Result<(), String> = Codec::Pickle.decode(outcome.reply.unwrap().body()).unwrap();
        assert!(reply.is_ok());

        let payload = Codec::Pickle.encode(&"a0".to_owned()).unwrap();
        let outcome = lookup(&mut agent, Message::with_body(payload)).unwrap();
        let reply: Result<Address, String> = Codec::Pickle.decode(outcome.reply.unwrap().body()).unwrap();
        assert_eq!(reply.unwrap(), addr);
    }

    #[test]
    fn register_collision_with_unreachable_address_is_allowed() {
        let mut agent = Agent::new("nameserver", crate::config::Config::new()).unwrap();
        let dead = Address::tcp("127.0.0.1", 1, crate::global::Role::Rep, Codec::Pickle);

        let payload = Codec::Pickle.encode(&RegisterRequest { name: "a0".to_owned(), addr: dead }).unwrap();
        register(&mut agent, Message::with_body(payload.clone())).unwrap();

        let fresh = Address::tcp("127.0.0.1", 2, crate::global::Role::Rep, Codec::Pickle);
        let payload = Codec::Pickle.encode(&RegisterRequest { name: "a0".to_owned(), addr: fresh.clone() }).unwrap();
        let outcome = register(&mut agent, Message::with_body(payload)).unwrap();
        let reply: Result<(), String> = Codec::Pickle.decode(outcome.reply.unwrap().body()).unwrap();
        assert!(reply.is_ok());

        let reg = registry(&agent);
        assert_eq!(reg.get("a0"), Some(&fresh));
    }

    #[test]
    fn list_returns_sorted_names() {
        let mut agent = Agent::new("nameserver", crate::config::Config::new()).unwrap();
        for name in ["c", "a", "b"] {
            let addr = Address::tcp("127.0.0.1", 1, crate::global::Role::Rep, Codec::Pickle);
            let payload = Codec::Pickle.encode(&RegisterRequest { name: name.to_owned(), addr }).unwrap();
            register(&mut agent, Message::with_body(payload)).unwrap();
        }

        let outcome = list(&mut agent, Message::with_body(Vec::new())).unwrap();
        let names: Vec<String> = Codec::Pickle.decode(outcome.reply.unwrap().body()).unwrap();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
    }
}
