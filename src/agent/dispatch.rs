// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Resolves a bound socket's `HandlerSpec` to an actual handler and runs
//! it, honoring the lazy-sequence two-phase contract: the reply (if any)
//! goes out before the continuation (if any) runs.

use crate::error::{AgentError, AgentResult};
use crate::global::SocketId;
use crate::protocol::Inbound;

use super::handler::{BuiltinId, HandlerOutcome, HandlerSpec};
use super::Agent;

pub(crate) fn dispatch_inbound(agent: &mut Agent, socket_id: SocketId, inbound: Inbound) -> AgentResult<()> {
    let Some(spec) = agent.socket_handler_spec(socket_id, inbound.message.topic()) else {
        // No handler bound (e.g. a PUSH leg, a SUB with no subscribed
        // handler yet, or a TopicMap with no prefix matching this
        // message's topic): the message is simply dropped.
        return Ok(());
    };

    let token = inbound.token;
    let outcome = run_handler(agent, &spec, inbound.message.clone());

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            log::warn!("handler for socket {socket_id:?} failed: {e}");
            return Ok(());
        }
    };

    if let Some(reply) = outcome.reply {
        agent.send_reply(socket_id, token, &reply)?;
    }
    if let Some(continuation) = outcome.continuation {
        continuation(agent);
    }
    Ok(())
}

/// Invokes a user method directly by name, bypassing socket dispatch.
/// Used by the control channel's `call` verb, which has no pipe or
/// token of its own to route a reply through. A handful of reserved
/// names are rerouted to the name server's builtin verbs (§4.9); every
/// agent understands them, but only a name server agent ever has a
/// populated registry for them to act on.
pub(crate) fn invoke_named(agent: &mut Agent, name: &str, message: crate::message::Message) -> AgentResult<HandlerOutcome> {
    let spec = builtin_for_name(name).unwrap_or_else(|| HandlerSpec::Method(name.to_owned()));
    run_handler(agent, &spec, message)
}

fn builtin_for_name(name: &str) -> Option<HandlerSpec> {
    use crate::nameserver::{METHOD_LIST, METHOD_LOOKUP, METHOD_REGISTER, METHOD_SHUTDOWN};

    let id = match name {
        METHOD_REGISTER => BuiltinId::NameServerRegister,
        METHOD_LOOKUP => BuiltinId::NameServerLookup,
        METHOD_LIST => BuiltinId::NameServerList,
        METHOD_SHUTDOWN => BuiltinId::NameServerShutdown,
        _ => return None,
    };
    Some(HandlerSpec::Builtin(id))
}

/// Dispatches the reply to a previously issued SYNC_SUB request through
/// that request's own registered handler (§4.8 step 4), rather than the
/// socket's general subscriber handler — a late reply with no remaining
/// pending-request bookkeeping (its deadline already fired `on_error`) is
/// dropped silently, per the open-question resolution in spec.md §9.
pub(crate) fn dispatch_sync_reply(agent: &mut Agent, socket_id: SocketId, request_id: u64, message: crate::message::Message) {
    let Some(spec) = agent.take_pending_sync_reply(socket_id, request_id) else {
        return;
    };

    let outcome = match run_handler(agent, &spec, message) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("sync reply handler for request {request_id} failed: {e}");
            return;
        }
    };

    if outcome.reply.is_some() {
        log::warn!("sync reply handler for request {request_id} produced a reply with no peer to send it to");
    }
    if let Some(continuation) = outcome.continuation {
        continuation(agent);
    }
}

/// Invokes `spec` directly, used wherever a handler must run with no pipe
/// or control request backing it: a SYNC_SUB timeout's `on_error`, a SYNC
/// reply dispatched by request id rather than by socket.
pub(crate) fn run_handler(agent: &mut Agent, spec: &HandlerSpec, message: crate::message::Message) -> AgentResult<HandlerOutcome> {
    match spec {
        HandlerSpec::Method(name) => {
            let mut handler = agent
                .methods
                .remove(name)
                .ok_or_else(|| AgentError::UnknownMethod { method: name.clone() })?;
            let result = handler(agent, message);
            agent.methods.insert(name.clone(), handler);
            result
        }
        HandlerSpec::Builtin(id) => call_builtin(agent, *id, message),
        // Reached only when a `TopicMap` is invoked directly (SYNC_SUB's
        // `on_error`/reply dispatch bypass socket-level resolution); pick
        // the entry whose prefix matches this very message's own topic.
        HandlerSpec::TopicMap(_) => {
            let resolved = spec.resolve(message.topic()).cloned();
            match resolved {
                Some(resolved @ (HandlerSpec::Method(_) | HandlerSpec::Builtin(_))) => run_handler(agent, &resolved, message),
                _ => Err(AgentError::UnknownMethod { method: "topic map matched no handler for this topic".to_owned() }),
            }
        }
    }
}

fn call_builtin(agent: &mut Agent, id: BuiltinId, message: crate::message::Message) -> AgentResult<HandlerOutcome> {
    match id {
        BuiltinId::NameServerRegister
        | BuiltinId::NameServerLookup
        | BuiltinId::NameServerList
        | BuiltinId::NameServerShutdown => crate::nameserver::dispatch_builtin(agent, id, message),
        BuiltinId::LoggerRecord => crate::logger::dispatch_builtin(agent, message),
    }
}
