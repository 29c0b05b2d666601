// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The one poll loop an agent's thread runs for its whole life: wait for
//! I/O or the next timer deadline, route each ready token to a listener
//! accept, a pipe read, or the control channel, dispatch any messages
//! that came out of it, then fire due timers. Exits once
//! `Agent::request_shutdown` has been called and there is nothing left
//! ready in this pass.

use std::time::{Duration, Instant};

use mio::Events;

use crate::error::AgentResult;

use super::dispatch::{dispatch_inbound, dispatch_sync_reply, run_handler};
use super::{Agent, DispatchItem, TokenOwner};

/// How many `mio::Event`s to pull out of the OS per `poll()` call.
const EVENTS_CAPACITY: usize = 256;

pub(crate) fn run(agent: &mut Agent) -> AgentResult<()> {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    loop {
        let timeout = poll_timeout(agent);
        agent.poll_mut().poll(&mut events, timeout)?;

        for event in events.iter() {
            let token = event.token();
            let Some(owner) = agent.token_owner(token) else { continue };

            match *owner {
                TokenOwner::Listener { socket, reply_leg } => {
                    if let Err(e) = agent.accept_on_listener(socket, reply_leg) {
                        log::warn!("accept on socket {socket:?} failed: {e}");
                    }
                }
                TokenOwner::Pipe { socket } => match agent.pipe_ready(socket, token, event) {
                    Ok(items) => {
                        for item in items {
                            match item {
                                DispatchItem::Message(msg) => {
                                    if let Err(e) = dispatch_inbound(agent, socket, msg) {
                                        log::warn!("dispatch on socket {socket:?} failed: {e}");
                                    }
                                }
                                DispatchItem::SyncReplied { request_id, inbound } => {
                                    dispatch_sync_reply(agent, socket, request_id, inbound.message);
                                }
                            }
                        }
                    }
                    Err(e) => log::warn!("pipe readiness on socket {socket:?} failed: {e}"),
                },
                TokenOwner::Control { listener } => {
                    if let Err(e) = crate::control::on_event(agent, token, event, listener) {
                        log::warn!("control channel request failed: {e}");
                    }
                }
            }
        }

        fire_due_timers(agent);
        fire_sync_timeouts(agent);

        if agent.is_shutting_down() && events.is_empty() {
            break;
        }
    }

    Ok(())
}

/// Checks every SYNC_SUB's pending requests for an elapsed deadline and
/// fires `on_error` for each (§4.3 step 4, §4.8 step 5, §7 kind 5). The
/// timeout itself is already logged by `Agent::expire_sync_requests`.
fn fire_sync_timeouts(agent: &mut Agent) {
    for (on_error, request_id) in agent.expire_sync_requests() {
        let outcome = match run_handler(agent, &on_error, crate::message::Message::with_body(Vec::new())) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("on_error handler for request {request_id} failed: {e}");
                continue;
            }
        };
        if outcome.reply.is_some() {
            log::warn!("on_error handler for request {request_id} produced a reply with no peer to send it to");
        }
        if let Some(continuation) = outcome.continuation {
            continuation(agent);
        }
    }
}

/// Caps the poll wait at the soonest timer deadline, and at the
/// configured idle slice so a `request_shutdown` issued from outside the
/// loop (another thread, a signal handler) is noticed promptly even with
/// no timers pending.
fn poll_timeout(agent: &Agent) -> Option<Duration> {
    let idle_slice = agent.config.idle_slice();
    match agent.timers.next_deadline() {
        Some(deadline) => {
            let now = Instant::now();
            let until = if deadline > now { deadline - now } else { Duration::from_millis(0) };
            Some(until.min(idle_slice))
        }
        None => Some(idle_slice),
    }
}

fn fire_due_timers(agent: &mut Agent) {
    let now = Instant::now();
    let due = agent.timers.take_due(now);
    for handler_name in due {
        let mut handler = match agent.methods.remove(&handler_name) {
            Some(h) => h,
            None => {
                log::warn!("timer fired for unknown method '{handler_name}'");
                continue;
            }
        };
        let outcome = handler(agent, crate::message::Message::with_body(Vec::new()));
        agent.methods.insert(handler_name.clone(), handler);

        match outcome {
            Ok(outcome) => {
                if outcome.reply.is_some() {
                    log::warn!("timer handler '{handler_name}' produced a reply with no peer to send it to");
                }
                if let Some(continuation) = outcome.continuation {
                    continuation(agent);
                }
            }
            Err(e) => log::warn!("timer handler '{handler_name}' failed: {e}"),
        }
    }
}
