// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! `swarmrt`: a distributed multi-agent runtime. An `Agent` is a named,
//! addressable execution context running its own `mio`-driven event
//! loop on one OS thread, wired to its peers by typed PUB/SUB, REQ/REP,
//! PUSH/PULL, and SYNC_PUB/SYNC_SUB sockets. A `NameServer` agent tracks
//! who is reachable where; `Proxy` lets an operator process drive a
//! remote agent's control channel without sharing its thread.

pub mod agent;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod global;
pub mod logger;
pub mod message;
pub mod nameserver;
pub mod operator;
pub mod pipe;
pub mod protocol;
pub mod proxy;
pub mod transport;

pub use agent::handler::{BuiltinId, Continuation, HandlerFn, HandlerOutcome, HandlerSpec, RemoteHandler};
pub use agent::Agent;
pub use codec::Codec;
pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use global::{Address, Role, Transport};
pub use message::Message;
pub use nameserver::NameServer;
pub use operator::{run_agent, run_logger, run_nameserver};
pub use proxy::Proxy;
