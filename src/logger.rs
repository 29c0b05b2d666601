// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The logging agent extension `run_logger` spawns (supplement grounded in
//! `original_source/osbrain`'s `agent_logger` fixture and
//! `test_agent_sync_publications.py::test_wait`). A logger agent binds a
//! PULL socket; any agent that calls `Agent::set_logger` connects a PUSH
//! socket to it and gets `log_info`/`log_warning`/`log_error` methods that
//! forward `{level, message}` records there. The logger accumulates them
//! into per-level history attributes (`log_history_info`,
//! `log_history_warning`, `log_history_error`) that tests poll with
//! `get_attr`.

use serde::{Deserialize, Serialize};

use crate::agent::handler::{BuiltinId, HandlerOutcome, HandlerSpec};
use crate::agent::Agent;
use crate::codec::Codec;
use crate::error::{AgentError, AgentResult};
use crate::global::{Address, Role, Transport};
use crate::message::Message;

/// The alias a logging agent connects its PUSH leg under.
pub(crate) const LOG_PUSH_ALIAS: &str = "__log_out__";
/// The alias the logger binds its PULL leg under.
const LOG_PULL_ALIAS: &str = "__log_in__";
/// Attribute a logger publishes its PULL address under, read by
/// `Agent::set_logger` through the logger's `Proxy`.
pub(crate) const LOG_ADDR_ATTR: &str = "__log_addr__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn history_attr(&self) -> &'static str {
        match self {
            LogLevel::Info => "log_history_info",
            LogLevel::Warning => "log_history_warning",
            LogLevel::Error => "log_history_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LogRecord {
    pub(crate) level: LogLevel,
    pub(crate) message: String,
}

/// Binds the logger's PULL leg, seeds the three history attributes empty,
/// and records the bound address under `LOG_ADDR_ATTR` for agents calling
/// `set_logger` to read back through the control channel.
pub(crate) fn install(agent: &mut Agent, transport: Transport, host: &str) -> AgentResult<Address> {
    agent.set_attr(LogLevel::Info.history_attr(), &Vec::<String>::new())?;
    agent.set_attr(LogLevel::Warning.history_attr(), &Vec::<String>::new())?;
    agent.set_attr(LogLevel::Error.history_attr(), &Vec::<String>::new())?;

    let addr = agent.bind(
        LOG_PULL_ALIAS,
        Role::Pull,
        transport,
        host,
        0,
        Codec::Pickle,
        Some(HandlerSpec::Builtin(BuiltinId::LoggerRecord)),
    )?;
    agent.set_attr(LOG_ADDR_ATTR, &addr)?;
    Ok(addr)
}

/// Appends one `{level, message}` record to its level's history attribute.
pub(crate) fn dispatch_builtin(agent: &mut Agent, message: Message) -> AgentResult<HandlerOutcome> {
    let record: LogRecord = Codec::Pickle
        .decode(message.body())
        .map_err(|source| AgentError::DecodeFailed { alias: LOG_PULL_ALIAS.to_owned(), source })?;

    let attr = record.level.history_attr();
    let mut history: Vec<String> = agent.get_attr(attr).unwrap_or_default();
    history.push(record.message);
    agent.set_attr(attr, &history)?;

    Ok(HandlerOutcome::none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_to_distinct_history_attrs() {
        assert_eq!(LogLevel::Info.history_attr(), "log_history_info");
        assert_eq!(LogLevel::Warning.history_attr(), "log_history_warning");
        assert_eq!(LogLevel::Error.history_attr(), "log_history_error");
    }

    #[test]
    fn dispatch_builtin_appends_to_the_matching_history() {
        let mut agent = Agent::new("logger", crate::config::Config::new()).unwrap();
        install(&mut agent, Transport::Tcp, "127.0.0.1").unwrap();

        let record = LogRecord { level: LogLevel::Warning, message: "not receive req 42".to_owned() };
        let bytes = Codec::Pickle.encode(&record).unwrap();
        dispatch_builtin(&mut agent, Message::with_body(bytes)).unwrap();

        let history: Vec<String> = agent.get_attr("log_history_warning").unwrap();
        assert_eq!(history, vec!["not receive req 42".to_owned()]);

        let untouched: Vec<String> = agent.get_attr("log_history_info").unwrap();
        assert!(untouched.is_empty());
    }
}
