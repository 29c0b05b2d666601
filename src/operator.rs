// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The operator surface of §6: `run_nameserver`, `run_agent`, `run_logger`.
//! Each spawns an `Agent` on its own OS thread (OQ-1 in `DESIGN.md`) with
//! its control channel already listening before the call returns, and
//! hands back a `Proxy` (or `NameServer`) to drive it — grounded on the
//! teacher's `session.rs`, which spawns one worker thread per socket and
//! only returns a facade once that worker is receiving commands.

use std::io;
use std::sync::mpsc;
use std::thread;

use crate::agent::Agent;
use crate::config::Config;
use crate::error::{AgentError, AgentResult};
use crate::global::{Address, Transport as TransportKind};
use crate::nameserver::NameServer;
use crate::proxy::Proxy;

const DEFAULT_HOST: &str = "127.0.0.1";

/// Spawns `name` on its own thread, running `init` once the agent's
/// control channel is bound but before its event loop starts, and blocks
/// until either the control address is known or startup failed — so the
/// caller never gets a `Proxy` to an agent that isn't listening yet.
fn spawn_agent(
    name: String,
    config: Config,
    init: impl FnOnce(&mut Agent) -> AgentResult<()> + Send + 'static,
) -> AgentResult<Proxy> {
    let (tx, rx) = mpsc::channel::<AgentResult<Address>>();
    let thread_name = name.clone();
    let proxy_name = name.clone();
    let shared_secret = config.shared_secret().map(<[u8]>::to_vec);
    let default_codec = config.default_codec();

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let mut agent = match Agent::new(name, config) {
                Ok(agent) => agent,
                Err(e) => {
                    let _ = tx.send(Err(AgentError::Io(e)));
                    return;
                }
            };

            let control_addr = match agent.enable_control(TransportKind::Tcp, DEFAULT_HOST, 0) {
                Ok(addr) => addr,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = init(&mut agent) {
                let _ = tx.send(Err(e));
                return;
            }

            let _ = tx.send(Ok(control_addr));

            if let Err(e) = agent.run() {
                log::error!("agent '{}' event loop failed: {e}", agent.name());
            }
        })
        .map_err(AgentError::Io)?;

    let control_addr = rx.recv().map_err(|_| {
        AgentError::Io(io::Error::new(io::ErrorKind::Other, "agent thread exited before reporting its control address"))
    })??;

    Ok(Proxy::new(proxy_name, control_addr, shared_secret, default_codec))
}

/// Starts a name server and returns a handle to its register/lookup/list/
/// shutdown verbs (§4.9, §6).
pub fn run_nameserver(config: Config) -> AgentResult<NameServer> {
    let proxy = spawn_agent("nameserver".to_owned(), config, |_agent| Ok(()))?;
    Ok(NameServer::new(proxy))
}

/// Spawns a new agent, runs `init` on it before its event loop starts
/// (the natural place to bind/connect sockets and register methods), and
/// — when `ns` is given — registers it under `name` (§6, §4.9).
pub fn run_agent(
    name: impl Into<String>,
    ns: Option<&NameServer>,
    config: Config,
    init: impl FnOnce(&mut Agent) -> AgentResult<()> + Send + 'static,
) -> AgentResult<Proxy> {
    let name = name.into();
    let proxy = spawn_agent(name.clone(), config, init)?;
    if let Some(ns) = ns {
        ns.register(&name, proxy.control_address())?;
    }
    Ok(proxy)
}

/// Spawns an agent with the logging extensions of `logger.rs` installed
/// (§6 "spawns an agent with logging extensions").
pub fn run_logger(name: impl Into<String>, config: Config) -> AgentResult<Proxy> {
    let name = name.into();
    spawn_agent(name, config, |agent| crate::logger::install(agent, TransportKind::Tcp, DEFAULT_HOST).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn spawned_agent_control_channel_accepts_set_then_get() {
        let proxy = spawn_agent("t0".to_owned(), Config::new(), |_agent| Ok(())).unwrap();
        proxy.set_attr("x", &7u32).unwrap();
        let back: u32 = proxy.get_attr("x").unwrap();
        assert_eq!(back, 7);
        proxy.shutdown().unwrap();
    }

    #[test]
    fn run_agent_registers_with_the_name_server() {
        let ns = run_nameserver(Config::new()).unwrap();
        let proxy = run_agent("a0", Some(&ns), Config::new(), |_agent| Ok(())).unwrap();

        assert!(ns.list().unwrap().contains(&"a0".to_owned()));
        let looked_up = ns.lookup("a0").unwrap();
        assert_eq!(&looked_up, proxy.control_address());

        ns.shutdown().unwrap();
        std::thread::sleep(Duration::from_millis(100));
    }
}
