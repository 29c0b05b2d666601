//! End-to-end: SYNC_PUB/SYNC_SUB behaves like an ordinary broadcast when
//! no one is asking it anything, isolates a synchronous request's reply
//! to the requester alone, and honors a request's wait deadline — firing
//! `on_error` and logging the stable "not receive req" warning through a
//! connected logger agent when the server is too slow to answer in time.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use swarmrt::{run_agent, run_logger, Address, AgentError, Codec, Config, HandlerOutcome, HandlerSpec, Message, Proxy, Role, Transport};

#[derive(Serialize, Deserialize)]
struct IssueRequest {
    delay_ms: u64,
    timeout_ms: Option<u64>,
    with_error_handler: bool,
}

fn wait_until<T, F>(proxy: &Proxy, attr: &str, timeout: Duration, satisfied: F) -> T
where
    T: serde::de::DeserializeOwned + Default,
    F: Fn(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut last = T::default();
    while Instant::now() < deadline {
        last = proxy.get_attr(attr).unwrap_or_default();
        if satisfied(&last) {
            return last;
        }
        thread::sleep(Duration::from_millis(20));
    }
    last
}

fn spawn_server(name: &'static str) -> (Proxy, Address) {
    let server = run_agent(name, None, Config::new(), |agent| {
        agent.set_attr("count", &0u64)?;
        agent.set_attr("received", &Vec::<u64>::new())?;

        agent.set_method(
            "publish",
            Box::new(|agent, _msg| {
                let mut count: u64 = agent.get_attr("count").unwrap_or(0);
                count += 1;
                agent.set_attr("count", &count)?;
                agent.publish("publish", b"", count.to_le_bytes().to_vec())?;
                Ok(HandlerOutcome::none())
            }),
        );

        agent.set_method(
            "reply",
            Box::new(|agent, msg| {
                let delay_ms: u64 = Codec::Pickle.decode(msg.body()).unwrap_or(0);
                if delay_ms > 0 {
                    thread::sleep(Duration::from_millis(delay_ms));
                }
                let mut received: Vec<u64> = agent.get_attr("received").unwrap_or_default();
                received.push(delay_ms);
                agent.set_attr("received", &received)?;

                let reply_bytes = Codec::Pickle.encode(&delay_ms).map_err(AgentError::Io)?;
                Ok(HandlerOutcome::reply(Message::with_body(reply_bytes)))
            }),
        );

        let addr = agent.bind("publish", Role::SyncPub, Transport::Tcp, "127.0.0.1", 0, Codec::Pickle, Some(HandlerSpec::Method("reply".to_owned())))?;
        agent.set_attr("publish_addr", &addr)?;
        agent.each(Duration::from_millis(10), "tick_timer", "publish");
        Ok(())
    })
    .unwrap();

    let addr: Address = server.get_attr("publish_addr").unwrap();
    (server, addr)
}

fn install_client_methods(agent: &mut swarmrt::Agent) -> swarmrt::AgentResult<()> {
    agent.set_attr("tick_count", &0u32)?;
    agent.set_attr("received", &Vec::<u64>::new())?;
    agent.set_attr("error_count", &0u32)?;

    agent.set_method(
        "on_tick",
        Box::new(|agent, _msg| {
            let mut count: u32 = agent.get_attr("tick_count").unwrap_or(0);
            count += 1;
            agent.set_attr("tick_count", &count)?;
            Ok(HandlerOutcome::none())
        }),
    );

    agent.set_method(
        "reply_received",
        Box::new(|agent, msg| {
            let value: u64 = Codec::Pickle.decode(msg.body()).unwrap_or(u64::MAX);
            let mut received: Vec<u64> = agent.get_attr("received").unwrap_or_default();
            received.push(value);
            agent.set_attr("received", &received)?;
            Ok(HandlerOutcome::none())
        }),
    );

    agent.set_method(
        "on_timeout",
        Box::new(|agent, _msg| {
            let mut count: u32 = agent.get_attr("error_count").unwrap_or(0);
            count += 1;
            agent.set_attr("error_count", &count)?;
            Ok(HandlerOutcome::none())
        }),
    );

    agent.set_method(
        "issue_request",
        Box::new(|agent, msg| {
            let req: IssueRequest = Codec::Pickle
                .decode(msg.body())
                .map_err(|source| AgentError::DecodeFailed { alias: "issue_request".to_owned(), source })?;
            let payload = Codec::Pickle.encode(&req.delay_ms).map_err(AgentError::Io)?;
            let on_error = if req.with_error_handler { Some(HandlerSpec::Method("on_timeout".to_owned())) } else { None };
            agent.send_sync_request(
                "sub",
                payload,
                req.timeout_ms.map(Duration::from_millis),
                Some(HandlerSpec::Method("reply_received".to_owned())),
                on_error,
            )?;
            Ok(HandlerOutcome::none())
        }),
    );

    Ok(())
}

#[test]
fn sync_pub_behaves_as_ordinary_pub_with_no_requests() {
    let _ = env_logger::try_init();

    let (server, addr) = spawn_server("server_s2");

    let client = run_agent("client_s2", None, Config::new(), move |agent| {
        install_client_methods(agent)?;
        agent.connect("sub", &addr, Some(HandlerSpec::Method("on_tick".to_owned())))?;
        agent.subscribe("sub", b"")?;
        Ok(())
    })
    .unwrap();

    let ticks: u32 = wait_until(&client, "tick_count", Duration::from_secs(5), |&n| n >= 10);
    assert!(ticks >= 10, "expected at least 10 broadcast ticks, got {ticks}");

    let _ = server.shutdown();
    let _ = client.shutdown();
}

#[test]
fn sync_request_reply_is_isolated_to_the_requester() {
    let _ = env_logger::try_init();

    let (server, addr) = spawn_server("server_s3");

    let active = run_agent("active_s3", None, Config::new(), {
        let addr = addr.clone();
        move |agent| {
            install_client_methods(agent)?;
            agent.connect("sub", &addr, Some(HandlerSpec::Method("on_tick".to_owned())))?;
            agent.subscribe("sub", b"")?;
            Ok(())
        }
    })
    .unwrap();

    let passive = run_agent("passive_s3", None, Config::new(), move |agent| {
        install_client_methods(agent)?;
        agent.connect("sub", &addr, Some(HandlerSpec::Method("on_tick".to_owned())))?;
        agent.subscribe("sub", b"")?;
        Ok(())
    })
    .unwrap();

    wait_until::<u32, _>(&active, "tick_count", Duration::from_secs(5), |&n| n >= 5);
    wait_until::<u32, _>(&passive, "tick_count", Duration::from_secs(5), |&n| n >= 5);

    let request = IssueRequest { delay_ms: 0, timeout_ms: Some(2_000), with_error_handler: false };
    active.call::<IssueRequest, ()>("issue_request", &request).unwrap();

    let received: Vec<u64> = wait_until(&active, "received", Duration::from_secs(5), |r: &Vec<u64>| !r.is_empty());
    assert_eq!(received, vec![0]);

    // The passive client was never asked anything, so its reply history
    // stays empty even though both clients see the same broadcast ticks.
    thread::sleep(Duration::from_millis(200));
    let passive_received: Vec<u64> = passive.get_attr("received").unwrap();
    assert!(passive_received.is_empty());

    let _ = server.shutdown();
    let _ = active.shutdown();
    let _ = passive.shutdown();
}

#[test]
fn sync_request_timeout_fires_on_error_and_logs_a_warning() {
    let _ = env_logger::try_init();

    let logger = run_logger("logger_s4", Config::new()).unwrap();
    let (server, addr) = spawn_server("server_s4");

    let client = run_agent("client_s4", None, Config::new(), {
        let logger = logger.clone();
        move |agent| {
            install_client_methods(agent)?;
            agent.set_logger(&logger)?;
            agent.connect("sub", &addr, Some(HandlerSpec::Method("on_tick".to_owned())))?;
            agent.subscribe("sub", b"")?;
            Ok(())
        }
    })
    .unwrap();

    wait_until::<u32, _>(&client, "tick_count", Duration::from_secs(5), |&n| n >= 3);

    // Fast request: comfortably answered within its deadline.
    let fast = IssueRequest { delay_ms: 0, timeout_ms: Some(500), with_error_handler: false };
    client.call::<IssueRequest, ()>("issue_request", &fast).unwrap();
    let received: Vec<u64> = wait_until(&client, "received", Duration::from_secs(2), |r: &Vec<u64>| !r.is_empty());
    assert_eq!(received, vec![0]);

    // Slow request: the server's reply takes longer than the client's
    // deadline, so the client's on_error handler must fire and the
    // timeout must be logged through the connected logger agent.
    let slow = IssueRequest { delay_ms: 400, timeout_ms: Some(100), with_error_handler: true };
    client.call::<IssueRequest, ()>("issue_request", &slow).unwrap();

    let warnings: Vec<String> =
        wait_until(&logger, "log_history_warning", Duration::from_secs(2), |h: &Vec<String>| h.iter().any(|m| m.contains("not receive req")));
    assert!(warnings.iter().any(|m| m.contains("not receive req")), "warnings were: {warnings:?}");

    let error_count: u32 = wait_until(&client, "error_count", Duration::from_secs(2), |&n| n >= 1);
    assert_eq!(error_count, 1);

    // The slow reply never reaches "received" since it arrived after the
    // deadline had already fired on_error.
    let received: Vec<u64> = client.get_attr("received").unwrap();
    assert_eq!(received, vec![0]);

    let _ = server.shutdown();
    let _ = client.shutdown();
    let _ = logger.shutdown();
}
