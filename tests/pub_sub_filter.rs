//! End-to-end: one PUB agent, three SUB agents subscribed to different
//! topic prefixes, confirming each receives exactly the slice of the
//! broadcast its own filter set selects.

use std::thread;
use std::time::{Duration, Instant};

use swarmrt::{run_agent, Address, Agent, Codec, Config, HandlerOutcome, HandlerSpec, Proxy, Role, Transport};

const TOTAL_MESSAGES: u32 = 100;

fn wait_for_count(proxy: &Proxy, attr: &str, expected: u32, timeout: Duration) -> u32 {
    let deadline = Instant::now() + timeout;
    let mut last = 0;
    while Instant::now() < deadline {
        last = proxy.get_attr(attr).unwrap_or(0);
        if last == expected {
            return last;
        }
        thread::sleep(Duration::from_millis(25));
    }
    last
}

fn install_counter(agent: &mut Agent) {
    agent.set_method(
        "count_msg",
        Box::new(|agent, _msg| {
            let mut count: u32 = agent.get_attr("count").unwrap_or(0);
            count += 1;
            agent.set_attr("count", &count)?;
            Ok(HandlerOutcome::none())
        }),
    );
}

#[test]
fn subscribers_only_see_their_subscribed_topics() {
    let _ = env_logger::try_init();

    let alice = run_agent("alice", None, Config::new(), |agent| {
        let addr = agent.bind("main", Role::Pub, Transport::Tcp, "127.0.0.1", 0, Codec::Pickle, None)?;
        agent.set_attr("main_addr", &addr)?;
        agent.set_method(
            "publish_batch",
            Box::new(|agent, _msg| {
                for i in 0..TOTAL_MESSAGES {
                    let topic: &[u8] = if i % 2 == 0 { b"a" } else { b"b" };
                    agent.publish("main", topic, vec![i as u8])?;
                }
                Ok(HandlerOutcome::none())
            }),
        );
        Ok(())
    })
    .unwrap();

    let main_addr: Address = alice.get_attr("main_addr").unwrap();

    let bob = run_agent("bob", None, Config::new(), {
        let addr = main_addr.clone();
        move |agent| {
            agent.set_attr("count", &0u32)?;
            install_counter(agent);
            agent.connect("sub", &addr, Some(HandlerSpec::Method("count_msg".to_owned())))?;
            agent.subscribe("sub", b"")?;
            Ok(())
        }
    })
    .unwrap();

    let eve = run_agent("eve", None, Config::new(), {
        let addr = main_addr.clone();
        move |agent| {
            agent.set_attr("count", &0u32)?;
            install_counter(agent);
            agent.connect("sub", &addr, Some(HandlerSpec::Method("count_msg".to_owned())))?;
            agent.subscribe("sub", b"a")?;
            Ok(())
        }
    })
    .unwrap();

    let dave = run_agent("dave", None, Config::new(), {
        let addr = main_addr.clone();
        move |agent| {
            agent.set_attr("count", &0u32)?;
            install_counter(agent);
            agent.connect("sub", &addr, Some(HandlerSpec::Method("count_msg".to_owned())))?;
            agent.subscribe("sub", b"b")?;
            Ok(())
        }
    })
    .unwrap();

    // Give the subscribers' connect legs time to be accepted by alice's
    // PUB listener before anything is published.
    thread::sleep(Duration::from_millis(300));

    alice.call::<(), ()>("publish_batch", &()).unwrap();

    assert_eq!(wait_for_count(&bob, "count", TOTAL_MESSAGES, Duration::from_secs(5)), TOTAL_MESSAGES);
    assert_eq!(wait_for_count(&eve, "count", TOTAL_MESSAGES / 2, Duration::from_secs(5)), TOTAL_MESSAGES / 2);
    assert_eq!(wait_for_count(&dave, "count", TOTAL_MESSAGES / 2, Duration::from_secs(5)), TOTAL_MESSAGES / 2);

    for proxy in [&alice, &bob, &eve, &dave] {
        let _ = proxy.shutdown();
    }
}

/// Mirrors the dict-of-callables form of `connect`'s handler argument: one
/// SUB socket, subscribed to two topics, routing each to a distinct
/// handler by topic rather than funnelling every accepted message through
/// the same callable.
#[test]
fn single_socket_topic_map_dispatches_distinct_handlers_by_topic() {
    let _ = env_logger::try_init();

    let alice = run_agent("alice_tm", None, Config::new(), |agent| {
        let addr = agent.bind("main", Role::Pub, Transport::Tcp, "127.0.0.1", 0, Codec::Pickle, None)?;
        agent.set_attr("main_addr", &addr)?;
        agent.set_method(
            "publish_batch",
            Box::new(|agent, _msg| {
                for i in 0..TOTAL_MESSAGES {
                    let topic: &[u8] = if i % 2 == 0 { b"a" } else { b"b" };
                    agent.publish("main", topic, vec![i as u8])?;
                }
                Ok(HandlerOutcome::none())
            }),
        );
        Ok(())
    })
    .unwrap();

    let main_addr: Address = alice.get_attr("main_addr").unwrap();

    let carol = run_agent("carol_tm", None, Config::new(), move |agent| {
        agent.set_attr("count_a", &0u32)?;
        agent.set_attr("count_b", &0u32)?;
        agent.set_method(
            "count_a",
            Box::new(|agent, _msg| {
                let mut count: u32 = agent.get_attr("count_a").unwrap_or(0);
                count += 1;
                agent.set_attr("count_a", &count)?;
                Ok(HandlerOutcome::none())
            }),
        );
        agent.set_method(
            "count_b",
            Box::new(|agent, _msg| {
                let mut count: u32 = agent.get_attr("count_b").unwrap_or(0);
                count += 1;
                agent.set_attr("count_b", &count)?;
                Ok(HandlerOutcome::none())
            }),
        );

        let topic_map = HandlerSpec::TopicMap(vec![
            (b"a".to_vec(), HandlerSpec::Method("count_a".to_owned())),
            (b"b".to_vec(), HandlerSpec::Method("count_b".to_owned())),
        ]);
        agent.connect("sub", &main_addr, Some(topic_map))?;
        agent.subscribe("sub", b"a")?;
        agent.subscribe("sub", b"b")?;
        Ok(())
    })
    .unwrap();

    thread::sleep(Duration::from_millis(300));
    alice.call::<(), ()>("publish_batch", &()).unwrap();

    assert_eq!(wait_for_count(&carol, "count_a", TOTAL_MESSAGES / 2, Duration::from_secs(5)), TOTAL_MESSAGES / 2);
    assert_eq!(wait_for_count(&carol, "count_b", TOTAL_MESSAGES / 2, Duration::from_secs(5)), TOTAL_MESSAGES / 2);

    let _ = alice.shutdown();
    let _ = carol.shutdown();
}
