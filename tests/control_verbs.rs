//! End-to-end: the control channel's get/set/bind/connect/close verbs
//! round-trip through a real `Proxy`, and a `shutdown()` request actually
//! stops the agent from answering further requests.

use std::thread;
use std::time::{Duration, Instant};

use swarmrt::{run_agent, Codec, Config, Role, Transport};

#[test]
fn control_channel_set_get_bind_connect_close_and_shutdown() {
    let _ = env_logger::try_init();

    let a0 = run_agent("a0", None, Config::new(), |_agent| Ok(())).unwrap();

    a0.set_attr("x", &42u32).unwrap();
    let back: u32 = a0.get_attr("x").unwrap();
    assert_eq!(back, 42);

    let main_addr = a0.bind("main", Role::Pub, Transport::Tcp, "127.0.0.1", 0, Codec::Pickle, None).unwrap();
    assert_eq!(main_addr.role, Role::Pub);

    // The same alias cannot be bound twice.
    let dup = a0.bind("main", Role::Pub, Transport::Tcp, "127.0.0.1", 0, Codec::Pickle, None);
    assert!(dup.is_err());

    let a1 = run_agent("a1", None, Config::new(), |_agent| Ok(())).unwrap();
    a1.connect("sub", &main_addr, None).unwrap();

    a0.close("main").unwrap();

    // Closing frees the alias for reuse.
    let rebound = a0.bind("main", Role::Pub, Transport::Tcp, "127.0.0.1", 0, Codec::Pickle, None);
    assert!(rebound.is_ok());

    // An unknown attribute surfaces as a remote error, not a panic.
    let missing = a0.get_attr::<u32>("does_not_exist");
    assert!(missing.is_err());

    a0.shutdown().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut became_unreachable = false;
    while Instant::now() < deadline {
        if a0.get_attr::<u32>("x").is_err() {
            became_unreachable = true;
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    assert!(became_unreachable, "agent's control channel should stop answering after shutdown");

    let _ = a1.shutdown();
}
