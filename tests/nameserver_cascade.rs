//! End-to-end: agents spawned against a name server register themselves,
//! are listed and looked up correctly, and a name server `shutdown()`
//! cascades to every agent it still has registered.

use std::thread;
use std::time::{Duration, Instant};

use swarmrt::{run_agent, run_nameserver, Config, Proxy};

fn wait_unreachable(proxy: &Proxy, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !proxy.is_reachable(Duration::from_millis(100)) {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

#[test]
fn nameserver_shutdown_cascades_to_every_registered_agent() {
    let _ = env_logger::try_init();

    let ns = run_nameserver(Config::new()).unwrap();

    let a0 = run_agent("a0", Some(&ns), Config::new(), |_agent| Ok(())).unwrap();
    let a1 = run_agent("a1", Some(&ns), Config::new(), |_agent| Ok(())).unwrap();
    let a2 = run_agent("a2", Some(&ns), Config::new(), |_agent| Ok(())).unwrap();

    let mut names = ns.list().unwrap();
    names.sort();
    assert_eq!(names, vec!["a0".to_owned(), "a1".to_owned(), "a2".to_owned()]);

    assert_eq!(&ns.lookup("a0").unwrap(), a0.control_address());
    assert_eq!(&ns.lookup("a1").unwrap(), a1.control_address());
    assert_eq!(&ns.lookup("a2").unwrap(), a2.control_address());

    ns.shutdown().unwrap();

    for proxy in [&a0, &a1, &a2] {
        assert!(
            wait_unreachable(proxy, Duration::from_secs(5)),
            "agent '{}' should become unreachable after the cascade",
            proxy.name()
        );
    }
    assert!(
        wait_unreachable(ns.proxy(), Duration::from_secs(5)),
        "name server should become unreachable after shutting itself down"
    );
}
