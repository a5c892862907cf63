// Not all functions are used by every integration test.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use evio::event_loop::EventLoop;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    })
}

/// Bind to any port on localhost.
pub fn any_local_address() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Runs `event_loop` until `timeout` elapses, ignoring the empty-and-done
/// case `run_until` itself already stops on. Used by tests that drive the
/// loop from the test thread itself rather than a background thread.
pub fn run_for(event_loop: &EventLoop, timeout: Duration) {
    let deadline = event_loop.now().add(timeout).expect("deadline overflow");
    event_loop.run_until(Some(deadline)).expect("run_until failed");
}
