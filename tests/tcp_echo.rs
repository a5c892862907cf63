//! End-to-end TCP echo: a listener accepts a connection, echoes every
//! chunk it reads back to the writer, from inside the `on_read` callback
//! itself — the scenario that exercises both the loop-level and the
//! per-connection RefCell-reentrancy fixes (see DESIGN.md).

mod util;

use evio::event_loop::EventLoop;
use evio::transport::tcp::{TcpConnection, TcpListener};
use evio::transport::{Connection, Listener};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn echoes_a_single_write_back_to_the_client() {
    util::init();

    let loop_ = EventLoop::new().unwrap();
    let mut listener = TcpListener::new(&loop_);

    listener
        .listen(
            util::any_local_address(),
            128,
            Box::new(|accepted| {
                let conn = accepted.expect("accept failed");
                let shared: Rc<RefCell<Box<dyn Connection>>> = Rc::new(RefCell::new(conn));
                let for_read = shared.clone();
                shared
                    .borrow_mut()
                    .read_start(Box::new(move |res| match res {
                        Ok(data) => {
                            let buf = data.to_vec();
                            for_read.borrow_mut().write(buf, Box::new(|_| {})).unwrap();
                        }
                        Err(_) => for_read.borrow_mut().close(),
                    }))
                    .unwrap();
            }),
        )
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let received2 = received.clone();
    let mut client = TcpConnection::new(&loop_);
    client
        .connect(
            addr,
            Box::new(move |res| {
                res.expect("connect failed");
            }),
        )
        .unwrap();

    // Drive the loop until the connect completes, then start reading and
    // write the payload.
    util::run_for(&loop_, Duration::from_millis(200));
    client
        .read_start(Box::new(move |res| {
            if let Ok(data) = res {
                received2.borrow_mut().extend_from_slice(data);
            }
        }))
        .unwrap();
    client.write(b"ping".to_vec(), Box::new(|_| {})).unwrap();

    util::run_for(&loop_, Duration::from_millis(500));

    assert_eq!(*received.borrow(), b"ping".to_vec());
}
