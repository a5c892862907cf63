//! End-to-end UDP round trip, covering the `is_empty_then_add` fast path:
//! the first `send` on an idle queue attempts delivery immediately rather
//! than waiting for a writable-readiness notification.

mod util;

use evio::event_loop::EventLoop;
use evio::transport::udp::UdpSocket;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn sends_and_receives_a_datagram() {
    util::init();

    let loop_ = EventLoop::new().unwrap();
    let mut server = UdpSocket::bind(&loop_, util::any_local_address()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client = UdpSocket::bind(&loop_, util::any_local_address()).unwrap();

    let received = Rc::new(RefCell::new(None));
    let received2 = received.clone();
    server
        .recv_start(Box::new(move |res| {
            if let Ok((data, from)) = res {
                *received2.borrow_mut() = Some((data.to_vec(), from));
            }
        }))
        .unwrap();

    let sent = Rc::new(RefCell::new(false));
    let sent2 = sent.clone();
    client
        .send(
            b"hello".to_vec(),
            server_addr,
            Box::new(move |res| {
                res.expect("send failed");
                *sent2.borrow_mut() = true;
            }),
        )
        .unwrap();

    // The fast path in `SendQueue::is_empty_then_add` means the send above
    // was already attempted synchronously; confirm it completed without
    // needing the loop to run at all.
    assert!(*sent.borrow(), "send should complete on the immediate fast path");

    util::run_for(&loop_, Duration::from_millis(200));

    let (data, from) = received.borrow_mut().take().expect("no datagram received");
    assert_eq!(data, b"hello".to_vec());
    assert_eq!(from, client.local_addr().unwrap());
}

#[test]
fn sequential_sends_complete_in_fifo_order() {
    util::init();

    let loop_ = EventLoop::new().unwrap();
    let mut client = UdpSocket::bind(&loop_, util::any_local_address()).unwrap();
    let dest = util::any_local_address();

    let order = Rc::new(RefCell::new(Vec::new()));
    let order_a = order.clone();
    let order_b = order.clone();

    // Nothing is listening on `dest`; these sends still complete at the
    // UDP layer (a send succeeds once handed to the OS, regardless of
    // whether anyone receives it). Each is small enough to clear the
    // `is_empty_then_add` fast path immediately, so this confirms
    // completion order rather than forcing the queue to actually hold a
    // pending entry (see `unit tests` in `udp.rs` for that).
    client.send(b"a".to_vec(), dest, Box::new(move |_| order_a.borrow_mut().push('a'))).unwrap();
    client.send(b"b".to_vec(), dest, Box::new(move |_| order_b.borrow_mut().push('b'))).unwrap();

    util::run_for(&loop_, Duration::from_millis(100));

    assert_eq!(*order.borrow(), vec!['a', 'b']);
}
