//! UDP socket.
//!
//! The per-socket outbound queue is a plain `VecDeque`, with an
//! `is_empty_then_add` fast path used to decide whether a send needs to
//! kick the write-readiness registration or can just enqueue behind
//! in-flight sends: it preserves FIFO drain order the same way
//! [`crate::mem::Slab`] uses an index-tagged `Vec` in place of a raw
//! intrusive list.

use crate::error::{Error, Result};
use crate::event::IoOutcome;
use crate::event_loop::{EventLoop, LoopInner};
use crate::interest::Interest;
use crate::transport::raw_handle;
use log::debug;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

/// Socket lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpState {
    Closed,
    Open,
    Receiving,
}

struct QueuedSend {
    buf: Vec<u8>,
    dest: SocketAddr,
    on_sent: Box<dyn FnOnce(Result<usize>)>,
}

/// A datagram sender/receiver's pending-write queue. Exposed standalone
/// (not just embedded in [`UdpSocket`]) so `is_empty_then_add` is directly
/// testable independent of any socket.
#[derive(Default)]
pub struct SendQueue {
    queue: VecDeque<QueuedSend>,
}

impl SendQueue {
    pub fn new() -> SendQueue {
        SendQueue { queue: VecDeque::new() }
    }

    /// Reports whether the queue was empty *before* `item` was pushed: a
    /// send whose queue was empty may write immediately, while a send whose
    /// queue was nonempty must wait its turn.
    fn is_empty_then_add(&mut self, item: QueuedSend) -> bool {
        let was_empty = self.queue.is_empty();
        self.queue.push_back(item);
        was_empty
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

struct UdpInner {
    state: UdpState,
    std: Option<std::net::UdpSocket>,
    slot: Option<usize>,
    interest: Interest,
    on_recv: Option<Box<dyn FnMut(Result<(&[u8], SocketAddr)>)>>,
    send_queue: SendQueue,
}

/// A UDP socket. Owns a send-side [`SendQueue`]; the receive side is
/// a single `on_recv` callback installed by [`UdpSocket::recv_start`].
pub struct UdpSocket {
    loop_ref: Weak<RefCell<LoopInner>>,
    inner: Rc<RefCell<UdpInner>>,
}

impl UdpSocket {
    /// `open(socket, loop)`: binds immediately (UDP has no separate
    /// listen/connect step before it can send or receive), unlike
    /// [`crate::transport::tcp::TcpConnection`]'s Open/Connecting split.
    pub fn bind(loop_: &EventLoop, addr: SocketAddr) -> Result<UdpSocket> {
        let std_socket = std::net::UdpSocket::bind(addr).map_err(|e| Error::from_io_error(&e))?;
        std_socket.set_nonblocking(true).map_err(|e| Error::from_io_error(&e))?;
        debug!("udp socket bound to {addr}");
        Ok(UdpSocket {
            loop_ref: loop_.weak(),
            inner: Rc::new(RefCell::new(UdpInner {
                state: UdpState::Open,
                std: Some(std_socket),
                slot: None,
                interest: Interest::readable(),
                on_recv: None,
                send_queue: SendQueue::new(),
            })),
        })
    }

    pub fn state(&self) -> UdpState {
        self.inner.borrow().state
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        inner.std.as_ref().ok_or(Error::State)?.local_addr().map_err(|e| Error::from_io_error(&e))
    }

    fn ensure_registered(&self) -> Result<()> {
        if self.inner.borrow().slot.is_some() {
            return Ok(());
        }
        let handle = {
            let inner = self.inner.borrow();
            raw_handle(inner.std.as_ref().ok_or(Error::State)?)
        };
        let strong = self.loop_ref.upgrade().ok_or(Error::State)?;
        let inner_weak = Rc::downgrade(&self.inner);
        let callback = Box::new(move |outcome: IoOutcome| {
            let inner = match inner_weak.upgrade() {
                Some(i) => i,
                None => return,
            };
            match outcome {
                IoOutcome::Canceled => fail_pending(&inner, Error::Canceled),
                IoOutcome::Ready(readiness) => {
                    if readiness.readable {
                        drive_recv(&inner);
                    }
                    if readiness.writable {
                        drive_send(&inner);
                    }
                }
            }
        });
        let slot = strong.borrow_mut().register_io(handle, Interest::readable(), callback)?;
        let mut inner = self.inner.borrow_mut();
        inner.slot = Some(slot);
        inner.interest = Interest::readable();
        Ok(())
    }

    fn sync_interest(&self) -> Result<()> {
        let (slot, wanted) = {
            let inner = self.inner.borrow();
            let wanted = if !inner.send_queue.is_empty() {
                Interest::readable() | Interest::writable()
            } else {
                Interest::readable()
            };
            (inner.slot, wanted)
        };
        if self.inner.borrow().interest == wanted {
            return Ok(());
        }
        if let Some(slot) = slot {
            let strong = self.loop_ref.upgrade().ok_or(Error::State)?;
            strong.borrow_mut().reregister_io(slot, wanted)?;
            self.inner.borrow_mut().interest = wanted;
        }
        Ok(())
    }

    /// Starts the receive pump; `on_recv` is invoked once per inbound
    /// datagram with `Ok((data, source))`, or `Err(_)` on failure.
    pub fn recv_start(
        &mut self,
        on_recv: Box<dyn FnMut(Result<(&[u8], SocketAddr)>)>,
    ) -> Result<()> {
        if self.inner.borrow().state == UdpState::Closed {
            return Err(Error::State);
        }
        self.ensure_registered()?;
        self.inner.borrow_mut().on_recv = Some(on_recv);
        self.inner.borrow_mut().state = UdpState::Receiving;
        drive_recv(&self.inner);
        Ok(())
    }

    pub fn recv_stop(&mut self) -> Result<()> {
        self.inner.borrow_mut().on_recv = None;
        if self.inner.borrow().state == UdpState::Receiving {
            self.inner.borrow_mut().state = UdpState::Open;
        }
        Ok(())
    }

    /// Applies the queue's `is_empty_then_add` fast path: if nothing was
    /// already queued, attempts the `sendto` immediately rather than
    /// waiting for a writable-readiness notification that may be
    /// iterations away.
    pub fn send(
        &mut self,
        buf: Vec<u8>,
        dest: SocketAddr,
        on_sent: Box<dyn FnOnce(Result<usize>)>,
    ) -> Result<()> {
        if self.inner.borrow().state == UdpState::Closed {
            return Err(Error::State);
        }
        self.ensure_registered()?;
        let was_empty = self
            .inner
            .borrow_mut()
            .send_queue
            .is_empty_then_add(QueuedSend { buf, dest, on_sent });
        if was_empty {
            drive_send(&self.inner);
        }
        self.sync_interest()
    }

    pub fn close(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(slot) = inner.slot.take() {
            if let Some(strong) = self.loop_ref.upgrade() {
                strong.borrow_mut().deregister_io(slot);
            }
        }
        inner.std = None;
        inner.on_recv = None;
        inner.send_queue.queue.clear();
        inner.state = UdpState::Closed;
        debug!("udp socket closed");
    }
}

/// Invokes `on_recv` with the `RefCell` released; see
/// [`crate::transport::tcp`]'s `invoke_on_read` for why (a `send` issued
/// from inside `on_recv` must not double-borrow `inner`).
fn invoke_on_recv(inner: &Rc<RefCell<UdpInner>>, res: Result<(&[u8], SocketAddr)>) {
    let taken = inner.borrow_mut().on_recv.take();
    let mut cb = match taken {
        Some(cb) => cb,
        None => return,
    };
    cb(res);
    let mut borrowed = inner.borrow_mut();
    if borrowed.on_recv.is_none() {
        borrowed.on_recv = Some(cb);
    }
}

fn drive_recv(inner: &Rc<RefCell<UdpInner>>) {
    let mut buf = [0u8; 65536];
    loop {
        let recv_result = {
            let mut borrowed = inner.borrow_mut();
            if borrowed.on_recv.is_none() {
                return;
            }
            match borrowed.std.as_ref() {
                Some(s) => s.recv_from(&mut buf),
                None => return,
            }
        };
        match recv_result {
            Ok((n, from)) => {
                let data = buf[..n].to_vec();
                invoke_on_recv(inner, Ok((&data, from)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                let err = Error::from_io_error(&e);
                invoke_on_recv(inner, Err(err));
                return;
            }
        }
    }
}

fn drive_send(inner: &Rc<RefCell<UdpInner>>) {
    loop {
        let send_result = {
            let mut borrowed = inner.borrow_mut();
            let front = match borrowed.send_queue.queue.front() {
                Some(f) => f,
                None => return,
            };
            let (buf, dest) = (front.buf.clone(), front.dest);
            match borrowed.std.as_ref() {
                Some(s) => s.send_to(&buf, dest),
                None => return,
            }
        };
        match send_result {
            Ok(n) => {
                let mut borrowed = inner.borrow_mut();
                let front = borrowed.send_queue.queue.pop_front().expect("checked above");
                drop(borrowed);
                (front.on_sent)(Ok(n));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                let mut borrowed = inner.borrow_mut();
                let front = borrowed.send_queue.queue.pop_front();
                drop(borrowed);
                let err = Error::from_io_error(&e);
                if let Some(front) = front {
                    (front.on_sent)(Err(err));
                }
                return;
            }
        }
    }
}

fn fail_pending(inner: &Rc<RefCell<UdpInner>>, err: Error) {
    let mut borrowed = inner.borrow_mut();
    borrowed.state = UdpState::Closed;
    let on_recv = borrowed.on_recv.take();
    let queue = std::mem::take(&mut borrowed.send_queue.queue);
    drop(borrowed);
    if let Some(mut cb) = on_recv {
        cb(Err(err));
    }
    for pending in queue {
        (pending.on_sent)(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_empty_then_add_reports_prior_emptiness() {
        let mut q = SendQueue::new();
        let item = |n: u8| QueuedSend {
            buf: vec![n],
            dest: "127.0.0.1:0".parse().unwrap(),
            on_sent: Box::new(|_| {}),
        };
        assert!(q.is_empty_then_add(item(1)));
        assert!(!q.is_empty_then_add(item(2)));
        assert!(!q.is_empty_then_add(item(3)));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn fifo_drain_order() {
        let mut q = SendQueue::new();
        for n in 0..5u8 {
            q.is_empty_then_add(QueuedSend {
                buf: vec![n],
                dest: "127.0.0.1:0".parse().unwrap(),
                on_sent: Box::new(|_| {}),
            });
        }
        let order: Vec<u8> = q.queue.iter().map(|item| item.buf[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}
