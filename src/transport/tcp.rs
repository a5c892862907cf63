//! TCP listener and connection.
//!
//! The listener binds, sets non-blocking, registers readable interest, and
//! loops `accept` until `WouldBlock`. Connections dial out via a raw
//! non-blocking `socket`/`connect`, treating `EINPROGRESS` as "still
//! connecting". The write side's queue-until-writable shape mirrors
//! [`crate::transport::udp`]'s send queue.
//!
//! Both [`TcpListener`] and [`TcpConnection`] hold only a `Weak`
//! back-reference to the owning loop, the same pattern [`crate::task::Task`]
//! uses.

use crate::error::{Error, Result};
use crate::event::IoOutcome;
use crate::event_loop::{EventLoop, LoopInner};
use crate::interest::Interest;
use crate::transport::{raw_handle, Connection, Listener};
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

/// Listener lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Closed,
    Open,
    Listening,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    Open,
    Connecting,
    Connected,
    Reading,
    Shutdown,
}

struct ListenerInner {
    state: ListenerState,
    std: Option<std::net::TcpListener>,
    slot: Option<usize>,
}

/// A bound, listening TCP socket.
pub struct TcpListener {
    loop_ref: Weak<RefCell<LoopInner>>,
    inner: Rc<RefCell<ListenerInner>>,
}

impl TcpListener {
    /// `open(listener, loop)`: allocates the handle in the Open state,
    /// unbound.
    pub fn new(loop_: &EventLoop) -> TcpListener {
        TcpListener {
            loop_ref: loop_.weak(),
            inner: Rc::new(RefCell::new(ListenerInner {
                state: ListenerState::Open,
                std: None,
                slot: None,
            })),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.inner.borrow().state
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        let std_listener = inner.std.as_ref().ok_or(Error::State)?;
        std_listener.local_addr().map_err(|e| Error::from_io_error(&e))
    }
}

impl Listener for TcpListener {
    /// `backlog` is accepted as a parameter but `std` exposes no way to
    /// pass a backlog hint through `TcpListener::bind` — the OS default
    /// applies, noted in DESIGN.md rather than hidden.
    fn listen(
        &mut self,
        addr: SocketAddr,
        _backlog: u32,
        mut on_accept: Box<dyn FnMut(Result<Box<dyn Connection>>)>,
    ) -> Result<()> {
        if self.inner.borrow().state != ListenerState::Open {
            return Err(Error::State);
        }

        let std_listener = std::net::TcpListener::bind(addr).map_err(|e| Error::from_io_error(&e))?;
        std_listener.set_nonblocking(true).map_err(|e| Error::from_io_error(&e))?;
        let handle = raw_handle(&std_listener);

        let strong = self.loop_ref.upgrade().ok_or(Error::State)?;
        let inner_weak = Rc::downgrade(&self.inner);
        let loop_ref_for_accept = self.loop_ref.clone();

        let callback = Box::new(move |outcome: IoOutcome| {
            let inner = match inner_weak.upgrade() {
                Some(i) => i,
                None => return,
            };
            match outcome {
                IoOutcome::Canceled => on_accept(Err(Error::Canceled)),
                IoOutcome::Ready(readiness) => {
                    if !readiness.readable {
                        return;
                    }
                    loop {
                        let accepted = match inner.borrow().std.as_ref() {
                            Some(l) => l.accept(),
                            None => return,
                        };
                        match accepted {
                            Ok((stream, peer)) => {
                                if let Err(e) = stream.set_nonblocking(true) {
                                    on_accept(Err(Error::from_io_error(&e)));
                                    continue;
                                }
                                trace!("tcp accepted {peer}");
                                let conn = TcpConnection::from_connected(loop_ref_for_accept.clone(), stream);
                                on_accept(Ok(Box::new(conn)));
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(e) => {
                                on_accept(Err(Error::from_io_error(&e)));
                                break;
                            }
                        }
                    }
                }
            }
        });

        let slot = strong.borrow_mut().register_io(handle, Interest::readable(), callback)?;
        let mut inner = self.inner.borrow_mut();
        inner.std = Some(std_listener);
        inner.slot = Some(slot);
        inner.state = ListenerState::Listening;
        debug!("tcp listener bound to {addr}");
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(slot) = inner.slot.take() {
            if let Some(strong) = self.loop_ref.upgrade() {
                strong.borrow_mut().deregister_io(slot);
            }
        }
        inner.std = None;
        inner.state = ListenerState::Closed;
        debug!("tcp listener closed");
    }
}

struct PendingWrite {
    buf: Vec<u8>,
    written: usize,
    on_write: Box<dyn FnOnce(Result<usize>)>,
}

struct ConnInner {
    state: ConnState,
    std: Option<std::net::TcpStream>,
    slot: Option<usize>,
    interest: Interest,
    on_read: Option<Box<dyn FnMut(Result<&[u8]>)>>,
    on_connect: Option<Box<dyn FnOnce(Result<()>)>>,
    write_queue: VecDeque<PendingWrite>,
}

/// A connected (or connecting) TCP stream.
pub struct TcpConnection {
    loop_ref: Weak<RefCell<LoopInner>>,
    inner: Rc<RefCell<ConnInner>>,
}

impl TcpConnection {
    /// `open(conn, loop)`: allocates the handle in the Open state,
    /// unconnected.
    pub fn new(loop_: &EventLoop) -> TcpConnection {
        TcpConnection {
            loop_ref: loop_.weak(),
            inner: Rc::new(RefCell::new(ConnInner {
                state: ConnState::Open,
                std: None,
                slot: None,
                interest: Interest::readable(),
                on_read: None,
                on_connect: None,
                write_queue: VecDeque::new(),
            })),
        }
    }

    fn from_connected(loop_ref: Weak<RefCell<LoopInner>>, std: std::net::TcpStream) -> TcpConnection {
        TcpConnection {
            loop_ref,
            inner: Rc::new(RefCell::new(ConnInner {
                state: ConnState::Connected,
                std: Some(std),
                slot: None,
                interest: Interest::readable(),
                on_read: None,
                on_connect: None,
                write_queue: VecDeque::new(),
            })),
        }
    }

    pub fn state(&self) -> ConnState {
        self.inner.borrow().state
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        inner.std.as_ref().ok_or(Error::State)?.peer_addr().map_err(|e| Error::from_io_error(&e))
    }

    /// Non-blocking: kicks off the OS `connect(2)`/WinSock equivalent and
    /// waits for write-readiness (or an error) to learn the outcome, since
    /// a readiness reactor has no other way to observe connect completion.
    pub fn connect(
        &mut self,
        addr: SocketAddr,
        on_connect: Box<dyn FnOnce(Result<()>)>,
    ) -> Result<()> {
        if self.inner.borrow().state != ConnState::Open {
            return Err(Error::State);
        }

        let (std_stream, in_progress) =
            crate::sys::tcp_connect_nonblocking(addr).map_err(|e| Error::from_io_error(&e))?;

        if !in_progress {
            self.inner.borrow_mut().std = Some(std_stream);
            self.inner.borrow_mut().state = ConnState::Connected;
            debug!("tcp connected to {addr} (immediate)");
            on_connect(Ok(()));
            return Ok(());
        }

        self.inner.borrow_mut().std = Some(std_stream);
        self.inner.borrow_mut().state = ConnState::Connecting;
        self.inner.borrow_mut().on_connect = Some(on_connect);
        self.register_dispatcher(Interest::writable())?;
        Ok(())
    }

    /// Installs the single readiness dispatcher for this connection's fd,
    /// a no-op if one is already registered. The same callback serves the
    /// deferred-connect completion path and the read/write pump: it checks
    /// `ConnInner::state` on every delivery rather than capturing a fixed
    /// phase, so a connection whose fd was registered while `Connecting`
    /// keeps dispatching correctly once it reaches `Connected`.
    fn register_dispatcher(&self, interest: Interest) -> Result<()> {
        if self.inner.borrow().slot.is_some() {
            return Ok(());
        }
        let handle = {
            let inner = self.inner.borrow();
            let std_stream = inner.std.as_ref().ok_or(Error::State)?;
            raw_handle(std_stream)
        };
        let strong = self.loop_ref.upgrade().ok_or(Error::State)?;
        let inner_weak = Rc::downgrade(&self.inner);
        let callback = Box::new(move |outcome: IoOutcome| {
            let inner = match inner_weak.upgrade() {
                Some(i) => i,
                None => return,
            };
            if inner.borrow().state == ConnState::Connecting {
                dispatch_connect(&inner, outcome);
                return;
            }
            match outcome {
                IoOutcome::Canceled => fail_pending(&inner, Error::Canceled),
                IoOutcome::Ready(readiness) => {
                    if readiness.readable {
                        drive_read(&inner);
                    }
                    if readiness.writable {
                        drive_write(&inner);
                    }
                }
            }
        });
        let slot = strong.borrow_mut().register_io(handle, interest, callback)?;
        let mut inner = self.inner.borrow_mut();
        inner.slot = Some(slot);
        inner.interest = interest;
        Ok(())
    }

    fn sync_interest(&self) -> Result<()> {
        let (slot, wanted) = {
            let inner = self.inner.borrow();
            let wanted = if !inner.write_queue.is_empty() {
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
}

fn socket_error(inner: &Rc<RefCell<ConnInner>>) -> Error {
    socket_error_checked(inner).err().unwrap_or(Error::Io)
}

/// Reads `SO_ERROR` off a connecting socket the way a proactor-over-
/// reactor connect completion must: write-readiness alone doesn't
/// distinguish "connected" from "connect failed", only `getsockopt`
/// does.
fn socket_error_checked(inner: &Rc<RefCell<ConnInner>>) -> Result<()> {
    let borrowed = inner.borrow();
    let std_stream = match borrowed.std.as_ref() {
        Some(s) => s,
        None => return Err(Error::State),
    };
    match std_stream.take_error() {
        Ok(None) => Ok(()),
        Ok(Some(e)) => Err(Error::from_io_error(&e)),
        Err(e) => Err(Error::from_io_error(&e)),
    }
}

/// Resolves a deferred connect from a readiness delivery made while the
/// connection is still `Connecting`. Takes `on_connect` out for the
/// duration of the check and puts it back if write-readiness hasn't
/// arrived yet, the same take-then-restore shape as `invoke_on_read`.
fn dispatch_connect(inner: &Rc<RefCell<ConnInner>>, outcome: IoOutcome) {
    let cb = match inner.borrow_mut().on_connect.take() {
        Some(cb) => cb,
        None => return,
    };
    match outcome {
        IoOutcome::Canceled => {
            inner.borrow_mut().state = ConnState::Closed;
            cb(Err(Error::Canceled));
        }
        IoOutcome::Ready(readiness) => {
            if readiness.error {
                inner.borrow_mut().state = ConnState::Closed;
                cb(Err(socket_error(inner)));
                return;
            }
            if !readiness.writable {
                inner.borrow_mut().on_connect = Some(cb);
                return;
            }
            match socket_error_checked(inner) {
                Ok(()) => {
                    inner.borrow_mut().state = ConnState::Connected;
                    debug!("tcp connect completed");
                    cb(Ok(()));
                }
                Err(e) => {
                    inner.borrow_mut().state = ConnState::Closed;
                    cb(Err(e));
                }
            }
        }
    }
}

/// Invokes `on_read` with the `RefCell` released, so a callback that
/// re-enters this same connection (the canonical echo case: read then
/// write from inside `on_read`) doesn't double-borrow `inner`. Mirrors
/// [`crate::event_loop::LoopInner::take_io_callback`]/`restore_io_callback`:
/// the callback is taken out, invoked, and put back only if the callback
/// itself didn't already replace or clear it (`read_stop`/`read_start`).
fn invoke_on_read(inner: &Rc<RefCell<ConnInner>>, res: Result<&[u8]>) {
    let taken = inner.borrow_mut().on_read.take();
    let mut cb = match taken {
        Some(cb) => cb,
        None => return,
    };
    cb(res);
    let mut borrowed = inner.borrow_mut();
    if borrowed.on_read.is_none() {
        borrowed.on_read = Some(cb);
    }
}

fn drive_read(inner: &Rc<RefCell<ConnInner>>) {
    let mut buf = [0u8; 8192];
    loop {
        let read_result = {
            let mut borrowed = inner.borrow_mut();
            if borrowed.on_read.is_none() {
                return;
            }
            match borrowed.std.as_mut() {
                Some(s) => s.read(&mut buf),
                None => return,
            }
        };
        match read_result {
            Ok(0) => {
                inner.borrow_mut().state = ConnState::Shutdown;
                invoke_on_read(inner, Err(Error::Eof));
                return;
            }
            Ok(n) => {
                let data = buf[..n].to_vec();
                invoke_on_read(inner, Ok(&data));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                let err = Error::from_io_error(&e);
                invoke_on_read(inner, Err(err));
                return;
            }
        }
    }
}

fn drive_write(inner: &Rc<RefCell<ConnInner>>) {
    loop {
        let write_result = {
            let borrowed = &mut *inner.borrow_mut();
            let front = match borrowed.write_queue.front_mut() {
                Some(f) => f,
                None => return,
            };
            let remaining = &front.buf[front.written..];
            let std_stream = match borrowed.std.as_mut() {
                Some(s) => s,
                None => return,
            };
            std_stream.write(remaining)
        };
        match write_result {
            Ok(0) => return,
            Ok(n) => {
                let mut borrowed = inner.borrow_mut();
                let done = {
                    let front = borrowed.write_queue.front_mut().expect("checked above");
                    front.written += n;
                    front.written >= front.buf.len()
                };
                if done {
                    let front = borrowed.write_queue.pop_front().expect("checked above");
                    drop(borrowed);
                    (front.on_write)(Ok(front.buf.len()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                let mut borrowed = inner.borrow_mut();
                let front = borrowed.write_queue.pop_front();
                drop(borrowed);
                let err = Error::from_io_error(&e);
                if let Some(front) = front {
                    (front.on_write)(Err(err));
                }
                return;
            }
        }
    }
}

fn fail_pending(inner: &Rc<RefCell<ConnInner>>, err: Error) {
    let mut borrowed = inner.borrow_mut();
    borrowed.state = ConnState::Closed;
    let on_read = borrowed.on_read.take();
    let queue = std::mem::take(&mut borrowed.write_queue);
    drop(borrowed);
    if let Some(mut cb) = on_read {
        cb(Err(err));
    }
    for pending in queue {
        (pending.on_write)(Err(err));
    }
}

impl Connection for TcpConnection {
    fn read_start(&mut self, on_read: Box<dyn FnMut(Result<&[u8]>)>) -> Result<()> {
        if !matches!(self.inner.borrow().state, ConnState::Connected | ConnState::Reading) {
            return Err(Error::State);
        }
        self.register_dispatcher(Interest::readable())?;
        self.inner.borrow_mut().on_read = Some(on_read);
        self.inner.borrow_mut().state = ConnState::Reading;
        self.sync_interest()?;
        drive_read(&self.inner);
        Ok(())
    }

    fn read_stop(&mut self) -> Result<()> {
        self.inner.borrow_mut().on_read = None;
        if self.inner.borrow().state == ConnState::Reading {
            self.inner.borrow_mut().state = ConnState::Connected;
        }
        self.sync_interest()
    }

    fn write(&mut self, buf: Vec<u8>, on_write: Box<dyn FnOnce(Result<usize>)>) -> Result<()> {
        if !matches!(
            self.inner.borrow().state,
            ConnState::Connected | ConnState::Reading
        ) {
            return Err(Error::State);
        }
        self.register_dispatcher(Interest::readable())?;
        self.inner
            .borrow_mut()
            .write_queue
            .push_back(PendingWrite { buf, written: 0, on_write });
        self.sync_interest()?;
        drive_write(&self.inner);
        self.sync_interest()
    }

    fn shutdown(&mut self, on_shutdown: Box<dyn FnOnce(Result<()>)>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let result = match inner.std.as_ref() {
            Some(s) => s
                .shutdown(std::net::Shutdown::Write)
                .map_err(|e| Error::from_io_error(&e)),
            None => Err(Error::State),
        };
        if result.is_ok() {
            inner.state = ConnState::Shutdown;
        }
        drop(inner);
        on_shutdown(result);
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(slot) = inner.slot.take() {
            if let Some(strong) = self.loop_ref.upgrade() {
                strong.borrow_mut().deregister_io(slot);
            }
        }
        inner.std = None;
        inner.on_read = None;
        inner.write_queue.clear();
        inner.state = ConnState::Closed;
        debug!("tcp connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_before_connect_is_state_invalid() {
        let loop_ = EventLoop::new().unwrap();
        let mut conn = TcpConnection::new(&loop_);
        assert_eq!(conn.state(), ConnState::Open);
        let result = conn.write(vec![1, 2, 3], Box::new(|_| {}));
        assert_eq!(result, Err(Error::State));
    }

    #[test]
    fn read_start_before_connect_is_state_invalid() {
        let loop_ = EventLoop::new().unwrap();
        let mut conn = TcpConnection::new(&loop_);
        let result = conn.read_start(Box::new(|_| {}));
        assert_eq!(result, Err(Error::State));
    }

    #[test]
    fn listener_close_before_listen_is_a_noop() {
        let loop_ = EventLoop::new().unwrap();
        let mut listener = TcpListener::new(&loop_);
        assert_eq!(listener.state(), ListenerState::Open);
        listener.close();
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    /// A connection that resolved via the deferred (`Connecting`) path
    /// must still dispatch reads afterward through the same registered
    /// slot, not a connect-only closure that goes dead once it has fired.
    #[test]
    fn read_after_deferred_connect_reuses_the_registered_slot() {
        use crate::interest::Readiness;
        use std::cell::Cell;

        let loop_ = EventLoop::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let conn = TcpConnection {
            loop_ref: loop_.weak(),
            inner: Rc::new(RefCell::new(ConnInner {
                state: ConnState::Connecting,
                std: Some(client),
                slot: None,
                interest: Interest::writable(),
                on_read: None,
                on_connect: None,
                write_queue: VecDeque::new(),
            })),
        };

        let connected = Rc::new(Cell::new(false));
        let connected2 = connected.clone();
        conn.inner.borrow_mut().on_connect = Some(Box::new(move |res| connected2.set(res.is_ok())));

        // Simulate the writable-readiness delivery a real backend would
        // make once the deferred connect resolves.
        dispatch_connect(
            &conn.inner,
            IoOutcome::Ready(Readiness { readable: false, writable: true, error: false }),
        );
        assert!(connected.get());
        assert_eq!(conn.inner.borrow().state, ConnState::Connected);

        server.write_all(b"hi").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let received = Rc::new(RefCell::new(Vec::new()));
        let received2 = received.clone();
        conn.inner.borrow_mut().on_read = Some(Box::new(move |res| {
            if let Ok(data) = res {
                received2.borrow_mut().extend_from_slice(data);
            }
        }));
        drive_read(&conn.inner);
        assert_eq!(*received.borrow(), b"hi");
    }
}
