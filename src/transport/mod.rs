//! Transport pipeline: TCP/UDP connection, listener, and socket operations,
//! dispatched through trait objects so additional protocol layers can be
//! stacked above raw TCP.
//!
//! [`Connection`]/[`Listener`] are dynamic-dispatch interfaces: a
//! `Box<dyn Connection>` or `Box<dyn Listener>` carries its own state
//! closed over by the concrete implementor, in place of a C-style function
//! table plus opaque context pointer. [`tcp`] and [`udp`] provide the base
//! implementations, backed by the owning [`crate::event_loop::EventLoop`];
//! [`pipeline`] demonstrates stacking a layer on top of an arbitrary lower
//! `Box<dyn Connection>`/`Box<dyn Listener>`, the mechanism a TLS binding
//! would use.

pub mod pipeline;
pub mod tcp;
pub mod udp;

use crate::error::Result;

/// Interface for a stream connection: read-start, read-stop, write,
/// shutdown, close. `open`/`connect` are constructors on the concrete type
/// rather than trait methods, since a not-yet-connected `Box<dyn Connection>`
/// has nothing useful to dispatch through before a lower layer exists to
/// wrap.
pub trait Connection {
    /// Starts the read pump: `on_read` is invoked with `Ok(data)` for every
    /// chunk received, and exactly once with `Err(Error::Eof)` on orderly
    /// close, or `Err(_)` on any other failure, after which no further
    /// calls occur until [`Connection::read_start`] is called again.
    fn read_start(&mut self, on_read: Box<dyn FnMut(Result<&[u8]>)>) -> Result<()>;

    /// Stops the read pump. Idempotent.
    fn read_stop(&mut self) -> Result<()>;

    /// Queues `buf` for writing; `on_write` fires once the entire buffer
    /// has been accepted by the OS (not necessarily by the peer).
    fn write(&mut self, buf: Vec<u8>, on_write: Box<dyn FnOnce(Result<usize>)>) -> Result<()>;

    /// Half-closes the write side; `on_shutdown` fires once the shutdown
    /// syscall completes.
    fn shutdown(&mut self, on_shutdown: Box<dyn FnOnce(Result<()>)>) -> Result<()>;

    /// Tears the connection down immediately. Idempotent.
    fn close(&mut self);
}

/// Interface for a listening socket: open, listen, close. `listen` both
/// binds and starts accepting, and installs the accept callback in the
/// same call.
pub trait Listener {
    /// Binds to `addr`, begins listening with the given backlog, and
    /// installs `on_accept`, invoked once per incoming connection (or with
    /// `Err(_)` if accepting itself fails, which does not stop the
    /// listener).
    fn listen(
        &mut self,
        addr: std::net::SocketAddr,
        backlog: u32,
        on_accept: Box<dyn FnMut(Result<Box<dyn Connection>>)>,
    ) -> Result<()>;

    /// Tears the listener down immediately. Idempotent.
    fn close(&mut self);
}

/// The OS-native handle backing a std socket, extracted portably. Every
/// transport registers this with the loop's backend; see
/// [`crate::backend::RawHandle`].
#[cfg(unix)]
pub(crate) fn raw_handle<T: std::os::unix::io::AsRawFd>(sock: &T) -> crate::backend::RawHandle {
    sock.as_raw_fd()
}
#[cfg(windows)]
pub(crate) fn raw_handle<T: std::os::windows::io::AsRawSocket>(sock: &T) -> crate::backend::RawHandle {
    sock.as_raw_socket()
}
