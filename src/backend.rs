//! Uniform platform backend contract.
//!
//! Exactly one backend is compiled in, selected entirely by `cfg` on the
//! target OS: [`crate::sys::epoll`] on Linux/Android (no io_uring binding
//! is available, so epoll stands in for it there), [`crate::sys::kqueue`]
//! on the BSDs/macOS/iOS, and [`crate::sys::iocp`] on Windows. There is no
//! runtime dispatch between them: `crate::sys::Backend` is a `cfg`-selected
//! concrete type alias.
//!
//! epoll and kqueue are readiness reactors, not operation-submission
//! proactors: "submitting an operation" there means registering interest
//! in a file descriptor and performing the actual read/write/accept once
//! the backend reports it ready. This trait's `register`/`reregister`/
//! `deregister` are that reactor-shaped vocabulary; [`crate::event_loop::
//! EventLoop`] and the transports in [`crate::transport`] are what turn
//! readiness into one-shot "submit, then complete" operations. `term` is
//! realized as `Drop` — closing the backend's descriptor drains whatever
//! was still outstanding.

use crate::error::Result;
use crate::interest::{Interest, Readiness};
use crate::token::Token;
use std::time::Duration;

/// A readiness or completion event reported by [`Backend::poll`].
#[derive(Debug, Clone, Copy)]
pub struct BackendEvent {
    pub token: Token,
    pub readiness: Readiness,
}

/// The uniform backend contract. Implemented exactly once per target by
/// whichever of [`crate::sys::epoll`]/[`crate::sys::kqueue`]/
/// [`crate::sys::iocp`] is compiled in.
pub trait Backend: Sized {
    /// `init`: opens the completion port / kqueue / epoll instance.
    fn init() -> Result<Self>;

    /// `submit` (registration half): begin watching `handle` for
    /// `interest`, reporting readiness under `token`.
    fn register(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()>;

    /// Changes the interest set for an already-registered handle.
    fn reregister(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()>;

    /// `cancel` (best-effort): stop watching `handle`. Never fails loudly —
    /// a handle that was already closed out from under the backend is not
    /// an error worth latching.
    fn deregister(&mut self, handle: RawHandle);

    /// `run_until`: blocks until at least one registered handle is ready,
    /// the waker fires, or `timeout` elapses (`None` = wait indefinitely).
    /// Ready events are appended to `out`, which is cleared first.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> Result<()>;

    /// Wakes a concurrently blocked `poll` from any thread. Used by
    /// [`crate::event_loop::EventLoop::stop`]/`term` called from a signal
    /// handler or another thread holding only a raw OS handle; ordinary
    /// single-threaded cooperative callbacks never need this because they
    /// already run on the polling thread.
    fn wake(&self) -> Result<()>;
}

/// The OS-native resource handle a backend watches: a file descriptor on
/// Unix, a `SOCKET`/`HANDLE` on Windows.
#[cfg(unix)]
pub type RawHandle = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawSocket;
