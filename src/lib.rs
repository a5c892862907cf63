//! `evio`: a single-threaded, callback-oriented asynchronous I/O runtime
//! core.
//!
//! An [`event_loop::EventLoop`] drives exactly one platform backend —
//! epoll on Linux/Android (standing in for io_uring; see
//! `sys::unix::epoll`'s module docs), kqueue on the BSDs/macOS, IOCP on
//! Windows — and dispatches completions to user callbacks. On top of the
//! loop sit two kinds of user-facing primitive: a one-shot cancelable
//! [`task::Task`] timer, and the [`transport`] module's TCP/UDP connection,
//! listener, and socket types, which can be stacked into pipelines (e.g. a
//! TLS layer over raw TCP) via the [`transport::Connection`]/
//! [`transport::Listener`] trait objects.
//!
//! The crate owns no allocator beyond the [`mem`] module's page/bump/slab
//! primitives, used internally to vend per-operation event control blocks
//! cheaply; it has no threading model of its own, and callers must not
//! share an `EventLoop` or anything built against one across threads.

mod backend;
mod error;
mod event;
pub mod event_loop;
mod interest;
pub mod json_number;
mod mem;
mod sys;
pub mod task;
pub mod time;
mod token;
pub mod transport;

pub use error::{Error, Result};
pub use event_loop::{EventLoop, LoopConfig, LoopState};
pub use task::{Task, TaskState};
pub use time::Timestamp;
