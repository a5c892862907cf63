//! Event control block: what the loop keeps per outstanding operation.
//!
//! A completion callback plus whatever submission state the operation
//! needs is folded into a single boxed closure (anything the callback
//! needs beyond the outcome is simply captured by it) and an `EventBody`
//! variant — a registered I/O handle needs a raw handle and interest set,
//! a timer needs neither (this core composes the backend's wait timeout
//! against the next timer deadline instead of submitting a platform timer
//! object).
//!
//! Every [`EventBody`] lives in exactly one [`crate::mem::Slab`] slot,
//! owned by the [`crate::event_loop::EventLoop`] between submission and
//! completion.

use crate::backend::RawHandle;
use crate::error::Error;
use crate::interest::{Interest, Readiness};

/// A scheduled task's completion callback. Invoked with `Ok(())` on a
/// normal fire, `Err(Error::Canceled)` when cancelled or torn down.
pub(crate) type TaskCallback = Box<dyn FnMut(Result<(), Error>)>;

/// What an I/O registration's callback is told: either the backend observed
/// readiness, or the event is being cancelled (teardown, or an explicit
/// `cancel`).
///
/// Earlier revisions of this module handed the callback a `&mut LoopInner`
/// alongside readiness, on the theory that the handler would want to
/// perform its syscall and re-register right there. In practice the
/// dispatcher (see [`crate::event_loop::EventLoop::run_one_iteration`])
/// must invoke this callback with the loop's `RefCell` *not* borrowed —
/// transport read/write handlers routinely need to re-enter the loop (e.g.
/// an echo server's read callback calling `write`, which re-registers for
/// write-readiness) and a borrowed `&mut LoopInner` threaded through would
/// make that a double mutable borrow. Callbacks that need the loop instead
/// hold their own `Weak<RefCell<LoopInner>>` (the same back-pointer pattern
/// [`crate::task::Task`] and every [`crate::transport`] type already use)
/// and upgrade it on demand.
pub(crate) enum IoOutcome {
    Ready(Readiness),
    Canceled,
}

/// An I/O registration's readiness callback.
pub(crate) type IoCallback = Box<dyn FnMut(IoOutcome)>;

pub(crate) enum EventBody {
    Task(TaskCallback),
    Io {
        handle: RawHandle,
        interest: Interest,
        callback: IoCallback,
    },
}

impl EventBody {
    /// Invoked by [`crate::mem::Slab::term`]'s per-live-slot callback during
    /// loop teardown: every outstanding event fires its callback with
    /// canceled, regardless of kind.
    pub(crate) fn cancel(mut self) {
        match &mut self {
            EventBody::Task(cb) => cb(Err(Error::Canceled)),
            EventBody::Io { callback, .. } => callback(IoOutcome::Canceled),
        }
    }
}
