//! The Loop: lifecycle state machine, event allocator, backend poll driver,
//! pending-error latch.
//!
//! `Task`/`Transport` hold only a [`std::rc::Weak`] back-reference to the
//! shared [`LoopInner`], never an owning one; `Rc<RefCell<_>>` is this
//! crate's safe-Rust rendering of an arena-plus-index back-pointer, valid
//! since every access happens from the single thread driving `run_until`.

use crate::backend::{Backend as _, BackendEvent};
use crate::error::{Error, Result};
use crate::event::{EventBody, IoCallback, IoOutcome, TaskCallback};
use crate::interest::Interest;
use crate::mem::Slab;
use crate::time::Timestamp;
use log::{debug, trace};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initial,
    Running,
    Stopping,
    Stopped,
    Terminating,
    Terminated,
}

/// Construction-time knobs. Always explicit: no config files, no
/// environment variables.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Slots per slab bank.
    pub slab_bank_slots: usize,
}

impl Default for LoopConfig {
    fn default() -> LoopConfig {
        LoopConfig { slab_bank_slots: 32 }
    }
}

struct TimerKey {
    deadline: Timestamp,
    seq: u64,
    slot: usize,
}

impl PartialEq for TimerKey {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerKey {}
impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// The Loop's private state. Shared via `Rc<RefCell<_>>` between
/// [`EventLoop`] and every [`crate::task::Task`]/transport constructed
/// against it.
pub struct LoopInner {
    state: LoopState,
    now: Timestamp,
    slab: Slab<EventBody>,
    backend: crate::sys::Backend,
    pending_err: Option<Error>,
    // Min-heap by (deadline, submission order): tasks fire in ascending
    // absolute-deadline order, ties broken by submission order.
    timers: BinaryHeap<Reverse<TimerKey>>,
    next_seq: u64,
    // Cancelled slots awaiting dispatch on the *next* iteration: cancellation
    // never fires the callback inline.
    canceled_queue: Vec<usize>,
    stop_requested: bool,
    term_requested: bool,
}

impl LoopInner {
    fn new(config: LoopConfig) -> Result<LoopInner> {
        let backend = crate::sys::Backend::init()?;
        debug!("loop initialized, slab_bank_slots={}", config.slab_bank_slots);
        Ok(LoopInner {
            state: LoopState::Initial,
            now: Timestamp::now(),
            slab: Slab::with_bank_slots(config.slab_bank_slots),
            backend,
            pending_err: None,
            timers: BinaryHeap::new(),
            next_seq: 0,
            canceled_queue: Vec::new(),
            stop_requested: false,
            term_requested: false,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Refuses allocation once the loop is in or past Terminating.
    pub(crate) fn event_alloc(&mut self, body: EventBody) -> Result<usize> {
        if matches!(self.state, LoopState::Terminating | LoopState::Terminated) {
            return Err(Error::State);
        }
        Ok(self.slab.alloc(body))
    }

    pub(crate) fn event_dealloc(&mut self, slot: usize) -> EventBody {
        self.slab.free(slot)
    }

    /// `pending_err_set`: succeeds unless a different error is already
    /// latched.
    pub(crate) fn pending_err_set(&mut self, err: Error) {
        if self.pending_err.is_none() {
            self.pending_err = Some(err);
        }
    }

    /// `pending_err_take`: clears on read.
    pub fn pending_err_take(&mut self) -> Option<Error> {
        self.pending_err.take()
    }

    pub(crate) fn schedule_task(
        &mut self,
        deadline: Timestamp,
        callback: TaskCallback,
    ) -> Result<usize> {
        let slot = self.event_alloc(EventBody::Task(callback))?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Reverse(TimerKey { deadline, seq, slot }));
        Ok(slot)
    }

    /// Cancels a scheduled task, best-effort: removes it from the timer
    /// heap (a cancelled entry left in the heap is skipped lazily at fire
    /// time, see [`LoopInner::drain_due_timers`]) and queues its callback
    /// for deferred canceled dispatch.
    pub(crate) fn cancel_task(&mut self, slot: usize) {
        trace!("task slot {slot} queued for cancel");
        self.canceled_queue.push(slot);
    }

    pub(crate) fn register_io(
        &mut self,
        handle: crate::backend::RawHandle,
        interest: Interest,
        callback: IoCallback,
    ) -> Result<usize> {
        let slot = self.event_alloc(EventBody::Io { handle, interest, callback })?;
        self.backend.register(handle, crate::token::Token(slot), interest)?;
        trace!("registered io slot {slot} interest={interest:?}");
        Ok(slot)
    }

    pub(crate) fn reregister_io(&mut self, slot: usize, interest: Interest) -> Result<()> {
        if let Some(EventBody::Io { handle, interest: cur, .. }) = self.slab.get_mut(slot) {
            *cur = interest;
            let handle = *handle;
            self.backend.reregister(handle, crate::token::Token(slot), interest)?;
            trace!("reregistered io slot {slot} interest={interest:?}");
        }
        Ok(())
    }

    pub(crate) fn deregister_io(&mut self, slot: usize) {
        if let Some(EventBody::Io { handle, .. }) = self.slab.get(slot) {
            self.backend.deregister(*handle);
        }
        let _ = self.slab.free(slot);
        trace!("deregistered io slot {slot}");
    }

    /// Takes every queued-canceled slot out of the slab and returns its
    /// body, without invoking anything — see [`EventLoop::run_one_iteration`]
    /// for why cancellation bodies are fired only once the loop's
    /// `RefCell` is no longer borrowed.
    fn take_canceled(&mut self) -> Vec<EventBody> {
        let slots = std::mem::take(&mut self.canceled_queue);
        let mut bodies = Vec::with_capacity(slots.len());
        for slot in slots {
            if self.slab.get(slot).is_some() {
                bodies.push(self.slab.free(slot));
            }
        }
        bodies
    }

    /// Removes every timer whose deadline is `<= now` and returns its
    /// callback, without invoking it. A slot already consumed by
    /// [`LoopInner::cancel_task`] (freed, and therefore absent from the
    /// slab) is skipped rather than double-freed — this is the
    /// lazy-deletion half of cancellation.
    fn take_due_tasks(&mut self) -> Vec<TaskCallback> {
        let mut out = Vec::new();
        loop {
            let due = match self.timers.peek() {
                Some(Reverse(key)) if key.deadline <= self.now => true,
                _ => false,
            };
            if !due {
                break;
            }
            let Reverse(key) = self.timers.pop().expect("peeked Some above");
            if self.slab.get(key.slot).is_none() {
                continue; // cancelled before firing
            }
            if let EventBody::Task(cb) = self.slab.free(key.slot) {
                out.push(cb);
            }
        }
        out
    }

    fn next_timer_deadline(&self) -> Option<Timestamp> {
        self.timers.peek().map(|Reverse(key)| key.deadline)
    }

    /// Temporarily removes a registered I/O slot's callback so it can be
    /// invoked without the slab (and therefore the loop) borrowed.
    fn take_io_callback(&mut self, slot: usize) -> Option<IoCallback> {
        match self.slab.get_mut(slot) {
            Some(EventBody::Io { callback, .. }) => {
                Some(std::mem::replace(callback, Box::new(|_: IoOutcome| {})))
            }
            _ => None,
        }
    }

    /// Puts a callback taken by [`LoopInner::take_io_callback`] back. A
    /// missing or no-longer-`Io` slot (closed, or its index reused by a
    /// fresh registration while the callback ran) silently drops it — the
    /// handle is gone either way.
    fn restore_io_callback(&mut self, slot: usize, callback: IoCallback) {
        if let Some(EventBody::Io { callback: slot_cb, .. }) = self.slab.get_mut(slot) {
            *slot_cb = callback;
        }
    }

    /// Prepares one loop iteration: refreshes `now`, waits on the backend
    /// for at most `min(user deadline, next timer deadline)`, and hands
    /// back everything that needs dispatching — without dispatching any of
    /// it, so the caller can do so with this `LoopInner` no longer
    /// borrowed.
    fn prepare_iteration(&mut self, user_deadline: Option<Timestamp>) -> IterationWork {
        self.now = Timestamp::now();
        let mut canceled = self.take_canceled();

        let timer_deadline = self.next_timer_deadline();
        let wait_deadline = match (user_deadline, timer_deadline) {
            (Some(a), Some(b)) => Some(if a < b { a } else { b }),
            (a, None) => a,
            (None, b) => b,
        };
        let timeout = wait_deadline.map(|d| d.saturating_duration_since(self.now));

        let mut backend_events = Vec::new();
        if let Err(err) = self.backend.poll(timeout, &mut backend_events) {
            self.pending_err_set(err);
        }

        self.now = Timestamp::now();
        let due_tasks = self.take_due_tasks();
        canceled.extend(self.take_canceled());

        IterationWork { canceled, due_tasks, backend_events }
    }

    /// Tears the loop down: every still-occupied slab slot (task or I/O)
    /// is recovered and its body returned for the caller to cancel once
    /// this `LoopInner` is no longer borrowed.
    fn teardown_take(&mut self) -> Vec<EventBody> {
        let mut bodies = self.take_canceled();
        self.slab.term(Some(|body: EventBody| bodies.push(body)));
        self.timers.clear();
        self.state = LoopState::Terminated;
        debug!("loop terminated, {} outstanding event(s) cancelled", bodies.len());
        bodies
    }
}

/// Everything one [`LoopInner::prepare_iteration`] call collected, still
/// undispatched.
struct IterationWork {
    canceled: Vec<EventBody>,
    due_tasks: Vec<TaskCallback>,
    backend_events: Vec<BackendEvent>,
}

/// The runtime instance. Cheaply cloneable — every clone shares
/// the same underlying state, the way a single-threaded cooperative runtime
/// is typically handed around inside its own callbacks.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<LoopInner>>,
}

impl EventLoop {
    pub fn new() -> Result<EventLoop> {
        EventLoop::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Result<EventLoop> {
        Ok(EventLoop { inner: Rc::new(RefCell::new(LoopInner::new(config)?)) })
    }

    pub(crate) fn weak(&self) -> Weak<RefCell<LoopInner>> {
        Rc::downgrade(&self.inner)
    }

    pub fn state(&self) -> LoopState {
        self.inner.borrow().state()
    }

    pub fn now(&self) -> Timestamp {
        self.inner.borrow().now()
    }

    pub fn pending_err_take(&self) -> Option<Error> {
        self.inner.borrow_mut().pending_err_take()
    }

    /// Runs one iteration's worth of work — collecting it with the loop's
    /// `RefCell` borrowed, then dispatching every callback with it
    /// released.
    ///
    /// This split exists because a transport or task callback routinely
    /// needs to call back into the loop (an echo handler's `on_read`
    /// calling `write`, which re-registers write-readiness; a timeout
    /// callback calling `stop`). Every such call goes through
    /// `Weak<RefCell<LoopInner>>::upgrade().borrow_mut()` from inside
    /// [`crate::task::Task`] and [`crate::transport`], so if this method
    /// held its own `borrow_mut` across the callback invocation, that
    /// would be a double mutable borrow and panic. See [`crate::event`]'s
    /// module doc for the same point from the callback-shape side.
    fn run_one_iteration(&self, deadline: Option<Timestamp>) {
        let work = {
            let mut inner = self.inner.borrow_mut();
            inner.prepare_iteration(deadline)
        };
        trace!(
            "iteration: {} backend event(s), {} due task(s), {} cancellation(s)",
            work.backend_events.len(),
            work.due_tasks.len(),
            work.canceled.len(),
        );

        for body in work.canceled {
            body.cancel();
        }
        for mut cb in work.due_tasks {
            cb(Ok(()));
        }
        for ev in work.backend_events {
            let taken = {
                let mut inner = self.inner.borrow_mut();
                inner.take_io_callback(ev.token.0)
            };
            if let Some(mut callback) = taken {
                callback(IoOutcome::Ready(ev.readiness));
                let mut inner = self.inner.borrow_mut();
                inner.restore_io_callback(ev.token.0, callback);
            }
        }

        // A callback just run above may itself have cancelled something
        // (e.g. a connection closing another it owns) — pick that up now
        // rather than leaving it for next iteration's `prepare_iteration`.
        let trailing = self.inner.borrow_mut().take_canceled();
        for body in trailing {
            body.cancel();
        }
    }

    /// Runs the loop until `deadline`, or indefinitely if `None`. Requires
    /// state ∈ {Initial, Stopped}.
    pub fn run_until(&self, deadline: Option<Timestamp>) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, LoopState::Initial | LoopState::Stopped) {
                return Err(Error::State);
            }
            inner.state = LoopState::Running;
            inner.stop_requested = false;
        }

        loop {
            self.run_one_iteration(deadline);

            let mut inner = self.inner.borrow_mut();
            if inner.term_requested {
                inner.state = LoopState::Terminating;
                let bodies = inner.teardown_take();
                drop(inner);
                for body in bodies {
                    body.cancel();
                }
                let mut inner = self.inner.borrow_mut();
                return match inner.pending_err_take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            if inner.stop_requested {
                inner.state = LoopState::Stopped;
                return match inner.pending_err_take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            let past_deadline = match deadline {
                Some(d) => inner.now >= d,
                None => false,
            };
            if past_deadline {
                inner.state = LoopState::Stopped;
                return match inner.pending_err_take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            if !matches!(inner.state, LoopState::Running) {
                return match inner.pending_err_take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
        }
    }

    /// Requests a transition to Stopped. Takes effect once the current
    /// iteration ends (`Running --stop requested--> Stopping
    /// --iteration ends--> Stopped`). May be called from within a callback.
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == LoopState::Running {
            inner.state = LoopState::Stopping;
        }
        inner.stop_requested = true;
        trace!("stop requested");
    }

    /// Requests termination. The state value moves to `Terminating`
    /// synchronously in both cases, mirroring `stop()`'s immediate
    /// `Running --> Stopping` move; only the teardown work (canceling the
    /// slab's remaining bodies) differs by timing: `Initial --term-->
    /// Terminating` runs it immediately (there is no iteration in flight
    /// to wait out), while `Running --term--> Terminating` defers it to
    /// iteration end, same as `stop()` defers `Stopping --> Stopped`.
    pub fn term(&self) -> Result<()> {
        let bodies = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                LoopState::Initial | LoopState::Stopped | LoopState::Stopping => {
                    inner.state = LoopState::Terminating;
                    Some(inner.teardown_take())
                }
                LoopState::Running => {
                    inner.state = LoopState::Terminating;
                    inner.term_requested = true;
                    None
                }
                LoopState::Terminating | LoopState::Terminated => None,
            }
        };
        if let Some(bodies) = bodies {
            for body in bodies {
                body.cancel();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn timer_fires_once_then_stops() {
        let loop_ = EventLoop::new().unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let seen_err = Rc::new(Cell::new(None));
        let fired2 = fired.clone();
        let seen_err2 = seen_err.clone();
        let mut task = Task::new(&loop_, move |res| {
            fired2.set(fired2.get() + 1);
            seen_err2.set(res.err());
        });
        task.schedule_at(loop_.now().add(Duration::from_millis(10)).unwrap()).unwrap();

        let deadline = loop_.now().add(Duration::from_millis(200)).unwrap();
        loop_.run_until(Some(deadline)).unwrap();

        assert_eq!(fired.get(), 1);
        assert_eq!(seen_err.get(), None);
        assert_eq!(loop_.state(), LoopState::Stopped);
    }

    #[test]
    fn term_cancels_scheduled_task() {
        let loop_ = EventLoop::new().unwrap();
        let seen_err = Rc::new(Cell::new(None));
        let seen_err2 = seen_err.clone();
        let mut task = Task::new(&loop_, move |res| {
            seen_err2.set(res.err());
        });
        task.schedule_at(loop_.now().add(Duration::from_secs(1)).unwrap()).unwrap();

        let deadline = loop_.now().add(Duration::from_millis(1)).unwrap();
        loop_.run_until(Some(deadline)).unwrap();
        loop_.term().unwrap();

        assert_eq!(seen_err.get(), Some(Error::Canceled));
        assert_eq!(loop_.state(), LoopState::Terminated);
    }

    #[test]
    fn double_run_until_from_stopped_is_allowed() {
        let loop_ = EventLoop::new().unwrap();
        let deadline = loop_.now().add(Duration::from_millis(1)).unwrap();
        loop_.run_until(Some(deadline)).unwrap();
        assert_eq!(loop_.state(), LoopState::Stopped);
        let deadline2 = loop_.now().add(Duration::from_millis(1)).unwrap();
        loop_.run_until(Some(deadline2)).unwrap();
        assert_eq!(loop_.state(), LoopState::Stopped);
    }

    #[test]
    fn run_until_from_running_is_rejected() {
        let loop_ = EventLoop::new().unwrap();
        let inner = loop_.inner.clone();
        inner.borrow_mut().state = LoopState::Running;
        assert_eq!(loop_.run_until(None), Err(Error::State));
    }

    /// `term()` called while Running moves `state()` to Terminating
    /// synchronously, the same way `stop()` moves it to Stopping — only
    /// the teardown work is deferred to the next iteration boundary.
    #[test]
    fn term_from_running_is_synchronous() {
        let loop_ = EventLoop::new().unwrap();
        loop_.inner.borrow_mut().state = LoopState::Running;
        loop_.term().unwrap();
        assert_eq!(loop_.state(), LoopState::Terminating);
    }

    /// A pending error is latched (first one sticks, later ones don't
    /// overwrite it), surfaces from `run_until`, and clears on read.
    #[test]
    fn pending_error_latches_first_and_clears_on_take() {
        let loop_ = EventLoop::new().unwrap();
        {
            let mut inner = loop_.inner.borrow_mut();
            inner.pending_err_set(Error::AddrInUse);
            inner.pending_err_set(Error::Io);
        }
        assert_eq!(loop_.inner.borrow_mut().pending_err_take(), Some(Error::AddrInUse));
        assert_eq!(loop_.inner.borrow_mut().pending_err_take(), None);
    }

    #[test]
    fn pending_error_surfaces_from_run_until() {
        let loop_ = EventLoop::new().unwrap();
        loop_.inner.borrow_mut().pending_err_set(Error::Dep);
        let deadline = loop_.now().add(Duration::from_millis(1)).unwrap();
        assert_eq!(loop_.run_until(Some(deadline)), Err(Error::Dep));
        assert_eq!(loop_.state(), LoopState::Stopped);
    }
}
