//! Task: a one-shot, cancelable timer.
//!
//! A single absolute-deadline one-shot, with no repeat mode. Holds only a
//! [`Weak`] back-reference to the owning loop: once scheduled, the
//! callback itself is owned by the loop's slab, not by the `Task` handle —
//! the event control block is exclusively owned by the loop between
//! submission and completion.

use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, LoopInner};
use crate::time::Timestamp;
use log::trace;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Initial,
    Scheduled,
    Executed,
    Canceled,
}

pub struct Task {
    loop_ref: Weak<RefCell<LoopInner>>,
    state: Rc<RefCell<TaskState>>,
    slot: Option<usize>,
    /// Shared with the trampoline handed to the loop: taken out for the
    /// duration of the callback invocation and handed back immediately
    /// after, so the same callback is available again once the task
    /// reaches a terminal state and can be re-armed by another
    /// `schedule_at`.
    callback: Rc<RefCell<Option<Box<dyn FnMut(Result<()>)>>>>,
}

impl Task {
    /// `init(task, loop, callback, user_data)`. The Rust closure is the
    /// callback-plus-user_data pair, capturing whatever the caller needs.
    pub fn new(loop_: &EventLoop, callback: impl FnMut(Result<()>) + 'static) -> Task {
        Task {
            loop_ref: loop_.weak(),
            state: Rc::new(RefCell::new(TaskState::Initial)),
            slot: None,
            callback: Rc::new(RefCell::new(Some(Box::new(callback)))),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Requires Initial or a terminal state: Executed/Canceled may be
    /// rescheduled, and a fresh `schedule_at` call is exactly that
    /// re-arming, reusing the same callback supplied to [`Task::new`].
    /// Fails with state-invalid if already Scheduled.
    ///
    /// If `baseline <= now`, the task still fires on the *next* iteration,
    /// never inline: scheduling only ever inserts into the timer heap
    /// drained by [`LoopInner`] at the top of an iteration, so a
    /// same-thread `schedule_at` can never itself invoke the callback.
    pub fn schedule_at(&mut self, baseline: Timestamp) -> Result<()> {
        if *self.state.borrow() == TaskState::Scheduled {
            return Err(Error::State);
        }
        let strong = self.loop_ref.upgrade().ok_or(Error::State)?;

        let state_for_trampoline = self.state.clone();
        let callback_for_trampoline = self.callback.clone();
        let trampoline = move |res: Result<()>| {
            *state_for_trampoline.borrow_mut() = match &res {
                Ok(()) => TaskState::Executed,
                Err(_) => TaskState::Canceled,
            };
            let mut cb = match callback_for_trampoline.borrow_mut().take() {
                Some(cb) => cb,
                None => return,
            };
            cb(res);
            *callback_for_trampoline.borrow_mut() = Some(cb);
        };

        let slot = strong.borrow_mut().schedule_task(baseline, Box::new(trampoline))?;
        trace!("task slot {slot} scheduled at {baseline:?}");
        self.slot = Some(slot);
        *self.state.borrow_mut() = TaskState::Scheduled;
        Ok(())
    }

    /// Best-effort backend cancel; deferred dispatch fires the callback
    /// with canceled on the next iteration.
    pub fn cancel(&mut self) -> Result<()> {
        if *self.state.borrow() != TaskState::Scheduled {
            return Ok(());
        }
        let strong = self.loop_ref.upgrade().ok_or(Error::State)?;
        let slot = self.slot.take().expect("Scheduled implies a slot");
        strong.borrow_mut().cancel_task(slot);
        trace!("task slot {slot} cancel requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn reschedule_after_executed_fires_again() {
        let loop_ = EventLoop::new().unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = fired.clone();
        let mut task = Task::new(&loop_, move |_| fired2.set(fired2.get() + 1));

        task.schedule_at(loop_.now()).unwrap();
        let deadline = loop_.now().add(std::time::Duration::from_millis(50)).unwrap();
        loop_.run_until(Some(deadline)).unwrap();
        assert_eq!(task.state(), TaskState::Executed);
        assert_eq!(fired.get(), 1);

        task.schedule_at(loop_.now()).unwrap();
        let deadline2 = loop_.now().add(std::time::Duration::from_millis(50)).unwrap();
        loop_.run_until(Some(deadline2)).unwrap();
        assert_eq!(task.state(), TaskState::Executed);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn schedule_while_scheduled_is_state_invalid() {
        let loop_ = EventLoop::new().unwrap();
        let mut task = Task::new(&loop_, |_| {});
        task.schedule_at(loop_.now().add(std::time::Duration::from_secs(1)).unwrap()).unwrap();
        let result = task.schedule_at(loop_.now());
        assert_eq!(result, Err(Error::State));
    }
}
