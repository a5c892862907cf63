//! Linux backend: epoll standing in for the unavailable io_uring binding.
//! `epoll_create1`/`epoll_wait`/`epoll_ctl` via the `syscall!` macro.

use super::{syscall, EventFdWaker};
use crate::backend::{BackendEvent, RawHandle};
use crate::error::{Error, Result};
use crate::interest::{Interest, Readiness};
use crate::token::Token;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::time::Duration;

const WAKE_TOKEN: u64 = u64::MAX;

pub struct Backend {
    ep: OwnedFd,
    waker: EventFdWaker,
    events: Vec<libc::epoll_event>,
}

impl Backend {
    fn ctl(&self, op: libc::c_int, fd: RawHandle, event: Option<&mut libc::epoll_event>) -> Result<()> {
        let ptr = event
            .map(|e| e as *mut libc::epoll_event)
            .unwrap_or(std::ptr::null_mut());
        syscall!(epoll_ctl(self.ep.as_raw_fd(), op, fd, ptr)).map_err(|e| Error::from_io_error(&e))?;
        Ok(())
    }

    fn interest_bits(interest: Interest) -> u32 {
        let mut bits = 0u32;
        if interest.is_readable() {
            bits |= libc::EPOLLIN as u32;
        }
        if interest.is_writable() {
            bits |= libc::EPOLLOUT as u32;
        }
        bits
    }
}

impl crate::backend::Backend for Backend {
    fn init() -> Result<Backend> {
        use std::os::unix::io::FromRawFd;
        let raw = syscall!(epoll_create1(libc::EPOLL_CLOEXEC)).map_err(|e| Error::from_io_error(&e))?;
        let ep = unsafe { OwnedFd::from_raw_fd(raw) };
        let waker = EventFdWaker::new().map_err(|e| Error::from_io_error(&e))?;

        let backend = Backend {
            ep,
            waker,
            events: Vec::with_capacity(128),
        };

        let mut wake_event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        backend.ctl(libc::EPOLL_CTL_ADD, backend.waker.raw_fd(), Some(&mut wake_event))?;
        Ok(backend)
    }

    fn register(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()> {
        let mut event = libc::epoll_event {
            events: Backend::interest_bits(interest),
            u64: token.0 as u64,
        };
        self.ctl(libc::EPOLL_CTL_ADD, handle, Some(&mut event))
    }

    fn reregister(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()> {
        let mut event = libc::epoll_event {
            events: Backend::interest_bits(interest),
            u64: token.0 as u64,
        };
        self.ctl(libc::EPOLL_CTL_MOD, handle, Some(&mut event))
    }

    fn deregister(&mut self, handle: RawHandle) {
        let _ = self.ctl(libc::EPOLL_CTL_DEL, handle, None);
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> Result<()> {
        out.clear();
        if self.events.is_empty() {
            self.events.resize(128, libc::epoll_event { events: 0, u64: 0 });
        }
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
        };

        let n = loop {
            match syscall!(epoll_wait(
                self.ep.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_io_error(&e)),
            }
        };

        for raw in &self.events[..n as usize] {
            if raw.u64 == WAKE_TOKEN {
                self.waker.reset();
                continue;
            }
            let bits = raw.events;
            out.push(BackendEvent {
                token: Token(raw.u64 as usize),
                readiness: Readiness {
                    readable: bits & (libc::EPOLLIN as u32) != 0,
                    writable: bits & (libc::EPOLLOUT as u32) != 0,
                    error: bits & ((libc::EPOLLERR | libc::EPOLLHUP) as u32) != 0,
                },
            });
        }
        Ok(())
    }

    fn wake(&self) -> Result<()> {
        self.waker.wake().map_err(|e| Error::from_io_error(&e))
    }
}
