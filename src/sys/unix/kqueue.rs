//! BSD/macOS backend: kqueue.

use super::{syscall, PipeWaker};
use crate::backend::{BackendEvent, RawHandle};
use crate::error::{Error, Result};
use crate::interest::{Interest, Readiness};
use crate::token::Token;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::time::Duration;

const WAKE_IDENT: usize = usize::MAX;

pub struct Backend {
    kq: OwnedFd,
    waker: PipeWaker,
    changes: Vec<libc::kevent>,
    events: Vec<libc::kevent>,
}

fn kevent_blank() -> libc::kevent {
    libc::kevent {
        ident: 0,
        filter: 0,
        flags: 0,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    }
}

fn make_kevent(ident: usize, filter: i16, flags: u16, udata: usize) -> libc::kevent {
    libc::kevent {
        ident: ident as libc::uintptr_t,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: udata as *mut libc::c_void,
    }
}

impl crate::backend::Backend for Backend {
    fn init() -> Result<Backend> {
        use std::os::unix::io::FromRawFd;
        let raw = syscall!(kqueue()).map_err(|e| Error::from_io_error(&e))?;
        let kq = unsafe { OwnedFd::from_raw_fd(raw) };
        let waker = PipeWaker::new().map_err(|e| Error::from_io_error(&e))?;

        let mut backend = Backend {
            kq,
            waker,
            changes: Vec::new(),
            events: vec![kevent_blank(); 128],
        };
        let change = make_kevent(
            backend.waker.raw_fd() as usize,
            libc::EVFILT_READ,
            libc::EV_ADD | libc::EV_CLEAR,
            WAKE_IDENT,
        );
        backend.changes.push(change);
        backend.flush_changes()?;
        Ok(backend)
    }

    fn register(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()> {
        if interest.is_readable() {
            self.changes.push(make_kevent(
                handle as usize,
                libc::EVFILT_READ,
                libc::EV_ADD,
                token.0,
            ));
        }
        if interest.is_writable() {
            self.changes.push(make_kevent(
                handle as usize,
                libc::EVFILT_WRITE,
                libc::EV_ADD,
                token.0,
            ));
        }
        self.flush_changes()
    }

    fn reregister(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()> {
        self.deregister(handle);
        self.register(handle, token, interest)
    }

    fn deregister(&mut self, handle: RawHandle) {
        self.changes.push(make_kevent(handle as usize, libc::EVFILT_READ, libc::EV_DELETE, 0));
        self.changes.push(make_kevent(handle as usize, libc::EVFILT_WRITE, libc::EV_DELETE, 0));
        // Best effort: one of the two filters was likely never registered,
        // which kqueue reports as ENOENT. Ignore failures entirely here.
        let _ = self.flush_changes();
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> Result<()> {
        out.clear();
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const libc::timespec).unwrap_or(std::ptr::null());

        let n = loop {
            match syscall!(kevent(
                self.kq.as_raw_fd(),
                std::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                ts_ptr,
            )) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_io_error(&e)),
            }
        };

        for ev in &self.events[..n as usize] {
            let udata = ev.udata as usize;
            if udata == WAKE_IDENT {
                self.waker.reset();
                continue;
            }
            let mut readiness = out
                .iter_mut()
                .find(|e: &&mut BackendEvent| e.token == Token(udata))
                .map(|e| &mut e.readiness);
            if readiness.is_none() {
                out.push(BackendEvent { token: Token(udata), readiness: Readiness::default() });
                readiness = out.last_mut().map(|e| &mut e.readiness);
            }
            let readiness = readiness.expect("just pushed if absent");
            match ev.filter {
                libc::EVFILT_READ => readiness.readable = true,
                libc::EVFILT_WRITE => readiness.writable = true,
                _ => {}
            }
            if ev.flags & libc::EV_EOF != 0 || ev.flags & libc::EV_ERROR != 0 {
                readiness.error = true;
            }
        }
        Ok(())
    }

    fn wake(&self) -> Result<()> {
        self.waker.wake().map_err(|e| Error::from_io_error(&e))
    }
}

impl Backend {
    fn flush_changes(&mut self) -> Result<()> {
        if self.changes.is_empty() {
            return Ok(());
        }
        syscall!(kevent(
            self.kq.as_raw_fd(),
            self.changes.as_ptr(),
            self.changes.len() as i32,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        ))
        .map_err(|e| Error::from_io_error(&e))?;
        self.changes.clear();
        Ok(())
    }
}
