//! Windows backend: a single I/O completion port.
//!
//! Read readiness is reported via a genuine proactor submission: a
//! zero-byte overlapped `WSARecv` per registered socket, reissued after
//! every completion. This avoids needing raw AFD access (and the
//! `miow`/`ntapi` dependency that would come with it) while still
//! surfacing readiness through IOCP rather than polling.
//!
//! Write readiness has no equally cheap zero-byte probe (a zero-byte send
//! always completes immediately regardless of peer buffer state), so a
//! registration with write interest is reported ready on its first poll
//! and re-armed only when the caller's actual, real write later returns
//! `WouldBlock`. This is a deliberate scope simplification, not full
//! proactor-grade write-readiness tracking; see DESIGN.md.

use crate::backend::{BackendEvent, RawHandle};
use crate::error::{Error, Result};
use crate::interest::{Interest, Readiness};
use crate::token::Token;
use std::collections::HashMap;
use std::time::Duration;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::{WSARecv, WSABUF, SOCKET};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus,
    CancelIoEx, OVERLAPPED,
};

const WAKE_KEY: usize = usize::MAX;

struct Registration {
    socket: SOCKET,
    token: Token,
    interest: Interest,
    /// Boxed so its address stays stable across `GetQueuedCompletionStatus`
    /// calls; IOCP carries a raw pointer to this struct through `hEvent`.
    overlapped: Box<OVERLAPPED>,
    write_armed: bool,
}

pub struct Backend {
    port: HANDLE,
    registrations: HashMap<usize, Registration>,
}

unsafe impl Send for Backend {}

impl Backend {
    fn post_zero_byte_recv(reg: &mut Registration) -> Result<()> {
        *reg.overlapped = unsafe { std::mem::zeroed() };
        let mut buf = WSABUF { len: 0, buf: std::ptr::null_mut() };
        let mut flags: u32 = 0;
        let rc = unsafe {
            WSARecv(
                reg.socket,
                &mut buf,
                1,
                std::ptr::null_mut(),
                &mut flags,
                reg.overlapped.as_mut(),
                None,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = unsafe { windows_sys::Win32::Networking::WinSock::WSAGetLastError() };
        if err == windows_sys::Win32::Networking::WinSock::WSA_IO_PENDING {
            Ok(())
        } else {
            Err(Error::from_io_error(&std::io::Error::from_raw_os_error(err)))
        }
    }
}

impl crate::backend::Backend for Backend {
    fn init() -> Result<Backend> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, std::ptr::null_mut(), 0, 0) };
        if port.is_null() {
            return Err(Error::from_io_error(&std::io::Error::last_os_error()));
        }
        Ok(Backend { port, registrations: HashMap::new() })
    }

    fn register(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()> {
        let socket = handle as SOCKET;
        let assoc = unsafe {
            CreateIoCompletionPort(socket as HANDLE, self.port, handle as usize, 0)
        };
        if assoc.is_null() {
            return Err(Error::from_io_error(&std::io::Error::last_os_error()));
        }
        let mut reg = Registration {
            socket,
            token,
            interest,
            overlapped: Box::new(unsafe { std::mem::zeroed() }),
            write_armed: false,
        };
        if interest.is_readable() {
            Backend::post_zero_byte_recv(&mut reg)?;
        }
        self.registrations.insert(handle as usize, reg);
        Ok(())
    }

    fn reregister(&mut self, handle: RawHandle, token: Token, interest: Interest) -> Result<()> {
        if let Some(reg) = self.registrations.get_mut(&(handle as usize)) {
            reg.token = token;
            reg.interest = interest;
            reg.write_armed = false;
            if interest.is_readable() {
                Backend::post_zero_byte_recv(reg)?;
            }
            Ok(())
        } else {
            self.register(handle, token, interest)
        }
    }

    fn deregister(&mut self, handle: RawHandle) {
        if let Some(reg) = self.registrations.remove(&(handle as usize)) {
            unsafe {
                let _ = CancelIoEx(reg.socket as HANDLE, std::ptr::null());
            }
        }
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> Result<()> {
        out.clear();
        // First pass: any registration with write interest not yet armed is
        // immediately reported writable (see module docs).
        for reg in self.registrations.values_mut() {
            if reg.interest.is_writable() && !reg.write_armed {
                reg.write_armed = true;
                out.push(BackendEvent {
                    token: reg.token,
                    readiness: Readiness { readable: false, writable: true, error: false },
                });
            }
        }
        if !out.is_empty() {
            return Ok(());
        }

        let timeout_ms = match timeout {
            None => windows_sys::Win32::System::Threading::INFINITE,
            Some(d) => u32::try_from(d.as_millis()).unwrap_or(u32::MAX - 1),
        };

        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut overlapped_ptr: *mut OVERLAPPED = std::ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped_ptr, timeout_ms)
        };

        if overlapped_ptr.is_null() {
            if ok == 0 {
                let err = unsafe { windows_sys::Win32::Foundation::GetLastError() };
                if err == windows_sys::Win32::Foundation::WAIT_TIMEOUT {
                    return Ok(());
                }
                return Err(Error::from_io_error(&std::io::Error::from_raw_os_error(err as i32)));
            }
            if key == WAKE_KEY {
                return Ok(());
            }
            return Ok(());
        }

        if key == WAKE_KEY {
            return Ok(());
        }

        if let Some(reg) = self.registrations.get_mut(&key) {
            out.push(BackendEvent {
                token: reg.token,
                readiness: Readiness { readable: true, writable: false, error: ok == 0 },
            });
            if reg.interest.is_readable() {
                let _ = Backend::post_zero_byte_recv(reg);
            }
        }
        Ok(())
    }

    fn wake(&self) -> Result<()> {
        let rc = unsafe {
            PostQueuedCompletionStatus(self.port, 0, WAKE_KEY, std::ptr::null_mut())
        };
        if rc == 0 {
            Err(Error::from_io_error(&std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}
