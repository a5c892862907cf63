//! Shared Unix backend plumbing: the `syscall!` helper, non-blocking
//! connect, and the self-pipe/eventfd wakers used by the epoll and kqueue
//! backends.

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub(crate) mod kqueue;

/// Runs a libc call, turning a `-1` return into `Err(io::Error::last_os_error())`.
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
pub(crate) use syscall;

/// Sets `O_NONBLOCK` on a raw fd. Every socket this crate hands to a
/// reactor backend must be non-blocking, since readiness notifications only
/// promise "won't block right now", not "won't block at all" — the classic
/// level-triggered reactor caveat.
pub(crate) fn set_nonblocking(fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
    Ok(())
}

/// Opens a non-blocking TCP socket and kicks off `connect(2)`, returning
/// the wrapped `std` stream and whether the connect is still in progress
/// (`EINPROGRESS`).
pub(crate) fn tcp_connect_nonblocking(
    addr: std::net::SocketAddr,
) -> std::io::Result<(std::net::TcpStream, bool)> {
    use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let raw = syscall!(socket(domain, libc::SOCK_STREAM, 0))?;
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    set_nonblocking(fd.as_raw_fd())?;

    let in_progress = match addr {
        std::net::SocketAddr::V4(v4) => {
            let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) };
            connect_raw(
                fd.as_raw_fd(),
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )?
        }
        std::net::SocketAddr::V6(v6) => {
            let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr = libc::in6_addr { s6_addr: v6.ip().octets() };
            connect_raw(
                fd.as_raw_fd(),
                &sa as *const libc::sockaddr_in6 as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )?
        }
    };

    Ok((unsafe { std::net::TcpStream::from_raw_fd(fd.into_raw_fd()) }, in_progress))
}

fn connect_raw(
    fd: std::os::unix::io::RawFd,
    addr: *const libc::sockaddr,
    len: libc::socklen_t,
) -> std::io::Result<bool> {
    match syscall!(connect(fd, addr, len)) {
        Ok(_) => Ok(false),
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(true),
        Err(e) => Err(e),
    }
}

/// An eventfd-backed waker, used to interrupt `epoll_wait` from another
/// thread.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) struct EventFdWaker {
    fd: std::os::unix::io::OwnedFd,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl EventFdWaker {
    pub(crate) fn new() -> std::io::Result<EventFdWaker> {
        use std::os::unix::io::FromRawFd;
        let raw = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        Ok(EventFdWaker {
            fd: unsafe { std::os::unix::io::OwnedFd::from_raw_fd(raw) },
        })
    }

    pub(crate) fn raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.fd.as_raw_fd()
    }

    pub(crate) fn wake(&self) -> std::io::Result<()> {
        use std::os::unix::io::AsRawFd;
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match syscall!(write(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len())) {
            Ok(_) => Ok(()),
            // Counter already saturated with a pending wake: fine, a wake
            // is already on its way.
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drains the counter after a wake-triggered wakeup so it doesn't
    /// immediately re-fire as "readable" on the next poll.
    pub(crate) fn reset(&self) {
        use std::os::unix::io::AsRawFd;
        let mut buf = [0u8; 8];
        let _ = syscall!(read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()));
    }
}

/// Pipe-based waker for kqueue targets, which have no eventfd.
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub(crate) struct PipeWaker {
    read_fd: std::os::unix::io::OwnedFd,
    write_fd: std::os::unix::io::OwnedFd,
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
impl PipeWaker {
    pub(crate) fn new() -> std::io::Result<PipeWaker> {
        use std::os::unix::io::FromRawFd;
        let mut fds = [0i32; 2];
        syscall!(pipe(fds.as_mut_ptr()))?;
        let read_fd = unsafe { std::os::unix::io::OwnedFd::from_raw_fd(fds[0]) };
        let write_fd = unsafe { std::os::unix::io::OwnedFd::from_raw_fd(fds[1]) };
        set_nonblocking(std::os::unix::io::AsRawFd::as_raw_fd(&read_fd))?;
        set_nonblocking(std::os::unix::io::AsRawFd::as_raw_fd(&write_fd))?;
        Ok(PipeWaker { read_fd, write_fd })
    }

    pub(crate) fn raw_fd(&self) -> std::os::unix::io::RawFd {
        std::os::unix::io::AsRawFd::as_raw_fd(&self.read_fd)
    }

    pub(crate) fn wake(&self) -> std::io::Result<()> {
        use std::os::unix::io::AsRawFd;
        let buf = [1u8];
        match syscall!(write(self.write_fd.as_raw_fd(), buf.as_ptr().cast(), 1)) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn reset(&self) {
        use std::os::unix::io::AsRawFd;
        let mut buf = [0u8; 64];
        loop {
            match syscall!(read(self.read_fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())) {
                Ok(n) if n > 0 => continue,
                _ => break,
            }
        }
    }
}
