//! Platform backend selection.
//!
//! Exactly one of the following is compiled in: IOCP on Windows, kqueue on
//! the BSDs/macOS, epoll on Linux/Android (standing in for the unavailable
//! io_uring binding there).

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(windows)]
pub(crate) mod windows;

#[cfg(unix)]
pub(crate) use unix::tcp_connect_nonblocking;
#[cfg(windows)]
pub(crate) use windows::tcp_connect_nonblocking;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use unix::epoll::Backend;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub use unix::kqueue::Backend;

#[cfg(windows)]
pub use windows::iocp::Backend;
