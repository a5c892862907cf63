//! Windows backend plumbing.
pub(crate) mod iocp;

/// Opens a non-blocking TCP socket and kicks off `connect`, mirroring
/// `sys::unix::tcp_connect_nonblocking`'s contract: returns the wrapped
/// `std` stream and whether the connect is still in progress
/// (`WSAEWOULDBLOCK`).
pub(crate) fn tcp_connect_nonblocking(
    addr: std::net::SocketAddr,
) -> std::io::Result<(std::net::TcpStream, bool)> {
    use std::os::windows::io::FromRawSocket;
    use windows_sys::Win32::Networking::WinSock::{
        closesocket, connect, socket, WSAGetLastError, AF_INET, AF_INET6, IN6_ADDR, IN6_ADDR_0,
        IN_ADDR, IN_ADDR_0, INVALID_SOCKET, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_IN6_0,
        SOCKET_ERROR, SOCK_STREAM, WSAEWOULDBLOCK,
    };
    use windows_sys::Win32::Networking::WinSock::SOCKADDR;
    use windows_sys::Win32::System::Io::ioctlsocket;
    use windows_sys::Win32::System::WindowsProgramming::FIONBIO;

    unsafe {
        let domain = if addr.is_ipv4() { AF_INET } else { AF_INET6 } as i32;
        let raw = socket(domain, SOCK_STREAM as i32, 0);
        if raw == INVALID_SOCKET as usize {
            return Err(std::io::Error::last_os_error());
        }

        let mut nonblocking: u32 = 1;
        if ioctlsocket(raw, FIONBIO as i32, &mut nonblocking) == SOCKET_ERROR {
            let err = std::io::Error::last_os_error();
            closesocket(raw);
            return Err(err);
        }

        let rc = match addr {
            std::net::SocketAddr::V4(v4) => {
                let sa = SOCKADDR_IN {
                    sin_family: AF_INET,
                    sin_port: v4.port().to_be(),
                    sin_addr: IN_ADDR { S_un: IN_ADDR_0 { S_addr: u32::from_ne_bytes(v4.ip().octets()) } },
                    sin_zero: [0; 8],
                };
                connect(raw, &sa as *const SOCKADDR_IN as *const SOCKADDR, std::mem::size_of::<SOCKADDR_IN>() as i32)
            }
            std::net::SocketAddr::V6(v6) => {
                let sa = SOCKADDR_IN6 {
                    sin6_family: AF_INET6,
                    sin6_port: v6.port().to_be(),
                    sin6_flowinfo: 0,
                    sin6_addr: IN6_ADDR { u: IN6_ADDR_0 { Byte: v6.ip().octets() } },
                    Anonymous: SOCKADDR_IN6_0 { sin6_scope_id: 0 },
                };
                connect(raw, &sa as *const SOCKADDR_IN6 as *const SOCKADDR, std::mem::size_of::<SOCKADDR_IN6>() as i32)
            }
        };

        let in_progress = if rc == 0 {
            false
        } else if WSAGetLastError() == WSAEWOULDBLOCK {
            true
        } else {
            let err = std::io::Error::last_os_error();
            closesocket(raw);
            return Err(err);
        };

        Ok((std::net::TcpStream::from_raw_socket(raw as u64), in_progress))
    }
}
