//! Control socket: the datagram endpoint host applications talk to.
//!
//! The socket lives in the Linux abstract namespace, so application
//! addresses are plain strings rather than filesystem paths and vanish
//! with their process. tokio's `UnixDatagram` cannot express abstract
//! addresses, so the socket is a non-blocking std `UnixDatagram` driven
//! through `AsyncFd`, with raw recv/send against `SocketAddr` values.

use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};

use tokio::io::unix::AsyncFd;

use crate::error::BridgeError;

/// Bound control socket. Reads are awaited through the reactor; sends are
/// single non-blocking attempts (datagram sends either fit the buffer or
/// are reported as failed, never retried).
#[derive(Debug)]
pub struct ControlSocket {
    inner: AsyncFd<UnixDatagram>,
    addr: String,
}

impl ControlSocket {
    /// Bind the well-known control address. Failure is fatal: without the
    /// control socket the daemon cannot serve applications.
    pub fn bind(addr: &str) -> Result<Self, BridgeError> {
        let bind = || -> io::Result<AsyncFd<UnixDatagram>> {
            let sockaddr = SocketAddr::from_abstract_name(addr.as_bytes())?;
            let socket = UnixDatagram::bind_addr(&sockaddr)?;
            socket.set_nonblocking(true)?;
            AsyncFd::new(socket)
        };

        let inner = bind().map_err(|source| BridgeError::ControlBind {
            addr: addr.to_string(),
            source,
        })?;

        Ok(Self {
            inner,
            addr: addr.to_string(),
        })
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> &str {
        &self.addr
    }

    /// Receive one datagram. Returns the payload length and the sender's
    /// abstract-namespace name, or `None` for senders bound to a pathname
    /// or to no address at all.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<String>)> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv_from(buf)) {
                Ok(Ok((len, addr))) => return Ok((len, abstract_name(&addr))),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// Send one datagram to an abstract-namespace address. A full socket
    /// buffer surfaces as `WouldBlock`, which the caller reports as a
    /// failed delivery.
    pub fn try_send_to(&self, buf: &[u8], dest: &str) -> io::Result<usize> {
        let sockaddr = SocketAddr::from_abstract_name(dest.as_bytes())?;
        self.inner.get_ref().send_to_addr(buf, &sockaddr)
    }
}

fn abstract_name(addr: &SocketAddr) -> Option<String> {
    addr.as_abstract_name()
        .map(|name| String::from_utf8_lossy(name).into_owned())
}
