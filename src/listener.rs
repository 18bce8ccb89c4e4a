//! Datagram sources for the keyer.
//!
//! The network side is a single bound UDP socket: one datagram is one
//! message, there is no acknowledgement and nothing is buffered between
//! messages. The rig-control keyer can additionally take messages typed on
//! standard input.
//!
//! Standard input is polled for readiness on the runtime's own reactor,
//! like the socket, so a pending read never pins a blocking thread and
//! never holds up shutdown.

use std::fs::File;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, Interest, ReadBuf};
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Default cwdaemon UDP port.
pub const DEFAULT_PORT: u16 = 6789;

/// Largest payload accepted in one message.
pub const MAX_DATAGRAM: usize = 1024;

/// Errors from the message sources. All of them are fatal to the daemon.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("error receiving datagram: {0}")]
    Receive(#[source] std::io::Error),

    #[error("cannot read from standard input: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("error reading local input: {0}")]
    LocalInput(#[source] std::io::Error),
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    bytes: Vec<u8>,
    source: Option<SocketAddr>,
}

impl Datagram {
    /// Wrap a payload, truncating it to [`MAX_DATAGRAM`] bytes.
    pub fn new(mut bytes: Vec<u8>, source: Option<SocketAddr>) -> Self {
        bytes.truncate(MAX_DATAGRAM);
        Self { bytes, source }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The sender, if the message came from the network.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&[u8]> for Datagram {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec(), None)
    }
}

/// A bound UDP endpoint.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    buf: Box<[u8; MAX_DATAGRAM]>,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenError::Bind { addr, source })?;
        let listener = Self::from_socket(socket);
        if let Ok(local) = listener.local_addr() {
            info!("Listening on udp://{}", local);
        }
        Ok(listener)
    }

    /// Use an already-bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: Box::new([0u8; MAX_DATAGRAM]),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for the next datagram.
    ///
    /// Cancel-safe: if the future is dropped before completion no datagram
    /// is lost.
    pub async fn receive(&mut self) -> Result<Datagram, ListenError> {
        let (n, from) = self
            .socket
            .recv_from(&mut self.buf[..])
            .await
            .map_err(ListenError::Receive)?;
        debug!("Received {} bytes from {}", n, from);
        Ok(Datagram::new(self.buf[..n].to_vec(), Some(from)))
    }
}

/// Messages typed on a local stream, one read per message.
pub struct LocalInput {
    reader: Box<dyn AsyncRead + Unpin + Send>,
    buf: Box<[u8; MAX_DATAGRAM]>,
}

impl LocalInput {
    /// Read messages from standard input.
    ///
    /// Must be called from within the runtime.
    pub fn stdin() -> Result<Self, ListenError> {
        let fd = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(ListenError::Stdin)?;
        Self::from_fd(fd)
    }

    /// Read messages from an open descriptor such as a pipe, tty or socket.
    ///
    /// Regular files and `/dev/null` cannot be polled for readiness (epoll
    /// refuses them with `EPERM`). Their reads always complete, so they go
    /// through `tokio::fs` instead.
    pub fn from_fd(fd: OwnedFd) -> Result<Self, ListenError> {
        let file = File::from(fd);
        let original_flags = set_nonblocking(&file).map_err(ListenError::Stdin)?;
        let polled = file.try_clone().map_err(ListenError::Stdin)?;
        match AsyncFd::with_interest(polled, Interest::READABLE) {
            Ok(inner) => Ok(Self::new(ReadinessReader {
                inner,
                original_flags,
            })),
            Err(e) => {
                set_flags(&file, original_flags);
                if e.raw_os_error() != Some(libc::EPERM) {
                    return Err(ListenError::Stdin(e));
                }
                debug!("Local input cannot be polled, reading it directly");
                Ok(Self::new(tokio::fs::File::from_std(file)))
            }
        }
    }

    pub fn new(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            buf: Box::new([0u8; MAX_DATAGRAM]),
        }
    }

    /// Read the next message, or `None` once the stream is closed.
    pub async fn read(&mut self) -> Result<Option<Datagram>, ListenError> {
        let n = self
            .reader
            .read(&mut self.buf[..])
            .await
            .map_err(ListenError::LocalInput)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Datagram::new(self.buf[..n].to_vec(), None)))
    }
}

/// A non-blocking descriptor registered with the reactor.
///
/// The descriptor's original flags are put back on drop, since standard
/// input is usually shared with the parent shell.
struct ReadinessReader {
    inner: AsyncFd<File>,
    original_flags: libc::c_int,
}

/// Set `O_NONBLOCK` and return the flags it replaced.
fn set_nonblocking(file: &File) -> io::Result<libc::c_int> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to `file`, which outlives both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: as above.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(flags)
}

impl AsyncRead for ReadinessReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Best-effort restore of descriptor flags.
fn set_flags(file: &File, flags: libc::c_int) {
    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    unsafe {
        libc::fcntl(file.as_raw_fd(), libc::F_SETFL, flags);
    }
}

impl Drop for ReadinessReader {
    fn drop(&mut self) {
        set_flags(self.inner.get_ref(), self.original_flags);
    }
}

impl std::fmt::Debug for LocalInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalInput").finish_non_exhaustive()
    }
}
