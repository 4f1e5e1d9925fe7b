//! Transport endpoints: the leaf below a protocol stack.
//!
//! An endpoint moves raw bytes; everything above it is the stack's problem.
//! All implementations are non-blocking: `recv` returns `None` instead of
//! waiting and the [`poller`](crate::poller) says when to try again.
//!
//! | Adapter | Transport |
//! |---------|-----------|
//! | [`Stdio`] | process stdin/stdout |
//! | [`FileEndpoint`] | regular files, for replay |
//! | [`NamedPipe`] | a pair of OS FIFOs |
//! | [`Serial`] | UART, raw 8-N-1 |
//! | [`Loopback`] | in-process queue pair |
//! | [`ZmqServer`], [`ZmqSync`] | ZeroMQ (`zmq` feature) |

mod file;
mod loopback;
mod pipe;
mod serial;
mod stdio;
#[cfg(feature = "zmq")]
mod zeromq;

pub use file::FileEndpoint;
pub use loopback::Loopback;
pub use pipe::NamedPipe;
pub use serial::Serial;
pub use stdio::Stdio;
#[cfg(feature = "zmq")]
pub use zeromq::{ZmqServer, ZmqSync};

use crate::error::{Error, TransportError};
use crate::poller::PollSource;
use std::os::unix::io::RawFd;

/// A pluggable transport.
pub trait Endpoint {
    /// Largest transport-level message, `0` = unlimited.
    fn mtu(&self) -> usize {
        0
    }

    /// `true` if `recv` reports message boundaries (`last` is meaningful);
    /// byte streams rely on a framing layer instead.
    fn message_oriented(&self) -> bool {
        false
    }

    /// Write bytes toward the peer. `last` closes a transport-level message
    /// on message-oriented transports and is ignored by byte streams.
    fn send(&mut self, data: &[u8], last: bool) -> Result<(), Error>;

    /// Read available bytes into `buf`. `None` means try again after the
    /// poller fires; `(len, last)` hands out up to `buf.len()` bytes with
    /// `last` marking a message boundary.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error>;

    /// The handle to wait on for readability, if the transport has one.
    fn source(&self) -> Option<PollSource<'_>>;
}

pub(crate) fn set_nonblocking(fd: RawFd) -> Result<(), Error> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };

    if flags < 0 {
        return Err(Error::Transport(TransportError::Io));
    }

    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

    if rc < 0 {
        return Err(Error::Transport(TransportError::Io));
    }

    Ok(())
}

/// Non-blocking read. `Ok(None)` on would-block, `Closed` on EOF.
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>, Error> {
    let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };

    if rc < 0 {
        return match std::io::Error::last_os_error().kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(None),
            _ => Err(Error::Transport(TransportError::Io)),
        };
    }

    if rc == 0 {
        return Err(Error::Transport(TransportError::Closed));
    }

    Ok(Some(rc as usize))
}

/// Write everything, waiting for writability when the descriptor pushes
/// back.
pub(crate) fn write_fd_all(fd: RawFd, mut data: &[u8]) -> Result<(), Error> {
    while !data.is_empty() {
        let rc = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };

        if rc < 0 {
            match std::io::Error::last_os_error().kind() {
                std::io::ErrorKind::WouldBlock => {
                    let mut pfd = libc::pollfd {
                        fd,
                        events: libc::POLLOUT,
                        revents: 0,
                    };

                    unsafe { libc::poll(&mut pfd, 1, -1) };
                }
                std::io::ErrorKind::Interrupted => {}
                _ => return Err(Error::Transport(TransportError::Io)),
            }

            continue;
        }

        data = &data[rc as usize..];
    }

    Ok(())
}
