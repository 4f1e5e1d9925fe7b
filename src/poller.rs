//! Readiness multiplexing over file descriptors and ZeroMQ sockets.
//!
//! The poller is the single suspension point of a storelink application:
//! everything else in the crate is non-blocking. Sources are handed in per
//! call and readiness is reported by mutating their `ready` field, so there
//! is no registration state to invalidate; dropping a source from the slice
//! before the next call is all the cancellation there is.

use crate::error::{Error, TransportError};
use bitflags::bitflags;
use std::os::unix::io::RawFd;

bitflags! {
    /// Readiness interest and result set.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct Events: u8 {
        /// Readable.
        const READ = 0x01;
        /// Writable.
        const WRITE = 0x02;
        /// Error condition.
        const ERROR = 0x04;
        /// Peer hung up.
        const HANGUP = 0x08;
    }
}

/// What a [`PollSource`] polls on.
pub enum SourceKind<'a> {
    /// A raw file descriptor.
    Fd(RawFd),
    /// A ZeroMQ socket; its readiness is not observable through its fd
    /// alone.
    #[cfg(feature = "zmq")]
    Zmq(&'a zmq::Socket),
    #[doc(hidden)]
    _Lifetime(core::marker::PhantomData<&'a ()>),
}

/// One pollable handle.
pub struct PollSource<'a> {
    /// The handle.
    pub kind: SourceKind<'a>,
    /// Events the caller waits for.
    pub interest: Events,
    /// Events that fired; cleared and refilled by every [`poll`] call.
    pub ready: Events,
    /// Free-form caller tag, usually an endpoint index.
    pub token: usize,
}

impl<'a> PollSource<'a> {
    /// A source waiting for `interest` on `kind`.
    pub fn new(kind: SourceKind<'a>, interest: Events, token: usize) -> Self {
        Self {
            kind,
            interest,
            ready: Events::empty(),
            token,
        }
    }
}

/// Wait until at least one source is ready or `timeout_ms` elapses
/// (negative = forever). Returns the number of ready sources.
#[cfg(not(feature = "zmq"))]
pub fn poll(sources: &mut [PollSource<'_>], timeout_ms: i32) -> Result<usize, Error> {
    let mut fds: Vec<libc::pollfd> = Vec::with_capacity(sources.len());

    for source in sources.iter_mut() {
        source.ready = Events::empty();

        let SourceKind::Fd(fd) = &source.kind else {
            continue;
        };
        let fd = *fd;

        let mut events = 0i16;

        if source.interest.contains(Events::READ) {
            events |= libc::POLLIN;
        }

        if source.interest.contains(Events::WRITE) {
            events |= libc::POLLOUT;
        }

        fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
    }

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

    if rc < 0 {
        let errno = std::io::Error::last_os_error();

        if errno.kind() == std::io::ErrorKind::Interrupted {
            return Ok(0);
        }

        return Err(Error::Transport(TransportError::Io));
    }

    let mut ready = 0;
    let mut fd_idx = 0;

    for source in sources.iter_mut() {
        let SourceKind::Fd(_) = &source.kind else {
            continue;
        };

        let revents = fds[fd_idx].revents;

        fd_idx += 1;

        if revents & libc::POLLIN != 0 {
            source.ready |= Events::READ;
        }

        if revents & libc::POLLOUT != 0 {
            source.ready |= Events::WRITE;
        }

        if revents & libc::POLLERR != 0 {
            source.ready |= Events::ERROR;
        }

        if revents & libc::POLLHUP != 0 {
            source.ready |= Events::HANGUP;
        }

        if !source.ready.is_empty() {
            ready += 1;
        }
    }

    Ok(ready)
}

/// Wait until at least one source is ready or `timeout_ms` elapses
/// (negative = forever). Returns the number of ready sources.
///
/// ZeroMQ sockets and raw descriptors are folded into one `zmq_poll` call.
#[cfg(feature = "zmq")]
pub fn poll(sources: &mut [PollSource<'_>], timeout_ms: i32) -> Result<usize, Error> {
    let mut items: Vec<zmq::PollItem<'_>> = Vec::with_capacity(sources.len());

    for source in sources.iter_mut() {
        source.ready = Events::empty();

        let mut events = zmq::PollEvents::empty();

        if source.interest.contains(Events::READ) {
            events |= zmq::POLLIN;
        }

        if source.interest.contains(Events::WRITE) {
            events |= zmq::POLLOUT;
        }

        match &source.kind {
            SourceKind::Fd(fd) => items.push(zmq::PollItem::from_fd(*fd, events)),
            SourceKind::Zmq(socket) => items.push(socket.as_poll_item(events)),
            SourceKind::_Lifetime(_) => unreachable!(),
        }
    }

    zmq::poll(&mut items, i64::from(timeout_ms))
        .map_err(|_| Error::Transport(TransportError::Io))?;

    let mut ready = 0;

    for (source, item) in sources.iter_mut().zip(&items) {
        if item.is_readable() {
            source.ready |= Events::READ;
        }

        if item.is_writable() {
            source.ready |= Events::WRITE;
        }

        if item.is_error() {
            source.ready |= Events::ERROR;
        }

        if !source.ready.is_empty() {
            ready += 1;
        }
    }

    Ok(ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];

        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        (fds[0], fds[1])
    }

    #[test]
    fn pipe_becomes_readable_after_write() {
        let (rx, tx) = os_pipe();

        let mut sources = [PollSource::new(SourceKind::Fd(rx), Events::READ, 7)];

        // Nothing to read yet.
        assert_eq!(poll(&mut sources, 0).unwrap(), 0);
        assert!(sources[0].ready.is_empty());

        assert_eq!(unsafe { libc::write(tx, b"x".as_ptr().cast(), 1) }, 1);

        assert_eq!(poll(&mut sources, 100).unwrap(), 1);
        assert!(sources[0].ready.contains(Events::READ));
        assert_eq!(sources[0].token, 7);

        unsafe {
            libc::close(rx);
            libc::close(tx);
        }
    }

    #[test]
    fn timeout_expires_with_no_sources_ready() {
        let (rx, tx) = os_pipe();

        let mut sources = [PollSource::new(SourceKind::Fd(rx), Events::READ, 0)];

        assert_eq!(poll(&mut sources, 10).unwrap(), 0);

        unsafe {
            libc::close(rx);
            libc::close(tx);
        }
    }
}
