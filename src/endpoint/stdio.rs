//! Debugger endpoint over process stdin/stdout.
//!
//! Pairs with the [`Terminal`](crate::protocol::Terminal) layer: debugger
//! frames hide in APC sequences while ordinary program output keeps flowing
//! through the same descriptors.

use super::{read_fd, set_nonblocking, write_fd_all, Endpoint};
use crate::error::Error;
use crate::poller::{Events, PollSource, SourceKind};
use std::os::unix::io::RawFd;

const STDIN: RawFd = 0;
const STDOUT: RawFd = 1;

/// Byte-stream endpoint on fds 0/1.
pub struct Stdio {
    _private: (),
}

impl Stdio {
    /// Switch stdin to non-blocking and wrap the pair.
    pub fn new() -> Result<Self, Error> {
        set_nonblocking(STDIN)?;

        Ok(Self { _private: () })
    }
}

impl Endpoint for Stdio {
    fn send(&mut self, data: &[u8], _last: bool) -> Result<(), Error> {
        write_fd_all(STDOUT, data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        Ok(read_fd(STDIN, buf)?.map(|n| (n, false)))
    }

    fn source(&self) -> Option<PollSource<'_>> {
        Some(PollSource::new(SourceKind::Fd(STDIN), Events::READ, 0))
    }
}
