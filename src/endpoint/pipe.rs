//! Endpoint over a pair of named pipes (OS FIFOs).
//!
//! The usual wiring for simulation IPC: one FIFO per direction, created on
//! demand. The write side is opened lazily because opening a FIFO for
//! writing fails until a reader exists.

use super::{read_fd, set_nonblocking, write_fd_all, Endpoint};
use crate::error::{Error, TransportError};
use crate::fmt;
use crate::poller::{Events, PollSource, SourceKind};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

/// FIFO-pair endpoint.
pub struct NamedPipe {
    rx: RawFd,
    tx_path: CString,
    tx: Option<RawFd>,
}

fn to_cstring(path: &Path) -> Result<CString, Error> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::Transport(TransportError::Io))
}

fn mkfifo_if_absent(path: &Path) -> Result<(), Error> {
    if path.exists() {
        return Ok(());
    }

    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600))
        .map_err(|_| Error::Transport(TransportError::Io))
}

impl NamedPipe {
    /// Open (creating as needed) `rx_path` for reading and `tx_path` for
    /// writing.
    pub fn open(rx_path: &Path, tx_path: &Path) -> Result<Self, Error> {
        mkfifo_if_absent(rx_path)?;
        mkfifo_if_absent(tx_path)?;

        let rx_c = to_cstring(rx_path)?;
        let rx = unsafe { libc::open(rx_c.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };

        if rx < 0 {
            return Err(Error::Transport(TransportError::Io));
        }

        set_nonblocking(rx)?;

        Ok(Self {
            rx,
            tx_path: to_cstring(tx_path)?,
            tx: None,
        })
    }

    fn tx_fd(&mut self) -> Result<RawFd, Error> {
        if let Some(fd) = self.tx {
            return Ok(fd);
        }

        let fd = unsafe { libc::open(self.tx_path.as_ptr(), libc::O_WRONLY | libc::O_NONBLOCK) };

        if fd < 0 {
            // ENXIO: nobody is reading yet.
            fmt::debug!("fifo peer not ready");

            return Err(Error::Transport(TransportError::Busy));
        }

        self.tx = Some(fd);

        Ok(fd)
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.rx);
        }

        if let Some(fd) = self.tx {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

impl Endpoint for NamedPipe {
    fn send(&mut self, data: &[u8], _last: bool) -> Result<(), Error> {
        let fd = self.tx_fd()?;

        write_fd_all(fd, data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        match read_fd(self.rx, buf) {
            // EOF on a FIFO only means the writer closed; a new one may
            // still appear.
            Err(Error::Transport(TransportError::Closed)) => Ok(None),
            other => Ok(other?.map(|n| (n, false))),
        }
    }

    fn source(&self) -> Option<PollSource<'_>> {
        Some(PollSource::new(SourceKind::Fd(self.rx), Events::READ, 0))
    }
}
