//! UART endpoint, raw 8-N-1.
//!
//! The port is switched to raw mode; framing, integrity and retransmission
//! are the stack's business ([`Terminal`](crate::protocol::Terminal) +
//! [`Crc16`](crate::protocol::Crc16) + [`Arq`](crate::protocol::Arq) is the
//! usual arrangement over a lossy line).

use super::{read_fd, write_fd_all, Endpoint};
use crate::error::{Error, TransportError};
use crate::poller::{Events, PollSource, SourceKind};
use nix::sys::termios::{
    cfmakeraw, cfsetspeed, tcgetattr, tcsetattr, BaudRate, ControlFlags, SetArg,
};
use std::fs::File;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// Raw serial port endpoint.
pub struct Serial {
    port: File,
}

fn baud_rate(baud: u32) -> Result<BaudRate, Error> {
    Ok(match baud {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        _ => return Err(Error::Transport(TransportError::Io)),
    })
}

impl Serial {
    /// Open `path` (e.g. `/dev/ttyUSB0`) at the given baud rate, raw 8-N-1,
    /// non-blocking.
    pub fn open(path: &Path, baud: u32) -> Result<Self, Error> {
        let port = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        let mut tio =
            tcgetattr(&port).map_err(|_| Error::Transport(TransportError::Io))?;

        cfmakeraw(&mut tio);

        // cfmakeraw leaves CS8 set; make the rest of 8-N-1 explicit.
        tio.control_flags &= !ControlFlags::CSTOPB;
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;

        cfsetspeed(&mut tio, baud_rate(baud)?)
            .map_err(|_| Error::Transport(TransportError::Io))?;
        tcsetattr(&port, SetArg::TCSANOW, &tio)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        Ok(Self { port })
    }

    fn fd(&self) -> RawFd {
        self.port.as_raw_fd()
    }
}

impl Endpoint for Serial {
    fn send(&mut self, data: &[u8], _last: bool) -> Result<(), Error> {
        write_fd_all(self.fd(), data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        Ok(read_fd(self.fd(), buf)?.map(|n| (n, false)))
    }

    fn source(&self) -> Option<PollSource<'_>> {
        Some(PollSource::new(SourceKind::Fd(self.fd()), Events::READ, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_baud_is_rejected() {
        assert!(baud_rate(115_200).is_ok());
        assert!(baud_rate(12_345).is_err());
    }
}
