//! File-backed endpoint for test replay.
//!
//! Reads a recorded byte stream as if it arrived from a transport and
//! appends whatever the stack sends to an optional output file.

use super::Endpoint;
use crate::error::{Error, TransportError};
use crate::poller::PollSource;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Replay endpoint over regular files.
pub struct FileEndpoint {
    input: File,
    output: Option<File>,
}

impl FileEndpoint {
    /// Replay `input`; discard sent bytes.
    pub fn open(input: &Path) -> Result<Self, Error> {
        let input = File::open(input).map_err(|_| Error::Transport(TransportError::Io))?;

        Ok(Self {
            input,
            output: None,
        })
    }

    /// Replay `input`, appending sent bytes to `output`.
    pub fn open_duplex(input: &Path, output: &Path) -> Result<Self, Error> {
        let mut endpoint = Self::open(input)?;

        endpoint.output = Some(
            File::options()
                .create(true)
                .append(true)
                .open(output)
                .map_err(|_| Error::Transport(TransportError::Io))?,
        );

        Ok(endpoint)
    }
}

impl Endpoint for FileEndpoint {
    fn send(&mut self, data: &[u8], _last: bool) -> Result<(), Error> {
        if let Some(output) = self.output.as_mut() {
            output
                .write_all(data)
                .map_err(|_| Error::Transport(TransportError::Io))?;
        }

        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        match self.input.read(buf) {
            Ok(0) => Err(Error::Transport(TransportError::Closed)),
            Ok(n) => Ok(Some((n, false))),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(_) => Err(Error::Transport(TransportError::Io)),
        }
    }

    fn source(&self) -> Option<PollSource<'_>> {
        // Regular files are always "ready"; drive them without polling.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_bytes_until_eof() {
        let dir = std::env::temp_dir().join("storelink-file-endpoint-test");

        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("replay.bin");

        std::fs::write(&path, b"recorded").unwrap();

        let mut endpoint = FileEndpoint::open(&path).unwrap();
        let mut buf = [0u8; 64];

        let (n, last) = endpoint.recv(&mut buf).unwrap().unwrap();

        assert_eq!(&buf[..n], b"recorded");
        assert!(!last);

        assert_eq!(
            endpoint.recv(&mut buf),
            Err(Error::Transport(TransportError::Closed))
        );

        std::fs::remove_file(&path).unwrap();
    }
}
