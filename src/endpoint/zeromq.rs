//! ZeroMQ endpoints.
//!
//! [`ZmqServer`] is a REP socket serving debugger clients: one upper-layer
//! request per ZeroMQ message in, one response out. [`ZmqSync`] carries
//! synchronizer traffic over a DEALER socket, either side binding. Both are
//! message-oriented, so a stack on top of them needs no framing layer.

use super::Endpoint;
use crate::error::{Error, TransportError};
use crate::poller::{Events, PollSource, SourceKind};

fn map_send(e: zmq::Error) -> Error {
    match e {
        zmq::Error::EAGAIN => Error::Transport(TransportError::Busy),
        zmq::Error::ETERM => Error::Transport(TransportError::Closed),
        _ => Error::Transport(TransportError::Io),
    }
}

struct MessageIo {
    socket: zmq::Socket,
    _context: zmq::Context,
    partial_out: Vec<u8>,
    carry: Vec<u8>,
    carry_offset: usize,
}

impl MessageIo {
    fn over(context: zmq::Context, socket: zmq::Socket) -> Self {
        Self {
            socket,
            _context: context,
            partial_out: Vec::new(),
            carry: Vec::new(),
            carry_offset: 0,
        }
    }

    fn send(&mut self, data: &[u8], last: bool) -> Result<(), Error> {
        self.partial_out.extend_from_slice(data);

        if last {
            let message = core::mem::take(&mut self.partial_out);

            self.socket.send(message.as_slice(), 0).map_err(map_send)?;
        }

        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        if self.carry.is_empty() {
            match self.socket.recv_bytes(zmq::DONTWAIT) {
                Ok(message) => {
                    self.carry = message;
                    self.carry_offset = 0;
                }
                Err(zmq::Error::EAGAIN) => return Ok(None),
                Err(zmq::Error::ETERM) => {
                    return Err(Error::Transport(TransportError::Closed))
                }
                Err(_) => return Err(Error::Transport(TransportError::Io)),
            }
        }

        let rest = &self.carry[self.carry_offset..];
        let n = rest.len().min(buf.len());

        buf[..n].copy_from_slice(&rest[..n]);
        self.carry_offset += n;

        let last = self.carry_offset == self.carry.len();

        if last {
            self.carry.clear();
            self.carry_offset = 0;
        }

        Ok(Some((n, last)))
    }
}

/// Debugger server over a REP socket.
pub struct ZmqServer {
    io: MessageIo,
}

impl ZmqServer {
    /// Bind a REP socket at `endpoint` (e.g. `tcp://*:19026`).
    pub fn bind(endpoint: &str) -> Result<Self, Error> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::REP)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        socket
            .bind(endpoint)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        Ok(Self {
            io: MessageIo::over(context, socket),
        })
    }
}

impl Endpoint for ZmqServer {
    fn message_oriented(&self) -> bool {
        true
    }

    fn send(&mut self, data: &[u8], last: bool) -> Result<(), Error> {
        self.io.send(data, last)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        self.io.recv(buf)
    }

    fn source(&self) -> Option<PollSource<'_>> {
        Some(PollSource::new(
            SourceKind::Zmq(&self.io.socket),
            Events::READ,
            0,
        ))
    }
}

/// Synchronizer link over a DEALER socket.
pub struct ZmqSync {
    io: MessageIo,
}

impl ZmqSync {
    fn socket() -> Result<(zmq::Context, zmq::Socket), Error> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::DEALER)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        Ok((context, socket))
    }

    /// Bind the listening side at `endpoint`.
    pub fn bind(endpoint: &str) -> Result<Self, Error> {
        let (context, socket) = Self::socket()?;

        socket
            .bind(endpoint)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        Ok(Self {
            io: MessageIo::over(context, socket),
        })
    }

    /// Connect to a bound peer at `endpoint`.
    pub fn connect(endpoint: &str) -> Result<Self, Error> {
        let (context, socket) = Self::socket()?;

        socket
            .connect(endpoint)
            .map_err(|_| Error::Transport(TransportError::Io))?;

        Ok(Self {
            io: MessageIo::over(context, socket),
        })
    }
}

impl Endpoint for ZmqSync {
    fn message_oriented(&self) -> bool {
        true
    }

    fn send(&mut self, data: &[u8], last: bool) -> Result<(), Error> {
        self.io.send(data, last)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        self.io.recv(buf)
    }

    fn source(&self) -> Option<PollSource<'_>> {
        Some(PollSource::new(
            SourceKind::Zmq(&self.io.socket),
            Events::READ,
            0,
        ))
    }
}
