//! In-process endpoint pair, for tests and single-process wiring.

use super::Endpoint;
use crate::error::{Error, TransportError};
use crate::poller::PollSource;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// One half of an in-process message pipe. Message-oriented and unbounded;
/// backpressure is the caller's business.
pub struct Loopback {
    tx: Queue,
    rx: Queue,
    partial: Vec<u8>,
    /// Remainder of a message that did not fit the caller's buffer.
    carry: Vec<u8>,
    carry_offset: usize,
}

impl Loopback {
    /// A connected pair; what one half sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let ab: Queue = Rc::default();
        let ba: Queue = Rc::default();

        (
            Self::over(ab.clone(), ba.clone()),
            Self::over(ba, ab),
        )
    }

    fn over(tx: Queue, rx: Queue) -> Self {
        Self {
            tx,
            rx,
            partial: Vec::new(),
            carry: Vec::new(),
            carry_offset: 0,
        }
    }

    /// Number of messages waiting to be received.
    pub fn pending(&self) -> usize {
        self.rx.borrow().len()
    }
}

impl Endpoint for Loopback {
    fn message_oriented(&self) -> bool {
        true
    }

    fn send(&mut self, data: &[u8], last: bool) -> Result<(), Error> {
        self.partial.extend_from_slice(data);

        if last {
            self.tx
                .borrow_mut()
                .push_back(core::mem::take(&mut self.partial));
        }

        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>, Error> {
        if buf.is_empty() {
            return Err(Error::Transport(TransportError::Busy));
        }

        if self.carry.is_empty() {
            match self.rx.borrow_mut().pop_front() {
                Some(message) => {
                    self.carry = message;
                    self.carry_offset = 0;
                }
                None => return Ok(None),
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

    fn source(&self) -> Option<PollSource<'_>> {
        // Nothing to wait on; callers check `pending` instead.
        None
    }
}
