//! Message segmentation and reassembly across a bounded MTU.
//!
//! Each segment carries its payload followed by one control byte: `C` for
//! "more follows", `E` for "end of message". Payload per segment is the
//! lower layer's MTU minus that byte. The layer above sees no limit, which
//! is how a 4-byte CAN-style MTU still carries arbitrarily long debugger
//! responses. Requires a message-preserving lower layer: every lower
//! message is exactly one segment.

use super::Context;
use crate::error::ProtocolError;
use alloc::vec::Vec;

const MORE: u8 = b'C';
const END: u8 = b'E';

/// Default reassembly bound.
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024;

/// Segmentation layer.
pub struct Segmentation {
    max_message: usize,
    lower_mtu: usize,
    /// Outbound message under accumulation.
    enc: Vec<u8>,
    /// Payload of the inbound segment under accumulation.
    seg: Vec<u8>,
    /// Reassembled inbound message so far.
    dec: Vec<u8>,
}

impl Default for Segmentation {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmentation {
    /// A segmentation layer with the [`DEFAULT_MAX_MESSAGE`] bound.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE)
    }

    /// Bound both reassembly and outbound accumulation to `max_message`
    /// bytes.
    pub fn with_max_message(max_message: usize) -> Self {
        Self {
            max_message,
            lower_mtu: 0,
            enc: Vec::new(),
            seg: Vec::new(),
            dec: Vec::new(),
        }
    }

    fn check_bound(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_message {
            Err(ProtocolError::MessageTooLong {
                max: self.max_message,
            })
        } else {
            Ok(())
        }
    }
}

impl super::Layer for Segmentation {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        self.check_bound(self.enc.len() + data.len())?;
        self.enc.extend_from_slice(data);

        if !last {
            return Ok(());
        }

        let message = core::mem::take(&mut self.enc);

        // An MTU of 0 or 1 means the lower layer imposes no usable limit;
        // ship the whole message as one end segment.
        let chunk = if self.lower_mtu > 1 {
            self.lower_mtu - 1
        } else {
            message.len().max(1)
        };

        let mut rest = message.as_slice();

        loop {
            if rest.len() > chunk {
                let (seg, tail) = rest.split_at(chunk);

                ctx.down(seg, false);
                ctx.down(&[MORE], true);

                rest = tail;
            } else {
                ctx.down(rest, false);
                ctx.down(&[END], true);

                return Ok(());
            }
        }
    }

    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        if let Err(e) = self.check_bound(self.seg.len() + data.len()) {
            self.seg.clear();

            return Err(e);
        }

        self.seg.extend_from_slice(data);

        if !last {
            return Ok(());
        }

        let control = match self.seg.pop() {
            Some(c) => c,
            // An empty lower message carries nothing at all.
            None => return Ok(()),
        };

        if let Err(e) = self.check_bound(self.dec.len() + self.seg.len()) {
            self.seg.clear();
            self.dec.clear();

            return Err(e);
        }

        self.dec.extend_from_slice(&self.seg);
        self.seg.clear();

        match control {
            MORE => Ok(()),
            END => {
                ctx.up(&self.dec, true);
                self.dec.clear();

                Ok(())
            }
            _ => {
                self.dec.clear();

                Err(ProtocolError::BadFrame)
            }
        }
    }

    fn mtu_for_upper(&self, _lower: usize) -> usize {
        // Reassembly lifts the limit for everything above.
        0
    }

    fn overhead(&self) -> usize {
        1
    }

    fn set_lower_mtu(&mut self, mtu: usize) {
        self.lower_mtu = mtu;
    }

    fn idle(&self) -> bool {
        self.enc.is_empty() && self.seg.is_empty() && self.dec.is_empty()
    }
}
