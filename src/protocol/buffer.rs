//! Outbound message accumulation.
//!
//! Decouples the timing domain of the producer from the transport: complete
//! messages park in a fixed-depth FIFO until `flush` releases them. Inbound
//! traffic passes straight through.

use super::Context;
use crate::error::ProtocolError;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Default FIFO depth.
pub const DEFAULT_DEPTH: usize = 8;

/// Buffering layer.
pub struct Buffer {
    depth: usize,
    partial: Vec<u8>,
    queue: VecDeque<Vec<u8>>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// A buffer of [`DEFAULT_DEPTH`] messages.
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_DEPTH)
    }

    /// A buffer holding at most `depth` complete messages.
    pub fn with_depth(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            partial: Vec::new(),
            queue: VecDeque::new(),
        }
    }
}

impl super::Layer for Buffer {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        _ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        if self.queue.len() >= self.depth {
            return Err(ProtocolError::Backpressure);
        }

        self.partial.extend_from_slice(data);

        if last {
            self.queue.push_back(core::mem::take(&mut self.partial));
        }

        Ok(())
    }

    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        ctx.up(data, last);

        Ok(())
    }

    fn flush(&mut self, ctx: &mut Context<'_, '_, '_>) -> Result<(), ProtocolError> {
        while let Some(message) = self.queue.pop_front() {
            ctx.down(&message, true);
        }

        Ok(())
    }

    fn idle(&self) -> bool {
        self.partial.is_empty() && self.queue.is_empty()
    }
}
