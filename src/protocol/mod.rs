//! Bidirectional protocol layer stack.
//!
//! A [`Stack`] owns an ordered list of codec layers, top first. *Encoded*
//! bytes flow downward from the application toward the transport; *decoded*
//! bytes flow upward. Every layer implements the same push-oriented
//! [`Layer`] contract:
//!
//! - `encode(data, last)` is called by the layer above; `last` marks the end
//!   of a logical message. A layer may buffer partials but must push a
//!   complete message downward once `last` is finally true.
//! - `decode(data, last)` is called by the layer below with inbound bytes;
//!   it may push 0..N chunks to its upward neighbour.
//!
//! Layers never call each other directly. They emit through a [`Context`]
//! into the stack's FIFO job queue, which preserves message order and lets a
//! layer emit in *both* directions from one callback (the ARQ acknowledges
//! inbound data downward while delivering it upward). The queue's byte arena
//! is sized at startup and recycled whenever the queue drains, so steady
//! state processing does not allocate.
//!
//! The canonical stack over a lossy byte channel, top to bottom, is
//! [`AsciiEscape`] → [`Terminal`] → [`Arq`] → [`Crc16`] → [`Segmentation`]
//! → transport.

mod arq;
mod ascii;
mod buffer;
mod crc;
mod print;
mod segmentation;
mod terminal;

pub use arq::{Arq, ArqConfig};
pub use ascii::AsciiEscape;
pub use buffer::Buffer;
pub use crc::{Crc16, Crc8};
pub use print::Print;
pub use segmentation::Segmentation;
pub use terminal::Terminal;

use crate::error::ProtocolError;
use crate::fmt;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Out-of-band notifications a stack can raise while processing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackEvent {
    /// The ARQ completed its reset handshake; the link is live.
    ArqConnected,
    /// The ARQ retransmitted the given sequence number.
    ArqRetransmit {
        /// Sequence number of the retransmitted message.
        seq: u8,
    },
    /// The ARQ exhausted its retries and restarted the handshake.
    ArqReset,
}

/// External sinks of a stack: where fully decoded messages, transport-bound
/// bytes, terminal sideband bytes and diagnostics go.
pub struct StackIo<'a, 'b> {
    /// Receives decoded chunks; `last` marks the end of a message.
    pub up: &'a mut dyn FnMut(&[u8], bool),
    /// Receives encoded chunks for the transport; `last` marks the end of a
    /// transport-level message.
    pub down: &'a mut dyn FnMut(&[u8], bool) -> Result<(), ProtocolError>,
    /// Receives bytes the [`Terminal`] layer saw outside any frame.
    pub sideband: Option<&'b mut dyn FnMut(&[u8])>,
    /// Receives [`StackEvent`] diagnostics.
    pub event: Option<&'b mut dyn FnMut(StackEvent)>,
}

#[derive(Debug, Copy, Clone)]
struct Job {
    up: bool,
    /// Destination: `-1` is the application sink, `layers.len()` the
    /// transport sink.
    target: isize,
    start: usize,
    len: usize,
    last: bool,
}

/// Emission handle passed to a layer while it processes one chunk.
pub struct Context<'a, 'io, 'b> {
    layer: isize,
    jobs: &'a mut VecDeque<Job>,
    arena: &'a mut Vec<u8>,
    io: &'a mut StackIo<'io, 'b>,
}

impl Context<'_, '_, '_> {
    fn push(&mut self, up: bool, target: isize, data: &[u8], last: bool) {
        let start = self.arena.len();

        self.arena.extend_from_slice(data);
        self.jobs.push_back(Job {
            up,
            target,
            start,
            len: data.len(),
            last,
        });
    }

    /// Push a chunk to the layer above (or the application sink).
    pub fn up(&mut self, data: &[u8], last: bool) {
        self.push(true, self.layer - 1, data, last);
    }

    /// Push a chunk to the layer below (or the transport sink).
    pub fn down(&mut self, data: &[u8], last: bool) {
        self.push(false, self.layer + 1, data, last);
    }

    /// Hand bytes to the terminal sideband, if any.
    pub fn sideband(&mut self, data: &[u8]) {
        if let Some(sideband) = self.io.sideband.as_mut() {
            sideband(data);
        }
    }

    /// Raise a diagnostic event.
    pub fn event(&mut self, event: StackEvent) {
        if let Some(sink) = self.io.event.as_mut() {
            sink(event);
        }
    }
}

/// One codec layer of a [`Stack`].
pub trait Layer {
    /// Push a chunk of an outbound message downward.
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError>;

    /// Push a chunk of inbound bytes upward.
    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError>;

    /// Per-message framing overhead in bytes.
    fn overhead(&self) -> usize {
        0
    }

    /// MTU offered to the layer above, given the lower layer's. `0` means
    /// unlimited.
    fn mtu_for_upper(&self, lower: usize) -> usize {
        if lower == 0 {
            0
        } else {
            lower.saturating_sub(self.overhead())
        }
    }

    /// Learn the lower layer's MTU. Called whenever the transport MTU is
    /// (re)negotiated.
    fn set_lower_mtu(&mut self, _mtu: usize) {}

    /// Release buffered output.
    fn flush(&mut self, _ctx: &mut Context<'_, '_, '_>) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// `true` if the layer holds no buffered state.
    fn idle(&self) -> bool {
        true
    }

    /// Advance time-driven behaviour (retransmits, keep-alives).
    fn poll_time(
        &mut self,
        _now_ms: u64,
        _ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// The codec layers a stack can be assembled from.
#[allow(clippy::large_enum_variant)]
pub enum LayerKind {
    /// Escape ASCII-unsafe bytes.
    AsciiEscape(AsciiEscape),
    /// APC frame extraction from a textual stream.
    Terminal(Terminal),
    /// Stop-and-wait ARQ.
    Arq(Arq),
    /// 8-bit checksum.
    Crc8(Crc8),
    /// 16-bit checksum.
    Crc16(Crc16),
    /// Split/reassemble messages across a bounded MTU.
    Segmentation(Segmentation),
    /// Outbound message accumulation across timing domains.
    Buffer(Buffer),
    /// Passthrough hex tracing.
    Print(Print),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            LayerKind::AsciiEscape($inner) => $body,
            LayerKind::Terminal($inner) => $body,
            LayerKind::Arq($inner) => $body,
            LayerKind::Crc8($inner) => $body,
            LayerKind::Crc16($inner) => $body,
            LayerKind::Segmentation($inner) => $body,
            LayerKind::Buffer($inner) => $body,
            LayerKind::Print($inner) => $body,
        }
    };
}

impl Layer for LayerKind {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        dispatch!(self, inner => inner.encode(data, last, ctx))
    }

    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        dispatch!(self, inner => inner.decode(data, last, ctx))
    }

    fn overhead(&self) -> usize {
        dispatch!(self, inner => inner.overhead())
    }

    fn mtu_for_upper(&self, lower: usize) -> usize {
        dispatch!(self, inner => inner.mtu_for_upper(lower))
    }

    fn set_lower_mtu(&mut self, mtu: usize) {
        dispatch!(self, inner => inner.set_lower_mtu(mtu))
    }

    fn flush(&mut self, ctx: &mut Context<'_, '_, '_>) -> Result<(), ProtocolError> {
        dispatch!(self, inner => inner.flush(ctx))
    }

    fn idle(&self) -> bool {
        dispatch!(self, inner => inner.idle())
    }

    fn poll_time(
        &mut self,
        now_ms: u64,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        dispatch!(self, inner => inner.poll_time(now_ms, ctx))
    }
}

/// Initial byte arena capacity; grows on demand and is recycled afterwards.
const ARENA_CAPACITY: usize = 4096;

/// An assembled protocol stack.
pub struct Stack {
    layers: Vec<LayerKind>,
    jobs: VecDeque<Job>,
    arena: Vec<u8>,
    scratch: Vec<u8>,
    mtu: usize,
}

impl Stack {
    /// Assemble a stack from layers ordered top (application side) to
    /// bottom (transport side), over a transport with the given MTU
    /// (`0` = unlimited).
    pub fn new(layers: Vec<LayerKind>, transport_mtu: usize) -> Self {
        let mut stack = Self {
            layers,
            jobs: VecDeque::new(),
            arena: Vec::with_capacity(ARENA_CAPACITY),
            scratch: Vec::with_capacity(ARENA_CAPACITY),
            mtu: 0,
        };

        stack.set_transport_mtu(transport_mtu);

        stack
    }

    /// Re-derive every layer's MTU from a new transport MTU.
    pub fn set_transport_mtu(&mut self, transport_mtu: usize) {
        let mut mtu = transport_mtu;

        for layer in self.layers.iter_mut().rev() {
            layer.set_lower_mtu(mtu);

            let upper = layer.mtu_for_upper(mtu);

            if upper == 0 && mtu != 0 {
                fmt::warning!("layer overhead consumes the whole transport MTU of {}", mtu);
            }

            mtu = upper;
        }

        self.mtu = mtu;
    }

    /// Maximum size of one application message, `0` = unlimited.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Send an application message (or a chunk of one) down the stack.
    pub fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        io: &mut StackIo<'_, '_>,
    ) -> Result<(), ProtocolError> {
        let start = self.arena.len();

        self.arena.extend_from_slice(data);
        self.jobs.push_back(Job {
            up: false,
            target: 0,
            start,
            len: data.len(),
            last,
        });

        self.run(io)
    }

    /// Feed bytes read from the transport up the stack. `last` marks a
    /// transport-level message boundary; byte-stream transports pass
    /// `false` and rely on a framing layer.
    pub fn feed(
        &mut self,
        data: &[u8],
        last: bool,
        io: &mut StackIo<'_, '_>,
    ) -> Result<(), ProtocolError> {
        let start = self.arena.len();

        self.arena.extend_from_slice(data);
        self.jobs.push_back(Job {
            up: true,
            target: self.layers.len() as isize - 1,
            start,
            len: data.len(),
            last,
        });

        self.run(io)
    }

    /// Advance time-driven behaviour in every layer.
    pub fn poll_time(&mut self, now_ms: u64, io: &mut StackIo<'_, '_>) -> Result<(), ProtocolError> {
        for i in 0..self.layers.len() {
            let mut ctx = Context {
                layer: i as isize,
                jobs: &mut self.jobs,
                arena: &mut self.arena,
                io,
            };

            self.layers[i].poll_time(now_ms, &mut ctx)?;
            self.run(io)?;
        }

        Ok(())
    }

    /// Release buffered output in every layer, top to bottom.
    pub fn flush(&mut self, io: &mut StackIo<'_, '_>) -> Result<(), ProtocolError> {
        for i in 0..self.layers.len() {
            let mut ctx = Context {
                layer: i as isize,
                jobs: &mut self.jobs,
                arena: &mut self.arena,
                io,
            };

            self.layers[i].flush(&mut ctx)?;
            self.run(io)?;
        }

        Ok(())
    }

    /// `true` if no layer holds buffered state.
    pub fn idle(&self) -> bool {
        self.jobs.is_empty() && self.layers.iter().all(Layer::idle)
    }

    fn run(&mut self, io: &mut StackIo<'_, '_>) -> Result<(), ProtocolError> {
        while let Some(job) = self.jobs.pop_front() {
            self.scratch.clear();
            self.scratch
                .extend_from_slice(&self.arena[job.start..job.start + job.len]);

            if self.jobs.is_empty() {
                // No queued job references the arena any more.
                self.arena.clear();
            }

            let result = if job.up {
                if job.target < 0 {
                    (io.up)(&self.scratch, job.last);

                    Ok(())
                } else {
                    let idx = job.target as usize;
                    let mut ctx = Context {
                        layer: job.target,
                        jobs: &mut self.jobs,
                        arena: &mut self.arena,
                        io,
                    };

                    self.layers[idx].decode(&self.scratch, job.last, &mut ctx)
                }
            } else if job.target as usize == self.layers.len() {
                (io.down)(&self.scratch, job.last)
            } else {
                let idx = job.target as usize;
                let mut ctx = Context {
                    layer: job.target,
                    jobs: &mut self.jobs,
                    arena: &mut self.arena,
                    io,
                };

                self.layers[idx].encode(&self.scratch, job.last, &mut ctx)
            };

            match result {
                Ok(()) => {}
                // Inbound faults recover locally: the message is dropped and
                // the sender's ARQ (if any) will retransmit.
                Err(e) if job.up => {
                    fmt::debug!("dropped inbound message: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod harness {
    //! Helpers shared by the layer unit tests.

    use super::*;
    use alloc::vec::Vec;

    /// Captured output of driving a stack.
    #[derive(Debug, Default)]
    pub struct Capture {
        /// Fully reassembled upward messages.
        pub up: Vec<Vec<u8>>,
        /// Transport-level downward messages (split at `last`).
        pub down: Vec<Vec<u8>>,
        /// Sideband bytes.
        pub sideband: Vec<u8>,
        /// Raised events.
        pub events: Vec<StackEvent>,
        up_partial: Vec<u8>,
        down_partial: Vec<u8>,
    }

    impl Capture {
        pub fn drive<R>(
            &mut self,
            f: impl FnOnce(&mut StackIo<'_, '_>) -> R,
        ) -> R {
            let Self {
                up,
                down,
                sideband,
                events,
                up_partial,
                down_partial,
            } = self;

            let mut up_fn = |data: &[u8], last: bool| {
                up_partial.extend_from_slice(data);

                if last {
                    up.push(core::mem::take(up_partial));
                }
            };

            let mut down_fn = |data: &[u8], last: bool| -> Result<(), ProtocolError> {
                down_partial.extend_from_slice(data);

                if last {
                    down.push(core::mem::take(down_partial));
                }

                Ok(())
            };

            let mut sideband_fn = |data: &[u8]| {
                sideband.extend_from_slice(data);
            };

            let mut event_fn = |event: StackEvent| {
                events.push(event);
            };

            let mut io = StackIo {
                up: &mut up_fn,
                down: &mut down_fn,
                sideband: Some(&mut sideband_fn),
                event: Some(&mut event_fn),
            };

            f(&mut io)
        }
    }
}
