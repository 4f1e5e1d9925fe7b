//! Stop-and-wait ARQ with reset handshake.
//!
//! Every transport-level message starts with one header byte:
//!
//! ```text
//! [ ACK:1 | NOP:1 | seq:6 ]
//! ```
//!
//! Sequence 0 is reserved for RESET; data sequences run 1..=63 and wrap back
//! to 1. Each direction handshakes independently: a side opens its outbound
//! direction by sending a bare RESET header and waiting for `ACK|0`, then
//! numbers its messages from 1. The receiver acknowledges the expected
//! sequence and delivers it, re-acknowledges the previous sequence without
//! re-delivering (the ack was lost), and stays silent on anything else so
//! the sender times out and retransmits. The front of the outbound FIFO is
//! retained until acknowledged, which makes retransmission allocation-free.
//!
//! With diagnostics enabled (the debugger profile) the layer reports
//! connect, retransmit and reset transitions on the stack's event sink.

use super::{Context, StackEvent};
use crate::error::ProtocolError;
use crate::fmt;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

const ACK: u8 = 0x80;
const NOP: u8 = 0x40;
const SEQ_MASK: u8 = 0x3f;
const RESET_SEQ: u8 = 0;

/// ARQ tuning knobs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArqConfig {
    /// How long to wait for an acknowledgement before retransmitting.
    pub ack_timeout_ms: u64,
    /// Retransmissions per message before the layer gives up and restarts
    /// the handshake. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Outbound FIFO depth; a full FIFO back-pressures `encode`.
    pub max_queue: usize,
    /// Emit keep-alive NOP frames after this much outbound silence.
    pub keep_alive_ms: Option<u64>,
    /// Report [`StackEvent`] diagnostics.
    pub diagnostics: bool,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 100,
            max_retries: Some(10),
            max_queue: 8,
            keep_alive_ms: None,
            diagnostics: true,
        }
    }
}

impl ArqConfig {
    /// The profile used under a debugger session: diagnostics on, generous
    /// retries.
    pub fn debug() -> Self {
        Self {
            max_retries: None,
            ..Self::default()
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SendState {
    /// Must (re)start the handshake.
    Reset,
    /// RESET sent, waiting for `ACK|0`.
    Connecting,
    /// Connected, nothing in flight.
    Idle,
    /// Front of the FIFO is in flight, waiting for its ack.
    Waiting,
}

/// Stop-and-wait ARQ layer.
pub struct Arq {
    cfg: ArqConfig,
    /// Outbound message under accumulation.
    enc: Vec<u8>,
    /// Complete outbound messages; front stays until acknowledged.
    queue: VecDeque<Vec<u8>>,
    send_state: SendState,
    /// Sequence of the in-flight (or next) outbound message.
    send_seq: u8,
    retries: u32,
    /// Ack deadline, valid in `Connecting`/`Waiting`.
    deadline: u64,
    /// Expected inbound sequence; 0 until the peer's RESET arrives.
    recv_expected: u8,
    /// Timestamp of the most recent `poll_time`.
    now: u64,
    /// Timestamp of the last outbound transmission.
    last_tx: u64,
}

impl Arq {
    /// An ARQ layer in the reset state; the handshake starts on the first
    /// `poll_time`.
    pub fn new(cfg: ArqConfig) -> Self {
        Self {
            cfg,
            enc: Vec::new(),
            queue: VecDeque::new(),
            send_state: SendState::Reset,
            send_seq: 1,
            retries: 0,
            deadline: 0,
            recv_expected: 0,
            now: 0,
            last_tx: 0,
        }
    }

    fn next_seq(seq: u8) -> u8 {
        if seq >= SEQ_MASK {
            1
        } else {
            seq + 1
        }
    }

    fn prev_seq(seq: u8) -> u8 {
        if seq <= 1 {
            SEQ_MASK
        } else {
            seq - 1
        }
    }

    fn send_reset(&mut self, ctx: &mut Context<'_, '_, '_>) {
        ctx.down(&[RESET_SEQ], true);

        self.send_state = SendState::Connecting;
        self.deadline = self.now + self.cfg.ack_timeout_ms;
        self.last_tx = self.now;
    }

    /// Put the front of the FIFO (back) on the wire.
    fn transmit_front(&mut self, ctx: &mut Context<'_, '_, '_>) {
        if let Some(front) = self.queue.front() {
            ctx.down(&[self.send_seq], false);
            ctx.down(front, true);

            self.send_state = SendState::Waiting;
            self.deadline = self.now + self.cfg.ack_timeout_ms;
            self.last_tx = self.now;
        } else {
            self.send_state = SendState::Idle;
        }
    }

    fn on_ack(&mut self, seq: u8, ctx: &mut Context<'_, '_, '_>) {
        match self.send_state {
            SendState::Connecting if seq == RESET_SEQ => {
                self.send_state = SendState::Idle;
                self.send_seq = 1;
                self.retries = 0;

                if self.cfg.diagnostics {
                    ctx.event(StackEvent::ArqConnected);
                }

                self.transmit_front(ctx);
            }
            SendState::Waiting if seq == self.send_seq => {
                self.queue.pop_front();

                self.send_seq = Self::next_seq(self.send_seq);
                self.retries = 0;
                self.send_state = SendState::Idle;

                self.transmit_front(ctx);
            }
            _ => {
                fmt::trace!("stale ack for seq {}", seq);
            }
        }
    }

    fn on_data(&mut self, header: u8, payload: &[u8], ctx: &mut Context<'_, '_, '_>) {
        let seq = header & SEQ_MASK;

        if header & NOP != 0 {
            // Keep-alive; proves liveness, carries nothing.
            return;
        }

        if seq == RESET_SEQ {
            // Peer (re)opened its outbound direction.
            self.recv_expected = 1;

            ctx.down(&[ACK | RESET_SEQ], true);

            return;
        }

        if self.recv_expected == 0 {
            // No RESET seen yet; we cannot judge ordering.
            fmt::debug!("dropping data seq {} before reset handshake", seq);

            return;
        }

        if seq == self.recv_expected {
            ctx.down(&[ACK | seq], true);
            ctx.up(payload, true);

            self.recv_expected = Self::next_seq(self.recv_expected);
        } else if seq == Self::prev_seq(self.recv_expected) {
            // Our ack got lost; re-ack, do not re-deliver.
            ctx.down(&[ACK | seq], true);
        } else {
            // Out of sequence: stay silent so the sender times out.
            fmt::debug!(
                "dropping out-of-sequence message {} (expected {})",
                seq,
                self.recv_expected
            );
        }
    }
}

impl super::Layer for Arq {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        if self.queue.len() >= self.cfg.max_queue {
            return Err(ProtocolError::Backpressure);
        }

        self.enc.extend_from_slice(data);

        if !last {
            return Ok(());
        }

        self.queue.push_back(core::mem::take(&mut self.enc));

        match self.send_state {
            SendState::Idle => self.transmit_front(ctx),
            SendState::Reset => self.send_reset(ctx),
            _ => {}
        }

        Ok(())
    }

    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        // The layer below preserves message boundaries, so a full message
        // arrives in one call.
        if !last {
            return Err(ProtocolError::BadFrame);
        }

        let (header, payload) = match data.split_first() {
            Some(parts) => parts,
            None => return Ok(()),
        };

        if header & ACK != 0 {
            self.on_ack(header & SEQ_MASK, ctx);
        } else {
            self.on_data(*header, payload, ctx);
        }

        Ok(())
    }

    fn overhead(&self) -> usize {
        1
    }

    fn flush(&mut self, ctx: &mut Context<'_, '_, '_>) -> Result<(), ProtocolError> {
        if self.send_state == SendState::Reset {
            self.send_reset(ctx);
        }

        Ok(())
    }

    fn idle(&self) -> bool {
        self.enc.is_empty() && self.queue.is_empty()
    }

    fn poll_time(
        &mut self,
        now_ms: u64,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        self.now = now_ms;

        match self.send_state {
            SendState::Reset => {
                self.send_reset(ctx);
            }
            SendState::Connecting if now_ms >= self.deadline => {
                self.retries += 1;

                if self
                    .cfg
                    .max_retries
                    .is_some_and(|max| self.retries > max)
                {
                    self.retries = 0;
                    self.send_state = SendState::Reset;

                    if self.cfg.diagnostics {
                        ctx.event(StackEvent::ArqReset);
                    }

                    return Err(ProtocolError::Reset);
                }

                self.send_reset(ctx);
            }
            SendState::Waiting if now_ms >= self.deadline => {
                self.retries += 1;

                if self
                    .cfg
                    .max_retries
                    .is_some_and(|max| self.retries > max)
                {
                    // Roll back: the FIFO is retained, the handshake
                    // restarts, delivery resumes from the front.
                    self.retries = 0;
                    self.send_state = SendState::Reset;
                    self.send_seq = 1;

                    if self.cfg.diagnostics {
                        ctx.event(StackEvent::ArqReset);
                    }

                    return Err(ProtocolError::Reset);
                }

                if self.cfg.diagnostics {
                    ctx.event(StackEvent::ArqRetransmit { seq: self.send_seq });
                }

                self.transmit_front(ctx);
            }
            SendState::Idle => {
                if let Some(quiet) = self.cfg.keep_alive_ms {
                    if now_ms.saturating_sub(self.last_tx) >= quiet {
                        ctx.down(&[NOP], true);

                        self.last_tx = now_ms;
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}
