//! Message extraction from a textual stream.
//!
//! Debugger messages share a terminal with ordinary program output. On
//! encode every message is wrapped in the ANSI APC/ST pair `ESC _` ... `ESC
//! \`, which well-behaved terminal emulators swallow. On decode a four-state
//! machine extracts framed messages and forwards everything in between to
//! the sideband sink (typically echoed to the local stdout), so a human and
//! the debugger can use the same UART.

use super::Context;
use crate::error::ProtocolError;

const ESC: u8 = 0x1b;
const APC: u8 = b'_';
const ST: u8 = b'\\';

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    /// Between frames; bytes belong to the terminal.
    Idle,
    /// Saw ESC between frames.
    IdleEsc,
    /// Inside a frame; bytes belong to the message.
    Msg,
    /// Saw ESC inside a frame.
    MsgEsc,
}

/// APC framing layer.
pub struct Terminal {
    state: State,
    /// Encode emitted the opening marker of the current message.
    started: bool,
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal {
    /// A terminal layer in the idle state.
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            started: false,
        }
    }
}

impl super::Layer for Terminal {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        if !self.started {
            ctx.down(&[ESC, APC], false);

            self.started = true;
        }

        if !data.is_empty() {
            ctx.down(data, false);
        }

        if last {
            ctx.down(&[ESC, ST], true);

            self.started = false;
        }

        Ok(())
    }

    fn decode(
        &mut self,
        data: &[u8],
        _last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        // Runs of same-class bytes are forwarded in one piece.
        let mut run_start = 0usize;
        let mut i = 0usize;

        let flush_run = |this: &Terminal,
                         ctx: &mut Context<'_, '_, '_>,
                         run: &[u8]| {
            if run.is_empty() {
                return;
            }

            match this.state {
                State::Idle => ctx.sideband(run),
                State::Msg => ctx.up(run, false),
                _ => {}
            }
        };

        while i < data.len() {
            let b = data[i];

            match self.state {
                State::Idle | State::Msg => {
                    if b == ESC {
                        flush_run(self, ctx, &data[run_start..i]);

                        self.state = if self.state == State::Idle {
                            State::IdleEsc
                        } else {
                            State::MsgEsc
                        };
                    }
                }
                State::IdleEsc => {
                    match b {
                        APC => {
                            self.state = State::Msg;
                        }
                        ESC => {
                            // The held ESC was terminal output after all.
                            ctx.sideband(&[ESC]);
                        }
                        _ => {
                            ctx.sideband(&[ESC, b]);

                            self.state = State::Idle;
                        }
                    }

                    run_start = i + 1;
                }
                State::MsgEsc => {
                    match b {
                        ST => {
                            ctx.up(&[], true);

                            self.state = State::Idle;
                        }
                        ESC => {
                            // The held ESC was message payload.
                            ctx.up(&[ESC], false);
                        }
                        _ => {
                            ctx.up(&[ESC, b], false);

                            self.state = State::Msg;
                        }
                    }

                    run_start = i + 1;
                }
            }

            i += 1;
        }

        flush_run(self, ctx, &data[run_start..]);

        Ok(())
    }

    fn overhead(&self) -> usize {
        4
    }

    fn idle(&self) -> bool {
        matches!(self.state, State::Idle) && !self.started
    }
}
