//! Escaping of ASCII-unsafe bytes.
//!
//! Serial consoles and flow-controlled UARTs eat control bytes. On encode
//! this layer replaces every byte of a configurable unsafe set with
//! `DEL (byte | 0x40)`, and DEL itself with `DEL DEL`. On decode, `DEL x`
//! becomes `x & 0x1f` (or DEL for `DEL DEL`), which is why only bytes below
//! `0x20`, plus DEL, can be members of the set. The encoded output never
//! contains an unsafe byte and decode(encode(x)) = x for arbitrary binary
//! payloads.

use super::Context;
use crate::error::ProtocolError;

const DEL: u8 = 0x7f;
const XON: u8 = 0x11;
const XOFF: u8 = 0x13;
const ESC: u8 = 0x1b;
const CR: u8 = 0x0d;

/// Default unsafe set: NUL, XON, XOFF, ESC, CR and DEL.
pub const DEFAULT_UNSAFE: &[u8] = &[0x00, XON, XOFF, ESC, CR, DEL];

/// The escape layer. Sits at the top of a textual stack, directly above
/// [`Terminal`](super::Terminal), so frame markers stay intact.
pub struct AsciiEscape {
    /// Bit per byte value 0..0x20; DEL is always escaped.
    mask: u32,
    /// Decode saw a DEL and awaits its successor.
    pending: bool,
}

impl Default for AsciiEscape {
    fn default() -> Self {
        Self::new()
    }
}

impl AsciiEscape {
    /// Escape the [`DEFAULT_UNSAFE`] set.
    pub fn new() -> Self {
        // new() only feeds bytes from the valid range, so this cannot fail.
        Self::with_set(DEFAULT_UNSAFE).unwrap_or(Self {
            mask: 0,
            pending: false,
        })
    }

    /// Escape a custom set. Every member must be `< 0x20` or DEL; anything
    /// else cannot be represented by the `& 0x1f` unescape rule.
    pub fn with_set(set: &[u8]) -> Result<Self, ProtocolError> {
        let mut mask = 0u32;

        for b in set {
            match *b {
                DEL => {}
                b if b < 0x20 => mask |= 1 << b,
                _ => return Err(ProtocolError::BadFrame),
            }
        }

        Ok(Self {
            mask,
            pending: false,
        })
    }

    fn is_unsafe(&self, b: u8) -> bool {
        b == DEL || (b < 0x20 && self.mask & (1 << b) != 0)
    }
}

impl super::Layer for AsciiEscape {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        let mut rest = data;

        loop {
            let split = rest.iter().position(|b| self.is_unsafe(*b));

            match split {
                Some(i) => {
                    if i > 0 {
                        ctx.down(&rest[..i], false);
                    }

                    let b = rest[i];
                    let pair = if b == DEL {
                        [DEL, DEL]
                    } else {
                        [DEL, b | 0x40]
                    };

                    rest = &rest[i + 1..];

                    ctx.down(&pair, last && rest.is_empty());
                }
                None => {
                    if !rest.is_empty() || last {
                        ctx.down(rest, last);
                    }

                    return Ok(());
                }
            }
        }
    }

    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        let mut rest = data;

        while !rest.is_empty() {
            if self.pending {
                self.pending = false;

                let b = rest[0];
                let unescaped = if b == DEL { DEL } else { b & 0x1f };

                rest = &rest[1..];

                ctx.up(&[unescaped], last && rest.is_empty());

                continue;
            }

            match rest.iter().position(|b| *b == DEL) {
                Some(i) => {
                    if i > 0 {
                        ctx.up(&rest[..i], false);
                    }

                    self.pending = true;
                    rest = &rest[i + 1..];
                }
                None => {
                    ctx.up(rest, last);
                    rest = &[];
                }
            }
        }

        if last && self.pending {
            self.pending = false;

            // An escape split across the end of a message is unrecoverable.
            return Err(ProtocolError::BadFrame);
        }

        if last && data.is_empty() {
            ctx.up(&[], true);
        }

        Ok(())
    }

    fn idle(&self) -> bool {
        !self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::Capture;
    use super::super::{Layer, LayerKind, Stack};
    use super::*;
    use alloc::vec::Vec;

    fn escape_stack() -> Stack {
        Stack::new(alloc::vec![LayerKind::AsciiEscape(AsciiEscape::new())], 0)
    }

    #[test]
    fn unsafe_bytes_are_escaped() {
        let mut stack = escape_stack();
        let mut cap = Capture::default();

        cap.drive(|io| stack.encode(b"a\x00b\x1bc\x7f", true, io))
            .unwrap();

        assert_eq!(cap.down, [b"a\x7f\x40b\x7f\x5bc\x7f\x7f".to_vec()]);

        // DEL remains as the escape prefix; every other unsafe byte is gone.
        for msg in &cap.down {
            assert!(!msg
                .iter()
                .any(|b| *b != DEL && DEFAULT_UNSAFE.contains(b)));
        }
    }

    #[test]
    fn round_trip_arbitrary_bytes() {
        let mut stack = escape_stack();
        let mut cap = Capture::default();

        let payload: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();

        cap.drive(|io| stack.encode(&payload, true, io)).unwrap();

        let encoded = cap.down.remove(0);

        cap.drive(|io| stack.feed(&encoded, true, io)).unwrap();

        assert_eq!(cap.up, [payload]);
    }

    #[test]
    fn escape_survives_chunk_split() {
        let mut stack = escape_stack();
        let mut cap = Capture::default();

        // DEL in one chunk, its successor in the next.
        cap.drive(|io| stack.feed(b"a\x7f", false, io)).unwrap();
        cap.drive(|io| stack.feed(b"\x40b", true, io)).unwrap();

        assert_eq!(cap.up, [b"a\x00b".to_vec()]);
    }

    #[test]
    fn dangling_escape_is_rejected() {
        let mut ascii = AsciiEscape::new();
        let mut jobs = alloc::collections::VecDeque::new();
        let mut arena = Vec::new();
        let mut cap = Capture::default();

        let result = cap.drive(|io| {
            let mut ctx = Context {
                layer: 0,
                jobs: &mut jobs,
                arena: &mut arena,
                io,
            };

            ascii.decode(b"a\x7f", true, &mut ctx)
        });

        assert_eq!(result, Err(ProtocolError::BadFrame));
        assert!(ascii.idle());
    }

    #[test]
    fn custom_set_is_validated() {
        assert!(AsciiEscape::with_set(&[0x00, 0x11]).is_ok());
        assert!(AsciiEscape::with_set(&[b'A']).is_err());
    }
}
