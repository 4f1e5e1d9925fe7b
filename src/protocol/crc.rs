//! Message checksums.
//!
//! CRC-8 (poly `0xa6`) for short frames on tight links, CRC-16 (poly
//! `0xbaad`) for everything else. The checksum is appended to each outbound
//! message; CRC-16 in big-endian order. A mismatch on decode drops the whole
//! message without acknowledgement so that the sender's ARQ times out and
//! retransmits, which is the recovery path for corruption.

use super::Context;
use crate::error::ProtocolError;
use crate::fmt;
use alloc::vec::Vec;
use crc::{Algorithm, Crc};

/// CRC-8, polynomial `0xa6`.
pub const CRC_8_STORELINK: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0xa6,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0x00,
    residue: 0x00,
};

/// CRC-16, polynomial `0xbaad`.
pub const CRC_16_STORELINK: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0xbaad,
    init: 0xffff,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x0000,
    residue: 0x0000,
};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_STORELINK);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_STORELINK);

macro_rules! crc_layer {
    ($name:ident, $doc:literal, $crc:ident, $width:literal) => {
        #[doc = $doc]
        pub struct $name {
            enc: Vec<u8>,
            dec: Vec<u8>,
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// An empty checksum layer.
            pub fn new() -> Self {
                Self {
                    enc: Vec::new(),
                    dec: Vec::new(),
                }
            }
        }

        impl super::Layer for $name {
            fn encode(
                &mut self,
                data: &[u8],
                last: bool,
                ctx: &mut Context<'_, '_, '_>,
            ) -> Result<(), ProtocolError> {
                self.enc.extend_from_slice(data);

                if !last {
                    return Ok(());
                }

                let checksum = $crc.checksum(&self.enc).to_be_bytes();

                ctx.down(&self.enc, false);
                ctx.down(&checksum, true);
                self.enc.clear();

                Ok(())
            }

            fn decode(
                &mut self,
                data: &[u8],
                last: bool,
                ctx: &mut Context<'_, '_, '_>,
            ) -> Result<(), ProtocolError> {
                self.dec.extend_from_slice(data);

                if !last {
                    return Ok(());
                }

                let split = match self.dec.len().checked_sub($width) {
                    Some(split) => split,
                    None => {
                        self.dec.clear();

                        return Err(ProtocolError::BadFrame);
                    }
                };

                let expected = $crc.checksum(&self.dec[..split]).to_be_bytes();

                if self.dec[split..] != expected {
                    fmt::debug!("checksum mismatch on {} byte message", split);
                    self.dec.clear();

                    return Err(ProtocolError::CrcMismatch);
                }

                ctx.up(&self.dec[..split], true);
                self.dec.clear();

                Ok(())
            }

            fn overhead(&self) -> usize {
                $width
            }

            fn idle(&self) -> bool {
                self.enc.is_empty() && self.dec.is_empty()
            }
        }
    };
}

crc_layer!(
    Crc8,
    "Appends/verifies a one-byte CRC per message.",
    CRC8,
    1
);
crc_layer!(
    Crc16,
    "Appends/verifies a two-byte big-endian CRC per message.",
    CRC16,
    2
);

#[cfg(test)]
mod tests {
    use super::super::harness::Capture;
    use super::super::{LayerKind, Stack};
    use super::*;

    #[test]
    fn crc8_round_trip() {
        let mut stack = Stack::new(alloc::vec![LayerKind::Crc8(Crc8::new())], 0);
        let mut cap = Capture::default();

        cap.drive(|io| stack.encode(b"payload", true, io)).unwrap();

        let encoded = cap.down.remove(0);

        assert_eq!(encoded.len(), b"payload".len() + 1);
        assert_eq!(&encoded[..7], b"payload");

        cap.drive(|io| stack.feed(&encoded, true, io)).unwrap();

        assert_eq!(cap.up, [b"payload".to_vec()]);
    }

    #[test]
    fn crc16_rejects_corruption() {
        let mut stack = Stack::new(alloc::vec![LayerKind::Crc16(Crc16::new())], 0);
        let mut cap = Capture::default();

        cap.drive(|io| stack.encode(b"payload", true, io)).unwrap();

        let mut encoded = cap.down.remove(0);

        encoded[3] ^= 0x01;

        // The stack swallows inbound faults; nothing may surface upward.
        cap.drive(|io| stack.feed(&encoded, true, io)).unwrap();

        assert!(cap.up.is_empty());
        assert!(stack.idle());
    }

    #[test]
    fn runt_frame_is_dropped() {
        let mut stack = Stack::new(alloc::vec![LayerKind::Crc16(Crc16::new())], 0);
        let mut cap = Capture::default();

        cap.drive(|io| stack.feed(b"x", true, io)).unwrap();

        assert!(cap.up.is_empty());
        assert!(stack.idle());
    }

    #[test]
    fn crc_differs_per_payload() {
        let a = CRC8.checksum(b"a");
        let b = CRC8.checksum(b"b");

        assert_ne!(a, b);

        let a = CRC16.checksum(b"hello");
        let b = CRC16.checksum(b"hellp");

        assert_ne!(a, b);
    }
}
