//! Endian-aware scalar packing shared by the `storelink` store accessors,
//! debugger and synchronizer wire codecs.
//!
//! A store declares the byte order of its buffer and of every multi-byte
//! field it puts on the wire. That flag is only known at runtime, so unlike
//! fixed-endian protocols the pack/unpack entry points here all take an
//! [`Endian`] argument.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

mod error;
mod impls;

pub use error::WireError;

/// Byte order of a store buffer and its wire representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Endian {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// Byte order of the host this code runs on.
    pub const fn native() -> Self {
        #[cfg(target_endian = "little")]
        {
            Endian::Little
        }
        #[cfg(target_endian = "big")]
        {
            Endian::Big
        }
    }

    /// `true` if this order differs from the host's.
    pub fn is_foreign(self) -> bool {
        self != Self::native()
    }
}

/// A fixed-size scalar that can be packed to and unpacked from a byte slice
/// in a given byte order.
pub trait WireScalar: Sized + Copy {
    /// Packed size in bytes.
    const PACKED_LEN: usize;

    /// Always `[u8; Self::PACKED_LEN]`.
    type Buffer: AsRef<[u8]> + AsMut<[u8]> + Default;

    /// Pack into a fixed-size array.
    fn pack(&self, endian: Endian) -> Self::Buffer;

    /// Pack into the beginning of `buf`, returning the written chunk.
    fn pack_to_slice<'buf>(
        &self,
        endian: Endian,
        buf: &'buf mut [u8],
    ) -> Result<&'buf [u8], WireError> {
        let chunk = buf.get_mut(0..Self::PACKED_LEN).ok_or(WireError::Buffer)?;

        chunk.copy_from_slice(self.pack(endian).as_ref());

        Ok(chunk)
    }

    /// Unpack from the beginning of `buf`.
    fn unpack_from_slice(buf: &[u8], endian: Endian) -> Result<Self, WireError>;
}

/// Write the low `width` bytes of `value` into the front of `buf`.
///
/// Used for the synchronizer's variable-width key/length fields, whose width
/// depends on the store buffer size. `width` must be 1..=8.
pub fn put_uint(buf: &mut [u8], value: u64, width: usize, endian: Endian) -> Result<(), WireError> {
    if width == 0 || width > 8 {
        return Err(WireError::Width);
    }

    let chunk = buf.get_mut(0..width).ok_or(WireError::Buffer)?;

    match endian {
        Endian::Little => chunk.copy_from_slice(&value.to_le_bytes()[..width]),
        Endian::Big => chunk.copy_from_slice(&value.to_be_bytes()[8 - width..]),
    }

    Ok(())
}

/// Read a `width`-byte unsigned integer from the front of `buf`.
pub fn get_uint(buf: &[u8], width: usize, endian: Endian) -> Result<u64, WireError> {
    if width == 0 || width > 8 {
        return Err(WireError::Width);
    }

    let chunk = buf.get(0..width).ok_or(WireError::Buffer)?;

    let mut raw = [0u8; 8];

    match endian {
        Endian::Little => raw[..width].copy_from_slice(chunk),
        Endian::Big => raw[8 - width..].copy_from_slice(chunk),
    }

    Ok(match endian {
        Endian::Little => u64::from_le_bytes(raw),
        Endian::Big => u64::from_be_bytes(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_field_round_trip() {
        let mut buf = [0u8; 4];

        put_uint(&mut buf, 0x0012_3456, 3, Endian::Big).unwrap();

        assert_eq!(buf, [0x12, 0x34, 0x56, 0x00]);
        assert_eq!(get_uint(&buf, 3, Endian::Big).unwrap(), 0x0012_3456);

        put_uint(&mut buf, 0x0012_3456, 3, Endian::Little).unwrap();

        assert_eq!(buf, [0x56, 0x34, 0x12, 0x00]);
        assert_eq!(get_uint(&buf, 3, Endian::Little).unwrap(), 0x0012_3456);
    }

    #[test]
    fn uint_field_bad_width() {
        let mut buf = [0u8; 16];

        assert_eq!(
            put_uint(&mut buf, 1, 0, Endian::Little),
            Err(WireError::Width)
        );
        assert_eq!(
            put_uint(&mut buf, 1, 9, Endian::Little),
            Err(WireError::Width)
        );
        assert_eq!(get_uint(&buf, 9, Endian::Big), Err(WireError::Width));
    }

    #[test]
    fn uint_field_short_buffer() {
        let mut buf = [0u8; 2];

        assert_eq!(
            put_uint(&mut buf, 1, 4, Endian::Little),
            Err(WireError::Buffer)
        );
        assert_eq!(get_uint(&buf, 4, Endian::Little), Err(WireError::Buffer));
    }
}
