//! Builtin implementations for the primitive scalar types a store can hold.

use crate::{Endian, WireError, WireScalar};

macro_rules! impl_primitive_wire_scalar {
    ($ty:ty, $size:expr) => {
        impl WireScalar for $ty {
            const PACKED_LEN: usize = $size;

            type Buffer = [u8; $size];

            fn pack(&self, endian: Endian) -> Self::Buffer {
                match endian {
                    Endian::Little => self.to_le_bytes(),
                    Endian::Big => self.to_be_bytes(),
                }
            }

            fn unpack_from_slice(buf: &[u8], endian: Endian) -> Result<Self, WireError> {
                buf.get(0..$size)
                    .ok_or(WireError::Buffer)
                    .and_then(|raw| raw.try_into().map_err(|_| WireError::Buffer))
                    .map(|raw| match endian {
                        Endian::Little => Self::from_le_bytes(raw),
                        Endian::Big => Self::from_be_bytes(raw),
                    })
            }
        }
    };
}

impl_primitive_wire_scalar!(u8, 1);
impl_primitive_wire_scalar!(u16, 2);
impl_primitive_wire_scalar!(u32, 4);
impl_primitive_wire_scalar!(u64, 8);
impl_primitive_wire_scalar!(i8, 1);
impl_primitive_wire_scalar!(i16, 2);
impl_primitive_wire_scalar!(i32, 4);
impl_primitive_wire_scalar!(i64, 8);
impl_primitive_wire_scalar!(f32, 4);
impl_primitive_wire_scalar!(f64, 8);

impl WireScalar for bool {
    const PACKED_LEN: usize = 1;

    type Buffer = [u8; 1];

    fn pack(&self, _endian: Endian) -> Self::Buffer {
        [*self as u8]
    }

    fn unpack_from_slice(buf: &[u8], _endian: Endian) -> Result<Self, WireError> {
        buf.first().map(|raw| *raw != 0).ok_or(WireError::Buffer)
    }
}
