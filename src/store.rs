//! Store data model: a fixed set of typed objects over a contiguous buffer.
//!
//! Concrete stores are emitted by the (external) generator; they embed a
//! [`StoreCore`] for the buffer and journal mechanics and implement [`Store`]
//! on top to expose their directory blob and dispatch function callbacks.
//! Everything else in this crate (debugger, synchronizer) works against the
//! trait only.

use crate::directory::{Directory, ObjectRef};
use crate::error::{DirectoryError, Error, ValueError};
use crate::journal::Journal;
use crate::types::{Type, Value};
use crate::util;
use alloc::vec::Vec;
use storelink_wire::Endian;

/// A store's 160-bit content hash, computed by the generator over the
/// canonicalized store definition. Identifies the store on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StoreHash(pub [u8; 20]);

impl StoreHash {
    /// Parse 40 hex characters.
    pub fn from_hex(text: &[u8]) -> Option<Self> {
        if text.len() != 40 {
            return None;
        }

        let mut out = [0u8; 20];

        for (i, pair) in text.chunks_exact(2).enumerate() {
            out[i] = util::hex_digit(pair[0])? << 4 | util::hex_digit(pair[1])?;
        }

        Some(Self(out))
    }

    /// The 40-character lowercase hex form used on the wire and in logs.
    pub fn write_hex(&self, out: &mut Vec<u8>) {
        util::hex_encode(&self.0, out);
    }
}

impl core::fmt::Display for StoreHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }

        Ok(())
    }
}

/// Direction of a function-object callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FunctionOp {
    /// Produce the current value into the buffer; returns the byte count.
    Read,
    /// Consume the value from the buffer.
    Write,
}

/// Buffer and journal mechanics shared by every generated store.
#[derive(Debug, Clone)]
pub struct StoreCore {
    hash: StoreHash,
    endian: Endian,
    buf: Vec<u8>,
    journal: Journal,
}

impl StoreCore {
    /// Build over an initial buffer. `objects` lists every buffer-backed
    /// object as `(offset, size)` for the journal.
    pub fn new(
        hash: StoreHash,
        endian: Endian,
        buf: Vec<u8>,
        objects: impl IntoIterator<Item = (u32, u16)>,
    ) -> Self {
        Self {
            hash,
            endian,
            buf,
            journal: Journal::new(objects),
        }
    }

    /// The store's content hash.
    pub fn hash(&self) -> &StoreHash {
        &self.hash
    }

    /// Byte order of the buffer and of wire fields.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The raw object buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// The change journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Bytes of the object at `key`.
    pub fn read_bytes(&self, key: u32, size: u16) -> Result<&[u8], ValueError> {
        let start = key as usize;

        self.buf
            .get(start..start + usize::from(size))
            .ok_or(ValueError::BadKey)
    }

    /// Overwrite the object at `key` and stamp the journal. `data` must be
    /// exactly the object's tracked size.
    pub fn write_bytes(&mut self, key: u32, data: &[u8]) -> Result<u64, ValueError> {
        let size = self.journal.size_of(key).ok_or(ValueError::BadKey)?;

        if usize::from(size) != data.len() {
            return Err(ValueError::Size {
                expected: size,
                given: data.len(),
            });
        }

        let start = key as usize;

        self.buf
            .get_mut(start..start + data.len())
            .ok_or(ValueError::BadKey)?
            .copy_from_slice(data);

        // write_bytes only accepts tracked keys, so touch cannot fail.
        Ok(self.journal.touch(key).unwrap_or_default())
    }

    /// Replace the whole buffer (a synchronizer Welcome) and stamp every
    /// tracked object so other peers see the change.
    pub fn overwrite(&mut self, data: &[u8]) -> Result<(), ValueError> {
        if data.len() != self.buf.len() {
            return Err(ValueError::Size {
                expected: self.buf.len() as u16,
                given: data.len(),
            });
        }

        self.buf.copy_from_slice(data);

        // Stamp every object, not just the changed ones: peers behind other
        // connections have no way to diff against the old buffer.
        let keys: Vec<u32> = self.journal.entries().map(|e| e.key).collect();

        for key in keys {
            self.journal.touch(key);
        }

        Ok(())
    }
}

/// A code-generated store instance.
pub trait Store {
    /// Shared buffer/journal mechanics.
    fn core(&self) -> &StoreCore;

    /// Mutable access to the mechanics.
    fn core_mut(&mut self) -> &mut StoreCore;

    /// The store's name directory.
    fn directory(&self) -> Directory<'_>;

    /// Dispatch a function object. `data` holds the value in the store's
    /// byte order; `Read` fills it and returns the produced length, `Write`
    /// consumes it and returns the consumed length.
    fn call_function(
        &mut self,
        key: u32,
        op: FunctionOp,
        data: &mut [u8],
    ) -> Result<usize, Error>;
}

/// Typed object access on top of [`Store`]. Blanket-implemented.
pub trait StoreExt: Store {
    /// Resolve a possibly-abbreviated name.
    fn lookup(&self, name: &str) -> Result<ObjectRef, DirectoryError> {
        self.directory().lookup(name)
    }

    /// Read an object's value as raw big-endian bytes (the debugger wire
    /// order), appended to `out`.
    fn read_object(&mut self, obj: &ObjectRef, out: &mut Vec<u8>) -> Result<(), Error> {
        let endian = self.core().endian();
        let ty = obj.tag.ty();

        let mut scratch = [0u8; crate::MAX_NAME];
        let native: &[u8] = if obj.tag.is_function() {
            let len = usize::from(obj.size).min(scratch.len());
            let produced = self.call_function(obj.key, FunctionOp::Read, &mut scratch[..len])?;

            &scratch[..produced]
        } else {
            self.core().read_bytes(obj.key, obj.size)?
        };

        match ty.size() {
            Some(_) => {
                let value = Value::read(ty, native, endian).map_err(Error::Wire)?;
                let mut be = [0u8; 8];

                value.write(&mut be, Endian::Big).map_err(Error::Wire)?;
                out.extend_from_slice(&be[..value.size()]);
            }
            // Blobs and strings have no byte order; pass through.
            None => out.extend_from_slice(native),
        }

        Ok(())
    }

    /// Write raw big-endian bytes (the debugger wire order) to an object.
    ///
    /// Scalars require exactly the object's size; strings accept shorter
    /// payloads and are zero-padded.
    fn write_object(&mut self, obj: &ObjectRef, data: &[u8]) -> Result<(), Error> {
        let endian = self.core().endian();
        let ty = obj.tag.ty();
        let size = usize::from(obj.size);

        let mut native = [0u8; crate::MAX_NAME];

        let native: &mut [u8] = match ty.size() {
            Some(_) => {
                let value = Value::from_be_bytes(ty, data).map_err(Error::Value)?;

                value
                    .write(&mut native[..size], endian)
                    .map_err(Error::Wire)?;

                &mut native[..size]
            }
            None => {
                if size > native.len()
                    || data.len() > size
                    || (ty == Type::Blob && data.len() != size)
                {
                    return Err(Error::Value(ValueError::Size {
                        expected: obj.size,
                        given: data.len(),
                    }));
                }

                native[..data.len()].copy_from_slice(data);
                native[data.len()..size].fill(0);

                &mut native[..size]
            }
        };

        if obj.tag.is_function() {
            self.call_function(obj.key, FunctionOp::Write, native)?;
        } else {
            self.core_mut()
                .write_bytes(obj.key, native)
                .map_err(Error::Value)?;
        }

        Ok(())
    }

    /// Read a scalar object as a [`Value`].
    fn get(&mut self, obj: &ObjectRef) -> Result<Value, Error> {
        let endian = self.core().endian();
        let ty = obj.tag.ty();

        if ty.size().is_none() {
            return Err(Error::Value(ValueError::NotScalar));
        }

        if obj.tag.is_function() {
            let mut scratch = [0u8; 8];
            let len = usize::from(obj.size).min(8);

            self.call_function(obj.key, FunctionOp::Read, &mut scratch[..len])?;

            Value::read(ty, &scratch, endian).map_err(Error::Wire)
        } else {
            let raw = self.core().read_bytes(obj.key, obj.size)?;

            Value::read(ty, raw, endian).map_err(Error::Wire)
        }
    }

    /// Write a scalar object from a [`Value`], saturating across kinds.
    fn set(&mut self, obj: &ObjectRef, value: Value) -> Result<(), Error> {
        let endian = self.core().endian();
        let ty = obj.tag.ty();

        let value =
            util::saturating_cast(value, ty).ok_or(Error::Value(ValueError::NotScalar))?;

        let mut native = [0u8; 8];

        value
            .write(&mut native[..value.size()], endian)
            .map_err(Error::Wire)?;

        if obj.tag.is_function() {
            self.call_function(obj.key, FunctionOp::Write, &mut native[..value.size()])?;

            Ok(())
        } else {
            self.core_mut()
                .write_bytes(obj.key, &native[..value.size()])
                .map_err(Error::Value)?;

            Ok(())
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
