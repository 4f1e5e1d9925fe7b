//! Distributed, debuggable key-value stores for embedded devices.
//!
//! A *store* is a fixed, typed collection of named objects backed by a
//! contiguous byte buffer. Two capabilities are layered on top of it:
//!
//! - The [`debugger`]: a request/response protocol exposing every object by
//!   name for external read/write/list/alias/macro/stream access, composable
//!   with any byte transport through the [`protocol`] layer stack.
//! - The [`sync`] module: journaled delta replication that keeps multiple
//!   instances of the same store (identified by its content hash) mutually up
//!   to date across processes or devices.
//!
//! The core is single-threaded cooperative. All timed behaviour takes a
//! caller-provided millisecond timestamp and the only blocking point in a
//! `std` application is [`poller::poll`].

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod debugger;
pub mod directory;
pub mod error;
pub mod journal;
pub mod protocol;
pub mod store;
pub mod sync;
pub mod types;
pub mod util;

#[cfg(all(feature = "std", unix))]
pub mod endpoint;
#[cfg(all(feature = "std", unix))]
pub mod poller;

pub use directory::{Directory, ObjectRef};
pub use error::Error;
pub use journal::Journal;
pub use store::{Store, StoreCore, StoreHash};
pub use storelink_wire::{Endian, WireError, WireScalar};
pub use types::{Type, TypeTag, Value};

/// Debugger wire protocol version reported by the `v` command.
pub const PROTOCOL_VERSION: u8 = b'2';

/// Upper bound on an object name, including its leading `/`.
pub const MAX_NAME: usize = 128;
