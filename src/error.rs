//! Storelink error types.

use storelink_wire::WireError;

/// A storelink error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Error {
    /// A name lookup in a store directory failed.
    Directory(DirectoryError),
    /// A protocol layer failed to encode or decode a message.
    Protocol(ProtocolError),
    /// A debugger request could not be served.
    Debug(DebugError),
    /// A synchronizer message could not be processed.
    Sync(SyncError),
    /// A scalar failed to pack or unpack.
    Wire(WireError),
    /// A value did not match an object's type or size.
    Value(ValueError),
    /// A transport endpoint failed.
    Transport(TransportError),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Directory(e) => write!(f, "directory: {}", e),
            Error::Protocol(e) => write!(f, "protocol: {}", e),
            Error::Debug(e) => write!(f, "debugger: {}", e),
            Error::Sync(e) => write!(f, "sync: {}", e),
            Error::Wire(e) => write!(f, "wire: {}", e),
            Error::Value(e) => write!(f, "value: {}", e),
            Error::Transport(e) => write!(f, "transport: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DirectoryError {}
#[cfg(feature = "std")]
impl std::error::Error for ProtocolError {}
#[cfg(feature = "std")]
impl std::error::Error for DebugError {}
#[cfg(feature = "std")]
impl std::error::Error for SyncError {}
#[cfg(feature = "std")]
impl std::error::Error for ValueError {}
#[cfg(feature = "std")]
impl std::error::Error for TransportError {}

/// Name resolution failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DirectoryError {
    /// No object matches the given name.
    NotFound,
    /// The given abbreviation matches more than one object.
    Ambiguous,
    /// The directory byte code is malformed or truncated.
    BadCode,
}

impl core::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DirectoryError::NotFound => f.write_str("no such object"),
            DirectoryError::Ambiguous => f.write_str("ambiguous abbreviation"),
            DirectoryError::BadCode => f.write_str("malformed directory"),
        }
    }
}

/// Low-level protocol layer error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProtocolError {
    /// A layer cannot accept more outbound data until the peer drains it.
    Backpressure,
    /// A message exceeds a layer's reassembly or queue bound.
    MessageTooLong {
        /// Configured bound in bytes.
        max: usize,
    },
    /// A received checksum did not match its payload.
    ///
    /// The message is dropped without acknowledgement; the sender's ARQ is
    /// expected to time out and retransmit.
    CrcMismatch,
    /// A frame violated a layer's grammar.
    BadFrame,
    /// The ARQ gave up after `max_retries` and reset the connection.
    Reset,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::Backpressure => f.write_str("outbound queue full"),
            ProtocolError::MessageTooLong { max } => {
                write!(f, "message exceeds bound of {} bytes", max)
            }
            ProtocolError::CrcMismatch => f.write_str("checksum mismatch"),
            ProtocolError::BadFrame => f.write_str("malformed frame"),
            ProtocolError::Reset => f.write_str("connection reset"),
        }
    }
}

/// Debugger request failure. Every variant is reported to the client as `?`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DebugError {
    /// Malformed request.
    Parse,
    /// A hex payload could not be decoded.
    BadHex,
    /// Name resolution failed.
    Name(DirectoryError),
    /// An alias, macro or stream limit was hit.
    ResourceExhausted,
    /// The command byte is not supported in this build.
    Unsupported,
}

impl core::fmt::Display for DebugError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DebugError::Parse => f.write_str("malformed request"),
            DebugError::BadHex => f.write_str("bad hex payload"),
            DebugError::Name(e) => write!(f, "name: {}", e),
            DebugError::ResourceExhausted => f.write_str("resource limit reached"),
            DebugError::Unsupported => f.write_str("unsupported command"),
        }
    }
}

/// Synchronizer failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SyncError {
    /// The message addresses a different store; it was passed down the chain.
    HashMismatch,
    /// The message carries a connection id this store has never issued.
    UnknownPeer,
    /// The peer's buffer length differs from ours even though the content
    /// hash matches.
    SchemaDrift {
        /// Local buffer length.
        local: u32,
        /// Length claimed by the peer.
        remote: u32,
    },
    /// The message violated the Hello/Welcome/Update/Bye grammar.
    BadMessage,
    /// The command byte's case does not match this store's endianness flag.
    EndianMismatch,
}

impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SyncError::HashMismatch => f.write_str("message is for another store"),
            SyncError::UnknownPeer => f.write_str("unknown connection id"),
            SyncError::SchemaDrift { local, remote } => write!(
                f,
                "peer buffer is {} bytes, local buffer is {} bytes",
                remote, local
            ),
            SyncError::BadMessage => f.write_str("malformed sync message"),
            SyncError::EndianMismatch => f.write_str("peer endianness mismatch"),
        }
    }
}

/// A value failed to apply to an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ValueError {
    /// The payload length does not match the object size.
    Size {
        /// Object size in bytes.
        expected: u16,
        /// Payload length in bytes.
        given: usize,
    },
    /// The object's type tag does not describe a fixed-size scalar.
    NotScalar,
    /// The key does not refer to an object of this store.
    BadKey,
}

impl core::fmt::Display for ValueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ValueError::Size { expected, given } => {
                write!(f, "expected {} bytes, got {}", expected, given)
            }
            ValueError::NotScalar => f.write_str("object is not a fixed-size scalar"),
            ValueError::BadKey => f.write_str("no object at key"),
        }
    }
}

/// A transport endpoint failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TransportError {
    /// The peer closed the transport; the endpoint should be unbound from
    /// the poller.
    Closed,
    /// The transport cannot accept data right now.
    Busy,
    /// An OS-level I/O failure.
    Io,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Closed => f.write_str("transport closed"),
            TransportError::Busy => f.write_str("transport busy"),
            TransportError::Io => f.write_str("transport I/O failure"),
        }
    }
}

impl From<DirectoryError> for Error {
    fn from(e: DirectoryError) -> Self {
        Self::Directory(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<DebugError> for Error {
    fn from(e: DebugError) -> Self {
        Self::Debug(e)
    }
}

impl From<SyncError> for Error {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<ValueError> for Error {
    fn from(e: ValueError) -> Self {
        Self::Value(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<DirectoryError> for DebugError {
    fn from(e: DirectoryError) -> Self {
        Self::Name(e)
    }
}
