//! Encode/decode error.

/// Wire encode/decode errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum WireError {
    /// The buffer is too short for the packed representation.
    Buffer,
    /// A variable-width field was given an unsupported width.
    Width,
}

#[cfg(feature = "std")]
impl std::error::Error for WireError {}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WireError::Buffer => f.write_str("buffer too short"),
            WireError::Width => f.write_str("unsupported field width"),
        }
    }
}
