use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Errors raised while reading persisted correlation state or decoding a
/// payload that claims to be well-formed.
///
/// Ordinary misses (unknown key, unregistered event) are never errors; they
/// are `None` returns or the unhandled-event path.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("An I/O error has occurred: {0}")]
    Io(#[from] io::Error),

    #[error("Offset {offset}: reading {what} needs {need} bytes, only {have} available")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Unsupported history block version `{found}` (newest supported is `{supported}`)")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("History block declares {count} entries, but only {remaining} bytes remain")]
    ImplausibleEntryCount { count: u32, remaining: u64 },

    #[error("History block end marker `{end_offset}` points before its own payload")]
    InvalidEndMarker { end_offset: u64 },

    #[error("Offset {offset}: failed to decode UTF-8 string")]
    InvalidUtf8 { offset: u64 },

    #[error("Offset {offset}: failed to decode UTF-16 string")]
    InvalidUtf16 { offset: u64 },

    #[error("Timestamp is out of the representable datetime range")]
    InvalidDateTime,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    #[error("An I/O error has occurred: {0}")]
    Io(#[from] io::Error),
}
