//! Error taxonomy for the Hikvision forensic reader.
//!
//! Every fallible entry point in this crate returns [`HikError`]. Structural
//! defects confined to a single HIKBTREE page, log entry, or IDR record are
//! *not* represented here — those are non-fatal and are recorded as warnings
//! alongside the partial record instead of aborting the whole parse.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HikError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("reader used before being opened")]
    NotOpen,

    #[error("EWF support is not available for this build")]
    EwfUnavailable,

    #[error("filesystem signature not found in search window starting at 0x{window_start:x}")]
    SignatureNotFound { window_start: u64 },

    #[error("invalid signature: expected '{expected}' at address 0x{address:x}")]
    InvalidSignature {
        expected: &'static str,
        address: u64,
    },

    #[error(
        "truncated field '{field}' at address 0x{address:x}: expected {expected} bytes, got {got}"
    )]
    TruncatedField {
        field: &'static str,
        address: u64,
        expected: usize,
        got: usize,
    },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("required metadata key '{0}' was not present in the consumed document")]
    DependentMetadataMissing(&'static str),
}

pub type Result<T> = std::result::Result<T, HikError>;
