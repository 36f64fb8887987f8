//! Error types for record and file operations

use std::io;
use thiserror::Error;

/// Result type for record and file operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the record/file container layer
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Header magic word did not match in either byte order
    #[error("Bad magic word: expected 0xc0da0100, got {0:#010x}")]
    BadMagic(u32),

    /// File-type word is neither HIPO nor EVIO
    #[error("Bad file type word: {0:#010x}")]
    BadFileType(u32),

    /// Format version this library does not read
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown compression type code in a record header
    #[error("Unknown compression type: {0}")]
    UnknownCompression(u8),

    /// Structural numbers out of range or mutually inconsistent
    #[error("Bad format: {0}")]
    BadFormat(String),

    /// Decompression failed or lengths contradict past recovery
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Requested access exceeds buffer limits
    #[error("Out of bounds: offset {offset} + len {len} > limit {limit}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        limit: usize,
    },

    /// Build or insert would exceed a caller-provided buffer
    #[error("Insufficient space: need {needed} bytes, have {available}")]
    InsufficientSpace { needed: usize, available: usize },

    /// Operation called on a closed or not-yet-opened object
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Empty input where data is required, or mismatched byte order
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}
