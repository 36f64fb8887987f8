//! Error types for structure scanning and editing

use thiserror::Error;

/// Result type for structure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the structure layer
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the record/file container layer
    #[error("record layer error: {0}")]
    Record(#[from] hipo::Error),

    /// Data-type code outside the defined set
    #[error("unknown data type code {0:#04x}")]
    UnknownDataType(u8),

    /// Structure lengths or headers that contradict their container
    #[error("malformed structure: {0}")]
    Malformed(String),

    /// Use of an invalidated node, or of an object past its lifecycle
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Insertion target whose data type holds no child structures
    #[error("data type {0:#04x} is not a container")]
    NotAContainer(u8),

    /// Child structure kind incompatible with the container's data type
    #[error("cannot insert a {found} into a container of {expected}")]
    IncompatibleChild {
        expected: &'static str,
        found: &'static str,
    },

    /// Buffer holds compressed records, which cannot be edited in place
    #[error("buffer holds compressed records")]
    Compressed,

    /// Null/empty inputs or out-of-range references
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
