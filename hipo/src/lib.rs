//! EVIO/HIPO event-container format: records and files
//!
//! A file is a sequence of records; each record frames a batch of events
//! behind a self-describing 56-byte header, optionally compressed (LZ4
//! fast, LZ4 best, GZIP). This crate covers the container layer: byte
//! cursors, the compression facade, record building/reading, and the
//! outer file envelope with its trailer-based record index. The structure
//! layer that parses event contents lives in the `evio-compact` crate.

pub mod codec;
pub mod cursor;
pub mod error;
pub mod file;
pub mod record;

pub use codec::Codec;
pub use cursor::{ByteCursor, Endian};
pub use error::{Error, Result};
pub use file::{FileHeader, FileKind, FileReader, FileWriter, RecordInfo, WriterOptions};
pub use record::{AddOutcome, HeaderType, RecordBuilder, RecordHeader, RecordReader, RecordView};
