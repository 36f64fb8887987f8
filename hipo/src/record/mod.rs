//! The record layer: header, builder, reader

pub mod builder;
pub mod header;
pub mod reader;

pub use builder::{AddOutcome, RecordBuilder};
pub use header::{HeaderType, RecordHeader};
pub use reader::{RecordReader, RecordView};
