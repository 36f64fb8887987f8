//! Lazy structure parsing and in-place editing for EVIO event trees
//!
//! Events are trees of banks, segments and tagsegments carrying typed
//! primitive data. This crate scans event bytes into lightweight node
//! descriptors that reference the backing buffer without copying,
//! serializes new structures, and splices structures into or out of a
//! buffer of uncompressed records while keeping every derived position
//! and length word consistent. The record/file container layer lives in
//! the `hipo` crate.

pub mod builder;
pub mod editor;
pub mod error;
pub mod node;
pub mod scanner;
pub mod types;

pub use builder::{StructureBuilder, decode_string_array, encode_string_array};
pub use editor::{CompactBuffer, NodeRef};
pub use error::{Error, Result};
pub use node::{EventTree, Node, NodeId};
pub use scanner::{scan_event, scan_structure};
pub use types::{DataType, StructKind};
