//! File assembly
//!
//! `FileWriter` drives the write side: it emits the file header (with an
//! optional user header or dictionary record), streams events through a
//! pair of record builders, keeps the (length, event count) index for the
//! optional trailer, and patches the file header on close. Sinks are
//! anything `Write + Seek`, with convenience constructors for paths and
//! in-memory buffers.

use std::fs::OpenOptions;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::codec::Codec;
use crate::cursor::Endian;
use crate::error::{Error, Result};
use crate::file::header::{
    FileHeader, FileKind, BIT_INFO_OFFSET, RECORD_COUNT_OFFSET, TRAILER_POSITION_OFFSET,
};
use crate::record::builder::{
    build_dictionary_record, RecordBuilder, DEFAULT_MAX_EVENT_COUNT, DEFAULT_MAX_PAYLOAD_BYTES,
};
use crate::record::header::{HeaderType, RecordHeader};

/// Settings for a [`FileWriter`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub order: Endian,
    pub kind: FileKind,
    pub codec: Codec,
    /// Max events per record before a new record starts.
    pub max_event_count: u32,
    /// Max record memory (header + index + event bytes) before a new
    /// record starts.
    pub max_payload_bytes: u32,
    /// Dictionary XML carried in a user-header record.
    pub dictionary_xml: Option<String>,
    /// First event carried next to the dictionary.
    pub first_event: Option<Vec<u8>>,
    /// Explicit user header; takes precedence over the dictionary record.
    pub user_header: Option<Vec<u8>>,
    /// Write a trailer record at close.
    pub trailer: bool,
    /// Follow the trailer with the record-length index.
    pub trailer_index: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            order: Endian::Little,
            kind: FileKind::Hipo,
            codec: Codec::None,
            max_event_count: DEFAULT_MAX_EVENT_COUNT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            dictionary_xml: None,
            first_event: None,
            user_header: None,
            trailer: true,
            trailer_index: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Writing,
    Closed,
    Failed,
}

/// Streams events into records and records into a sink.
#[derive(Debug)]
pub struct FileWriter<W: Write + Seek> {
    sink: W,
    options: WriterOptions,
    file_header: FileHeader,
    /// Record being filled.
    current: RecordBuilder,
    /// Record most recently handed to the sink; swapped back in on flush.
    spare: RecordBuilder,
    /// (record length, event count) per data record, for the trailer index.
    record_lengths: Vec<(u32, u32)>,
    record_number: u32,
    bytes_written: u64,
    state: State,
}

impl FileWriter<BufWriter<std::fs::File>> {
    /// Create (or truncate) a file at `path` and write its header.
    pub fn create<P: AsRef<Path>>(path: P, options: WriterOptions) -> Result<Self> {
        debug!("creating output file {:?}", path.as_ref());
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Self::open(BufWriter::new(file), options, true)
    }
}

impl FileWriter<Cursor<Vec<u8>>> {
    /// Write into an internally owned buffer; retrieve it with
    /// [`Self::into_buffer`] after `close()`.
    pub fn to_buffer(options: WriterOptions) -> Result<Self> {
        Self::open(Cursor::new(Vec::new()), options, false)
    }

    /// The finished buffer. Call after `close()`.
    pub fn into_buffer(self) -> Vec<u8> {
        self.sink.into_inner()
    }
}

impl<W: Write + Seek> FileWriter<W> {
    /// Open an arbitrary sink. `to_file` selects where a dictionary
    /// record travels: file-header user header (file sinks) or the first
    /// record's user header (buffer sinks).
    pub fn open(sink: W, options: WriterOptions, to_file: bool) -> Result<Self> {
        let record_type = match options.kind {
            FileKind::Hipo => HeaderType::HipoRecord,
            FileKind::Evio => HeaderType::EvioRecord,
        };
        let make_builder = || {
            let mut b = RecordBuilder::with_caps(
                options.order,
                options.codec,
                options.max_event_count,
                options.max_payload_bytes,
            );
            b.set_header_type(record_type);
            b
        };
        let mut current = make_builder();
        let spare = make_builder();
        current.set_record_number(1);

        let have_dictionary = options.dictionary_xml.is_some();
        let have_first_event = options.first_event.is_some();

        let mut file_header = FileHeader::new(options.order, options.kind);
        file_header.set_trailer_with_index(options.trailer && options.trailer_index);

        // Decide the file header's user header: an explicit one wins,
        // otherwise a dictionary record when writing to a file.
        let mut user_header: Option<Vec<u8>> = options.user_header.clone();
        if user_header.is_none() && (have_dictionary || have_first_event) {
            if to_file {
                user_header = Some(build_dictionary_record(
                    options.order,
                    options.dictionary_xml.as_deref(),
                    options.first_event.as_deref(),
                )?);
                file_header
                    .set_dictionary(have_dictionary)
                    .set_first_event(have_first_event);
            } else {
                // Buffer sink: the dictionary record rides in the first
                // record's user header.
                current.set_user_header_from_dictionary(
                    options.dictionary_xml.as_deref(),
                    options.first_event.as_deref(),
                )?;
                file_header
                    .set_dictionary(have_dictionary)
                    .set_first_event(have_first_event);
            }
        }

        let user_len = user_header.as_deref().map_or(0, <[u8]>::len) as u32;
        file_header.set_user_header_length(user_len);

        let mut writer = Self {
            sink,
            options,
            file_header,
            current,
            spare,
            record_lengths: Vec::new(),
            record_number: 1,
            bytes_written: 0,
            state: State::Writing,
        };

        let mut head = vec![0u8; writer.file_header.length() as usize];
        writer.file_header.write_into(&mut head, 0)?;
        if let Some(user) = user_header.as_deref() {
            head[56..56 + user.len()].copy_from_slice(user);
        }
        writer.write_all(&head)?;
        debug!(
            "opened {:?} sink: {} byte file header block",
            writer.options.kind,
            head.len()
        );
        Ok(writer)
    }

    pub fn byte_order(&self) -> Endian {
        self.options.order
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    /// Data records written so far (flushed records only).
    pub fn record_count(&self) -> u32 {
        self.record_lengths.len() as u32
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn check_writing(&self) -> Result<()> {
        match self.state {
            State::Writing => Ok(()),
            State::Closed => Err(Error::InvalidState("writer is closed")),
            State::Failed => Err(Error::InvalidState("writer failed on a previous operation")),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.sink.write_all(bytes) {
            self.state = State::Failed;
            return Err(e.into());
        }
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Append one event. When the current record refuses it, the record
    /// is built and written, and the event lands in a fresh record.
    pub fn add_event(&mut self, event: &[u8]) -> Result<()> {
        self.check_writing()?;
        if self.current.add_event(event)?.is_added() {
            return Ok(());
        }
        self.flush_record()?;
        if !self.current.add_event(event)?.is_added() {
            self.state = State::Failed;
            return Err(Error::BadFormat(
                "event refused by a freshly reset record".into(),
            ));
        }
        Ok(())
    }

    /// Write a caller-built record as-is (after flushing any partial
    /// internal record). The record's byte order must match the file's.
    pub fn write_record(&mut self, record: &mut RecordBuilder) -> Result<()> {
        self.check_writing()?;
        if record.byte_order() != self.options.order {
            return Err(Error::InvalidArgument(
                "record byte order does not match the file",
            ));
        }
        if self.current.event_count() > 0 {
            self.flush_record()?;
        }
        record.set_record_number(self.record_number);
        let event_count = record.event_count();
        let bytes = record.build()?.to_vec();
        self.record_lengths.push((bytes.len() as u32, event_count));
        self.record_number += 1;
        self.write_all(&bytes)
    }

    /// Build and write the record being filled, then swap in the spare
    /// builder for the next fill.
    fn flush_record(&mut self) -> Result<()> {
        if self.current.event_count() == 0 {
            return Ok(());
        }
        let event_count = self.current.event_count();
        let len = {
            let bytes = self.current.build()?;
            bytes.len() as u32
        };
        // Hand the built record to the sink, then rotate builders so the
        // next fill reuses the spare's allocations.
        let mut built = std::mem::replace(&mut self.current, std::mem::take(&mut self.spare));
        let result = self.write_all(built.as_bytes());
        self.record_lengths.push((len, event_count));
        self.record_number += 1;
        built.reset();
        self.spare = built;
        self.current.reset();
        self.current.set_record_number(self.record_number);
        result
    }

    /// Flush the partial record, optionally write the trailer (and its
    /// index), then patch record count, trailer position and bit-info in
    /// the file header. Idempotent once closed.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        if self.state == State::Failed {
            // Inspection-only from here; closing a failed writer just
            // stops further use.
            self.state = State::Closed;
            return Err(Error::InvalidState("writer failed before close"));
        }

        self.flush_record()?;

        let record_count = self.record_lengths.len() as u32;
        let mut trailer_position = 0u64;
        if self.options.trailer {
            trailer_position = self.bytes_written;
            let indexed = self.options.trailer_index;
            let trailer = RecordHeader::build_trailer(
                self.options.order,
                self.options.kind.header_type(),
                self.record_number,
                indexed.then_some(self.record_lengths.as_slice()),
            );
            self.write_all(&trailer)?;
            debug!(
                "trailer at {trailer_position}: {} index entries",
                if indexed { record_count } else { 0 }
            );
        }

        self.file_header
            .set_record_count(record_count)
            .set_trailer_position(trailer_position);

        // Go back and patch the file header words that were unknown at
        // open time.
        let order = self.options.order;
        let mut word = [0u8; 8];
        self.patch(RECORD_COUNT_OFFSET as u64, {
            order.write_u32(&mut word, record_count);
            &word[..4]
        })?;
        self.patch(TRAILER_POSITION_OFFSET as u64, {
            order.write_u64(&mut word, trailer_position);
            &word[..8]
        })?;
        self.patch(BIT_INFO_OFFSET as u64, {
            order.write_u32(&mut word, self.file_header.bit_info());
            &word[..4]
        })?;

        if let Err(e) = self.sink.flush() {
            self.state = State::Failed;
            return Err(e.into());
        }
        self.state = State::Closed;
        debug!(
            "closed: {record_count} records, {} bytes",
            self.bytes_written
        );
        Ok(())
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let patch = (|| -> std::io::Result<()> {
            self.sink.seek(SeekFrom::Start(offset))?;
            self.sink.write_all(bytes)?;
            self.sink.seek(SeekFrom::End(0))?;
            Ok(())
        })();
        if let Err(e) = patch {
            self.state = State::Failed;
            return Err(e.into());
        }
        Ok(())
    }
}
