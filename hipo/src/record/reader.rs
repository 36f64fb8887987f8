//! Record parsing and event access
//!
//! `RecordReader` parses a record header at an offset, undoes compression
//! into a reused scratch region, and hands out a `RecordView` that
//! addresses events without copying them. Uncompressed records alias the
//! source buffer directly.

use tracing::trace;

use crate::cursor::Endian;
use crate::error::{Error, Result};
use crate::record::header::{RecordHeader, pad_to_word};

/// Reads records out of a byte buffer, reusing one decompression scratch
/// region across records.
#[derive(Debug, Default)]
pub struct RecordReader {
    scratch: Vec<u8>,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the record at `buf[offset..]` and expose its events.
    ///
    /// The returned view borrows from `buf` (uncompressed records) or from
    /// this reader's scratch region (compressed records); either way it is
    /// valid until the next `read_record` call.
    pub fn read_record<'a>(&'a mut self, buf: &'a [u8], offset: usize) -> Result<RecordView<'a>> {
        let header = RecordHeader::parse(buf, offset)?;
        let header_len = header.header_length() as usize;

        let payload: &[u8] = if header.codec().is_compressed() {
            let from = offset + header_len;
            let to = from + header.compressed_length() as usize;
            let src = buf.get(from..to).ok_or(Error::OutOfBounds {
                offset: from,
                len: header.compressed_length() as usize,
                limit: buf.len(),
            })?;

            let expected = header.uncompressed_total_length() as usize - header_len;
            let scratch_len = pad_to_word(expected as u32) as usize;
            if self.scratch.len() < scratch_len {
                self.scratch.resize(scratch_len, 0);
            }
            let produced = header.codec().decompress(src, &mut self.scratch[..scratch_len])?;
            if produced < expected {
                return Err(Error::CorruptData(format!(
                    "record decompressed to {produced} bytes, header declares {expected}"
                )));
            }
            trace!("decompressed record at {offset}: {} -> {expected} bytes", to - from);
            &self.scratch[..expected]
        } else {
            let from = offset + header_len;
            let to = offset + header.uncompressed_total_length() as usize;
            buf.get(from..to).ok_or(Error::OutOfBounds {
                offset: from,
                len: to.saturating_sub(from),
                limit: buf.len(),
            })?
        };

        RecordView::over(header, payload)
    }
}

/// Addressable view of one parsed record: `index ++ user-header ++ events`.
#[derive(Debug)]
pub struct RecordView<'a> {
    header: RecordHeader,
    payload: &'a [u8],
    /// (offset into `payload`, length) per event.
    events: Vec<(usize, usize)>,
}

impl<'a> RecordView<'a> {
    fn over(header: RecordHeader, payload: &'a [u8]) -> Result<Self> {
        let order = header.byte_order();
        let index_len = header.index_length() as usize;
        let events_at = index_len
            + pad_to_word(header.user_header_length()) as usize;
        let data_len = header.data_length() as usize;
        if events_at + data_len > payload.len() {
            return Err(Error::CorruptData(format!(
                "record payload is {} bytes, header declares {}",
                payload.len(),
                events_at + data_len
            )));
        }

        let count = header.event_count() as usize;
        if index_len < 4 * count {
            return Err(Error::CorruptData(format!(
                "index holds {index_len} bytes for {count} events"
            )));
        }

        let mut events = Vec::with_capacity(count);
        let mut at = events_at;
        for i in 0..count {
            let len = order.read_u32(&payload[4 * i..]) as usize;
            if at + len > events_at + data_len {
                return Err(Error::CorruptData(format!(
                    "event {i} overruns the record's data region"
                )));
            }
            events.push((at, len));
            at += len;
        }

        Ok(Self {
            header,
            payload,
            events,
        })
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn byte_order(&self) -> Endian {
        self.header.byte_order()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Unpadded byte length of event `i`, from the index.
    pub fn event_length(&self, i: usize) -> Result<usize> {
        self.events
            .get(i)
            .map(|&(_, len)| len)
            .ok_or(Error::InvalidArgument("event index out of range"))
    }

    /// Borrow event `i`'s bytes.
    pub fn event(&self, i: usize) -> Result<&'a [u8]> {
        let &(at, len) = self
            .events
            .get(i)
            .ok_or(Error::InvalidArgument("event index out of range"))?;
        Ok(&self.payload[at..at + len])
    }

    /// The record's user header, unpadded, if it has one.
    pub fn user_header(&self) -> Option<&'a [u8]> {
        let len = self.header.user_header_length() as usize;
        if len == 0 {
            return None;
        }
        let at = self.header.index_length() as usize;
        Some(&self.payload[at..at + len])
    }

    /// Iterate events in order.
    pub fn events(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.events
            .iter()
            .map(move |&(at, len)| &self.payload[at..at + len])
    }

    /// The whole payload region: `index ++ user-header ++ events`.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Per-event (offset, length) pairs relative to [`Self::payload`].
    pub fn event_offsets(&self) -> &[(usize, usize)] {
        &self.events
    }
}
