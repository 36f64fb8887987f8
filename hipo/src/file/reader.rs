//! File indexing and random event access
//!
//! `FileReader` parses the outer envelope, builds a record-position table
//! (from the trailer index when one exists, from a header-adjacent index,
//! or by walking record headers), and maps event numbers onto records via
//! cumulative event counts. Records are read lazily; sequential access
//! keeps a one-past cursor so `next_event`/`prev_event` interleave
//! coherently.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::cursor::Endian;
use crate::error::{Error, Result};
use crate::file::header::FileHeader;
use crate::record::header::{HEADER_SIZE_BYTES, RecordHeader};
use crate::record::reader::RecordReader;

/// Backing bytes of an open file: a memory map or an adopted buffer.
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(buf) => buf,
        }
    }
}

/// One record's place in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    /// Byte offset of the record header.
    pub position: usize,
    /// Total record length in bytes.
    pub length: u32,
    pub event_count: u32,
}

/// The record currently held in memory for event access.
struct LoadedRecord {
    index: usize,
    /// Decompressed payload copy; `None` when the source is aliased.
    owned: Option<Vec<u8>>,
    /// Absolute payload start in the source when aliased.
    source_at: usize,
    /// (offset, length) per event, relative to the payload.
    events: Vec<(usize, usize)>,
}

/// Random and sequential access to the events of a file or buffer.
pub struct FileReader {
    source: Source,
    order: Endian,
    version: u8,
    file_header: Option<FileHeader>,
    records: Vec<RecordInfo>,
    /// `cumulative[i]` = events before record `i`; one extra final entry.
    cumulative: Vec<u64>,
    reader: RecordReader,
    current: Option<LoadedRecord>,
    /// One-past sequential cursor.
    seq: u64,
    dictionary: Option<String>,
    first_event: Option<Vec<u8>>,
}

impl FileReader {
    /// Memory-map and index the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("opening {:?}", path.as_ref());
        let file = File::open(path)?;
        // Safety: the map is private and the file is not written through
        // this handle.
        let map = unsafe { Mmap::map(&file)? };
        Self::from_source(Source::Mapped(map))
    }

    /// Adopt and index an in-memory file image.
    pub fn from_buffer(buf: Vec<u8>) -> Result<Self> {
        Self::from_source(Source::Owned(buf))
    }

    fn from_source(source: Source) -> Result<Self> {
        let bytes = source.bytes();
        if bytes.len() < HEADER_SIZE_BYTES {
            return Err(Error::BadFormat(format!(
                "{} bytes is too short for a header",
                bytes.len()
            )));
        }

        let (file_header, first_record_at) = match FileHeader::parse(bytes, 0) {
            Ok(header) => {
                let at = header.length() as usize;
                (Some(header), at)
            }
            // No file header: treat the buffer as a bare record stream
            // (the version-4 accommodation).
            Err(Error::BadFileType(_)) => {
                debug!(
                    "no file header (starts {}), reading a bare record stream",
                    hex::encode(&bytes[..4])
                );
                (None, 0)
            }
            Err(e) => return Err(e),
        };

        let records = match &file_header {
            Some(header) => Self::index_records(bytes, header, first_record_at)?,
            None => Self::scan_records(bytes, 0)?,
        };

        let (order, version) = if let Some(header) = &file_header {
            (header.byte_order(), header.version())
        } else {
            // Bare stream: the first record header supplies both.
            let first = RecordHeader::parse(bytes, 0)?;
            (first.byte_order(), first.version())
        };

        let mut cumulative = Vec::with_capacity(records.len() + 1);
        let mut total = 0u64;
        cumulative.push(0);
        for record in &records {
            total += u64::from(record.event_count);
            cumulative.push(total);
        }
        debug!(
            "indexed {} records, {total} events ({:?})",
            records.len(),
            order
        );

        let mut reader = Self {
            source,
            order,
            version,
            file_header,
            records,
            cumulative,
            reader: RecordReader::new(),
            current: None,
            seq: 0,
            dictionary: None,
            first_event: None,
        };
        reader.extract_dictionary()?;
        Ok(reader)
    }

    /// Build the record table from the best available index, falling back
    /// to a linear header walk.
    fn index_records(
        bytes: &[u8],
        header: &FileHeader,
        first_record_at: usize,
    ) -> Result<Vec<RecordInfo>> {
        let order = header.byte_order();

        // Trailer index gets first priority.
        if header.has_trailer_with_index() {
            let at = header.trailer_position() as usize;
            if at >= HEADER_SIZE_BYTES && at + HEADER_SIZE_BYTES <= bytes.len() {
                let trailer = RecordHeader::parse(bytes, at)?;
                let index_at = at + trailer.header_length() as usize;
                let index_len = trailer.index_length() as usize;
                return Self::records_from_index(
                    bytes,
                    order,
                    first_record_at,
                    index_at,
                    index_len,
                );
            }
            warn!("trailer position {at} is unusable, scanning instead");
        }

        // Next: an index sitting right behind the file header.
        if header.has_index() {
            let index_at = header.header_length() as usize;
            return Self::records_from_index(
                bytes,
                order,
                first_record_at,
                index_at,
                header.index_length() as usize,
            );
        }

        Self::scan_records(bytes, first_record_at)
    }

    /// Turn (length, event count) word pairs into record positions.
    fn records_from_index(
        bytes: &[u8],
        order: Endian,
        first_record_at: usize,
        index_at: usize,
        index_len: usize,
    ) -> Result<Vec<RecordInfo>> {
        if index_at + index_len > bytes.len() || index_len % 8 != 0 {
            return Err(Error::CorruptData(format!(
                "record index of {index_len} bytes at {index_at} does not fit the file"
            )));
        }
        let mut records = Vec::with_capacity(index_len / 8);
        let mut position = first_record_at;
        for pair in 0..index_len / 8 {
            let at = index_at + 8 * pair;
            let length = order.read_u32(&bytes[at..]);
            let event_count = order.read_u32(&bytes[at + 4..]);
            if length < HEADER_SIZE_BYTES as u32 || position + length as usize > bytes.len() {
                return Err(Error::CorruptData(format!(
                    "indexed record {pair} at {position} with length {length} overruns the file"
                )));
            }
            records.push(RecordInfo {
                position,
                length,
                event_count,
            });
            position += length as usize;
        }
        Ok(records)
    }

    /// Walk record headers linearly, stopping at the trailer or the end.
    fn scan_records(bytes: &[u8], mut position: usize) -> Result<Vec<RecordInfo>> {
        let mut records = Vec::new();
        while position + HEADER_SIZE_BYTES <= bytes.len() {
            let header = RecordHeader::parse(bytes, position)?;
            let length = header.length();
            if position + length as usize > bytes.len() {
                return Err(Error::CorruptData(format!(
                    "record at {position} with length {length} overruns the file"
                )));
            }
            if header.header_type().is_trailer()
                || (header.is_last_record() && header.event_count() == 0)
            {
                break;
            }
            records.push(RecordInfo {
                position,
                length,
                event_count: header.event_count(),
            });
            if header.is_last_record() {
                break;
            }
            position += length as usize;
        }
        Ok(records)
    }

    /// Pull the dictionary and first event out of the user-header record,
    /// wherever the writer put it.
    fn extract_dictionary(&mut self) -> Result<()> {
        let Some(header) = self.file_header.clone() else {
            return Ok(());
        };
        if !header.has_dictionary() && !header.has_first_event() {
            return Ok(());
        }

        let inner: Vec<u8> = if header.user_header_length() > 0 {
            // File sink: the record sits in the file header's user header.
            let at = (header.header_length() + header.index_length()) as usize;
            let len = header.user_header_length() as usize;
            self.source
                .bytes()
                .get(at..at + len)
                .ok_or(Error::OutOfBounds {
                    offset: at,
                    len,
                    limit: self.source.bytes().len(),
                })?
                .to_vec()
        } else if !self.records.is_empty() {
            // Buffer sink: it rides in the first record's user header.
            let at = self.records[0].position;
            let view = self.reader.read_record(self.source.bytes(), at)?;
            match view.user_header() {
                Some(user) => user.to_vec(),
                None => return Ok(()),
            }
        } else {
            return Ok(());
        };

        let mut reader = RecordReader::new();
        let view = reader.read_record(&inner, 0)?;
        let mut next = 0;
        if header.has_dictionary() && view.event_count() > next {
            let xml = view.event(next)?;
            self.dictionary = Some(String::from_utf8_lossy(xml).into_owned());
            next += 1;
        }
        if header.has_first_event() && view.event_count() > next {
            self.first_event = Some(view.event(next)?.to_vec());
        }
        Ok(())
    }

    //--- accessors ---------------------------------------------------------

    pub fn byte_order(&self) -> Endian {
        self.order
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// The file header; `None` for bare record streams.
    pub fn file_header(&self) -> Option<&FileHeader> {
        self.file_header.as_ref()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn record_info(&self, i: usize) -> Option<RecordInfo> {
        self.records.get(i).copied()
    }

    /// Total events across all records.
    pub fn event_count(&self) -> u64 {
        *self.cumulative.last().unwrap_or(&0)
    }

    pub fn dictionary_xml(&self) -> Option<&str> {
        self.dictionary.as_deref()
    }

    pub fn first_event(&self) -> Option<&[u8]> {
        self.first_event.as_deref()
    }

    //--- event access ------------------------------------------------------

    /// The record owning event `n`, by binary search over cumulative
    /// counts.
    fn record_of(&self, n: u64) -> Result<(usize, usize)> {
        if n >= self.event_count() {
            return Err(Error::InvalidArgument("event number out of range"));
        }
        let idx = self.cumulative.partition_point(|&c| c <= n) - 1;
        let local = (n - self.cumulative[idx]) as usize;
        Ok((idx, local))
    }

    fn load_record(&mut self, idx: usize) -> Result<()> {
        if self.current.as_ref().is_some_and(|c| c.index == idx) {
            return Ok(());
        }
        let info = self.records[idx];
        let view = self.reader.read_record(self.source.bytes(), info.position)?;
        if view.event_count() != info.event_count as usize {
            return Err(Error::CorruptData(format!(
                "record {idx} header says {} events, index said {}",
                view.event_count(),
                info.event_count
            )));
        }
        let events = view.event_offsets().to_vec();
        let current = if view.header().codec().is_compressed() {
            LoadedRecord {
                index: idx,
                owned: Some(view.payload().to_vec()),
                source_at: 0,
                events,
            }
        } else {
            LoadedRecord {
                index: idx,
                owned: None,
                source_at: info.position + view.header().header_length() as usize,
                events,
            }
        };
        self.current = Some(current);
        Ok(())
    }

    /// Random access: the bytes of event `n` (0-based across the file).
    pub fn get_event(&mut self, n: u64) -> Result<&[u8]> {
        let (idx, local) = self.record_of(n)?;
        self.load_record(idx)?;
        let current = self
            .current
            .as_ref()
            .ok_or(Error::InvalidState("no record loaded"))?;
        let (at, len) = current.events[local];
        Ok(match &current.owned {
            Some(payload) => &payload[at..at + len],
            None => &self.source.bytes()[current.source_at + at..current.source_at + at + len],
        })
    }

    /// Unpadded byte length of event `n` without loading its data.
    pub fn get_event_length(&mut self, n: u64) -> Result<usize> {
        let (idx, local) = self.record_of(n)?;
        self.load_record(idx)?;
        let current = self
            .current
            .as_ref()
            .ok_or(Error::InvalidState("no record loaded"))?;
        Ok(current.events[local].1)
    }

    /// Sequential access: the event under the cursor, advancing it.
    pub fn next_event(&mut self) -> Result<Option<&[u8]>> {
        if self.seq >= self.event_count() {
            return Ok(None);
        }
        self.seq += 1;
        self.get_event(self.seq - 1).map(Some)
    }

    /// Sequential access: step the cursor back and return that event.
    /// After `next_event` returned event `i`, this returns event `i`
    /// again; the two interleave coherently.
    pub fn prev_event(&mut self) -> Result<Option<&[u8]>> {
        if self.seq == 0 {
            return Ok(None);
        }
        self.seq -= 1;
        self.get_event(self.seq).map(Some)
    }

    pub fn has_next(&self) -> bool {
        self.seq < self.event_count()
    }

    /// Reset the sequential cursor to the first event.
    pub fn rewind(&mut self) {
        self.seq = 0;
    }

    /// Consume the reader, returning the underlying buffer when it owns
    /// one (for in-place editing layers).
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self.source {
            Source::Owned(buf) => Some(buf),
            Source::Mapped(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::file::writer::{FileWriter, WriterOptions};

    fn write_events(options: WriterOptions, events: &[Vec<u8>]) -> Vec<u8> {
        let mut writer = FileWriter::to_buffer(options).unwrap();
        for ev in events {
            writer.add_event(ev).unwrap();
        }
        writer.close().unwrap();
        writer.into_buffer()
    }

    fn events(n: u8, len: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i; len]).collect()
    }

    #[test]
    fn random_access_matches_written_events() {
        let evs = events(10, 32);
        let bytes = write_events(WriterOptions::default(), &evs);
        let mut reader = FileReader::from_buffer(bytes).unwrap();
        assert_eq!(reader.event_count(), 10);
        // Out of order on purpose
        for &n in &[7u64, 0, 9, 3, 3, 1] {
            assert_eq!(reader.get_event(n).unwrap(), &evs[n as usize][..]);
        }
        assert!(matches!(
            reader.get_event(10),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn sequential_cursor_alternates_coherently() {
        let evs = events(4, 16);
        let bytes = write_events(WriterOptions::default(), &evs);
        let mut reader = FileReader::from_buffer(bytes).unwrap();

        assert_eq!(reader.next_event().unwrap().unwrap(), &evs[0][..]);
        assert_eq!(reader.next_event().unwrap().unwrap(), &evs[1][..]);
        // prev re-reads what next just returned
        assert_eq!(reader.prev_event().unwrap().unwrap(), &evs[1][..]);
        assert_eq!(reader.next_event().unwrap().unwrap(), &evs[1][..]);
        assert_eq!(reader.next_event().unwrap().unwrap(), &evs[2][..]);
        assert_eq!(reader.next_event().unwrap().unwrap(), &evs[3][..]);
        assert_eq!(reader.next_event().unwrap(), None);
        assert_eq!(reader.prev_event().unwrap().unwrap(), &evs[3][..]);
    }

    #[test]
    fn trailerless_file_scans_linearly() {
        let options = WriterOptions {
            trailer: false,
            trailer_index: false,
            ..WriterOptions::default()
        };
        let evs = events(6, 20);
        let bytes = write_events(options, &evs);
        let mut reader = FileReader::from_buffer(bytes).unwrap();
        assert_eq!(reader.event_count(), 6);
        assert_eq!(reader.get_event(5).unwrap(), &evs[5][..]);
    }

    #[test]
    fn compressed_records_round_trip() {
        for codec in [Codec::Lz4, Codec::Lz4Best, Codec::Gzip] {
            let options = WriterOptions {
                codec,
                ..WriterOptions::default()
            };
            let evs = events(8, 100);
            let bytes = write_events(options, &evs);
            let mut reader = FileReader::from_buffer(bytes).unwrap();
            for (i, ev) in evs.iter().enumerate() {
                assert_eq!(reader.get_event(i as u64).unwrap(), &ev[..], "{codec:?}");
            }
        }
    }

    #[test]
    fn bare_record_stream_is_readable() {
        use crate::record::builder::RecordBuilder;

        let mut builder = RecordBuilder::new(Endian::Little, Codec::None);
        builder.add_event(&[5u8; 24]).unwrap();
        let bytes = builder.build().unwrap().to_vec();

        let mut reader = FileReader::from_buffer(bytes).unwrap();
        assert!(reader.file_header().is_none());
        assert_eq!(reader.event_count(), 1);
        assert_eq!(reader.get_event(0).unwrap(), &[5u8; 24]);
    }

    #[test]
    fn too_short_input_is_rejected() {
        assert!(matches!(
            FileReader::from_buffer(vec![0u8; 10]),
            Err(Error::BadFormat(_))
        ));
    }
}
