//! Record construction
//!
//! A builder accumulates events and their 4-byte index entries, plus an
//! optional user header, then `build()` finalizes the record: the blob
//! `index ++ user-header ++ pad ++ events` is compressed (or written
//! straight through) behind a 56-byte header whose length words are left
//! mutually consistent. Building is repeatable; `reset()` clears content
//! but keeps settings.

use tracing::debug;

use crate::codec::Codec;
use crate::cursor::Endian;
use crate::error::{Error, Result};
use crate::record::header::{
    HEADER_SIZE_BYTES, HeaderType, RecordHeader, pad_to_word,
};

/// Default cap on events per record.
pub const DEFAULT_MAX_EVENT_COUNT: u32 = 1_000_000;
/// Default cap on record memory (header + index + event bytes).
pub const DEFAULT_MAX_PAYLOAD_BYTES: u32 = 8 * 1024 * 1024;

const ONE_MEG: u32 = 1 << 20;

/// What `add_event` did. Refusals leave the builder unchanged; the caller
/// finalizes the record and retries on a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    WouldExceedCount,
    WouldExceedSize,
}

impl AddOutcome {
    pub fn is_added(self) -> bool {
        self == Self::Added
    }
}

/// Builds one record from raw event byte ranges.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    header: RecordHeader,
    order: Endian,
    /// Concatenated event bytes, insertion order.
    events: Vec<u8>,
    /// One 32-bit unpadded event length per event, target byte order.
    index: Vec<u8>,
    user_header: Option<Vec<u8>>,
    event_count: u32,
    max_event_count: u32,
    max_payload_bytes: u32,
    /// Caller-buffer semantics: internal caps never grow.
    fixed: bool,
    /// Scratch blob handed to the codec.
    staging: Vec<u8>,
    /// Final binary record.
    output: Vec<u8>,
    built_len: usize,
}

impl RecordBuilder {
    /// Owned-buffer builder with default caps.
    pub fn new(order: Endian, codec: Codec) -> Self {
        Self::with_caps(
            order,
            codec,
            DEFAULT_MAX_EVENT_COUNT,
            DEFAULT_MAX_PAYLOAD_BYTES,
        )
    }

    /// Owned-buffer builder with explicit caps. A single event larger
    /// than `max_payload_bytes` still fits: internal buffers grow.
    pub fn with_caps(
        order: Endian,
        codec: Codec,
        max_event_count: u32,
        max_payload_bytes: u32,
    ) -> Self {
        let mut header = RecordHeader::new(order, HeaderType::HipoRecord);
        header.set_codec(codec);
        Self {
            header,
            order,
            events: Vec::new(),
            index: Vec::new(),
            user_header: None,
            event_count: 0,
            max_event_count: max_event_count.max(1),
            max_payload_bytes: max_payload_bytes.max(HEADER_SIZE_BYTES as u32 + 8),
            fixed: false,
            staging: Vec::new(),
            output: Vec::new(),
            built_len: 0,
        }
    }

    /// Borrowed-buffer semantics: `capacity_bytes` is a hard ceiling and
    /// an oversize single event is an error, never a grow.
    pub fn fixed(
        order: Endian,
        codec: Codec,
        max_event_count: u32,
        capacity_bytes: u32,
    ) -> Self {
        let mut builder = Self::with_caps(order, codec, max_event_count, capacity_bytes);
        builder.fixed = true;
        builder
    }

    pub fn byte_order(&self) -> Endian {
        self.order
    }

    pub fn codec(&self) -> Codec {
        self.header.codec()
    }

    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Total event bytes added so far.
    pub fn event_bytes(&self) -> usize {
        self.events.len()
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn set_record_number(&mut self, n: u32) {
        self.header.set_record_number(n);
    }

    /// Change compression. Only legal while the record is empty.
    pub fn set_compression(&mut self, codec: Codec) -> Result<()> {
        if self.event_count > 0 {
            return Err(Error::InvalidState(
                "compression must be set before events are added",
            ));
        }
        self.header.set_codec(codec);
        Ok(())
    }

    /// Attach a raw user header. At most one per record.
    pub fn set_user_header(&mut self, bytes: &[u8]) -> Result<()> {
        if self.user_header.is_some() {
            return Err(Error::InvalidState("user header already set"));
        }
        if bytes.is_empty() {
            return Err(Error::InvalidArgument("empty user header"));
        }
        self.user_header = Some(bytes.to_vec());
        Ok(())
    }

    /// Wrap a dictionary and/or first event in an inner uncompressed
    /// record and attach it as the user header, setting the matching
    /// header flags.
    pub fn set_user_header_from_dictionary(
        &mut self,
        dictionary_xml: Option<&str>,
        first_event: Option<&[u8]>,
    ) -> Result<()> {
        let inner = build_dictionary_record(self.order, dictionary_xml, first_event)?;
        self.set_user_header(&inner)?;
        self.header
            .set_dictionary(dictionary_xml.is_some())
            .set_first_event(first_event.is_some());
        Ok(())
    }

    /// Room check mirroring the payload cap: header + index (with one
    /// more entry) + event bytes must stay under the cap.
    fn room_for(&self, event_len: usize) -> bool {
        let needed = HEADER_SIZE_BYTES
            + self.index.len()
            + 4
            + self.events.len()
            + event_len;
        needed <= self.max_payload_bytes as usize
    }

    /// Append one event's bytes.
    ///
    /// Refusals ([`AddOutcome::WouldExceedCount`] /
    /// [`AddOutcome::WouldExceedSize`]) leave the builder untouched. The
    /// exception: a single event bigger than the cap on an empty record
    /// grows the internal caps, unless this builder has borrowed-buffer
    /// semantics, which is an [`Error::InsufficientSpace`].
    pub fn add_event(&mut self, event: &[u8]) -> Result<AddOutcome> {
        if event.is_empty() {
            return Err(Error::InvalidArgument("empty event"));
        }

        if self.event_count == 0 && !self.room_for(event.len()) {
            if self.fixed {
                return Err(Error::InsufficientSpace {
                    needed: HEADER_SIZE_BYTES + 4 + event.len(),
                    available: self.max_payload_bytes as usize,
                });
            }
            // Roughly what we need plus cushion
            self.max_payload_bytes = event.len() as u32 + ONE_MEG;
            debug!(
                "growing record cap to {} bytes for oversize event",
                self.max_payload_bytes
            );
        }

        if self.event_count + 1 > self.max_event_count {
            return Ok(AddOutcome::WouldExceedCount);
        }
        if !self.room_for(event.len()) {
            return Ok(AddOutcome::WouldExceedSize);
        }

        self.events.extend_from_slice(event);
        let mut entry = [0u8; 4];
        self.order.write_u32(&mut entry, event.len() as u32);
        self.index.extend_from_slice(&entry);
        self.event_count += 1;
        Ok(AddOutcome::Added)
    }

    /// Clear events, index and user header; keep order, codec and caps.
    pub fn reset(&mut self) {
        self.events.clear();
        self.index.clear();
        self.user_header = None;
        self.event_count = 0;
        self.built_len = 0;
        let record_number = self.header.record_number();
        let codec = self.header.codec();
        let header_type = self.header.header_type();
        self.header.reset();
        self.header
            .set_record_number(record_number)
            .set_codec(codec)
            .set_header_type(header_type);
    }

    /// Mark the record as an EVIO- or HIPO-family record.
    pub fn set_header_type(&mut self, header_type: HeaderType) {
        self.header.set_header_type(header_type);
    }

    /// Finalize into the internal buffer and borrow the binary record.
    /// Safe to call repeatedly; each call rebuilds the same bytes.
    pub fn build(&mut self) -> Result<&[u8]> {
        let worst = self.worst_case_record_size();
        if self.output.len() < worst {
            self.output.resize(worst, 0);
        }
        let mut output = std::mem::take(&mut self.output);
        let result = self.build_to(&mut output);
        self.output = output;
        let len = result?;
        self.built_len = len;
        Ok(&self.output[..len])
    }

    /// Finalize into a caller-provided buffer, which is never grown;
    /// returns the record length or [`Error::InsufficientSpace`].
    pub fn build_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.build_to(dst)
    }

    /// The binary record from the last successful `build()`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.output[..self.built_len]
    }

    fn worst_case_record_size(&self) -> usize {
        let blob = self.blob_len();
        HEADER_SIZE_BYTES + self.header.codec().worst_case_bound(blob).max(blob) + 4
    }

    /// Unpadded blob length: index + padded user header + events.
    fn blob_len(&self) -> usize {
        self.index.len() + self.padded_user_len() + self.events.len()
    }

    fn padded_user_len(&self) -> usize {
        self.user_header
            .as_deref()
            .map_or(0, |u| pad_to_word(u.len() as u32) as usize)
    }

    fn build_to(&mut self, dst: &mut [u8]) -> Result<usize> {
        let user_len = self.user_header.as_deref().map_or(0, <[u8]>::len);
        self.header
            .set_event_count(self.event_count)
            .set_index_length(self.index.len() as u32)
            .set_user_header_length(user_len as u32)
            .set_data_length(self.events.len() as u32);

        // Nothing added yet: the record is a bare header.
        if self.event_count == 0 && self.user_header.is_none() {
            self.header.set_compressed_length(0);
            self.header.write_into(dst, 0)?;
            return Ok(HEADER_SIZE_BYTES);
        }

        let codec = self.header.codec();
        if codec.is_compressed() {
            // Stage the blob, then compress it past where the header goes.
            self.staging.clear();
            self.staging.reserve(self.blob_len());
            self.staging.extend_from_slice(&self.index);
            if let Some(user) = self.user_header.as_deref() {
                self.staging.extend_from_slice(user);
                self.staging
                    .resize(self.index.len() + self.padded_user_len(), 0);
            }
            self.staging.extend_from_slice(&self.events);

            if dst.len() < HEADER_SIZE_BYTES {
                return Err(Error::InsufficientSpace {
                    needed: HEADER_SIZE_BYTES,
                    available: dst.len(),
                });
            }
            let compressed = codec.compress(&self.staging, &mut dst[HEADER_SIZE_BYTES..])?;
            self.header.set_compressed_length(compressed as u32);
            // Zero the compression padding so rebuilt output is stable
            let padded = pad_to_word(compressed as u32) as usize;
            if HEADER_SIZE_BYTES + padded > dst.len() {
                return Err(Error::InsufficientSpace {
                    needed: HEADER_SIZE_BYTES + padded,
                    available: dst.len(),
                });
            }
            dst[HEADER_SIZE_BYTES + compressed..HEADER_SIZE_BYTES + padded].fill(0);
        } else {
            self.header.set_compressed_length(0);
            let total = self.header.length() as usize;
            if dst.len() < total {
                return Err(Error::InsufficientSpace {
                    needed: total,
                    available: dst.len(),
                });
            }
            // Write directly into the final buffer, past the header
            let mut at = HEADER_SIZE_BYTES;
            dst[at..at + self.index.len()].copy_from_slice(&self.index);
            at += self.index.len();
            if let Some(user) = self.user_header.as_deref() {
                dst[at..at + user.len()].copy_from_slice(user);
                dst[at + user.len()..at + self.padded_user_len()].fill(0);
                at += self.padded_user_len();
            }
            dst[at..at + self.events.len()].copy_from_slice(&self.events);
            at += self.events.len();
            dst[at..total].fill(0);
        }

        let total = self.header.length() as usize;
        self.header.write_into(dst, 0)?;
        debug!(
            "built record #{}: {} events, {} bytes ({:?})",
            self.header.record_number(),
            self.event_count,
            total,
            codec
        );
        Ok(total)
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new(Endian::Little, Codec::None)
    }
}

/// Build the inner uncompressed record that carries a dictionary and/or
/// first event inside a user header.
pub fn build_dictionary_record(
    order: Endian,
    dictionary_xml: Option<&str>,
    first_event: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if dictionary_xml.is_none() && first_event.is_none() {
        return Err(Error::InvalidArgument(
            "dictionary record needs a dictionary or a first event",
        ));
    }
    let bytes = dictionary_xml.map_or(0, str::len)
        + first_event.map_or(0, <[u8]>::len);
    let mut record = RecordBuilder::with_caps(
        order,
        Codec::None,
        2,
        (bytes as u32 + HEADER_SIZE_BYTES as u32 + 16).max(ONE_MEG),
    );
    if let Some(dict) = dictionary_xml {
        record.add_event(dict.as_bytes())?;
    }
    if let Some(event) = first_event {
        record.add_event(event)?;
    }
    record.build()?;
    Ok(record.as_bytes().to_vec())
}
