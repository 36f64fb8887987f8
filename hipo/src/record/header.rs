//! Record header serialization and parsing
//!
//! Every record (and the file trailer) starts with the same 14-word
//! header. All length words are kept mutually consistent: changing any
//! length recomputes the record's padded total so that
//! `header + index + padded user-header + padded payload == length`.

use tracing::trace;

use crate::codec::Codec;
use crate::cursor::Endian;
use crate::error::{Error, Result};

/// Fixed header size in 32-bit words.
pub const HEADER_SIZE_WORDS: u32 = 14;
/// Fixed header size in bytes.
pub const HEADER_SIZE_BYTES: usize = 56;
/// Magic word at [`MAGIC_OFFSET`]; its byte order defines the record's.
pub const HEADER_MAGIC: u32 = 0xc0da_0100;

/// Byte offsets of the 14 header words.
pub const RECORD_LENGTH_OFFSET: usize = 0;
pub const RECORD_NUMBER_OFFSET: usize = 4;
pub const HEADER_LENGTH_OFFSET: usize = 8;
pub const EVENT_COUNT_OFFSET: usize = 12;
pub const INDEX_LENGTH_OFFSET: usize = 16;
pub const BIT_INFO_OFFSET: usize = 20;
pub const USER_LENGTH_OFFSET: usize = 24;
pub const MAGIC_OFFSET: usize = 28;
pub const UNCOMPRESSED_LENGTH_OFFSET: usize = 32;
pub const COMPRESSION_OFFSET: usize = 36;
pub const USER_REGISTER1_OFFSET: usize = 40;
pub const USER_REGISTER2_OFFSET: usize = 48;

// Flags inside the bit-info word. The low byte is the format version;
// bits 20-25 carry the three 2-bit padding counts; the top 4 bits name
// the header type.
const DICTIONARY_BIT: u32 = 1 << 8;
const FIRST_EVENT_BIT: u32 = 1 << 9;
const LAST_RECORD_BIT: u32 = 1 << 10;
const USER_PAD_SHIFT: u32 = 20;
const DATA_PAD_SHIFT: u32 = 22;
const COMPRESSED_PAD_SHIFT: u32 = 24;
const PAD_MASK: u32 = 0x3;
const HEADER_TYPE_SHIFT: u32 = 28;

/// Version written by this library.
pub const CURRENT_VERSION: u8 = 6;

/// Round a byte count up to the next 32-bit word boundary.
pub fn pad_to_word(n: u32) -> u32 {
    (n + 3) & !3
}

/// Zero bytes needed to reach the next word boundary.
pub fn word_padding(n: u32) -> u32 {
    pad_to_word(n) - n
}

/// The header-type nibble in the top 4 bits of the bit-info word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderType {
    #[default]
    EvioRecord = 0,
    EvioFile = 1,
    EvioFileExtended = 2,
    EvioTrailer = 3,
    HipoRecord = 4,
    HipoFile = 5,
    HipoFileExtended = 6,
    HipoTrailer = 7,
}

impl HeaderType {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::EvioRecord,
            1 => Self::EvioFile,
            2 => Self::EvioFileExtended,
            3 => Self::EvioTrailer,
            4 => Self::HipoRecord,
            5 => Self::HipoFile,
            6 => Self::HipoFileExtended,
            7 => Self::HipoTrailer,
            other => {
                return Err(Error::BadFormat(format!("unknown header type {other}")));
            }
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_file_header(self) -> bool {
        matches!(
            self,
            Self::EvioFile | Self::EvioFileExtended | Self::HipoFile | Self::HipoFileExtended
        )
    }

    pub fn is_trailer(self) -> bool {
        matches!(self, Self::EvioTrailer | Self::HipoTrailer)
    }

    /// The trailer type matching a file/record family.
    pub fn trailer(self) -> Self {
        match self {
            Self::EvioRecord | Self::EvioFile | Self::EvioFileExtended | Self::EvioTrailer => {
                Self::EvioTrailer
            }
            _ => Self::HipoTrailer,
        }
    }
}

/// Parsed or under-construction 14-word record header.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    header_type: HeaderType,
    /// Total record length in bytes, padding included.
    length: u32,
    record_number: u32,
    /// Header length in bytes (56 as written; parsed headers may claim more).
    header_length: u32,
    event_count: u32,
    /// Event-length index size in bytes (4 per event), unpadded.
    index_length: u32,
    /// User-header size in bytes, unpadded.
    user_header_length: u32,
    /// Uncompressed event-payload size in bytes, unpadded.
    data_length: u32,
    /// Compressed blob size in bytes, unpadded. 0 when uncompressed.
    compressed_length: u32,
    codec: Codec,
    version: u8,
    has_dictionary: bool,
    has_first_event: bool,
    last_record: bool,
    user_register_1: u64,
    user_register_2: u64,
    order: Endian,
}

impl RecordHeader {
    pub fn new(order: Endian, header_type: HeaderType) -> Self {
        Self {
            header_type,
            length: HEADER_SIZE_BYTES as u32,
            record_number: 1,
            header_length: HEADER_SIZE_BYTES as u32,
            event_count: 0,
            index_length: 0,
            user_header_length: 0,
            data_length: 0,
            compressed_length: 0,
            codec: Codec::None,
            version: CURRENT_VERSION,
            has_dictionary: false,
            has_first_event: false,
            last_record: false,
            user_register_1: 0,
            user_register_2: 0,
            order,
        }
    }

    //--- accessors ---------------------------------------------------------

    pub fn header_type(&self) -> HeaderType {
        self.header_type
    }

    /// Total record length in bytes, compression padding included.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn record_number(&self) -> u32 {
        self.record_number
    }

    /// Header length in bytes.
    pub fn header_length(&self) -> u32 {
        self.header_length
    }

    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    pub fn index_length(&self) -> u32 {
        self.index_length
    }

    pub fn user_header_length(&self) -> u32 {
        self.user_header_length
    }

    pub fn user_header_padding(&self) -> u32 {
        word_padding(self.user_header_length)
    }

    pub fn data_length(&self) -> u32 {
        self.data_length
    }

    pub fn data_padding(&self) -> u32 {
        word_padding(self.data_length)
    }

    pub fn compressed_length(&self) -> u32 {
        self.compressed_length
    }

    /// Compressed blob length in padded words, as stored on the wire.
    pub fn compressed_length_words(&self) -> u32 {
        pad_to_word(self.compressed_length) / 4
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn byte_order(&self) -> Endian {
        self.order
    }

    pub fn has_dictionary(&self) -> bool {
        self.has_dictionary
    }

    pub fn has_first_event(&self) -> bool {
        self.has_first_event
    }

    pub fn is_last_record(&self) -> bool {
        self.last_record
    }

    pub fn user_register_1(&self) -> u64 {
        self.user_register_1
    }

    pub fn user_register_2(&self) -> u64 {
        self.user_register_2
    }

    /// Length in bytes of header + index + padded user-header + padded
    /// payload, i.e. the record size once decompressed.
    pub fn uncompressed_total_length(&self) -> u32 {
        self.header_length
            + self.index_length
            + pad_to_word(self.user_header_length)
            + pad_to_word(self.data_length)
    }

    //--- setters -----------------------------------------------------------

    pub fn set_record_number(&mut self, n: u32) -> &mut Self {
        self.record_number = n;
        self
    }

    pub fn set_event_count(&mut self, n: u32) -> &mut Self {
        self.event_count = n;
        self
    }

    pub fn set_index_length(&mut self, bytes: u32) -> &mut Self {
        self.index_length = bytes;
        self.recompute_length();
        self
    }

    pub fn set_user_header_length(&mut self, bytes: u32) -> &mut Self {
        self.user_header_length = bytes;
        self.recompute_length();
        self
    }

    pub fn set_data_length(&mut self, bytes: u32) -> &mut Self {
        self.data_length = bytes;
        self.recompute_length();
        self
    }

    pub fn set_compressed_length(&mut self, bytes: u32) -> &mut Self {
        self.compressed_length = bytes;
        self.recompute_length();
        self
    }

    pub fn set_codec(&mut self, codec: Codec) -> &mut Self {
        self.codec = codec;
        self.recompute_length();
        self
    }

    pub fn set_dictionary(&mut self, yes: bool) -> &mut Self {
        self.has_dictionary = yes;
        self
    }

    pub fn set_first_event(&mut self, yes: bool) -> &mut Self {
        self.has_first_event = yes;
        self
    }

    pub fn set_last_record(&mut self, yes: bool) -> &mut Self {
        self.last_record = yes;
        self
    }

    pub fn set_user_register_1(&mut self, v: u64) -> &mut Self {
        self.user_register_1 = v;
        self
    }

    pub fn set_user_register_2(&mut self, v: u64) -> &mut Self {
        self.user_register_2 = v;
        self
    }

    pub fn set_header_type(&mut self, header_type: HeaderType) -> &mut Self {
        self.header_type = header_type;
        self
    }

    /// Reset everything except byte order and header type.
    pub fn reset(&mut self) {
        *self = Self::new(self.order, self.header_type);
    }

    // Keeps invariant I1: the stored total covers header, index, padded
    // user-header and the padded (compressed or raw) payload.
    fn recompute_length(&mut self) {
        let payload = if self.codec.is_compressed() {
            pad_to_word(self.compressed_length)
        } else {
            self.index_length
                + pad_to_word(self.user_header_length)
                + pad_to_word(self.data_length)
        };
        self.length = self.header_length + payload;
    }

    //--- wire format -------------------------------------------------------

    fn bit_info(&self) -> u32 {
        let mut word = u32::from(self.version);
        if self.has_dictionary {
            word |= DICTIONARY_BIT;
        }
        if self.has_first_event {
            word |= FIRST_EVENT_BIT;
        }
        if self.last_record {
            word |= LAST_RECORD_BIT;
        }
        word |= (word_padding(self.user_header_length) & PAD_MASK) << USER_PAD_SHIFT;
        word |= (word_padding(self.data_length) & PAD_MASK) << DATA_PAD_SHIFT;
        word |= (word_padding(self.compressed_length) & PAD_MASK) << COMPRESSED_PAD_SHIFT;
        word |= u32::from(self.header_type.code()) << HEADER_TYPE_SHIFT;
        word
    }

    /// Serialize the 14 words at `dst[offset..offset + 56]` in this
    /// header's byte order.
    pub fn write_into(&self, dst: &mut [u8], offset: usize) -> Result<()> {
        if offset + HEADER_SIZE_BYTES > dst.len() {
            return Err(Error::OutOfBounds {
                offset,
                len: HEADER_SIZE_BYTES,
                limit: dst.len(),
            });
        }
        let o = self.order;
        let w = &mut dst[offset..offset + HEADER_SIZE_BYTES];
        o.write_u32(&mut w[RECORD_LENGTH_OFFSET..], self.length / 4);
        o.write_u32(&mut w[RECORD_NUMBER_OFFSET..], self.record_number);
        o.write_u32(&mut w[HEADER_LENGTH_OFFSET..], self.header_length / 4);
        o.write_u32(&mut w[EVENT_COUNT_OFFSET..], self.event_count);
        o.write_u32(&mut w[INDEX_LENGTH_OFFSET..], self.index_length);
        o.write_u32(&mut w[BIT_INFO_OFFSET..], self.bit_info());
        o.write_u32(&mut w[USER_LENGTH_OFFSET..], self.user_header_length);
        o.write_u32(&mut w[MAGIC_OFFSET..], HEADER_MAGIC);
        o.write_u32(&mut w[UNCOMPRESSED_LENGTH_OFFSET..], self.data_length);
        let compression = (u32::from(self.codec.code()) << 28) | self.compressed_length_words();
        o.write_u32(&mut w[COMPRESSION_OFFSET..], compression);
        o.write_u64(&mut w[USER_REGISTER1_OFFSET..], self.user_register_1);
        o.write_u64(&mut w[USER_REGISTER2_OFFSET..], self.user_register_2);
        Ok(())
    }

    /// Parse a header at `buf[offset..]`, detecting the byte order from
    /// the magic word.
    pub fn parse(buf: &[u8], offset: usize) -> Result<Self> {
        if offset + HEADER_SIZE_BYTES > buf.len() {
            return Err(Error::OutOfBounds {
                offset,
                len: HEADER_SIZE_BYTES,
                limit: buf.len(),
            });
        }
        let w = &buf[offset..offset + HEADER_SIZE_BYTES];
        let order = Endian::detect(&w[MAGIC_OFFSET..], HEADER_MAGIC)
            .ok_or_else(|| Error::BadMagic(Endian::Little.read_u32(&w[MAGIC_OFFSET..])))?;

        let bit_info = order.read_u32(&w[BIT_INFO_OFFSET..]);
        let version = (bit_info & 0xff) as u8;
        if version < 4 {
            return Err(Error::UnsupportedVersion(version));
        }
        let header_type = HeaderType::from_code((bit_info >> HEADER_TYPE_SHIFT) as u8)?;

        let length_words = order.read_u32(&w[RECORD_LENGTH_OFFSET..]);
        let header_length_words = order.read_u32(&w[HEADER_LENGTH_OFFSET..]);
        if header_length_words < HEADER_SIZE_WORDS || length_words < header_length_words {
            return Err(Error::BadFormat(format!(
                "record length {length_words} words, header length {header_length_words} words"
            )));
        }

        let compression = order.read_u32(&w[COMPRESSION_OFFSET..]);
        let codec = Codec::from_code((compression >> 28) as u8)?;
        let compressed_pad = (bit_info >> COMPRESSED_PAD_SHIFT) & PAD_MASK;
        let compressed_words = compression & 0x0fff_ffff;
        let compressed_length = if codec.is_compressed() {
            (4 * compressed_words).saturating_sub(compressed_pad)
        } else {
            0
        };

        let header = Self {
            header_type,
            length: length_words * 4,
            record_number: order.read_u32(&w[RECORD_NUMBER_OFFSET..]),
            header_length: header_length_words * 4,
            event_count: order.read_u32(&w[EVENT_COUNT_OFFSET..]),
            index_length: order.read_u32(&w[INDEX_LENGTH_OFFSET..]),
            user_header_length: order.read_u32(&w[USER_LENGTH_OFFSET..]),
            data_length: order.read_u32(&w[UNCOMPRESSED_LENGTH_OFFSET..]),
            compressed_length,
            codec,
            version,
            has_dictionary: bit_info & DICTIONARY_BIT != 0,
            has_first_event: bit_info & FIRST_EVENT_BIT != 0,
            last_record: bit_info & LAST_RECORD_BIT != 0,
            user_register_1: order.read_u64(&w[USER_REGISTER1_OFFSET..]),
            user_register_2: order.read_u64(&w[USER_REGISTER2_OFFSET..]),
            order,
        };
        trace!(
            "parsed record header #{} at {offset}: {} events, {} bytes, {:?}",
            header.record_number, header.event_count, header.length, header.codec
        );
        Ok(header)
    }

    /// Build a trailer: a record header with zero events and the
    /// last-record flag, optionally followed by an index of
    /// (record length, event count) word pairs.
    pub fn build_trailer(
        order: Endian,
        header_type: HeaderType,
        record_number: u32,
        index: Option<&[(u32, u32)]>,
    ) -> Vec<u8> {
        let index_bytes = index.map_or(0, |pairs| 8 * pairs.len() as u32);
        let mut header = Self::new(order, header_type.trailer());
        header
            .set_record_number(record_number)
            .set_index_length(index_bytes)
            .set_last_record(true);

        let total = HEADER_SIZE_BYTES + index_bytes as usize;
        let mut out = vec![0u8; total];
        // Infallible: out is sized above
        let _ = header.write_into(&mut out, 0);
        if let Some(pairs) = index {
            let mut at = HEADER_SIZE_BYTES;
            for &(len, count) in pairs {
                order.write_u32(&mut out[at..], len);
                order.write_u32(&mut out[at + 4..], count);
                at += 8;
            }
        }
        out
    }
}
