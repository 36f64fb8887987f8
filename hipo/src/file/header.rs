//! File header serialization and parsing
//!
//! The outer envelope reuses the 14-word record header shape with a
//! file-type id in word 0, a record count in word 3, and a 64-bit trailer
//! position in words 10-11. An optional index of (record length, event
//! count) pairs may sit between the header and the user-header blob.

use crate::cursor::Endian;
use crate::error::{Error, Result};
use crate::record::header::{
    CURRENT_VERSION, HEADER_MAGIC, HEADER_SIZE_BYTES, HEADER_SIZE_WORDS, HeaderType, pad_to_word,
    word_padding,
};

/// "HIPO" as the word-0 file type id.
pub const FILE_TYPE_HIPO: u32 = 0x4849_5050;
/// "EVIO" as the word-0 file type id.
pub const FILE_TYPE_EVIO: u32 = 0x4556_494F;

/// Byte offsets of the file header words.
pub const FILE_TYPE_OFFSET: usize = 0;
pub const FILE_NUMBER_OFFSET: usize = 4;
pub const HEADER_LENGTH_OFFSET: usize = 8;
pub const RECORD_COUNT_OFFSET: usize = 12;
pub const INDEX_LENGTH_OFFSET: usize = 16;
pub const BIT_INFO_OFFSET: usize = 20;
pub const USER_LENGTH_OFFSET: usize = 24;
pub const MAGIC_OFFSET: usize = 28;
pub const USER_REGISTER_OFFSET: usize = 32;
pub const TRAILER_POSITION_OFFSET: usize = 40;
pub const USER_INT1_OFFSET: usize = 48;
pub const USER_INT2_OFFSET: usize = 52;

const DICTIONARY_BIT: u32 = 1 << 8;
const FIRST_EVENT_BIT: u32 = 1 << 9;
const TRAILER_WITH_INDEX_BIT: u32 = 1 << 10;
const USER_PAD_SHIFT: u32 = 20;
const PAD_MASK: u32 = 0x3;
const HEADER_TYPE_SHIFT: u32 = 28;

/// File flavor, named by the word-0 id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    Hipo,
    Evio,
}

impl FileKind {
    pub fn type_word(self) -> u32 {
        match self {
            Self::Hipo => FILE_TYPE_HIPO,
            Self::Evio => FILE_TYPE_EVIO,
        }
    }

    pub fn header_type(self) -> HeaderType {
        match self {
            Self::Hipo => HeaderType::HipoFile,
            Self::Evio => HeaderType::EvioFile,
        }
    }

    fn from_type_word(word: u32) -> Result<Self> {
        match word {
            FILE_TYPE_HIPO => Ok(Self::Hipo),
            FILE_TYPE_EVIO => Ok(Self::Evio),
            other => Err(Error::BadFileType(other)),
        }
    }
}

/// Parsed or under-construction file header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    kind: FileKind,
    file_number: u32,
    /// Header length in bytes (56 as written).
    header_length: u32,
    record_count: u32,
    /// Record-index length in bytes (8 per record); 0 when absent.
    index_length: u32,
    /// User-header length in bytes, unpadded.
    user_header_length: u32,
    /// Byte offset of the trailer header; 0 when the file has none.
    trailer_position: u64,
    user_register: u64,
    user_int_1: u32,
    user_int_2: u32,
    version: u8,
    has_dictionary: bool,
    has_first_event: bool,
    trailer_with_index: bool,
    order: Endian,
}

impl FileHeader {
    pub fn new(order: Endian, kind: FileKind) -> Self {
        Self {
            kind,
            file_number: 1,
            header_length: HEADER_SIZE_BYTES as u32,
            record_count: 0,
            index_length: 0,
            user_header_length: 0,
            trailer_position: 0,
            user_register: 0,
            user_int_1: 0,
            user_int_2: 0,
            version: CURRENT_VERSION,
            has_dictionary: false,
            has_first_event: false,
            trailer_with_index: false,
            order,
        }
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    pub fn header_length(&self) -> u32 {
        self.header_length
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
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

    pub fn trailer_position(&self) -> u64 {
        self.trailer_position
    }

    pub fn user_register(&self) -> u64 {
        self.user_register
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

    pub fn has_trailer_with_index(&self) -> bool {
        self.trailer_with_index
    }

    /// True when a record index immediately follows this header.
    pub fn has_index(&self) -> bool {
        self.index_length > 0
    }

    /// Bytes from file start to the first record: header + index +
    /// padded user-header.
    pub fn length(&self) -> u32 {
        self.header_length + self.index_length + pad_to_word(self.user_header_length)
    }

    pub fn set_file_number(&mut self, n: u32) -> &mut Self {
        self.file_number = n;
        self
    }

    pub fn set_record_count(&mut self, n: u32) -> &mut Self {
        self.record_count = n;
        self
    }

    pub fn set_index_length(&mut self, bytes: u32) -> &mut Self {
        self.index_length = bytes;
        self
    }

    pub fn set_user_header_length(&mut self, bytes: u32) -> &mut Self {
        self.user_header_length = bytes;
        self
    }

    pub fn set_trailer_position(&mut self, pos: u64) -> &mut Self {
        self.trailer_position = pos;
        self
    }

    pub fn set_user_register(&mut self, v: u64) -> &mut Self {
        self.user_register = v;
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

    pub fn set_trailer_with_index(&mut self, yes: bool) -> &mut Self {
        self.trailer_with_index = yes;
        self
    }

    /// The bit-info word as written; also used when patching it in place
    /// at close time.
    pub fn bit_info(&self) -> u32 {
        let mut word = u32::from(self.version);
        if self.has_dictionary {
            word |= DICTIONARY_BIT;
        }
        if self.has_first_event {
            word |= FIRST_EVENT_BIT;
        }
        if self.trailer_with_index {
            word |= TRAILER_WITH_INDEX_BIT;
        }
        word |= (word_padding(self.user_header_length) & PAD_MASK) << USER_PAD_SHIFT;
        word |= u32::from(self.kind.header_type().code()) << HEADER_TYPE_SHIFT;
        word
    }

    /// Serialize the 14 words at `dst[offset..offset + 56]`.
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
        o.write_u32(&mut w[FILE_TYPE_OFFSET..], self.kind.type_word());
        o.write_u32(&mut w[FILE_NUMBER_OFFSET..], self.file_number);
        o.write_u32(&mut w[HEADER_LENGTH_OFFSET..], self.header_length / 4);
        o.write_u32(&mut w[RECORD_COUNT_OFFSET..], self.record_count);
        o.write_u32(&mut w[INDEX_LENGTH_OFFSET..], self.index_length);
        o.write_u32(&mut w[BIT_INFO_OFFSET..], self.bit_info());
        o.write_u32(&mut w[USER_LENGTH_OFFSET..], self.user_header_length);
        o.write_u32(&mut w[MAGIC_OFFSET..], HEADER_MAGIC);
        o.write_u64(&mut w[USER_REGISTER_OFFSET..], self.user_register);
        o.write_u64(&mut w[TRAILER_POSITION_OFFSET..], self.trailer_position);
        o.write_u32(&mut w[USER_INT1_OFFSET..], self.user_int_1);
        o.write_u32(&mut w[USER_INT2_OFFSET..], self.user_int_2);
        Ok(())
    }

    /// Parse a file header at `buf[offset..]`, detecting byte order from
    /// the magic word and validating the file-type id.
    ///
    /// A buffer that starts with a record header fails with
    /// [`Error::BadFileType`], which readers use to fall back to bare
    /// record-stream mode.
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

        let kind = FileKind::from_type_word(order.read_u32(&w[FILE_TYPE_OFFSET..]))?;

        let bit_info = order.read_u32(&w[BIT_INFO_OFFSET..]);
        let version = (bit_info & 0xff) as u8;
        if version < 4 {
            return Err(Error::UnsupportedVersion(version));
        }

        let header_length_words = order.read_u32(&w[HEADER_LENGTH_OFFSET..]);
        if header_length_words < HEADER_SIZE_WORDS {
            return Err(Error::BadFormat(format!(
                "file header length {header_length_words} words"
            )));
        }

        Ok(Self {
            kind,
            file_number: order.read_u32(&w[FILE_NUMBER_OFFSET..]),
            header_length: header_length_words * 4,
            record_count: order.read_u32(&w[RECORD_COUNT_OFFSET..]),
            index_length: order.read_u32(&w[INDEX_LENGTH_OFFSET..]),
            user_header_length: order.read_u32(&w[USER_LENGTH_OFFSET..]),
            trailer_position: order.read_u64(&w[TRAILER_POSITION_OFFSET..]),
            user_register: order.read_u64(&w[USER_REGISTER_OFFSET..]),
            user_int_1: order.read_u32(&w[USER_INT1_OFFSET..]),
            user_int_2: order.read_u32(&w[USER_INT2_OFFSET..]),
            version,
            has_dictionary: bit_info & DICTIONARY_BIT != 0,
            has_first_event: bit_info & FIRST_EVENT_BIT != 0,
            trailer_with_index: bit_info & TRAILER_WITH_INDEX_BIT != 0,
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_parse_round_trip() {
        for (order, kind) in [(Endian::Little, FileKind::Hipo), (Endian::Big, FileKind::Evio)] {
            let mut header = FileHeader::new(order, kind);
            header
                .set_record_count(5)
                .set_user_header_length(13)
                .set_trailer_position(4096)
                .set_dictionary(true)
                .set_trailer_with_index(true);

            let mut bytes = vec![0u8; HEADER_SIZE_BYTES];
            header.write_into(&mut bytes, 0).unwrap();

            let parsed = FileHeader::parse(&bytes, 0).unwrap();
            assert_eq!(parsed.kind(), kind);
            assert_eq!(parsed.byte_order(), order);
            assert_eq!(parsed.record_count(), 5);
            assert_eq!(parsed.user_header_length(), 13);
            assert_eq!(parsed.user_header_padding(), 3);
            assert_eq!(parsed.trailer_position(), 4096);
            assert!(parsed.has_dictionary());
            assert!(!parsed.has_first_event());
            assert!(parsed.has_trailer_with_index());
            // 56 + 0 + 16
            assert_eq!(parsed.length(), 72);
        }
    }

    #[test]
    fn record_header_is_not_a_file_header() {
        use crate::record::header::RecordHeader;

        let record = RecordHeader::new(Endian::Little, HeaderType::HipoRecord);
        let mut bytes = vec![0u8; HEADER_SIZE_BYTES];
        record.write_into(&mut bytes, 0).unwrap();

        assert!(matches!(
            FileHeader::parse(&bytes, 0),
            Err(Error::BadFileType(_))
        ));
    }

    #[test]
    fn file_type_words_spell_names() {
        assert_eq!(&FILE_TYPE_HIPO.to_be_bytes(), b"HIPO");
        assert_eq!(&FILE_TYPE_EVIO.to_be_bytes(), b"EVIO");
    }
}
