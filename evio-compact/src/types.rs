//! Structure kinds and data-type codes
//!
//! A structure is a bank, segment or tagsegment; what a container holds
//! is named by the data-type code in its header. The bank/segment
//! data-type byte folds a 2-bit padding count into its top bits:
//! `data_type = byte & 0x3f`, `pad = byte >> 6`.

use crate::error::{Error, Result};

/// The three structure kinds, differing in header width and packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Bank,
    Segment,
    TagSegment,
}

impl StructKind {
    /// Header size in 32-bit words.
    pub fn header_words(self) -> u32 {
        match self {
            Self::Bank => 2,
            Self::Segment | Self::TagSegment => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Segment => "segment",
            Self::TagSegment => "tagsegment",
        }
    }
}

/// Data-type codes from the evio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Unknown32 = 0x0,
    Uint32 = 0x1,
    Float32 = 0x2,
    /// NUL-delimited string array
    CharStar8 = 0x3,
    Short16 = 0x4,
    Ushort16 = 0x5,
    Char8 = 0x6,
    Uchar8 = 0x7,
    Double64 = 0x8,
    Long64 = 0x9,
    Ulong64 = 0xa,
    Int32 = 0xb,
    TagSegment = 0xc,
    AlsoSegment = 0xd,
    AlsoBank = 0xe,
    Composite = 0xf,
    Bank = 0x10,
    Segment = 0x20,
}

impl DataType {
    /// Decode a data-type code; anything outside the defined set is an
    /// error.
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x0 => Self::Unknown32,
            0x1 => Self::Uint32,
            0x2 => Self::Float32,
            0x3 => Self::CharStar8,
            0x4 => Self::Short16,
            0x5 => Self::Ushort16,
            0x6 => Self::Char8,
            0x7 => Self::Uchar8,
            0x8 => Self::Double64,
            0x9 => Self::Long64,
            0xa => Self::Ulong64,
            0xb => Self::Int32,
            0xc => Self::TagSegment,
            0xd => Self::AlsoSegment,
            0xe => Self::AlsoBank,
            0xf => Self::Composite,
            0x10 => Self::Bank,
            0x20 => Self::Segment,
            other => return Err(Error::UnknownDataType(other)),
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_bank(self) -> bool {
        matches!(self, Self::Bank | Self::AlsoBank)
    }

    pub fn is_segment(self) -> bool {
        matches!(self, Self::Segment | Self::AlsoSegment)
    }

    pub fn is_tag_segment(self) -> bool {
        self == Self::TagSegment
    }

    /// True for codes naming child structures rather than leaf data.
    pub fn is_container(self) -> bool {
        self.is_bank() || self.is_segment() || self.is_tag_segment()
    }

    /// The structure kind of children held by a container of this type.
    pub fn child_kind(self) -> Option<StructKind> {
        if self.is_bank() {
            Some(StructKind::Bank)
        } else if self.is_segment() {
            Some(StructKind::Segment)
        } else if self.is_tag_segment() {
            Some(StructKind::TagSegment)
        } else {
            None
        }
    }

    /// Element size in bytes for leaf types; `None` for containers.
    /// Composite and string data count as byte streams.
    pub fn element_size(self) -> Option<usize> {
        match self {
            Self::Char8 | Self::Uchar8 | Self::CharStar8 | Self::Composite => Some(1),
            Self::Short16 | Self::Ushort16 => Some(2),
            Self::Unknown32 | Self::Uint32 | Self::Int32 | Self::Float32 => Some(4),
            Self::Double64 | Self::Long64 | Self::Ulong64 => Some(8),
            _ => None,
        }
    }

    /// Padding bytes to append for `n` bytes of this leaf type.
    pub fn padding_for(self, n: usize) -> u8 {
        match self.element_size() {
            Some(1) => ((4 - n % 4) % 4) as u8,
            Some(2) => ((4 - n % 4) % 4) as u8,
            _ => 0,
        }
    }
}
