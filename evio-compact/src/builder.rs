//! Structure serialization
//!
//! Builds well-formed bank/segment/tagsegment bytes from typed leaf data
//! or child structures, with the 1- and 2-byte padding rules applied and
//! recorded in the header's pad field. String arrays follow the evio
//! convention: every entry NUL-terminated, the set padded to a word
//! boundary with NULs and a single trailing `\x04`.

use hipo::Endian;

use crate::error::{Error, Result};
use crate::types::{DataType, StructKind};

/// Serializer for one structure. Fill it with leaf data or child
/// structures matching its declared data type, then `build()`.
#[derive(Debug, Clone)]
pub struct StructureBuilder {
    kind: StructKind,
    tag: u16,
    num: u8,
    data_type: DataType,
    order: Endian,
    data: Vec<u8>,
}

impl StructureBuilder {
    /// A bank; tag is 16 bits, num 8.
    pub fn bank(order: Endian, tag: u16, num: u8, data_type: DataType) -> Self {
        Self {
            kind: StructKind::Bank,
            tag,
            num,
            data_type,
            order,
            data: Vec::new(),
        }
    }

    /// A segment; tag is 8 bits and there is no num.
    pub fn segment(order: Endian, tag: u8, data_type: DataType) -> Self {
        Self {
            kind: StructKind::Segment,
            tag: u16::from(tag),
            num: 0,
            data_type,
            order,
            data: Vec::new(),
        }
    }

    /// A tagsegment; tag is 12 bits and the data type 4.
    pub fn tag_segment(order: Endian, tag: u16, data_type: DataType) -> Result<Self> {
        if tag > 0xfff {
            return Err(Error::InvalidArgument("tagsegment tag exceeds 12 bits"));
        }
        if data_type.code() > 0xf {
            return Err(Error::InvalidArgument(
                "tagsegment data type exceeds 4 bits",
            ));
        }
        Ok(Self {
            kind: StructKind::TagSegment,
            tag,
            num: 0,
            data_type,
            order,
            data: Vec::new(),
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Raw payload bytes appended so far, unpadded.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    fn check_leaf(&self, element: usize) -> Result<()> {
        if self.data_type.element_size() != Some(element) {
            return Err(Error::InvalidArgument(
                "value width does not match the declared data type",
            ));
        }
        Ok(())
    }

    pub fn append_u8(&mut self, values: &[u8]) -> Result<&mut Self> {
        self.check_leaf(1)?;
        self.data.extend_from_slice(values);
        Ok(self)
    }

    pub fn append_i8(&mut self, values: &[i8]) -> Result<&mut Self> {
        self.check_leaf(1)?;
        self.data.extend(values.iter().map(|&v| v as u8));
        Ok(self)
    }

    pub fn append_u16(&mut self, values: &[u16]) -> Result<&mut Self> {
        self.check_leaf(2)?;
        for &v in values {
            let mut b = [0u8; 2];
            self.order.write_u16(&mut b, v);
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_i16(&mut self, values: &[i16]) -> Result<&mut Self> {
        self.check_leaf(2)?;
        for &v in values {
            let mut b = [0u8; 2];
            self.order.write_u16(&mut b, v as u16);
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_u32(&mut self, values: &[u32]) -> Result<&mut Self> {
        self.check_leaf(4)?;
        for &v in values {
            let mut b = [0u8; 4];
            self.order.write_u32(&mut b, v);
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_i32(&mut self, values: &[i32]) -> Result<&mut Self> {
        self.check_leaf(4)?;
        for &v in values {
            let mut b = [0u8; 4];
            self.order.write_u32(&mut b, v as u32);
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_f32(&mut self, values: &[f32]) -> Result<&mut Self> {
        self.check_leaf(4)?;
        for &v in values {
            let mut b = [0u8; 4];
            self.order.write_u32(&mut b, v.to_bits());
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_u64(&mut self, values: &[u64]) -> Result<&mut Self> {
        self.check_leaf(8)?;
        for &v in values {
            let mut b = [0u8; 8];
            self.order.write_u64(&mut b, v);
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_i64(&mut self, values: &[i64]) -> Result<&mut Self> {
        self.check_leaf(8)?;
        for &v in values {
            let mut b = [0u8; 8];
            self.order.write_u64(&mut b, v as u64);
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    pub fn append_f64(&mut self, values: &[f64]) -> Result<&mut Self> {
        self.check_leaf(8)?;
        for &v in values {
            let mut b = [0u8; 8];
            self.order.write_u64(&mut b, v.to_bits());
            self.data.extend_from_slice(&b);
        }
        Ok(self)
    }

    /// Encode a whole string array. Only valid once, on an empty
    /// [`DataType::CharStar8`] structure, since the encoding closes the
    /// set with its padding.
    pub fn set_strings(&mut self, strings: &[&str]) -> Result<&mut Self> {
        if self.data_type != DataType::CharStar8 {
            return Err(Error::InvalidArgument(
                "string data needs the string data type",
            ));
        }
        if !self.data.is_empty() {
            return Err(Error::InvalidArgument("string array already set"));
        }
        if strings.is_empty() {
            return Err(Error::InvalidArgument("empty string array"));
        }
        self.data = encode_string_array(strings);
        Ok(self)
    }

    /// Append an already-built child structure. The child's kind must
    /// match this container's data type.
    pub fn append_child(&mut self, child: &[u8]) -> Result<&mut Self> {
        let Some(expected) = self.data_type.child_kind() else {
            return Err(Error::NotAContainer(self.data_type.code()));
        };
        if child.is_empty() || child.len() % 4 != 0 {
            return Err(Error::InvalidArgument(
                "child structure must be a non-empty whole number of words",
            ));
        }
        // Must parse as a single structure of the expected kind
        let tree = crate::scanner::scan_structure(child, self.order, 0, expected, 0)?;
        if tree.root().total_bytes() != child.len() {
            return Err(Error::Malformed(format!(
                "child occupies {} of {} bytes",
                tree.root().total_bytes(),
                child.len()
            )));
        }
        self.data.extend_from_slice(child);
        Ok(self)
    }

    /// Serialize: header word(s), payload, zero padding. The pad count
    /// lands in the header for 1- and 2-byte leaf types.
    pub fn build(&self) -> Result<Vec<u8>> {
        let pad = self.data_type.padding_for(self.data.len());
        let padded = self.data.len() + pad as usize;
        debug_assert_eq!(padded % 4, 0);
        let data_words = (padded / 4) as u32;

        let header_words = self.kind.header_words() as usize;
        if data_words > 0xffff && self.kind != StructKind::Bank {
            return Err(Error::Malformed(format!(
                "{} data of {data_words} words exceeds the 16-bit length field",
                self.kind.name()
            )));
        }

        let mut out = vec![0u8; 4 * header_words + padded];
        match self.kind {
            StructKind::Bank => {
                self.order.write_u32(&mut out, data_words + 1);
                let word1 = (u32::from(self.tag) << 16)
                    | (u32::from(pad) << 14)
                    | (u32::from(self.data_type.code()) << 8)
                    | u32::from(self.num);
                self.order.write_u32(&mut out[4..], word1);
            }
            StructKind::Segment => {
                let word0 = (u32::from(self.tag) << 24)
                    | (u32::from(pad) << 22)
                    | (u32::from(self.data_type.code()) << 16)
                    | data_words;
                self.order.write_u32(&mut out, word0);
            }
            StructKind::TagSegment => {
                let word0 = (u32::from(self.tag) << 20)
                    | (u32::from(self.data_type.code()) << 16)
                    | data_words;
                self.order.write_u32(&mut out, word0);
            }
        }
        out[4 * header_words..4 * header_words + self.data.len()].copy_from_slice(&self.data);
        Ok(out)
    }
}

/// Encode the full NUL-delimited string set, padded to a word boundary
/// with NULs and closed by a single `\x04`.
pub fn encode_string_array(strings: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in strings {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    while out.len() % 4 != 3 {
        out.push(0);
    }
    out.push(0x04);
    out
}

/// Decode every string of an evio string-array region.
pub fn decode_string_array(data: &[u8]) -> Vec<String> {
    let end = data
        .iter()
        .position(|&b| b == 0x04)
        .unwrap_or(data.len());
    data[..end]
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}
