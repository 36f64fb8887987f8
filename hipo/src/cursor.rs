//! Endian-aware random-access view over a contiguous byte region
//!
//! All multi-byte accessors take absolute offsets and leave the advisory
//! position untouched, which is what the record and structure scanners
//! rely on when walking a buffer without disturbing each other.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Byte order of a buffer, detected from magic words rather than configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// Byte order of the host.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// The opposite byte order.
    pub fn swapped(self) -> Self {
        match self {
            Self::Big => Self::Little,
            Self::Little => Self::Big,
        }
    }

    /// Detect the order under which the 4 bytes at `bytes` read as `expect`.
    ///
    /// Returns `None` when neither order matches.
    pub fn detect(bytes: &[u8], expect: u32) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        if LittleEndian::read_u32(bytes) == expect {
            Some(Self::Little)
        } else if BigEndian::read_u32(bytes) == expect {
            Some(Self::Big)
        } else {
            None
        }
    }

    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            Self::Big => BigEndian::read_u16(bytes),
            Self::Little => LittleEndian::read_u16(bytes),
        }
    }

    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            Self::Big => BigEndian::read_u32(bytes),
            Self::Little => LittleEndian::read_u32(bytes),
        }
    }

    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            Self::Big => BigEndian::read_u64(bytes),
            Self::Little => LittleEndian::read_u64(bytes),
        }
    }

    pub fn write_u16(self, bytes: &mut [u8], v: u16) {
        match self {
            Self::Big => BigEndian::write_u16(bytes, v),
            Self::Little => LittleEndian::write_u16(bytes, v),
        }
    }

    pub fn write_u32(self, bytes: &mut [u8], v: u32) {
        match self {
            Self::Big => BigEndian::write_u32(bytes, v),
            Self::Little => LittleEndian::write_u32(bytes, v),
        }
    }

    pub fn write_u64(self, bytes: &mut [u8], v: u64) {
        match self {
            Self::Big => BigEndian::write_u64(bytes, v),
            Self::Little => LittleEndian::write_u64(bytes, v),
        }
    }
}

/// Random-access cursor over backing storage `B`.
///
/// Reading needs `B: AsRef<[u8]>`; writing additionally needs
/// `B: AsMut<[u8]>`, so the same type serves borrowed slices, owned
/// vectors and memory maps. `position` and `limit` are advisory for
/// sequential use; every `get_*`/`put_*` is absolute.
#[derive(Debug, Clone)]
pub struct ByteCursor<B> {
    buf: B,
    order: Endian,
    position: usize,
    limit: usize,
}

impl<B: AsRef<[u8]>> ByteCursor<B> {
    /// Wrap `buf` with the given byte order; limit starts at capacity.
    pub fn new(buf: B, order: Endian) -> Self {
        let limit = buf.as_ref().len();
        Self {
            buf,
            order,
            position: 0,
            limit,
        }
    }

    pub fn order(&self) -> Endian {
        self.order
    }

    pub fn set_order(&mut self, order: Endian) {
        self.order = order;
    }

    /// Total size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Set the limit; fails if it exceeds capacity.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity() {
            return Err(Error::OutOfBounds {
                offset: limit,
                len: 0,
                limit: self.capacity(),
            });
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Bytes left between position and limit.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.position)
    }

    /// Move the advisory position forward.
    pub fn advance(&mut self, n: usize) {
        self.position += n;
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.limit) {
            return Err(Error::OutOfBounds {
                offset,
                len,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub fn get_u8(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        Ok(self.buf.as_ref()[offset])
    }

    pub fn get_u16(&self, offset: usize) -> Result<u16> {
        self.check(offset, 2)?;
        Ok(self.order.read_u16(&self.buf.as_ref()[offset..]))
    }

    pub fn get_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        Ok(self.order.read_u32(&self.buf.as_ref()[offset..]))
    }

    pub fn get_u64(&self, offset: usize) -> Result<u64> {
        self.check(offset, 8)?;
        Ok(self.order.read_u64(&self.buf.as_ref()[offset..]))
    }

    /// Borrow `n` bytes starting at `offset`.
    pub fn get_bytes(&self, offset: usize, n: usize) -> Result<&[u8]> {
        self.check(offset, n)?;
        Ok(&self.buf.as_ref()[offset..offset + n])
    }

    /// Borrow the region `[from, to)`.
    pub fn slice(&self, from: usize, to: usize) -> Result<&[u8]> {
        if to < from {
            return Err(Error::InvalidArgument("slice end precedes start"));
        }
        self.get_bytes(from, to - from)
    }

    /// The full valid region `[0, limit)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf.as_ref()[..self.limit]
    }

    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ByteCursor<B> {
    pub fn put_u8(&mut self, offset: usize, v: u8) -> Result<()> {
        self.check(offset, 1)?;
        self.buf.as_mut()[offset] = v;
        Ok(())
    }

    pub fn put_u16(&mut self, offset: usize, v: u16) -> Result<()> {
        self.check(offset, 2)?;
        self.order.write_u16(&mut self.buf.as_mut()[offset..], v);
        Ok(())
    }

    pub fn put_u32(&mut self, offset: usize, v: u32) -> Result<()> {
        self.check(offset, 4)?;
        self.order.write_u32(&mut self.buf.as_mut()[offset..], v);
        Ok(())
    }

    pub fn put_u64(&mut self, offset: usize, v: u64) -> Result<()> {
        self.check(offset, 8)?;
        self.order.write_u64(&mut self.buf.as_mut()[offset..], v);
        Ok(())
    }

    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        self.buf.as_mut()[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl ByteCursor<Vec<u8>> {
    /// Owned, growable cursor starting empty.
    pub fn with_capacity(capacity: usize, order: Endian) -> Self {
        Self::new(vec![0u8; capacity], order)
    }

    /// Grow the backing vector (zero-filled) so at least `needed` bytes
    /// exist, raising the limit to match. Existing offsets stay valid.
    pub fn ensure_capacity(&mut self, needed: usize) {
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }
        if self.limit < needed {
            self.limit = needed;
        }
    }

    /// Close the gap `[from, to)`: bytes past `to` move left and the
    /// limit drops by the gap size.
    pub fn remove_range(&mut self, from: usize, to: usize) -> Result<()> {
        if to < from || to > self.limit {
            return Err(Error::OutOfBounds {
                offset: from,
                len: to.saturating_sub(from),
                limit: self.limit,
            });
        }
        self.buf.truncate(self.limit);
        self.buf.drain(from..to);
        self.limit = self.buf.len();
        Ok(())
    }

    /// Open a gap at `at` and fill it with `src`; bytes at and past `at`
    /// move right and the limit grows. The backing vector may reallocate,
    /// which leaves all byte offsets valid.
    pub fn insert_at(&mut self, at: usize, src: &[u8]) -> Result<()> {
        if at > self.limit {
            return Err(Error::OutOfBounds {
                offset: at,
                len: src.len(),
                limit: self.limit,
            });
        }
        self.buf.truncate(self.limit);
        self.buf.splice(at..at, src.iter().copied());
        self.limit = self.buf.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_access_round_trip() {
        let mut cur = ByteCursor::new(vec![0u8; 16], Endian::Big);
        cur.put_u32(0, 0xc0da_0100).unwrap();
        cur.put_u16(4, 0xbeef).unwrap();
        cur.put_u64(8, 0x0102_0304_0506_0708).unwrap();

        assert_eq!(cur.get_u32(0).unwrap(), 0xc0da_0100);
        assert_eq!(cur.get_u16(4).unwrap(), 0xbeef);
        assert_eq!(cur.get_u64(8).unwrap(), 0x0102_0304_0506_0708);
        // Absolute access never moves the position
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn endianness_changes_layout() {
        let mut le = ByteCursor::new(vec![0u8; 4], Endian::Little);
        le.put_u32(0, 0x11223344).unwrap();
        assert_eq!(le.as_slice(), &[0x44, 0x33, 0x22, 0x11]);

        let mut be = ByteCursor::new(vec![0u8; 4], Endian::Big);
        be.put_u32(0, 0x11223344).unwrap();
        assert_eq!(be.as_slice(), &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let cur = ByteCursor::new(vec![0u8; 8], Endian::Little);
        let err = cur.get_u32(6).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfBounds {
                offset: 6,
                len: 4,
                limit: 8
            }
        ));
    }

    #[test]
    fn limit_bounds_reads() {
        let mut cur = ByteCursor::new(vec![0u8; 16], Endian::Little);
        cur.set_limit(8).unwrap();
        assert!(cur.get_u32(4).is_ok());
        assert!(cur.get_u32(8).is_err());
        assert!(cur.set_limit(32).is_err());
    }

    #[test]
    fn detect_magic_in_both_orders() {
        let magic = 0xc0da_0100u32;
        assert_eq!(
            Endian::detect(&magic.to_le_bytes(), magic),
            Some(Endian::Little)
        );
        assert_eq!(
            Endian::detect(&magic.to_be_bytes(), magic),
            Some(Endian::Big)
        );
        assert_eq!(Endian::detect(&[0xde, 0xad, 0xbe, 0xef], magic), None);
    }

    #[test]
    fn grow_preserves_contents() {
        let mut cur = ByteCursor::new(vec![1u8, 2, 3, 4], Endian::Little);
        cur.ensure_capacity(8);
        assert_eq!(cur.limit(), 8);
        assert_eq!(&cur.as_slice()[..4], &[1, 2, 3, 4]);
    }
}
