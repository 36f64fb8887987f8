//! Compression codec facade
//!
//! Records compress their index + user-header + event payload as a single
//! blob. The codec is keyed by the 4-bit type code carried in the record
//! header: 0 = none, 1 = LZ4 fast, 2 = LZ4 best, 3 = GZIP.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::trace;

use crate::error::{Error, Result};

/// Compression applied to a record's payload blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    None,
    Lz4,
    Lz4Best,
    Gzip,
}

impl Codec {
    /// Decode the 4-bit type code from a record header.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Lz4Best),
            3 => Ok(Self::Gzip),
            other => Err(Error::UnknownCompression(other)),
        }
    }

    /// The 4-bit type code stored in a record header.
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Lz4Best => 2,
            Self::Gzip => 3,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Self::None
    }

    /// Upper bound on the output size when compressing `n` bytes.
    pub fn worst_case_bound(self, n: usize) -> usize {
        match self {
            Self::None => n,
            // LZ4 block format bound
            Self::Lz4 | Self::Lz4Best => lz4_flex::block::get_maximum_output_size(n),
            // Deflate stored blocks plus gzip framing
            Self::Gzip => n + n / 250 + 64,
        }
    }

    /// Compress all of `src` into the start of `dst`, returning the number
    /// of bytes written.
    ///
    /// For LZ4 the caller must supply `dst.len() >= worst_case_bound`;
    /// GZIP stages through an internal buffer and only needs room for the
    /// actual output.
    pub fn compress(self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let written = match self {
            Self::None => {
                if dst.len() < src.len() {
                    return Err(Error::InsufficientSpace {
                        needed: src.len(),
                        available: dst.len(),
                    });
                }
                dst[..src.len()].copy_from_slice(src);
                src.len()
            }
            Self::Lz4 | Self::Lz4Best => {
                let bound = self.worst_case_bound(src.len());
                if dst.len() < bound {
                    return Err(Error::InsufficientSpace {
                        needed: bound,
                        available: dst.len(),
                    });
                }
                lz4_flex::block::compress_into(src, dst)
                    .map_err(|e| Error::CorruptData(e.to_string()))?
            }
            Self::Gzip => {
                let mut encoder =
                    GzEncoder::new(Vec::with_capacity(src.len() / 2), Compression::default());
                encoder.write_all(src)?;
                let out = encoder.finish()?;
                if dst.len() < out.len() {
                    return Err(Error::InsufficientSpace {
                        needed: out.len(),
                        available: dst.len(),
                    });
                }
                dst[..out.len()].copy_from_slice(&out);
                out.len()
            }
        };
        trace!("compressed {} -> {} bytes ({:?})", src.len(), written, self);
        Ok(written)
    }

    /// Expand all of `src` into `dst`, returning the number of bytes
    /// produced. `dst` must be sized from the record header's
    /// uncompressed length.
    pub fn decompress(self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        match self {
            Self::None => {
                if dst.len() < src.len() {
                    return Err(Error::InsufficientSpace {
                        needed: src.len(),
                        available: dst.len(),
                    });
                }
                dst[..src.len()].copy_from_slice(src);
                Ok(src.len())
            }
            Self::Lz4 | Self::Lz4Best => lz4_flex::block::decompress_into(src, dst)
                .map_err(|e| Error::CorruptData(e.to_string())),
            Self::Gzip => {
                let mut decoder = GzDecoder::new(src);
                let mut written = 0;
                loop {
                    match decoder.read(&mut dst[written..]) {
                        Ok(0) => break,
                        Ok(n) => written += n,
                        Err(e) => return Err(Error::CorruptData(e.to_string())),
                    }
                    if written == dst.len() {
                        // Expected size reached; anything further means the
                        // header lied about the uncompressed length.
                        let mut probe = [0u8; 1];
                        match decoder.read(&mut probe) {
                            Ok(0) => break,
                            Ok(_) => {
                                return Err(Error::CorruptData(
                                    "gzip stream longer than declared".into(),
                                ));
                            }
                            Err(e) => return Err(Error::CorruptData(e.to_string())),
                        }
                    }
                }
                Ok(written)
            }
        }
    }
}
