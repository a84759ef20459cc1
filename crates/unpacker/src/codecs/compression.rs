//! Single-stream decoders.

use super::StreamDecoder;
use std::io::{self, Read};

/// gzip, including concatenated members.
pub struct Gzip;

impl StreamDecoder for Gzip {
    fn decode<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(input)))
    }
}

/// bzip2, including concatenated streams.
pub struct Bzip2;

impl StreamDecoder for Bzip2 {
    fn decode<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(input)))
    }
}

/// xz container format.
pub struct Xz;

impl StreamDecoder for Xz {
    fn decode<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(input)))
    }
}

/// Legacy `.lzma` (LZMA-alone) streams.
pub struct Lzma;

impl StreamDecoder for Lzma {
    fn decode<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
            .map_err(io::Error::other)?;
        Ok(Box::new(xz2::read::XzDecoder::new_stream(input, stream)))
    }
}

/// Zstandard frames.
pub struct Zstd;

impl StreamDecoder for Zstd {
    fn decode<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(zstd::stream::read::Decoder::new(input)?))
    }
}

/// `BZh` followed by a block size digit.
pub(crate) fn is_bzip2(prefix: &[u8]) -> bool {
    matches!(prefix, [b'B', b'Z', b'h', b'1'..=b'9', ..])
}

/// LZMA-alone header: properties byte, power-of-two-ish dictionary size and
/// either an unknown (all ones) or plausible uncompressed size.
pub(crate) fn is_lzma_alone(prefix: &[u8]) -> bool {
    if prefix.len() < 13 || prefix[0] >= 9 * 5 * 5 {
        return false;
    }
    let dict = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
    if dict < 1 << 12 {
        return false;
    }
    let dict_ok = dict.is_power_of_two() || (dict & (dict - 1)).is_power_of_two();
    let mut size = [0u8; 8];
    size.copy_from_slice(&prefix[5..13]);
    let size = u64::from_le_bytes(size);
    dict_ok && (size == u64::MAX || size < 1 << 48)
}
