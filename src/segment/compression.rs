//! Block compression and the per-block checksum trailer.
//!
//! Every stored block ends with `[compression: u8][crc32: u32]`, the
//! checksum covering the stored bytes and the compression byte.

use super::BLOCK_TRAILER_SIZE;
use crate::config::CompressionType;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Compresses `raw` and appends the block trailer.
///
/// Falls back to storing the block uncompressed when compression does not
/// make it smaller.
pub(crate) fn encode_block(raw: &[u8], compression: CompressionType, out: &mut BytesMut) -> Result<usize> {
    let start = out.len();
    let compressed = compress(raw, compression)?;
    let (stored, used): (&[u8], CompressionType) = match &compressed {
        Some(data) if data.len() < raw.len() => (data, compression),
        _ => (raw, CompressionType::None),
    };

    out.put_slice(stored);
    out.put_u8(used as u8);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(stored);
    hasher.update(&[used as u8]);
    out.put_u32_le(hasher.finalize());

    Ok(out.len() - start)
}

/// Verifies the trailer of a stored block and returns its raw contents.
pub(crate) fn decode_block(stored: &[u8]) -> Result<Bytes> {
    if stored.len() < BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("Block shorter than its trailer"));
    }

    let body_len = stored.len() - BLOCK_TRAILER_SIZE;
    let body = &stored[..body_len];
    let compression_byte = stored[body_len];
    let expected = u32::from_le_bytes([
        stored[body_len + 1],
        stored[body_len + 2],
        stored[body_len + 3],
        stored[body_len + 4],
    ]);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.update(&[compression_byte]);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    let compression = CompressionType::from_u8(compression_byte).ok_or_else(|| {
        Error::corruption(format!("Unsupported block compression: {}", compression_byte))
    })?;
    decompress(body, compression)
}

fn compress(raw: &[u8], compression: CompressionType) -> Result<Option<Vec<u8>>> {
    match compression {
        CompressionType::None => Ok(None),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(raw)
            .map(Some)
            .map_err(|e| Error::internal(format!("Snappy compression failed: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => Ok(Some(lz4::block::compress(raw, None, true)?)),
    }
}

fn decompress(body: &[u8], compression: CompressionType) -> Result<Bytes> {
    match compression {
        CompressionType::None => Ok(Bytes::copy_from_slice(body)),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(body)
            .map(Bytes::from)
            .map_err(|e| Error::corruption(format!("Snappy decompression failed: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => lz4::block::decompress(body, None)
            .map(Bytes::from)
            .map_err(|e| Error::corruption(format!("LZ4 decompression failed: {}", e))),
    }
}
