//! Block compressor with length framing (section 4.3: "payloads over a threshold are
//! compressed ... the choice of algorithm is not wire-normative beyond 'block compressor
//! with length framing'"). Used directly by large payloads (snapshot chunks) and available
//! to any future payload that crosses the size threshold.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use corenet::shared::{ErrorType, NetworkError, NetworkResult};

/// Payloads at or above this size are worth the CPU cost of compressing (section 4.3).
pub const COMPRESSION_THRESHOLD: usize = 4096;

pub fn compress(data: &[u8]) -> NetworkResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(NetworkError::from)?;
    encoder.finish().map_err(NetworkError::from)
}

pub fn decompress(data: &[u8], expected_len: usize) -> NetworkResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|_| NetworkError::Fatal(ErrorType::DeserializationFailed))?;
    Ok(out)
}

/// CRC-32 checksum used by snapshots (section 4.3/4.12) and by terrain sync (section 4.13)
/// to let a client verify it reconstructed the same authoritative bytes the server holds.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let original: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let compressed = compress(&original).unwrap();
        assert!(compressed.len() < original.len());

        let decompressed = decompress(&compressed, original.len()).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_checksum_is_deterministic_and_sensitive() {
        let a = checksum(b"hello world");
        let b = checksum(b"hello world");
        let c = checksum(b"hello worlD");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
