//! Deflate and zstd codecs.

use crate::core::CompressionError;
use crate::core::constants::MAX_BODY_LENGTH;

use super::CompressionType;

#[cfg(feature = "zstd")]
use crate::core::constants::ZSTD_LEVEL;
#[cfg(feature = "deflate")]
use crate::core::constants::DEFLATE_LEVEL;

/// A compression algorithm with its per-session state.
#[derive(Debug, Clone)]
pub enum Compressor {
    /// Raw deflate stream (no zlib header).
    #[cfg(feature = "deflate")]
    Deflate,
    /// Zstd frames, optionally with a pre-shared dictionary.
    #[cfg(feature = "zstd")]
    Zstd {
        /// Decoded dictionary bytes.
        dictionary: Option<Vec<u8>>,
    },
}

impl Compressor {
    /// Factory from a wire-level compression type.
    pub fn create(compression: CompressionType) -> Option<Self> {
        match compression {
            #[cfg(feature = "deflate")]
            CompressionType::Deflate => Some(Compressor::Deflate),
            #[cfg(feature = "zstd")]
            CompressionType::Zstd => Some(Compressor::Zstd { dictionary: None }),
            _ => None,
        }
    }

    /// Compression type implemented by this codec.
    pub fn compression_type(&self) -> CompressionType {
        match self {
            #[cfg(feature = "deflate")]
            Compressor::Deflate => CompressionType::Deflate,
            #[cfg(feature = "zstd")]
            Compressor::Zstd { .. } => CompressionType::Zstd,
        }
    }

    /// Compress `data`.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            #[cfg(feature = "deflate")]
            Compressor::Deflate => deflate_compress(data),
            #[cfg(feature = "zstd")]
            Compressor::Zstd { dictionary } => zstd_compress(data, dictionary.as_deref()),
        }
    }

    /// Decompress `data` into exactly `original_len` bytes.
    ///
    /// `original_len` comes from the peer, so it is bounded before any
    /// buffer is sized from it.
    pub fn decompress(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, CompressionError> {
        if original_len > MAX_BODY_LENGTH {
            return Err(CompressionError::DecompressionFailed(format!(
                "declared length {original_len} exceeds {MAX_BODY_LENGTH}"
            )));
        }
        let output = match self {
            #[cfg(feature = "deflate")]
            Compressor::Deflate => deflate_decompress(data, original_len)?,
            #[cfg(feature = "zstd")]
            Compressor::Zstd { dictionary } => {
                zstd_decompress(data, original_len, dictionary.as_deref())?
            }
        };

        if output.len() != original_len {
            return Err(CompressionError::SizeMismatch {
                expected: original_len,
                actual: output.len(),
            });
        }
        Ok(output)
    }
}

#[cfg(feature = "deflate")]
fn deflate_compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::DeflateEncoder;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(DEFLATE_LEVEL));
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))
}

#[cfg(feature = "deflate")]
fn deflate_decompress(data: &[u8], original_len: usize) -> Result<Vec<u8>, CompressionError> {
    use std::io::Read;

    use flate2::read::DeflateDecoder;

    // Read one byte past the declared size so an oversized stream is detected.
    let limit = u64::try_from(original_len)
        .ok()
        .and_then(|len| len.checked_add(1))
        .ok_or_else(|| CompressionError::DecompressionFailed("declared length overflows".into()))?;
    let mut output = Vec::new();
    DeflateDecoder::new(data)
        .take(limit)
        .read_to_end(&mut output)
        .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
    Ok(output)
}

#[cfg(feature = "zstd")]
fn zstd_compress(data: &[u8], dictionary: Option<&[u8]>) -> Result<Vec<u8>, CompressionError> {
    let result = match dictionary {
        Some(dict) => zstd::bulk::Compressor::with_dictionary(ZSTD_LEVEL, dict)
            .and_then(|mut c| c.compress(data)),
        None => zstd::bulk::compress(data, ZSTD_LEVEL),
    };
    result.map_err(|e| CompressionError::CompressionFailed(e.to_string()))
}

#[cfg(feature = "zstd")]
fn zstd_decompress(
    data: &[u8],
    original_len: usize,
    dictionary: Option<&[u8]>,
) -> Result<Vec<u8>, CompressionError> {
    let result = match dictionary {
        Some(dict) => zstd::bulk::Decompressor::with_dictionary(dict)
            .and_then(|mut d| d.decompress(data, original_len)),
        None => zstd::bulk::decompress(data, original_len),
    };
    result.map_err(|e| CompressionError::DecompressionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = br#"{"_msgtype":"echo","message":"hello hello hello hello hello hello"}"#;

    #[cfg(feature = "deflate")]
    #[test]
    fn test_deflate_roundtrip() {
        let codec = Compressor::create(CompressionType::Deflate).unwrap();
        let compressed = codec.compress(SAMPLE).unwrap();
        assert!(compressed.len() < SAMPLE.len());
        assert_eq!(codec.decompress(&compressed, SAMPLE.len()).unwrap(), SAMPLE);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_deflate_is_raw_stream() {
        let codec = Compressor::Deflate;
        let compressed = codec.compress(SAMPLE).unwrap();
        // A zlib stream would start with 0x78.
        assert_ne!(compressed[0], 0x78);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_size_mismatch() {
        let codec = Compressor::create(CompressionType::Zstd).unwrap();
        let compressed = codec.compress(SAMPLE).unwrap();
        assert_eq!(codec.decompress(&compressed, SAMPLE.len()).unwrap(), SAMPLE);
        assert!(codec.decompress(&compressed, SAMPLE.len() + 5).is_err());
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_deflate_size_mismatch() {
        let codec = Compressor::Deflate;
        let compressed = codec.compress(SAMPLE).unwrap();
        assert_eq!(
            codec.decompress(&compressed, SAMPLE.len() - 1),
            Err(CompressionError::SizeMismatch {
                expected: SAMPLE.len() - 1,
                actual: SAMPLE.len(),
            })
        );
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_deflate_huge_declared_length() {
        let codec = Compressor::Deflate;
        let compressed = codec.compress(SAMPLE).unwrap();
        for declared in [1usize << 60, usize::MAX, MAX_BODY_LENGTH + 1] {
            assert!(matches!(
                codec.decompress(&compressed, declared),
                Err(CompressionError::DecompressionFailed(_))
            ));
        }
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_huge_declared_length() {
        let codec = Compressor::create(CompressionType::Zstd).unwrap();
        let compressed = codec.compress(SAMPLE).unwrap();
        assert!(matches!(
            codec.decompress(&compressed, 1usize << 60),
            Err(CompressionError::DecompressionFailed(_))
        ));
    }
}
