//! Compression pipeline step.
//!
//! A session registers one or more codecs; the most recently registered one is
//! the default used for every outgoing body. Incoming bodies carrying a `C`
//! header are decompressed with the default codec.

mod codec;

pub use codec::*;

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::codec::HeaderFields;
use crate::core::constants::COMPRESSION_FIELD;
use crate::core::{CompressionError, ConfigError};

/// Compression algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CompressionType {
    /// No compression.
    #[default]
    None,
    /// The session's default codec.
    Default,
    /// Raw deflate.
    Deflate,
    /// Zstd with optional dictionary.
    Zstd,
}

/// Decode a base64 zstd dictionary.
pub fn decode_dictionary(base64: &str) -> Result<Vec<u8>, ConfigError> {
    let dict = STANDARD
        .decode(base64.trim())
        .map_err(|e| ConfigError::InvalidDictionary(e.to_string()))?;
    if dict.is_empty() {
        return Err(ConfigError::InvalidDictionary("empty dictionary".into()));
    }
    Ok(dict)
}

/// Registered codecs of one transport.
#[derive(Debug, Clone, Default)]
pub struct CompressionSet {
    compressors: BTreeMap<CompressionType, Compressor>,
    default: Option<CompressionType>,
}

impl CompressionSet {
    /// Empty set: bodies pass through untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `compression` and make it the default.
    ///
    /// Returns an error when the codec was compiled out.
    pub fn set_default(&mut self, compression: CompressionType) -> Result<(), ConfigError> {
        if compression == CompressionType::None {
            self.default = None;
            return Ok(());
        }
        if compression == CompressionType::Default {
            return Ok(());
        }
        let compressor = Compressor::create(compression).ok_or(ConfigError::FeatureDisabled(
            match compression {
                CompressionType::Zstd => "zstd",
                _ => "deflate",
            },
        ))?;
        self.compressors.insert(compression, compressor);
        self.default = Some(compression);
        Ok(())
    }

    /// Install a zstd dictionary, registering zstd as default when needed.
    pub fn set_dictionary(&mut self, dictionary: Vec<u8>) -> Result<(), ConfigError> {
        if !self.compressors.contains_key(&CompressionType::Zstd) {
            self.set_default(CompressionType::Zstd)?;
        }
        #[cfg(feature = "zstd")]
        if let Some(Compressor::Zstd { dictionary: slot }) =
            self.compressors.get_mut(&CompressionType::Zstd)
        {
            *slot = Some(dictionary);
        }
        #[cfg(not(feature = "zstd"))]
        drop(dictionary);
        Ok(())
    }

    /// Whether `compression` is registered.
    pub fn has(&self, compression: CompressionType) -> bool {
        match compression {
            CompressionType::Default => self.default.is_some(),
            other => self.compressors.contains_key(&other),
        }
    }

    fn default_compressor(&self) -> Option<&Compressor> {
        self.default.and_then(|t| self.compressors.get(&t))
    }

    /// Compress `body` in place with the default codec.
    ///
    /// Empty bodies are skipped. When the result is not smaller the body is
    /// sent uncompressed. On success `C` carries the original length and `LEN`
    /// the compressed one.
    pub fn compress(
        &self,
        header: &mut HeaderFields,
        body: &mut Vec<u8>,
    ) -> Result<(), CompressionError> {
        let Some(compressor) = self.default_compressor() else {
            return Ok(());
        };
        if body.is_empty() {
            return Ok(());
        }

        let compressed = compressor.compress(body)?;
        if compressed.len() >= body.len() {
            debug!(len = body.len(), "compression skipped, no gain");
            return Ok(());
        }

        header.insert(COMPRESSION_FIELD, body.len().to_string());
        header.set_length(compressed.len());
        *body = compressed;
        Ok(())
    }

    /// Decompress `body` in place when the header marks it compressed.
    pub fn decompress(
        &self,
        header: &mut HeaderFields,
        body: &mut Vec<u8>,
    ) -> Result<(), CompressionError> {
        let Some(compressor) = self.default_compressor() else {
            return Ok(());
        };
        let original_len = match header.uncompressed_length() {
            Ok(Some(len)) if len > 0 => len,
            Ok(_) => return Ok(()),
            Err(e) => return Err(CompressionError::DecompressionFailed(e.to_string())),
        };

        *body = compressor.decompress(body, original_len)?;
        header.remove(COMPRESSION_FIELD);
        header.set_length(body.len());
        Ok(())
    }
}
