//! Error types for the session engine.
//!
//! Every failure inside the engine is one of these enums. Errors never cross
//! the application boundary as panics: transports and the session translate
//! them into events through [`DecodePolicy`] and [`EventError`].

use thiserror::Error;

use super::types::{ErrorType, EventError};

/// Errors decoding or encoding a wire frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A header line has no `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// A required header field is absent.
    #[error("missing header field: {0}")]
    MissingField(&'static str),

    /// A numeric header field could not be parsed.
    #[error("invalid value for header field {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The peer speaks another protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// The body is not a valid message in the transport encoding.
    #[error("invalid message body: {0}")]
    InvalidBody(String),

    /// A declared length exceeds what the decoder accepts.
    #[error("frame too large: {len} bytes, limit {max}")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Accepted maximum.
        max: usize,
    },
}

/// Errors in the compression pipeline step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompressionError {
    /// Compression failed inside the codec.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression failed inside the codec.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Output length differs from the declared uncompressed length.
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Length carried in the compression header.
        expected: usize,
        /// Length actually produced.
        actual: usize,
    },

    /// The dictionary string is not valid base64.
    #[error("invalid zstd dictionary: {0}")]
    InvalidDictionary(String),
}

/// Errors in the encryption pipeline step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The server public key is not 64 hex characters.
    #[error("invalid server public key")]
    InvalidPublicKey,

    /// Key agreement produced an unusable shared secret.
    #[error("shared secret derivation failed")]
    KeyDerivationFailed,

    /// Payload encryption attempted before the handshake completed.
    #[error("handshake not completed for {0}")]
    HandshakeIncomplete(&'static str),

    /// The stream cipher refused the operation.
    #[error("cipher failure: {0}")]
    CipherFailure(String),

    /// A frame names a cipher this connection never set up.
    #[error("unknown encryption type: {0}")]
    UnknownEncryption(String),
}

/// Errors from a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame codec failure.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Compression failure.
    #[error("compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Encryption failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Received sequence number is neither a duplicate nor the next one.
    #[error("sequence desync: expected {expected}, got {received}")]
    SeqDesync {
        /// Next expected sequence number.
        expected: u32,
        /// Sequence number received.
        received: u32,
    },

    /// Socket I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect did not complete within the timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Host name resolved to no address.
    #[error("no address for {0}")]
    Resolve(String),

    /// TLS setup or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// Request/response transport failure.
    #[error("http error: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// WebSocket protocol failure.
    #[error("websocket error: {0}")]
    Websocket(String),

    /// No pong and no traffic within the ping timeout.
    #[error("ping timed out")]
    PingTimeout,
}

/// What to do with a connection after a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Discard the frame and keep the connection.
    DropFrame,
    /// Stop the transport.
    Stop,
}

impl TransportError {
    /// Decode-error policy table.
    pub fn policy(&self) -> DecodePolicy {
        match self {
            TransportError::Compression(_) => DecodePolicy::DropFrame,
            TransportError::Crypto(CryptoError::CipherFailure(_)) => DecodePolicy::DropFrame,
            TransportError::Crypto(CryptoError::UnknownEncryption(_)) => DecodePolicy::DropFrame,
            TransportError::Frame(FrameError::InvalidBody(_)) => DecodePolicy::DropFrame,
            _ => DecodePolicy::Stop,
        }
    }

    /// Whether this error stops the transport.
    pub fn is_fatal(&self) -> bool {
        self.policy() == DecodePolicy::Stop
    }

    /// Event category for the application.
    pub fn error_type(&self) -> ErrorType {
        match self {
            TransportError::SeqDesync { .. } => ErrorType::Seq,
            TransportError::PingTimeout => ErrorType::Ping,
            TransportError::Http(_) | TransportError::HttpStatus(_) => ErrorType::Http,
            TransportError::Websocket(_) => ErrorType::Websocket,
            TransportError::Crypto(_) => ErrorType::Default,
            _ => ErrorType::Socket,
        }
    }

    /// Lower-level code for the event (OS error or HTTP status).
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Io(e) => e.raw_os_error().unwrap_or(-1),
            TransportError::HttpStatus(status) => i32::from(*status),
            _ => -1,
        }
    }

    /// Convert into the event payload delivered to the application.
    pub fn to_event_error(&self) -> EventError {
        EventError::new(self.error_type(), self.code(), self.to_string())
    }
}

/// Errors building configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// TLS requested without a CA file.
    #[error("{0} requires a CA certificate file")]
    MissingCaFile(&'static str),

    /// CA file cannot be read.
    #[error("CA certificate file not readable: {0}")]
    UnreadableCaFile(String),

    /// Connect timeout must be positive.
    #[error("connect timeout must be greater than zero")]
    ZeroTimeout,

    /// Cipher needs a key exchange this transport cannot perform.
    #[error("{cipher} is not supported on {protocol}")]
    UnsupportedCipher {
        /// Cipher name.
        cipher: &'static str,
        /// Protocol name.
        protocol: &'static str,
    },

    /// Public key is not 64 hex characters.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Dictionary problems.
    #[error("invalid zstd dictionary: {0}")]
    InvalidDictionary(String),

    /// The requested codec was compiled out.
    #[error("{0} support is not enabled")]
    FeatureDisabled(&'static str),
}

/// Errors returned by synchronous session calls.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No transport is attached for the protocol.
    #[error("no transport for {0}")]
    NoTransport(String),

    /// The message could not be built.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A background worker could not be created.
    #[error("worker error: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        let drop = [
            TransportError::Compression(CompressionError::SizeMismatch {
                expected: 10,
                actual: 9,
            }),
            TransportError::Crypto(CryptoError::CipherFailure("overflow".into())),
            TransportError::Frame(FrameError::InvalidBody("not json".into())),
        ];
        for err in &drop {
            assert!(!err.is_fatal(), "{err} should drop the frame");
        }

        let stop = [
            TransportError::SeqDesync {
                expected: 5,
                received: 7,
            },
            TransportError::Frame(FrameError::MissingField("LEN")),
            TransportError::Crypto(CryptoError::InvalidPublicKey),
            TransportError::PingTimeout,
        ];
        for err in &stop {
            assert!(err.is_fatal(), "{err} should stop the transport");
        }
    }

    #[test]
    fn test_error_types() {
        let desync = TransportError::SeqDesync {
            expected: 1,
            received: 3,
        };
        assert_eq!(desync.error_type(), ErrorType::Seq);
        assert_eq!(TransportError::PingTimeout.error_type(), ErrorType::Ping);
        assert_eq!(TransportError::HttpStatus(503).code(), 503);

        let event = TransportError::HttpStatus(404).to_event_error();
        assert_eq!(event.error_type, ErrorType::Http);
        assert_eq!(event.code, 404);
    }
}
