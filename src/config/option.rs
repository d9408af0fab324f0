//! Per-protocol transport options.
//!
//! Each protocol has one option struct with a builder. Builders validate the
//! field combination when [`build`](TcpOptionBuilder::build) is called, so a
//! transport never starts with an impossible configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compression::{CompressionType, decode_dictionary};
use crate::core::constants::DEFAULT_CONNECT_TIMEOUT;
use crate::core::{ConfigError, TransportProtocol};
use crate::crypto::{EncryptionType, parse_public_key};

/// Encryption and compression settings shared by every protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOption {
    /// Cipher to register on the transport.
    pub encryption: EncryptionType,
    /// Server public key (64 hex characters) for key-exchange ciphers.
    pub public_key: Option<String>,
    /// Default compression codec.
    pub compression: CompressionType,
    /// Decoded zstd dictionary.
    pub zstd_dictionary: Option<Vec<u8>>,
}

impl CodecOption {
    fn validate(&mut self, protocol: TransportProtocol) -> Result<(), ConfigError> {
        if self.encryption == EncryptionType::Default {
            self.encryption = EncryptionType::None;
        }
        if let Some(key) = &self.public_key {
            parse_public_key(key).map_err(|_| ConfigError::InvalidPublicKey(key.clone()))?;
        }
        if protocol == TransportProtocol::Udp && self.encryption.uses_key_exchange() {
            return Err(ConfigError::UnsupportedCipher {
                cipher: self.encryption.name(),
                protocol: "udp",
            });
        }
        if self.zstd_dictionary.is_some() {
            match self.compression {
                CompressionType::None | CompressionType::Default => {
                    self.compression = CompressionType::Zstd;
                }
                CompressionType::Zstd => {}
                CompressionType::Deflate => {
                    return Err(ConfigError::InvalidDictionary(
                        "a dictionary requires zstd compression".into(),
                    ));
                }
            }
        }
        match self.compression {
            CompressionType::Zstd if !cfg!(feature = "zstd") => {
                Err(ConfigError::FeatureDisabled("zstd"))
            }
            CompressionType::Deflate if !cfg!(feature = "deflate") => {
                Err(ConfigError::FeatureDisabled("deflate"))
            }
            _ => Ok(()),
        }
    }
}

fn validate_tls(enabled: bool, ca_file: Option<&Path>, what: &'static str) -> Result<(), ConfigError> {
    if !enabled {
        return Ok(());
    }
    let Some(path) = ca_file else {
        return Err(ConfigError::MissingCaFile(what));
    };
    std::fs::metadata(path)
        .map_err(|e| ConfigError::UnreadableCaFile(format!("{}: {e}", path.display())))?;
    Ok(())
}

fn validate_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::ZeroTimeout);
    }
    Ok(())
}

/// Shared builder setters for the codec fields.
macro_rules! codec_setters {
    () => {
        /// Cipher for this transport.
        pub fn encryption(mut self, encryption: EncryptionType) -> Self {
            self.option.codec.encryption = encryption;
            self
        }

        /// Cipher plus server public key (hex).
        pub fn encryption_with_key(mut self, encryption: EncryptionType, public_key: impl Into<String>) -> Self {
            self.option.codec.encryption = encryption;
            self.option.codec.public_key = Some(public_key.into());
            self
        }

        /// Default compression codec.
        pub fn compression(mut self, compression: CompressionType) -> Self {
            self.option.codec.compression = compression;
            self
        }

        /// Zstd dictionary in base64; implies zstd compression.
        pub fn zstd_dictionary(mut self, base64: impl Into<String>) -> Self {
            self.dictionary = Some(base64.into());
            self
        }
    };
}

fn decode_pending_dictionary(
    pending: Option<String>,
    codec: &mut CodecOption,
) -> Result<(), ConfigError> {
    if let Some(base64) = pending {
        codec.zstd_dictionary = Some(decode_dictionary(&base64)?);
    }
    Ok(())
}

// =============================================================================
// TCP
// =============================================================================

/// Stream transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOption {
    /// Disable Nagle's algorithm.
    pub disable_nagle: bool,
    /// Reconnect with back-off after a drop or a failed connect.
    pub auto_reconnect: bool,
    /// Send `_ping_c` keepalives and enforce the ping timeout.
    pub enable_ping: bool,
    /// Number messages even when session reliability is off.
    pub sequence_validation: bool,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Wrap the stream in TLS.
    pub use_tls: bool,
    /// PEM file with the trusted CA certificates.
    pub ca_file: Option<PathBuf>,
    /// Encryption and compression.
    pub codec: CodecOption,
}

impl Default for TcpOption {
    fn default() -> Self {
        Self {
            disable_nagle: true,
            auto_reconnect: false,
            enable_ping: false,
            sequence_validation: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            use_tls: false,
            ca_file: None,
            codec: CodecOption::default(),
        }
    }
}

/// Builder for [`TcpOption`].
#[derive(Debug, Default)]
pub struct TcpOptionBuilder {
    option: TcpOption,
    dictionary: Option<String>,
}

impl TcpOptionBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable Nagle's algorithm.
    pub fn disable_nagle(mut self, disable: bool) -> Self {
        self.option.disable_nagle = disable;
        self
    }

    /// Reconnect automatically.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.option.auto_reconnect = enabled;
        self
    }

    /// Enable client pings.
    pub fn enable_ping(mut self, enabled: bool) -> Self {
        self.option.enable_ping = enabled;
        self
    }

    /// Number messages even without session reliability.
    pub fn sequence_validation(mut self, enabled: bool) -> Self {
        self.option.sequence_validation = enabled;
        self
    }

    /// Connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.option.connect_timeout = timeout;
        self
    }

    /// Use TLS, trusting the CA certificates in `ca_file`.
    pub fn tls(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.option.use_tls = true;
        self.option.ca_file = Some(ca_file.into());
        self
    }

    codec_setters!();

    /// Validate and build.
    pub fn build(mut self) -> Result<TcpOption, ConfigError> {
        validate_timeout(self.option.connect_timeout)?;
        if self.option.use_tls && !cfg!(feature = "tls") {
            return Err(ConfigError::FeatureDisabled("tls"));
        }
        validate_tls(self.option.use_tls, self.option.ca_file.as_deref(), "tls")?;
        decode_pending_dictionary(self.dictionary.take(), &mut self.option.codec)?;
        self.option.codec.validate(TransportProtocol::Tcp)?;
        Ok(self.option)
    }
}

// =============================================================================
// UDP
// =============================================================================

/// Datagram transport options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdpOption {
    /// Encryption and compression; key-exchange ciphers are not allowed.
    pub codec: CodecOption,
}

/// Builder for [`UdpOption`].
#[derive(Debug, Default)]
pub struct UdpOptionBuilder {
    option: UdpOption,
    dictionary: Option<String>,
}

impl UdpOptionBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    codec_setters!();

    /// Validate and build.
    pub fn build(mut self) -> Result<UdpOption, ConfigError> {
        decode_pending_dictionary(self.dictionary.take(), &mut self.option.codec)?;
        self.option.codec.validate(TransportProtocol::Udp)?;
        Ok(self.option)
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Request/response transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOption {
    /// Use `https://`.
    pub use_https: bool,
    /// PEM file with the trusted CA certificates for HTTPS.
    pub ca_file: Option<PathBuf>,
    /// Number messages even when session reliability is off.
    pub sequence_validation: bool,
    /// Request timeout.
    pub connect_timeout: Duration,
    /// Encryption and compression.
    pub codec: CodecOption,
}

impl Default for HttpOption {
    fn default() -> Self {
        Self {
            use_https: false,
            ca_file: None,
            sequence_validation: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            codec: CodecOption::default(),
        }
    }
}

/// Builder for [`HttpOption`].
#[derive(Debug, Default)]
pub struct HttpOptionBuilder {
    option: HttpOption,
    dictionary: Option<String>,
}

impl HttpOptionBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use HTTPS, trusting the CA certificates in `ca_file`.
    pub fn https(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.option.use_https = true;
        self.option.ca_file = Some(ca_file.into());
        self
    }

    /// Number messages even without session reliability.
    pub fn sequence_validation(mut self, enabled: bool) -> Self {
        self.option.sequence_validation = enabled;
        self
    }

    /// Request timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.option.connect_timeout = timeout;
        self
    }

    codec_setters!();

    /// Validate and build.
    pub fn build(mut self) -> Result<HttpOption, ConfigError> {
        if !cfg!(feature = "http") {
            return Err(ConfigError::FeatureDisabled("http"));
        }
        validate_timeout(self.option.connect_timeout)?;
        validate_tls(self.option.use_https, self.option.ca_file.as_deref(), "https")?;
        decode_pending_dictionary(self.dictionary.take(), &mut self.option.codec)?;
        self.option.codec.validate(TransportProtocol::Http)?;
        Ok(self.option)
    }
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Message-stream transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsocketOption {
    /// Use `wss://`.
    pub use_wss: bool,
    /// PEM file with the trusted CA certificates for WSS.
    pub ca_file: Option<PathBuf>,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Encryption and compression.
    pub codec: CodecOption,
}

impl Default for WebsocketOption {
    fn default() -> Self {
        Self {
            use_wss: false,
            ca_file: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            codec: CodecOption::default(),
        }
    }
}

/// Builder for [`WebsocketOption`].
#[derive(Debug, Default)]
pub struct WebsocketOptionBuilder {
    option: WebsocketOption,
    dictionary: Option<String>,
}

impl WebsocketOptionBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use WSS, trusting the CA certificates in `ca_file`.
    pub fn wss(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.option.use_wss = true;
        self.option.ca_file = Some(ca_file.into());
        self
    }

    /// Connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.option.connect_timeout = timeout;
        self
    }

    codec_setters!();

    /// Validate and build.
    pub fn build(mut self) -> Result<WebsocketOption, ConfigError> {
        validate_timeout(self.option.connect_timeout)?;
        if self.option.use_wss && !cfg!(feature = "tls") {
            return Err(ConfigError::FeatureDisabled("tls"));
        }
        validate_tls(self.option.use_wss, self.option.ca_file.as_deref(), "wss")?;
        decode_pending_dictionary(self.dictionary.take(), &mut self.option.codec)?;
        self.option.codec.validate(TransportProtocol::Websocket)?;
        Ok(self.option)
    }
}

// =============================================================================
// TAGGED OPTION
// =============================================================================

/// Options of one transport, tagged by protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOption {
    /// Stream transport.
    Tcp(TcpOption),
    /// Datagram transport.
    Udp(UdpOption),
    /// Request/response transport.
    Http(HttpOption),
    /// Message-stream transport.
    Websocket(WebsocketOption),
}

impl TransportOption {
    /// Defaults for `protocol`.
    pub fn default_for(protocol: TransportProtocol) -> Self {
        match protocol {
            TransportProtocol::Tcp => TransportOption::Tcp(TcpOption::default()),
            TransportProtocol::Udp => TransportOption::Udp(UdpOption::default()),
            TransportProtocol::Http => TransportOption::Http(HttpOption::default()),
            TransportProtocol::Websocket => TransportOption::Websocket(WebsocketOption::default()),
        }
    }

    /// Protocol these options belong to.
    pub fn protocol(&self) -> TransportProtocol {
        match self {
            TransportOption::Tcp(_) => TransportProtocol::Tcp,
            TransportOption::Udp(_) => TransportProtocol::Udp,
            TransportOption::Http(_) => TransportProtocol::Http,
            TransportOption::Websocket(_) => TransportProtocol::Websocket,
        }
    }

    /// Encryption and compression settings.
    pub fn codec(&self) -> &CodecOption {
        match self {
            TransportOption::Tcp(o) => &o.codec,
            TransportOption::Udp(o) => &o.codec,
            TransportOption::Http(o) => &o.codec,
            TransportOption::Websocket(o) => &o.codec,
        }
    }

    /// Whether outgoing messages are numbered regardless of session
    /// reliability.
    pub fn sequence_validation(&self) -> bool {
        match self {
            TransportOption::Tcp(o) => o.sequence_validation,
            TransportOption::Http(o) => o.sequence_validation,
            _ => false,
        }
    }

    /// Connect timeout, where the protocol has one.
    pub fn connect_timeout(&self) -> Duration {
        match self {
            TransportOption::Tcp(o) => o.connect_timeout,
            TransportOption::Http(o) => o.connect_timeout,
            TransportOption::Websocket(o) => o.connect_timeout,
            TransportOption::Udp(_) => DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl From<TcpOption> for TransportOption {
    fn from(o: TcpOption) -> Self {
        TransportOption::Tcp(o)
    }
}

impl From<UdpOption> for TransportOption {
    fn from(o: UdpOption) -> Self {
        TransportOption::Udp(o)
    }
}

impl From<HttpOption> for TransportOption {
    fn from(o: HttpOption) -> Self {
        TransportOption::Http(o)
    }
}

impl From<WebsocketOption> for TransportOption {
    fn from(o: WebsocketOption) -> Self {
        TransportOption::Websocket(o)
    }
}
