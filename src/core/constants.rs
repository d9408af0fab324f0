//! Protocol constants for the Funapi wire format.
//!
//! These values are shared with the server and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// VERSIONS
// =============================================================================

/// Wire protocol version carried in every `VER` header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Client plugin version, sent in `PVER` on the first frame of a connection.
pub const PLUGIN_VERSION: u32 = 110;

// =============================================================================
// HEADER FIELDS
// =============================================================================

/// Line terminator of a header field; an empty line ends the header block.
pub const HEADER_DELIMITER: u8 = b'\n';

/// Separator between a header key and its value.
pub const HEADER_FIELD_DELIMITER: u8 = b':';

/// Protocol version field.
pub const VERSION_FIELD: &str = "VER";

/// Plugin version field.
pub const PLUGIN_VERSION_FIELD: &str = "PVER";

/// Body length field (after compression and encryption).
pub const LENGTH_FIELD: &str = "LEN";

/// Encryption marker field.
pub const ENCRYPTION_FIELD: &str = "ENC";

/// Compression marker field, carries the uncompressed body length.
pub const COMPRESSION_FIELD: &str = "C";

/// Encryption marker as an HTTP header.
pub const HTTP_ENCRYPTION_FIELD: &str = "X-iFun-Enc";

/// Compression marker as an HTTP header.
pub const HTTP_COMPRESSION_FIELD: &str = "X-iFun-C";

/// Cookie sent with HTTP requests.
pub const COOKIE_REQUEST_FIELD: &str = "Cookie";

/// Cookie returned in HTTP responses (matched case-insensitively).
pub const COOKIE_RESPONSE_FIELD: &str = "SET-COOKIE";

// =============================================================================
// ENCRYPTION NEGOTIATION
// =============================================================================

/// Sentinel opening a server-initiated cipher negotiation.
pub const ENCRYPTION_HANDSHAKE_BEGIN: &str = "HELLO!";

/// Separates the cipher id from its handshake payload.
pub const ENCRYPTION_DELIMITER: char = '-';

/// Separates cipher ids inside a negotiation list.
pub const ENCRYPTION_LIST_DELIMITER: char = ',';

// =============================================================================
// RESERVED BODY FIELDS
// =============================================================================

/// Message type field of a JSON body.
pub const MESSAGE_TYPE_FIELD: &str = "_msgtype";

/// Session id field.
pub const SESSION_ID_FIELD: &str = "_sid";

/// Sequence number field.
pub const SEQ_FIELD: &str = "_seq";

/// Acknowledgement number field.
pub const ACK_FIELD: &str = "_ack";

/// Client ping timestamp field.
pub const PING_TIMESTAMP_FIELD: &str = "timestamp";

// =============================================================================
// BUILT-IN MESSAGE TYPES
// =============================================================================

/// Server confirms a new session.
pub const SESSION_OPENED_TYPE: &str = "_session_opened";

/// Server closed the session.
pub const SESSION_CLOSED_TYPE: &str = "_session_closed";

/// Server maintenance notice.
pub const MAINTENANCE_TYPE: &str = "_maintenance";

/// Server-initiated ping, echoed back verbatim.
pub const SERVER_PING_TYPE: &str = "_ping_s";

/// Client-initiated ping, echoed back by the server.
pub const CLIENT_PING_TYPE: &str = "_ping_c";

/// Server announces a redirect to another instance.
pub const REDIRECT_TYPE: &str = "_sc_redirect";

/// Client presents its redirect token to the new instance.
pub const REDIRECT_CONNECT_TYPE: &str = "_cs_redirect_connect";

// =============================================================================
// LIMITS
// =============================================================================

/// Largest body a frame may declare, before or after compression.
pub const MAX_BODY_LENGTH: usize = 16 * 1024 * 1024;

/// Longest header line accepted from the peer.
pub const MAX_HEADER_LINE: usize = 4096;

// =============================================================================
// SEND LOOP
// =============================================================================

/// Maximum normal-queue messages per send cycle.
pub const MAX_SEND: usize = 32;

/// Receive buffer size for a single socket read.
pub const RECV_BUFFER_SIZE: usize = 65536;

// =============================================================================
// TIMING
// =============================================================================

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between client pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(3);

/// Silence tolerated before a pinging transport is stopped.
pub const PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Failed attempts on one address before moving to the next.
pub const MAX_RECONNECT_COUNT: u32 = 3;

/// First reconnect back-off.
pub const INITIAL_RECONNECT_WAIT: Duration = Duration::from_secs(1);

/// Reconnect back-off ceiling.
pub const MAX_RECONNECT_WAIT: Duration = Duration::from_secs(10);

// =============================================================================
// COMPRESSION
// =============================================================================

/// Deflate compression level.
pub const DEFLATE_LEVEL: u32 = 3;

/// Zstd compression level.
pub const ZSTD_LEVEL: i32 = 1;

// =============================================================================
// HTTP
// =============================================================================

/// Path prefix of the HTTP endpoint.
pub const HTTP_PATH: &str = "/v1/";

/// Path of the websocket endpoint.
pub const WEBSOCKET_PATH: &str = "/";
