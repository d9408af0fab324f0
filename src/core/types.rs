//! Shared vocabulary types: protocols, encodings, states and events.

use std::fmt;

/// Wire protocol of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    /// Reliable stream (TCP, optionally TLS).
    Tcp,
    /// Datagram (UDP).
    Udp,
    /// Request/response (HTTP, optionally HTTPS).
    Http,
    /// Framed full-duplex message stream (WebSocket).
    Websocket,
}

impl TransportProtocol {
    /// Connect order used when a session starts without an identity.
    pub const CONNECT_ORDER: [TransportProtocol; 4] = [
        TransportProtocol::Tcp,
        TransportProtocol::Http,
        TransportProtocol::Udp,
        TransportProtocol::Websocket,
    ];

    /// Protocol id used in redirect port lists.
    pub fn from_redirect_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(TransportProtocol::Tcp),
            2 => Some(TransportProtocol::Udp),
            3 => Some(TransportProtocol::Http),
            4 => Some(TransportProtocol::Websocket),
            _ => None,
        }
    }

    /// Index into per-protocol tables.
    pub fn index(self) -> usize {
        match self {
            TransportProtocol::Tcp => 0,
            TransportProtocol::Udp => 1,
            TransportProtocol::Http => 2,
            TransportProtocol::Websocket => 3,
        }
    }

    /// Whether sockets of this protocol deliver a byte stream.
    pub fn is_stream(self) -> bool {
        matches!(self, TransportProtocol::Tcp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportProtocol::Tcp => "Tcp",
            TransportProtocol::Udp => "Udp",
            TransportProtocol::Http => "Http",
            TransportProtocol::Websocket => "Websocket",
        };
        f.write_str(name)
    }
}

/// Body encoding of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Self-describing JSON object.
    Json,
    /// Compact binary schema (bincode).
    Binary,
}

impl Encoding {
    /// Encoding id used in redirect port lists.
    pub fn from_redirect_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Encoding::Json),
            2 => Some(Encoding::Binary),
            _ => None,
        }
    }
}

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No connection.
    #[default]
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected and exchanging frames.
    Connected,
    /// Draining before disconnect.
    Disconnecting,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventType {
    /// Server confirmed the session.
    Opened,
    /// Session closed by the server.
    Closed,
    /// Server assigned a different session id.
    Changed,
    /// A redirect began.
    RedirectStarted,
    /// The new server accepted the redirect token.
    RedirectSucceeded,
    /// The new server rejected the redirect token.
    RedirectFailed,
}

/// Transport lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEventType {
    /// Transport connected.
    Started,
    /// Transport stopped.
    Stopped,
    /// Connect attempt failed.
    ConnectionFailed,
    /// Connect attempt timed out.
    ConnectionTimedOut,
    /// An established connection dropped.
    Disconnected,
}

/// Category of an error attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorType {
    /// Uncategorised.
    #[default]
    Default,
    /// Redirect failure.
    Redirect,
    /// Socket-level failure.
    Socket,
    /// Request/response transport failure.
    Http,
    /// Sequence desynchronisation.
    Seq,
    /// Ping timeout.
    Ping,
    /// WebSocket failure.
    Websocket,
}

/// Specific reason of a failed redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectErrorCode {
    /// Token was not recognised.
    InvalidToken,
    /// Token expired before it was presented.
    Expired,
    /// Token was recognised but authentication failed.
    AuthFailed,
    /// Any other result value.
    Unknown(i32),
}

impl RedirectErrorCode {
    /// Maps a redirect-connect result value; `None` for success.
    pub fn from_result(result: i32) -> Option<Self> {
        match result {
            0 => None,
            1 => Some(RedirectErrorCode::InvalidToken),
            2 => Some(RedirectErrorCode::Expired),
            3 => Some(RedirectErrorCode::AuthFailed),
            other => Some(RedirectErrorCode::Unknown(other)),
        }
    }
}

/// Error details attached to a session or transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    /// Error category.
    pub error_type: ErrorType,
    /// Lower-level code (OS error, HTTP status, redirect result).
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl EventError {
    /// Create an event error.
    pub fn new(error_type: ErrorType, code: i32, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code,
            message: message.into(),
        }
    }

    /// Redirect failure with its specific reason.
    pub fn redirect(code: RedirectErrorCode) -> Self {
        let (value, message) = match code {
            RedirectErrorCode::InvalidToken => (1, "invalid redirect token".to_string()),
            RedirectErrorCode::Expired => (2, "redirect token expired".to_string()),
            RedirectErrorCode::AuthFailed => (3, "redirect authentication failed".to_string()),
            RedirectErrorCode::Unknown(v) => (v, format!("redirect failed with result {v}")),
        };
        Self::new(ErrorType::Redirect, value, message)
    }

    /// The redirect reason, if this is a redirect error.
    pub fn redirect_code(&self) -> Option<RedirectErrorCode> {
        if self.error_type != ErrorType::Redirect {
            return None;
        }
        RedirectErrorCode::from_result(self.code)
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.error_type, self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_order_starts_with_tcp() {
        assert_eq!(TransportProtocol::CONNECT_ORDER[0], TransportProtocol::Tcp);
        assert_eq!(TransportProtocol::CONNECT_ORDER[1], TransportProtocol::Http);
    }

    #[test]
    fn test_redirect_ids() {
        assert_eq!(TransportProtocol::from_redirect_id(1), Some(TransportProtocol::Tcp));
        assert_eq!(TransportProtocol::from_redirect_id(3), Some(TransportProtocol::Http));
        assert_eq!(TransportProtocol::from_redirect_id(9), None);
        assert_eq!(Encoding::from_redirect_id(2), Some(Encoding::Binary));
        assert_eq!(Encoding::from_redirect_id(0), None);
    }

    #[test]
    fn test_redirect_error_roundtrip() {
        assert_eq!(RedirectErrorCode::from_result(0), None);
        let err = EventError::redirect(RedirectErrorCode::InvalidToken);
        assert_eq!(err.error_type, ErrorType::Redirect);
        assert_eq!(err.redirect_code(), Some(RedirectErrorCode::InvalidToken));

        let other = EventError::new(ErrorType::Socket, 1, "x");
        assert_eq!(other.redirect_code(), None);
    }
}
