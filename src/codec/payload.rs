//! Payloads of the built-in control messages.

use serde::{Deserialize, Deserializer, Serialize};

/// Body of `_ping_c` / `_ping_s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    /// Microseconds since the Unix epoch at send time.
    pub timestamp: i64,
}

/// One endpoint of a redirect target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPort {
    /// Port number.
    #[serde(default)]
    pub port: u16,
    /// Protocol id (1 TCP, 2 UDP, 3 HTTP, 4 WebSocket).
    #[serde(default)]
    pub protocol: i32,
    /// Encoding id (1 JSON, 2 binary).
    #[serde(default)]
    pub encoding: i32,
}

/// Body of `_sc_redirect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPayload {
    /// One-time token presented to the new server.
    #[serde(default)]
    pub token: String,
    /// New host name or address.
    #[serde(default)]
    pub host: String,
    /// Flavor tag of the new server.
    #[serde(default)]
    pub flavor: String,
    /// Endpoints to reconnect to.
    #[serde(default)]
    pub ports: Vec<RedirectPort>,
}

/// Body of `_cs_redirect_connect` in both directions: the client sends the
/// token, the server answers with a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectConnectPayload {
    /// Token, client to server.
    #[serde(default)]
    pub token: String,
    /// Result, server to client (0 is OK).
    #[serde(default, deserialize_with = "int_or_string")]
    pub result: i32,
}

fn int_or_string<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    if !deserializer.is_human_readable() {
        return i32::deserialize(deserializer);
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => Ok(match s.as_str() {
            "OK" => 0,
            "INVALID_TOKEN" => 1,
            "EXPIRED" => 2,
            "AUTH_FAILED" => 3,
            other => other.parse().map_err(serde::de::Error::custom)?,
        }),
    }
}
