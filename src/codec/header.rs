//! Header block of a wire frame.
//!
//! A header block is a sequence of `KEY:VALUE\n` lines terminated by an
//! empty line:
//!
//! ```text
//! VER:1\n
//! PVER:110\n          (first frame of a connection only)
//! LEN:42\n            (body length after compression and encryption)
//! ENC:104-<hex>\n     (optional)
//! C:97\n              (optional, uncompressed length)
//! \n
//! <body>
//! ```
//!
//! Request/response transports carry the same fields as HTTP headers; see
//! [`HeaderFields::to_http_headers`] and [`HeaderFields::from_http_response`].

use std::collections::BTreeMap;

use crate::core::constants::{
    COMPRESSION_FIELD, COOKIE_RESPONSE_FIELD, ENCRYPTION_FIELD, HEADER_DELIMITER,
    HEADER_FIELD_DELIMITER, HTTP_COMPRESSION_FIELD, HTTP_ENCRYPTION_FIELD, LENGTH_FIELD,
    MAX_BODY_LENGTH, PLUGIN_VERSION, PLUGIN_VERSION_FIELD, PROTOCOL_VERSION, VERSION_FIELD,
};
use crate::core::FrameError;

/// Header fields of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    fields: BTreeMap<String, String>,
}

impl HeaderFields {
    /// Create an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Header for an outgoing frame: `VER`, `LEN` and, on the first frame of
    /// a connection, `PVER`.
    pub fn for_body(body_len: usize, first_frame: bool) -> Self {
        let mut header = Self::new();
        header.insert(VERSION_FIELD, PROTOCOL_VERSION.to_string());
        if first_frame {
            header.insert(PLUGIN_VERSION_FIELD, PLUGIN_VERSION.to_string());
        }
        header.set_length(body_len);
        header
    }

    /// Get a field value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Set a field value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    /// Check whether a field is present.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Iterate fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the header has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Protocol version.
    pub fn version(&self) -> Result<u32, FrameError> {
        self.parse_number(VERSION_FIELD)
    }

    /// Declared body length.
    pub fn length(&self) -> Result<usize, FrameError> {
        self.parse_number(LENGTH_FIELD)
    }

    /// Replace the declared body length.
    pub fn set_length(&mut self, len: usize) {
        self.insert(LENGTH_FIELD, len.to_string());
    }

    /// Uncompressed body length, when the body is compressed.
    pub fn uncompressed_length(&self) -> Result<Option<usize>, FrameError> {
        if !self.contains(COMPRESSION_FIELD) {
            return Ok(None);
        }
        self.parse_number(COMPRESSION_FIELD).map(Some)
    }

    /// Encryption marker, if any.
    pub fn encryption(&self) -> Option<&str> {
        self.get(ENCRYPTION_FIELD)
    }

    /// Check the fields every frame must carry.
    pub fn validate(&self) -> Result<(), FrameError> {
        let version = self.version()?;
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let len = self.length()?;
        if len > MAX_BODY_LENGTH {
            return Err(FrameError::TooLarge {
                len,
                max: MAX_BODY_LENGTH,
            });
        }
        Ok(())
    }

    /// Serialize to the line format, including the terminating empty line.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 * (self.fields.len() + 1));
        for (key, value) in &self.fields {
            out.extend_from_slice(key.as_bytes());
            out.push(HEADER_FIELD_DELIMITER);
            out.extend_from_slice(value.as_bytes());
            out.push(HEADER_DELIMITER);
        }
        out.push(HEADER_DELIMITER);
        out
    }

    /// Parse one header line (without its terminator) into the map.
    pub(crate) fn insert_line(&mut self, line: &[u8]) -> Result<(), FrameError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| FrameError::MalformedHeader(String::from_utf8_lossy(line).into_owned()))?;
        let Some(idx) = text.find(HEADER_FIELD_DELIMITER as char) else {
            return Err(FrameError::MalformedHeader(text.to_string()));
        };
        let key = &text[..idx];
        let value = text[idx + 1..].trim_start_matches([' ', '\t']);
        self.insert(key, value);
        Ok(())
    }

    /// Fields as HTTP request headers.
    ///
    /// Every field is sent as-is; the encryption and compression markers are
    /// duplicated under their `X-iFun-*` names.
    pub fn to_http_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(enc) = self.get(ENCRYPTION_FIELD) {
            headers.push((HTTP_ENCRYPTION_FIELD.to_string(), enc.to_string()));
        }
        if let Some(c) = self.get(COMPRESSION_FIELD) {
            headers.push((HTTP_COMPRESSION_FIELD.to_string(), c.to_string()));
        }
        headers
    }

    /// Build frame fields from HTTP response headers.
    ///
    /// `VER` and `LEN` are synthesised from the body, the cookie header is
    /// normalised to `SET-COOKIE` and the `X-iFun-*` markers are mapped back.
    pub fn from_http_response<'a, I>(headers: I, body_len: usize) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut fields = Self::new();
        for (name, value) in headers {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case(COOKIE_RESPONSE_FIELD) {
                fields.insert(COOKIE_RESPONSE_FIELD, value);
            } else if name.eq_ignore_ascii_case(HTTP_ENCRYPTION_FIELD) {
                fields.insert(ENCRYPTION_FIELD, value);
            } else if name.eq_ignore_ascii_case(HTTP_COMPRESSION_FIELD) {
                fields.insert(COMPRESSION_FIELD, value);
            } else {
                fields.insert(name, value);
            }
        }
        fields.insert(VERSION_FIELD, PROTOCOL_VERSION.to_string());
        fields.set_length(body_len);
        fields
    }

    fn parse_number<T: std::str::FromStr>(&self, field: &'static str) -> Result<T, FrameError> {
        let value = self.get(field).ok_or(FrameError::MissingField(field))?;
        value.trim().parse().map_err(|_| FrameError::InvalidField {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_body_first_frame() {
        let header = HeaderFields::for_body(12, true);
        assert_eq!(header.get("VER"), Some("1"));
        assert_eq!(header.get("PVER"), Some("110"));
        assert_eq!(header.length().unwrap(), 12);

        let later = HeaderFields::for_body(0, false);
        assert!(!later.contains("PVER"));
    }

    #[test]
    fn test_encode_format() {
        let header = HeaderFields::for_body(5, false);
        assert_eq!(header.encode(), b"LEN:5\nVER:1\n\n");
    }

    #[test]
    fn test_insert_line_trims_value() {
        let mut header = HeaderFields::new();
        header.insert_line(b"ENC: \t104-abcd").unwrap();
        assert_eq!(header.encryption(), Some("104-abcd"));

        let err = header.insert_line(b"no separator").unwrap_err();
        assert!(matches!(err, FrameError::MalformedHeader(_)));
    }

    #[test]
    fn test_validate() {
        let mut header = HeaderFields::new();
        assert_eq!(header.validate(), Err(FrameError::MissingField("VER")));

        header.insert("VER", "2");
        header.insert("LEN", "0");
        assert_eq!(header.validate(), Err(FrameError::UnsupportedVersion(2)));

        header.insert("VER", "1");
        header.insert("LEN", "x");
        assert!(matches!(
            header.validate(),
            Err(FrameError::InvalidField { field: "LEN", .. })
        ));

        header.insert("LEN", (MAX_BODY_LENGTH + 1).to_string());
        assert!(matches!(header.validate(), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_http_mapping() {
        let mut header = HeaderFields::for_body(3, true);
        header.insert("ENC", "104");
        header.insert("C", "10");
        let headers = header.to_http_headers();
        assert!(headers.contains(&("X-iFun-Enc".to_string(), "104".to_string())));
        assert!(headers.contains(&("X-iFun-C".to_string(), "10".to_string())));

        let response = [
            ("set-cookie", "sid=1"),
            ("x-ifun-enc", "104"),
            ("X-iFun-C", "7"),
            ("Content-Type", "application/json"),
        ];
        let fields = HeaderFields::from_http_response(response, 4);
        assert_eq!(fields.get("SET-COOKIE"), Some("sid=1"));
        assert_eq!(fields.encryption(), Some("104"));
        assert_eq!(fields.uncompressed_length().unwrap(), Some(7));
        assert_eq!(fields.length().unwrap(), 4);
        assert_eq!(fields.version().unwrap(), 1);
    }
}
