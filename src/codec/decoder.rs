//! Incremental frame decoder.
//!
//! Stream transports feed arbitrary-sized chunks; the decoder returns whole
//! frames once the header block and the declared body length have arrived.

use crate::core::constants::{HEADER_DELIMITER, MAX_HEADER_LINE};
use crate::core::FrameError;

use super::header::HeaderFields;

/// One decoded wire frame, before decryption and decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Header fields.
    pub header: HeaderFields,
    /// Body bytes, exactly `LEN` long.
    pub body: Vec<u8>,
}

impl Frame {
    /// A header-only frame (`LEN:0`) carries handshake data, not a message.
    pub fn is_header_only(&self) -> bool {
        self.body.is_empty()
    }
}

/// Incremental decoder over a receive buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    offset: usize,
    header: HeaderFields,
    header_decoded: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered state (used on reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.offset = 0;
        self.header = HeaderFields::new();
        self.header_decoded = false;
    }

    /// Decode the next complete frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A header error leaves
    /// the decoder unusable until [`reset`](Self::reset).
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if !self.header_decoded && !self.decode_header()? {
            return Ok(None);
        }

        let body_len = self.header.length()?;
        if self.buffer.len() - self.offset < body_len {
            return Ok(None);
        }

        let end = self.offset + body_len;
        let body = self.buffer[self.offset..end].to_vec();
        self.buffer.drain(..end);
        self.offset = 0;
        self.header_decoded = false;

        let header = std::mem::take(&mut self.header);
        Ok(Some(Frame { header, body }))
    }

    fn decode_header(&mut self) -> Result<bool, FrameError> {
        while self.offset < self.buffer.len() {
            let rest = &self.buffer[self.offset..];
            let Some(eol) = rest.iter().position(|&b| b == HEADER_DELIMITER) else {
                if rest.len() > MAX_HEADER_LINE {
                    return Err(FrameError::TooLarge {
                        len: rest.len(),
                        max: MAX_HEADER_LINE,
                    });
                }
                return Ok(false);
            };

            let line_start = self.offset;
            self.offset += eol + 1;

            if eol == 0 {
                self.header.validate()?;
                self.header_decoded = true;
                return Ok(true);
            }

            let line = self.buffer[line_start..line_start + eol].to_vec();
            self.header.insert_line(&line)?;
        }
        Ok(false)
    }
}

/// Decode a datagram or HTTP body that holds exactly one frame.
pub fn decode_single(data: &[u8]) -> Result<Option<Frame>, FrameError> {
    let mut decoder = FrameDecoder::new();
    decoder.feed(data);
    decoder.next_frame()
}

/// Frame a body that already went through compression and encryption.
pub fn encode_frame(header: &HeaderFields, body: &[u8]) -> Vec<u8> {
    let mut out = header.encode();
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_frame(body: &[u8]) -> Vec<u8> {
        let header = HeaderFields::for_body(body.len(), true);
        encode_frame(&header, body)
    }

    #[test]
    fn test_single_frame() {
        let bytes = sample_frame(b"{\"_msgtype\":\"echo\"}");
        let frame = decode_single(&bytes).unwrap().unwrap();
        assert_eq!(frame.body, b"{\"_msgtype\":\"echo\"}");
        assert_eq!(frame.header.get("PVER"), Some("110"));
    }

    #[test]
    fn test_zero_length_body() {
        let mut header = HeaderFields::for_body(0, false);
        header.insert("ENC", "HELLO!-104");
        let bytes = encode_frame(&header, &[]);

        let frame = decode_single(&bytes).unwrap().unwrap();
        assert!(frame.is_header_only());
        assert_eq!(frame.header.encryption(), Some("HELLO!-104"));
    }

    #[test]
    fn test_need_more_bytes() {
        let bytes = sample_frame(b"hello");
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes[..bytes.len() - 2]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.feed(&bytes[bytes.len() - 2..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap().body, b"hello");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut bytes = sample_frame(b"one");
        bytes.extend(sample_frame(b"two"));
        bytes.extend(sample_frame(b""));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        assert_eq!(decoder.next_frame().unwrap().unwrap().body, b"one");
        assert_eq!(decoder.next_frame().unwrap().unwrap().body, b"two");
        assert!(decoder.next_frame().unwrap().unwrap().is_header_only());
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn test_missing_length_is_error() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"VER:1\n\n");
        assert_eq!(decoder.next_frame(), Err(FrameError::MissingField("LEN")));
    }

    #[test]
    fn test_wrong_version_is_error() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"VER:9\nLEN:0\n\n");
        assert_eq!(decoder.next_frame(), Err(FrameError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_oversized_length_rejected_before_body() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"VER:1\nLEN:4294967296\n\n");
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::TooLarge { len: 4294967296, .. })
        ));
    }

    #[test]
    fn test_endless_header_line_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"VER:1\nLEN:");
        decoder.feed(&vec![b'1'; MAX_HEADER_LINE + 1]);
        assert!(matches!(decoder.next_frame(), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_reset_discards_partial() {
        let bytes = sample_frame(b"partial");
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes[..6]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.reset();
        decoder.feed(&bytes);
        assert_eq!(decoder.next_frame().unwrap().unwrap().body, b"partial");
    }

    proptest! {
        #[test]
        fn prop_split_anywhere_decodes_identically(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            split in 0usize..400,
        ) {
            let bytes = sample_frame(&body);
            let split = split.min(bytes.len());

            let whole = decode_single(&bytes).unwrap().unwrap();

            let mut decoder = FrameDecoder::new();
            decoder.feed(&bytes[..split]);
            let early = decoder.next_frame().unwrap();
            let frame = match early {
                Some(frame) => frame,
                None => {
                    decoder.feed(&bytes[split..]);
                    decoder.next_frame().unwrap().unwrap()
                }
            };
            prop_assert_eq!(frame, whole);
        }
    }
}
