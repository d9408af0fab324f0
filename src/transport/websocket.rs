//! Message-stream transport over WebSocket (RFC 6455, client side).
//!
//! Each protocol frame travels as one binary WebSocket message. The driver
//! performs the HTTP upgrade itself, masks every outgoing frame and answers
//! pings. A dropped connection is reported once; there is no reconnect.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tracing::debug;

use crate::config::WebsocketOption;
use crate::core::TransportError;
use crate::core::constants::{MAX_BODY_LENGTH, RECV_BUFFER_SIZE, WEBSOCKET_PATH};

use super::stream::{BoxedStream, TlsTarget, connect, resolve};
use super::{DriverContext, Exit, Shared};

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

/// Largest upgrade response accepted.
const MAX_HANDSHAKE_LEN: usize = 16 * 1024;

/// Largest data message accepted: a full body plus its header block.
const MAX_MESSAGE_LEN: usize = MAX_BODY_LENGTH + 64 * 1024;

/// Appended to the client key before hashing (RFC 6455, section 1.3).
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A complete WebSocket message as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    /// Data message, text or binary, with fragments joined.
    Binary(Vec<u8>),
    /// Ping carrying its application data.
    Ping(Vec<u8>),
    /// Pong.
    Pong,
    /// Close.
    Close,
}

/// Encode one final frame. Clients pass a `mask` key; servers send unmasked.
pub fn encode_ws_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(FIN_BIT | (opcode & 0x0F));

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if payload.len() < 126 {
        frame.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= usize::from(u16::MAX) {
        frame.push(mask_bit | 126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | 127);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            frame.extend(payload.iter().enumerate().map(|(i, &b)| b ^ key[i % 4]));
        }
        None => frame.extend_from_slice(payload),
    }
    frame
}

/// Incremental frame parser.
#[derive(Debug, Default)]
pub struct WsFrameReader {
    buf: Vec<u8>,
    fragments: Option<Vec<u8>>,
}

impl WsFrameReader {
    /// Empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete message, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Result<Option<WsFrame>, TransportError> {
        loop {
            let Some((fin, opcode, payload)) = self.take_raw()? else {
                return Ok(None);
            };
            match opcode {
                OPCODE_TEXT | OPCODE_BINARY => {
                    if self.fragments.is_some() {
                        return Err(TransportError::Websocket(
                            "data frame inside a fragmented message".into(),
                        ));
                    }
                    if fin {
                        return Ok(Some(WsFrame::Binary(payload)));
                    }
                    self.fragments = Some(payload);
                }
                OPCODE_CONTINUATION => {
                    let Some(mut message) = self.fragments.take() else {
                        return Err(TransportError::Websocket(
                            "continuation without a first fragment".into(),
                        ));
                    };
                    if message.len() + payload.len() > MAX_MESSAGE_LEN {
                        return Err(TransportError::Websocket("message too large".into()));
                    }
                    message.extend_from_slice(&payload);
                    if fin {
                        return Ok(Some(WsFrame::Binary(message)));
                    }
                    self.fragments = Some(message);
                }
                OPCODE_PING => return Ok(Some(WsFrame::Ping(payload))),
                OPCODE_PONG => return Ok(Some(WsFrame::Pong)),
                OPCODE_CLOSE => return Ok(Some(WsFrame::Close)),
                other => {
                    return Err(TransportError::Websocket(format!("unknown opcode {other:#x}")));
                }
            }
        }
    }

    fn take_raw(&mut self) -> Result<Option<(bool, u8, Vec<u8>)>, TransportError> {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Ok(None);
        }
        let fin = buf[0] & FIN_BIT != 0;
        let opcode = buf[0] & 0x0F;
        let masked = buf[1] & MASK_BIT != 0;

        let mut offset = 2;
        let len = match buf[1] & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                offset = 4;
                usize::from(u16::from_be_bytes([buf[2], buf[3]]))
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                offset = 10;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                usize::try_from(u64::from_be_bytes(raw))
                    .map_err(|_| TransportError::Websocket("frame too large".into()))?
            }
            n => usize::from(n),
        };
        if len > MAX_MESSAGE_LEN {
            return Err(TransportError::Websocket(format!(
                "frame of {len} bytes exceeds {MAX_MESSAGE_LEN}"
            )));
        }

        let key = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            Some(key)
        } else {
            None
        };

        let Some(end) = offset.checked_add(len) else {
            return Err(TransportError::Websocket("frame too large".into()));
        };
        if buf.len() < end {
            return Ok(None);
        }

        let mut payload: Vec<u8> = self.buf[offset..end].to_vec();
        if let Some(key) = key {
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= key[i % 4];
            }
        }
        self.buf.drain(..end);
        Ok(Some((fin, opcode, payload)))
    }
}

fn upgrade_request(host: &str, port: u16, key: &str) -> String {
    format!(
        "GET {WEBSOCKET_PATH} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// `Sec-WebSocket-Accept` value the server must return for `key`.
fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(sha.finalize())
}

/// Check the upgrade response head: a `101` status and the accept key
/// derived from the key we sent.
fn check_upgrade_response(head: &[u8], key: &str) -> Result<(), TransportError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();
    let status = lines.next().unwrap_or_default();
    let mut parts = status.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some("101")) if version.starts_with("HTTP/") => {}
        _ => {
            return Err(TransportError::Websocket(format!(
                "upgrade rejected: {status}"
            )));
        }
    }

    let accept = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("sec-websocket-accept")
            .then(|| value.trim())
    });
    match accept {
        Some(accept) if accept == accept_key(key) => Ok(()),
        Some(accept) => Err(TransportError::Websocket(format!(
            "wrong Sec-WebSocket-Accept: {accept}"
        ))),
        None => Err(TransportError::Websocket(
            "missing Sec-WebSocket-Accept".into(),
        )),
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Perform the upgrade. Bytes read past the response head are returned.
async fn handshake(stream: &mut BoxedStream, host: &str, port: u16) -> Result<Vec<u8>, TransportError> {
    let key = STANDARD.encode(rand::random::<[u8; 16]>());
    stream
        .write_all(upgrade_request(host, port, &key).as_bytes())
        .await?;
    stream.flush().await?;

    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Websocket(
                "connection closed during upgrade".into(),
            ));
        }
        head.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&head) {
            check_upgrade_response(&head[..end], &key)?;
            return Ok(head.split_off(end));
        }
        if head.len() > MAX_HANDSHAKE_LEN {
            return Err(TransportError::Websocket("upgrade response too large".into()));
        }
    }
}

/// Write queued frames, one protocol frame per binary message. Normal
/// traffic waits for the cipher handshake like on the stream transport.
async fn flush<W: AsyncWrite + Unpin>(
    shared: &Shared,
    writer: &mut W,
    send_all: bool,
) -> Result<(), Exit> {
    loop {
        let frames = shared.core().take_stream_frames(send_all).map_err(Exit::Fatal)?;
        if frames.is_empty() {
            break;
        }
        for frame in &frames {
            let message = encode_ws_frame(OPCODE_BINARY, frame, Some(rand::random()));
            writer
                .write_all(&message)
                .await
                .map_err(|e| Exit::Dropped(e.into()))?;
        }
    }
    writer.flush().await.map_err(|e| Exit::Dropped(e.into()))
}

/// Handle every complete message in the reader.
async fn drain_reader<W: AsyncWrite + Unpin>(
    shared: &Shared,
    reader: &mut WsFrameReader,
    writer: &mut W,
) -> Result<(), Exit> {
    loop {
        match reader.next_frame() {
            Ok(Some(WsFrame::Binary(data))) => {
                let inbound = shared.core().on_datagram(&data);
                if let Some(e) = shared.deliver(inbound) {
                    return Err(Exit::Fatal(e));
                }
            }
            Ok(Some(WsFrame::Ping(data))) => {
                let pong = encode_ws_frame(OPCODE_PONG, &data, Some(rand::random()));
                writer
                    .write_all(&pong)
                    .await
                    .map_err(|e| Exit::Dropped(e.into()))?;
            }
            Ok(Some(WsFrame::Pong)) => {}
            Ok(Some(WsFrame::Close)) => {
                return Err(Exit::Dropped(TransportError::Websocket(
                    "closed by peer".into(),
                )));
            }
            Ok(None) => return Ok(()),
            Err(e) => return Err(Exit::Dropped(e)),
        }
    }
}

async fn run_connection(
    stream: BoxedStream,
    leftover: Vec<u8>,
    ctx: &mut DriverContext,
) -> Exit {
    let (mut reader, mut writer): (ReadHalf<BoxedStream>, _) = tokio::io::split(stream);
    let shared = &ctx.shared;
    if let Err(e) = shared.connected() {
        return Exit::Fatal(e);
    }

    let mut frames = WsFrameReader::new();
    frames.feed(&leftover);
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        if let Err(exit) = drain_reader(shared, &mut frames, &mut writer).await {
            return exit;
        }
        if let Err(exit) = flush(shared, &mut writer, false).await {
            return exit;
        }

        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    return Exit::Dropped(TransportError::Websocket("connection closed".into()));
                }
                Ok(n) => frames.feed(&buf[..n]),
                Err(e) => return Exit::Dropped(e.into()),
            },
            _ = shared.wake.notified() => {}
            _ = &mut ctx.shutdown => {
                let _ = flush(shared, &mut writer, true).await;
                let close = encode_ws_frame(OPCODE_CLOSE, &[], Some(rand::random()));
                let _ = writer.write_all(&close).await;
                let _ = writer.shutdown().await;
                return Exit::Stopped;
            }
        }
    }
}

pub(crate) async fn run(mut ctx: DriverContext, option: WebsocketOption) {
    let host = ctx.host.clone();
    let port = ctx.port;
    let tls = option.use_wss.then(|| TlsTarget {
        server_name: host.as_str(),
        ca_file: option.ca_file.as_deref(),
    });

    let opened = async {
        let addr = resolve(&host, port).await?[0];
        debug!(%addr, secure = option.use_wss, "opening websocket");
        let mut stream = connect(addr, option.connect_timeout, true, tls).await?;
        let leftover = tokio::time::timeout(option.connect_timeout, handshake(&mut stream, &host, port))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;
        Ok::<_, TransportError>((stream, leftover))
    };

    let (stream, leftover) = tokio::select! {
        result = opened => match result {
            Ok(opened) => opened,
            Err(e) => {
                ctx.shared.connect_failed(e);
                return;
            }
        },
        _ = &mut ctx.shutdown => {
            ctx.shared.stopped(None);
            return;
        }
    };

    match run_connection(stream, leftover, &mut ctx).await {
        Exit::Stopped => ctx.shared.stopped(None),
        Exit::Fatal(e) => ctx.shared.stopped(Some(e)),
        Exit::Dropped(e) => ctx.shared.dropped(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_frame_parses() {
        let payload = b"LEN:2\n\n{}".to_vec();
        let frame = encode_ws_frame(OPCODE_BINARY, &payload, Some([1, 2, 3, 4]));
        assert_eq!(frame[0], 0x82);
        assert_eq!(frame[1], MASK_BIT | payload.len() as u8);
        assert_ne!(&frame[6..], payload.as_slice());

        let mut reader = WsFrameReader::new();
        reader.feed(&frame);
        assert_eq!(reader.next_frame().unwrap(), Some(WsFrame::Binary(payload)));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_extended_lengths() {
        let medium = vec![7u8; 300];
        let frame = encode_ws_frame(OPCODE_BINARY, &medium, None);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 300);

        let large = vec![9u8; 70_000];
        let frame_large = encode_ws_frame(OPCODE_BINARY, &large, None);
        assert_eq!(frame_large[1], 127);

        let mut reader = WsFrameReader::new();
        reader.feed(&frame);
        reader.feed(&frame_large);
        assert_eq!(reader.next_frame().unwrap(), Some(WsFrame::Binary(medium)));
        assert_eq!(reader.next_frame().unwrap(), Some(WsFrame::Binary(large)));
    }

    #[test]
    fn test_partial_input_waits() {
        let frame = encode_ws_frame(OPCODE_BINARY, b"hello", None);
        let mut reader = WsFrameReader::new();
        reader.feed(&frame[..3]);
        assert_eq!(reader.next_frame().unwrap(), None);
        reader.feed(&frame[3..]);
        assert_eq!(
            reader.next_frame().unwrap(),
            Some(WsFrame::Binary(b"hello".to_vec()))
        );
    }

    #[test]
    fn test_fragments_are_joined() {
        let mut first = encode_ws_frame(OPCODE_TEXT, b"hel", None);
        first[0] &= !FIN_BIT;
        let last = encode_ws_frame(OPCODE_CONTINUATION, b"lo", None);
        let ping = encode_ws_frame(OPCODE_PING, b"p", None);

        let mut reader = WsFrameReader::new();
        reader.feed(&first);
        reader.feed(&ping);
        reader.feed(&last);
        assert_eq!(reader.next_frame().unwrap(), Some(WsFrame::Ping(b"p".to_vec())));
        assert_eq!(
            reader.next_frame().unwrap(),
            Some(WsFrame::Binary(b"hello".to_vec()))
        );
    }

    #[test]
    fn test_stray_continuation_is_an_error() {
        let frame = encode_ws_frame(OPCODE_CONTINUATION, b"x", None);
        let mut reader = WsFrameReader::new();
        reader.feed(&frame);
        assert!(matches!(reader.next_frame(), Err(TransportError::Websocket(_))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut header = vec![0x82, 127];
        header.extend_from_slice(&(MAX_MESSAGE_LEN as u64 + 1).to_be_bytes());
        let mut reader = WsFrameReader::new();
        reader.feed(&header);
        assert!(matches!(reader.next_frame(), Err(TransportError::Websocket(_))));
    }

    #[test]
    fn test_accept_key_known_answer() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_upgrade_response_checks() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let ok = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        assert!(check_upgrade_response(ok, key).is_ok());

        let wrong = b"HTTP/1.1 101 Switching Protocols\r\n\
            Sec-WebSocket-Accept: AAAAAAAAAAAAAAAAAAAAAAAAAAA=\r\n\r\n";
        assert!(check_upgrade_response(wrong, key).is_err());
        assert!(check_upgrade_response(b"HTTP/1.1 101 Switching Protocols\r\n\r\n", key).is_err());
        assert!(check_upgrade_response(b"HTTP/1.1 404 Not Found\r\n\r\n", key).is_err());
        assert_eq!(find_head_end(b"HTTP/1.1 101 OK\r\n\r\nrest"), Some(19));
    }

    #[tokio::test]
    async fn test_handshake_keeps_leftover_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let key = request
                .lines()
                .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
                .unwrap()
                .to_string();
            let mut response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                accept_key(&key)
            )
            .into_bytes();
            response.extend(encode_ws_frame(OPCODE_BINARY, b"hi", None));
            socket.write_all(&response).await.unwrap();
            request
        });

        let mut stream = connect(addr, std::time::Duration::from_secs(5), true, None)
            .await
            .unwrap();
        let leftover = handshake(&mut stream, "127.0.0.1", addr.port()).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13"));

        let mut reader = WsFrameReader::new();
        reader.feed(&leftover);
        assert_eq!(reader.next_frame().unwrap(), Some(WsFrame::Binary(b"hi".to_vec())));
    }
}
