//! Shared helpers for the end-to-end tests: a blocking mock server speaking
//! the frame format, and an update pump for sessions.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use funapi_session::Session;
use funapi_session::codec::{Frame, FrameDecoder, HeaderFields, decode_single, encode_frame};
use funapi_session::compression::CompressionSet;
use funapi_session::core::constants::COMPRESSION_FIELD;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Call `update` until `done` holds or `timeout` passes.
pub fn pump_until(session: &Session, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        session.update();
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Call `update` for `duration`, for checks that nothing else arrives.
pub fn pump_for(session: &Session, duration: Duration) {
    pump_until(session, duration, || false);
}

/// Append-only record shared with callbacks.
#[derive(Debug)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, item: T) {
        self.0.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn bind_tcp() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn json_body(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice(body).unwrap() {
        Value::Object(map) => map,
        other => panic!("body is not an object: {other}"),
    }
}

fn json_frame(body: &Value, compression: &CompressionSet) -> (Vec<u8>, bool) {
    let mut bytes = serde_json::to_vec(body).unwrap();
    let mut header = HeaderFields::for_body(bytes.len(), false);
    compression.compress(&mut header, &mut bytes).unwrap();
    let compressed = header.contains(COMPRESSION_FIELD);
    (encode_frame(&header, &bytes), compressed)
}

/// Server side of one stream connection.
pub struct Peer {
    stream: TcpStream,
    decoder: FrameDecoder,
    compression: CompressionSet,
    /// Whether the last received frame was compressed.
    pub last_compressed: bool,
}

impl Peer {
    pub fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(),
            compression: CompressionSet::new(),
            last_compressed: false,
        }
    }

    pub fn with_compression(mut self, compression: CompressionSet) -> Self {
        self.compression = compression;
        self
    }

    fn next_frame(&mut self) -> Option<Frame> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.next_frame().unwrap() {
                return Some(frame);
            }
            let n = self.stream.read(&mut buf).unwrap();
            if n == 0 {
                return None;
            }
            self.decoder.feed(&buf[..n]);
        }
    }

    /// Next JSON body from the client.
    pub fn recv(&mut self) -> Map<String, Value> {
        let Frame { mut header, mut body } =
            self.next_frame().expect("client closed the connection");
        self.last_compressed = header.contains(COMPRESSION_FIELD);
        self.compression.decompress(&mut header, &mut body).unwrap();
        json_body(&body)
    }

    /// Next body of type `msg_type`, skipping acks and other traffic.
    pub fn recv_typed(&mut self, msg_type: &str) -> Map<String, Value> {
        loop {
            let body = self.recv();
            if body.get("_msgtype").and_then(Value::as_str) == Some(msg_type) {
                return body;
            }
        }
    }

    pub fn send(&mut self, body: Value) {
        let (frame, _) = json_frame(&body, &self.compression);
        self.stream.write_all(&frame).unwrap();
    }

    /// Read until the client closes; returns the message types seen.
    pub fn wait_closed(&mut self) -> Vec<String> {
        let mut types = Vec::new();
        while let Some(Frame { mut header, mut body }) = self.next_frame() {
            self.compression.decompress(&mut header, &mut body).unwrap();
            if let Some(Value::String(t)) = json_body(&body).get("_msgtype") {
                types.push(t.clone());
            }
        }
        types
    }

    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Server side of a datagram exchange.
pub struct DatagramPeer {
    socket: UdpSocket,
    client: Option<std::net::SocketAddr>,
}

impl DatagramPeer {
    pub fn bind() -> (Self, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        let port = socket.local_addr().unwrap().port();
        (Self { socket, client: None }, port)
    }

    pub fn recv(&mut self) -> Map<String, Value> {
        let mut buf = [0u8; 65536];
        let (n, from) = self.socket.recv_from(&mut buf).unwrap();
        self.client = Some(from);
        let frame = decode_single(&buf[..n]).unwrap().expect("whole datagram");
        json_body(&frame.body)
    }

    pub fn send(&mut self, body: Value) {
        let client = self.client.expect("no datagram received yet");
        let (frame, _) = json_frame(&body, &CompressionSet::new());
        self.socket.send_to(&frame, client).unwrap();
    }
}
