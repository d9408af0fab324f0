//! # funapi-session
//!
//! Client-side session engine for the Funapi wire protocol.
//!
//! A [`Session`](session::Session) talks to one server over up to four
//! transports at once and keeps a single session identity across them:
//!
//! - **TCP**: optional TLS, client ping, auto-reconnect with back-off and
//!   redelivery of unacknowledged messages
//! - **UDP**: one frame per datagram
//! - **HTTP**: one request in flight, cookies echoed
//! - **WebSocket**: one frame per binary message
//!
//! Every frame is `serialize → compress → encrypt → header` on the way out and
//! the reverse on the way in. Encryption is negotiated per connection
//! (x25519 key agreement, ChaCha20 or AES-128-CTR keystreams); compression
//! is deflate or zstd with an optional shared dictionary.
//!
//! ## Threading
//!
//! Socket I/O runs on shared background workers. Nothing they observe reaches
//! the application directly: events and messages are queued per session and
//! delivered when the application calls [`Session::update`](session::Session::update)
//! (or [`Session::update_all`](session::Session::update_all)).
//!
//! ## Feature Flags
//!
//! - `http` (default): request/response transport (reqwest)
//! - `tls` (default): TLS for TCP and WebSocket (rustls)
//! - `zstd` (default): zstd compression
//! - `deflate` (default): deflate compression
//!
//! ## Modules
//!
//! - [`core`]: constants, shared types and error taxonomy
//! - [`codec`]: header block, frame decoder, messages
//! - [`compression`] / [`crypto`]: pipeline steps
//! - [`config`]: transport and session options
//! - [`tasks`]: task queue and background workers
//! - [`transport`]: transport state machine and socket drivers
//! - [`session`]: the orchestrator

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod compression;
pub mod config;
pub mod core;
pub mod crypto;
pub mod session;
pub mod tasks;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{BinaryMessage, Message, MessageType};
    pub use crate::compression::CompressionType;
    pub use crate::config::{
        HttpOption, HttpOptionBuilder, SessionOption, SessionOptionBuilder, TcpOption,
        TcpOptionBuilder, TransportOption, UdpOption, UdpOptionBuilder, WebsocketOption,
        WebsocketOptionBuilder,
    };
    pub use crate::core::{
        Encoding, ErrorType, EventError, RedirectErrorCode, SessionError, SessionEventType,
        TransportEventType, TransportProtocol, TransportState,
    };
    pub use crate::crypto::EncryptionType;
    pub use crate::session::{Session, SessionId};
    pub use crate::tasks::Worker;
}

pub use session::{Session, SessionId};
