//! Protocol-independent transport state machine.
//!
//! [`TransportCore`] owns everything a connection needs apart from the socket:
//! the send queues, sequence and acknowledgement bookkeeping, the encryption
//! and compression steps and the incremental frame decoder. Drivers call
//! into it with received bytes and ask it for bytes to write; it never
//! performs I/O itself, which keeps it testable without sockets.

use tracing::{debug, info, warn};

use crate::codec::{
    Frame, FrameDecoder, HeaderFields, Message, PingPayload, decode_single, encode_frame,
};
use crate::compression::CompressionSet;
use crate::config::{CodecOption, SessionOption, TransportOption};
use crate::core::constants::{
    CLIENT_PING_TYPE, COOKIE_REQUEST_FIELD, COOKIE_RESPONSE_FIELD, MAX_SEND,
};
use crate::core::{ConfigError, CryptoError, Encoding, TransportError, TransportProtocol};
use crate::crypto::{EncryptionSet, EncryptionType};
use crate::session::SessionIdentity;

use super::queues::SendQueues;
use super::seq::seq_less;

/// Messages decoded from received bytes.
#[derive(Debug, Default)]
pub struct Inbound {
    /// Messages to hand to the session, in decode order.
    pub messages: Vec<Message>,
    /// Error that must stop the transport; frames after it were not decoded.
    pub fatal: Option<TransportError>,
}

/// One request of the request/response transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request headers, frame fields included.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Handshake,
    Ack,
    Normal,
}

/// Queue, sequence and codec state of one transport.
#[derive(Debug)]
pub struct TransportCore {
    protocol: TransportProtocol,
    encoding: Encoding,
    codec: CodecOption,
    identity: SessionIdentity,
    queues: SendQueues,
    encryption: EncryptionSet,
    compression: CompressionSet,
    decoder: FrameDecoder,

    reliability: bool,
    use_sent_queue: bool,
    delayed_ack: bool,
    send_session_id_only_once: bool,

    seq: u32,
    seq_recvd: u32,
    seq_receiving: bool,
    ack_receiving: bool,
    reconnect_first_ack: bool,
    pending_ack: Option<u32>,

    first_frame: bool,
    session_id_sent: bool,
    id_confirmed: bool,
    cookie: Option<String>,
    request_in_flight: bool,
}

impl TransportCore {
    /// Build the state for one transport of a session.
    pub fn new(
        option: &TransportOption,
        session: &SessionOption,
        encoding: Encoding,
        identity: SessionIdentity,
    ) -> Result<Self, ConfigError> {
        let protocol = option.protocol();
        let codec = option.codec().clone();

        let mut compression = CompressionSet::new();
        compression.set_default(codec.compression)?;
        if let Some(dictionary) = &codec.zstd_dictionary {
            compression.set_dictionary(dictionary.clone())?;
        }

        let tcp_reliability = session.session_reliability && protocol == TransportProtocol::Tcp;
        let mut core = Self {
            protocol,
            encoding,
            codec,
            identity,
            queues: SendQueues::new(),
            encryption: EncryptionSet::new(),
            compression,
            decoder: FrameDecoder::new(),
            reliability: tcp_reliability || option.sequence_validation(),
            use_sent_queue: tcp_reliability,
            delayed_ack: !session.delayed_ack_interval.is_zero(),
            send_session_id_only_once: session.send_session_id_only_once,
            seq: rand::random(),
            seq_recvd: 0,
            seq_receiving: false,
            ack_receiving: false,
            reconnect_first_ack: false,
            pending_ack: None,
            first_frame: true,
            session_id_sent: false,
            id_confirmed: false,
            cookie: None,
            request_in_flight: false,
        };
        core.reset_encryption()
            .map_err(|e| ConfigError::InvalidPublicKey(e.to_string()))?;
        Ok(core)
    }

    fn reset_encryption(&mut self) -> Result<(), CryptoError> {
        let mut encryption = EncryptionSet::new();
        encryption.set_encryption(self.codec.encryption, self.codec.public_key.as_deref())?;
        self.encryption = encryption;
        Ok(())
    }

    /// Protocol of this transport.
    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Body encoding of this transport.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Whether messages are numbered and acknowledged.
    pub fn is_reliable(&self) -> bool {
        self.reliability
    }

    /// Next sequence number to assign.
    pub fn next_seq(&self) -> u32 {
        self.seq
    }

    /// Messages in the normal queue.
    pub fn pending_len(&self) -> usize {
        self.queues.normal_len()
    }

    /// Reliable messages not yet acknowledged.
    pub fn unacked_len(&self) -> usize {
        self.queues.sent_len()
    }

    /// Whether a send cycle could produce output.
    pub fn has_pending(&self) -> bool {
        self.queues.has_pending() || self.pending_ack.is_some()
    }

    /// Queue an application message. Reliable transports number it and, on
    /// the stream transport, keep it until acknowledged.
    pub fn push(&mut self, mut message: Message) {
        if self.reliability {
            message.set_use_seq(true);
            message.set_use_sent_queue(self.use_sent_queue);
        }
        self.queues.push_normal(message);
    }

    /// Queue a control message that is neither numbered nor retained.
    pub fn push_unreliable(&mut self, mut message: Message) {
        message.set_use_seq(false);
        message.set_use_sent_queue(false);
        self.queues.push_normal(message);
    }

    /// Queue a client ping carrying `timestamp` (µs since the epoch).
    /// Skipped while the session has no identity.
    pub fn push_ping(&mut self, timestamp: i64) -> Result<bool, TransportError> {
        if !self.identity.is_set() {
            return Ok(false);
        }
        let message =
            Message::with_payload(self.encoding, CLIENT_PING_TYPE, &PingPayload { timestamp })?;
        self.push_unreliable(message);
        Ok(true)
    }

    fn send_ack(&mut self, ack: u32) {
        if self.delayed_ack {
            self.pending_ack = Some(ack);
        } else {
            self.queues.push_ack(Message::ack_only(self.encoding, ack));
        }
    }

    /// Move a held acknowledgement to the ack queue. Returns whether one was
    /// pending.
    pub fn flush_delayed_ack(&mut self) -> bool {
        match self.pending_ack.take() {
            Some(ack) => {
                self.queues.push_ack(Message::ack_only(self.encoding, ack));
                true
            }
            None => false,
        }
    }

    fn queue_hello(&mut self) {
        if self.encryption.uses_key_exchange() {
            for encryption in self.encryption.pending_handshakes() {
                self.queues
                    .push_handshake(Message::empty(self.encoding).with_encryption(encryption));
            }
        } else if !self.identity.is_set() {
            self.push_unreliable(Message::empty(self.encoding));
        }
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// A new connection is up: reset per-connection state, restart the cipher
    /// handshake and queue the messages that open the conversation.
    pub fn on_connected(&mut self) -> Result<(), TransportError> {
        self.first_frame = true;
        self.decoder.reset();
        self.session_id_sent = false;
        self.id_confirmed = false;
        self.request_in_flight = false;
        self.queues.clear_connection();
        self.reset_encryption()?;

        if self.reliability && self.seq_receiving {
            self.queues
                .push_ack(Message::ack_only(self.encoding, self.seq_recvd.wrapping_add(1)));
        } else if self.reconnect_first_ack && self.identity.is_set() {
            self.queues.push_ack(Message::empty(self.encoding));
        }
        self.queue_hello();
        debug!(protocol = %self.protocol, "transport connected");
        Ok(())
    }

    /// The connection dropped. Reliable traffic stays queued; the next
    /// connection holds normal sends until the server's first ack says what
    /// it already has.
    pub fn on_disconnected(&mut self) {
        if self.ack_receiving || self.queues.sent_len() > 0 {
            self.reconnect_first_ack = true;
        }
        self.queues.clear_connection();
        self.pending_ack = None;
        self.request_in_flight = false;
    }

    /// Forget all session-scoped state: queues, sequence numbers, cookie.
    pub fn reset(&mut self) {
        self.queues.clear();
        self.decoder.reset();
        self.seq = rand::random();
        self.seq_recvd = 0;
        self.seq_receiving = false;
        self.ack_receiving = false;
        self.reconnect_first_ack = false;
        self.pending_ack = None;
        self.session_id_sent = false;
        self.id_confirmed = false;
        self.cookie = None;
        self.request_in_flight = false;
    }

    /// Drop queued traffic without touching sequence state.
    pub fn clear_queues(&mut self) {
        self.queues.clear();
        self.pending_ack = None;
    }

    // -------------------------------------------------------------------------
    // Sequence and acknowledgement
    // -------------------------------------------------------------------------

    /// Validate a received sequence number and schedule its acknowledgement.
    ///
    /// Returns `Ok(false)` for a duplicate, which must not be delivered.
    pub fn on_seq_received(&mut self, seq: u32) -> Result<bool, TransportError> {
        if !self.seq_receiving {
            self.seq_receiving = true;
        } else if !seq_less(self.seq_recvd, seq) {
            debug!(protocol = %self.protocol, seq, last = self.seq_recvd, "duplicate message dropped");
            return Ok(false);
        } else if seq != self.seq_recvd.wrapping_add(1) {
            return Err(TransportError::SeqDesync {
                expected: self.seq_recvd.wrapping_add(1),
                received: seq,
            });
        }
        self.seq_recvd = seq;
        self.send_ack(seq.wrapping_add(1));
        Ok(true)
    }

    /// Apply a received acknowledgement to the sent queue.
    pub fn on_ack_received(&mut self, ack: u32) {
        if seq_less(self.seq, ack) {
            warn!(protocol = %self.protocol, ack, next = self.seq, "ack outside the send window ignored");
            return;
        }
        self.ack_receiving = true;
        if self.reconnect_first_ack {
            self.reconnect_first_ack = false;
            let moved = self.queues.requeue_unacked(ack);
            if moved > 0 {
                info!(protocol = %self.protocol, count = moved, ack, "redelivering unacknowledged messages");
            }
        }
        let released = self.queues.release_acked(ack);
        if released > 0 {
            debug!(protocol = %self.protocol, ack, released, "acknowledged");
        }
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    fn attach_session_id(&self) -> bool {
        !self.send_session_id_only_once
            || !self.session_id_sent
            || (self.protocol == TransportProtocol::Udp && !self.id_confirmed)
    }

    fn prepare(&mut self, message: &mut Message) {
        if self.reliability {
            if message.use_seq() {
                message.assign_seq(&mut self.seq);
            }
            if let Some(ack) = self.pending_ack.take() {
                message.set_ack(ack);
            }
        }
        if self.attach_session_id() {
            let id = self.identity.get();
            if !id.is_empty() {
                message.set_session_id(&id);
                self.session_id_sent = true;
            }
        }
    }

    fn encode(&mut self, message: &Message) -> Result<(HeaderFields, Vec<u8>), TransportError> {
        let mut body = message.serialize()?;
        let mut header = HeaderFields::for_body(body.len(), self.first_frame);
        self.compression.compress(&mut header, &mut body)?;
        self.encryption
            .encrypt(&mut header, &mut body, message.encryption())?;
        header.set_length(body.len());
        self.first_frame = false;
        Ok((header, body))
    }

    fn next_outgoing(&mut self, gated: bool) -> Option<(Slot, Message)> {
        if let Some(message) = self.queues.pop_handshake() {
            return Some((Slot::Handshake, message));
        }
        if gated && !self.encryption.is_handshake_completed() {
            return None;
        }
        if let Some(message) = self.queues.take_ack() {
            return Some((Slot::Ack, message));
        }
        if gated && self.reconnect_first_ack {
            return None;
        }
        self.queues.pop_normal().map(|message| (Slot::Normal, message))
    }

    fn restore(&mut self, slot: Slot, message: Message) {
        match slot {
            Slot::Handshake => self.queues.push_handshake_front(message),
            Slot::Ack => self.queues.push_ack(message),
            Slot::Normal => self.queues.push_normal_front(message),
        }
    }

    fn encode_next(
        &mut self,
        gated: bool,
    ) -> Result<Option<(Slot, HeaderFields, Vec<u8>)>, TransportError> {
        loop {
            let Some((slot, mut message)) = self.next_outgoing(gated) else {
                return Ok(None);
            };
            if slot != Slot::Handshake {
                self.prepare(&mut message);
            }
            match self.encode(&message) {
                Ok((header, body)) => {
                    if slot == Slot::Normal && message.use_sent_queue() {
                        self.queues.push_sent(message);
                    }
                    return Ok(Some((slot, header, body)));
                }
                Err(e) if !e.is_fatal() => {
                    warn!(protocol = %self.protocol, error = %e, "dropping unencodable message");
                }
                Err(e) => {
                    self.restore(slot, message);
                    return Err(e);
                }
            }
        }
    }

    /// Frames for the stream transports, in priority order.
    ///
    /// Normal traffic is held while a cipher handshake is outstanding and,
    /// after a reconnect, until the server's first ack. At most
    /// [`MAX_SEND`] normal messages are taken unless `send_all` is set.
    pub fn take_stream_frames(&mut self, send_all: bool) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut frames = Vec::new();
        let mut normal = 0;
        while send_all || normal < MAX_SEND {
            let Some((slot, header, body)) = self.encode_next(true)? else {
                break;
            };
            if slot == Slot::Normal {
                normal += 1;
            }
            frames.push(encode_frame(&header, &body));
        }
        Ok(frames)
    }

    /// One frame per datagram, everything queued.
    pub fn take_datagrams(&mut self) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut datagrams = Vec::new();
        while let Some((_, header, body)) = self.encode_next(false)? {
            datagrams.push(encode_frame(&header, &body));
        }
        Ok(datagrams)
    }

    /// The next request, unless one is still in flight.
    pub fn take_http_request(&mut self) -> Result<Option<HttpRequest>, TransportError> {
        if self.request_in_flight {
            return Ok(None);
        }
        let Some((_, header, body)) = self.encode_next(true)? else {
            return Ok(None);
        };
        let mut headers = header.to_http_headers();
        if let Some(cookie) = &self.cookie {
            headers.push((COOKIE_REQUEST_FIELD.to_string(), cookie.clone()));
        }
        self.request_in_flight = true;
        Ok(Some(HttpRequest { headers, body }))
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Feed bytes read from a stream socket.
    pub fn on_stream_bytes(&mut self, data: &[u8]) -> Inbound {
        self.decoder.feed(data);
        let mut inbound = Inbound::default();
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => {
                    if self.accept_frame(frame, &mut inbound) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    inbound.fatal = Some(e.into());
                    break;
                }
            }
        }
        inbound
    }

    /// Handle one complete frame: a datagram or a WebSocket message.
    pub fn on_datagram(&mut self, data: &[u8]) -> Inbound {
        let mut inbound = Inbound::default();
        match decode_single(data) {
            Ok(Some(frame)) => {
                self.accept_frame(frame, &mut inbound);
            }
            Ok(None) => warn!(protocol = %self.protocol, len = data.len(), "truncated frame dropped"),
            Err(e) => inbound.fatal = Some(e.into()),
        }
        inbound
    }

    /// Handle the response to the request in flight.
    pub fn on_http_response(&mut self, headers: &[(String, String)], body: Vec<u8>) -> Inbound {
        self.request_in_flight = false;
        let header = HeaderFields::from_http_response(
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            body.len(),
        );
        if let Some(cookie) = header.get(COOKIE_RESPONSE_FIELD) {
            self.cookie = Some(cookie.to_string());
        }
        let mut inbound = Inbound::default();
        self.accept_frame(Frame { header, body }, &mut inbound);
        inbound
    }

    /// The request in flight failed. Without a session identity there is
    /// nothing to resume, so queued traffic is discarded. Returns whether the
    /// session can resume.
    pub fn on_http_failure(&mut self) -> bool {
        self.request_in_flight = false;
        if self.identity.is_set() {
            return true;
        }
        self.clear_queues();
        false
    }

    /// Run one frame through the decode pipeline. Returns `true` when the
    /// error is fatal and decoding must stop.
    fn accept_frame(&mut self, frame: Frame, inbound: &mut Inbound) -> bool {
        match self.decode_frame(frame) {
            Ok(Some(message)) => {
                inbound.messages.push(message);
                false
            }
            Ok(None) => false,
            Err(e) if !e.is_fatal() => {
                warn!(protocol = %self.protocol, error = %e, "frame dropped");
                false
            }
            Err(e) => {
                inbound.fatal = Some(e);
                true
            }
        }
    }

    fn decode_frame(&mut self, frame: Frame) -> Result<Option<Message>, TransportError> {
        let Frame { mut header, mut body } = frame;

        let handshakes = self.encryption.decrypt(&header, &mut body)?;
        for encryption in handshakes {
            if encryption == EncryptionType::Default
                && self.encryption.has(EncryptionType::Default)
                && !self.encryption.is_type_handshake_completed(EncryptionType::Default)
            {
                continue;
            }
            self.queues
                .push_handshake(Message::empty(self.encoding).with_encryption(encryption));
        }

        if body.is_empty() {
            return Ok(None);
        }
        self.compression.decompress(&mut header, &mut body)?;

        let mut message = Message::decode(self.encoding, &body)?;
        self.id_confirmed = true;

        if self.reliability {
            if let Some(ack) = message.take_ack() {
                self.on_ack_received(ack);
            }
            if let Some(seq) = message.take_seq() {
                if !self.on_seq_received(seq)? {
                    return Ok(None);
                }
            }
        }
        Ok(Some(message))
    }
}
