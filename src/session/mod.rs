//! Session orchestrator.
//!
//! A [`Session`] owns at most one transport per protocol, the session
//! identity they share, the message dispatch table and the redirect state.
//! Transport drivers never call into application code: everything they
//! report is queued and replayed by [`Session::update`], which is the only
//! place callbacks run.
//!
//! ```no_run
//! use funapi_session::prelude::*;
//!
//! # fn main() -> Result<(), SessionError> {
//! let session = Session::new("127.0.0.1", SessionOption::default());
//! session.add_recv_callback(|_, protocol, message| {
//!     println!("{protocol}: {}", message.to_json_string());
//! });
//! session.connect(TransportProtocol::Tcp, 8012, Encoding::Json)?;
//! session.send("echo", r#"{"message":"hello"}"#, None)?;
//! loop {
//!     session.update();
//!     std::thread::sleep(std::time::Duration::from_millis(30));
//! }
//! # }
//! ```

mod callbacks;
mod dispatch;
mod identity;
mod redirect;
mod timeouts;

pub use callbacks::{
    MessageHandler, RecvTimeoutHandler, RedirectQueueHandler, SessionEventHandler,
    TransportEventHandler, TransportOptionHandler,
};
pub use identity::{IdentityChange, SessionId, SessionIdentity};

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{Message, MessageType};
use crate::config::{SessionOption, TransportOption};
use crate::core::{
    Encoding, EventError, SessionError, SessionEventType, TransportEventType, TransportProtocol,
    TransportState,
};
use crate::tasks::{
    HTTP_WORKER, NETWORK_WORKER, TaskQueue, WEBSOCKET_WORKER, Worker, WorkerRegistry,
};
use crate::transport::Transport;

use callbacks::Callbacks;
use dispatch::Link;
use redirect::Redirect;
use timeouts::RecvTimeouts;

const PROTOCOL_COUNT: usize = TransportProtocol::CONNECT_ORDER.len();

/// An attached transport and the generation its listener reports under.
#[derive(Debug)]
struct Slot {
    transport: Arc<Transport>,
    generation: u64,
}

#[derive(Debug, Default)]
struct State {
    host: String,
    slots: [Option<Slot>; PROTOCOL_COUNT],
    /// Options each protocol was last connected with.
    options: [Option<TransportOption>; PROTOCOL_COUNT],
    next_generation: u64,
    default_protocol: Option<TransportProtocol>,
    redirect: Option<Redirect>,
    /// Flavor of the server the session is on; set by redirects.
    flavor: String,
    recv_timeouts: RecvTimeouts,
    last_ping_rtt: Option<Duration>,
}

impl State {
    fn transport(&self, protocol: TransportProtocol) -> Option<Arc<Transport>> {
        self.slots[protocol.index()]
            .as_ref()
            .map(|slot| Arc::clone(&slot.transport))
    }

    /// Attached transports in connect order.
    fn transports(&self) -> Vec<Arc<Transport>> {
        TransportProtocol::CONNECT_ORDER
            .iter()
            .filter_map(|&protocol| self.transport(protocol))
            .collect()
    }
}

struct SessionInner {
    option: SessionOption,
    identity: SessionIdentity,
    tasks: Arc<TaskQueue>,
    state: Mutex<State>,
    callbacks: Callbacks,
    worker: Option<Worker>,
}

fn sessions() -> &'static Mutex<Vec<Weak<SessionInner>>> {
    static SESSIONS: OnceLock<Mutex<Vec<Weak<SessionInner>>>> = OnceLock::new();
    SESSIONS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Client session with a server.
///
/// Cheap to clone; clones share the same session. The session is closed when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Session with the server at `host`. Transports run on the shared
    /// background workers.
    pub fn new(host: impl Into<String>, option: SessionOption) -> Self {
        Self::build(host.into(), option, None)
    }

    /// Session whose transports all run on `worker`.
    pub fn with_worker(host: impl Into<String>, option: SessionOption, worker: Worker) -> Self {
        Self::build(host.into(), option, Some(worker))
    }

    fn build(host: String, option: SessionOption, worker: Option<Worker>) -> Self {
        let inner = Arc::new(SessionInner {
            option,
            identity: SessionIdentity::new(),
            tasks: Arc::new(TaskQueue::new()),
            state: Mutex::new(State {
                host,
                ..State::default()
            }),
            callbacks: Callbacks::default(),
            worker,
        });
        let mut registry = sessions().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.retain(|weak| weak.strong_count() > 0);
        registry.push(Arc::downgrade(&inner));
        Self { inner }
    }

    fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Session-wide options.
    pub fn option(&self) -> &SessionOption {
        &self.inner.option
    }

    /// Server host transports connect to.
    pub fn host(&self) -> String {
        self.state().host.clone()
    }

    // -------------------------------------------------------------------------
    // Connect / close
    // -------------------------------------------------------------------------

    /// Connect `protocol` to `port`.
    ///
    /// The options come from the transport option callback, else the options
    /// this protocol was last connected with, else the defaults. An attached
    /// transport is reused.
    pub fn connect(
        &self,
        protocol: TransportProtocol,
        port: u16,
        encoding: Encoding,
    ) -> Result<(), SessionError> {
        let from_handler = if self.is_redirecting() {
            None
        } else {
            self.option_from_handler(protocol, "")
        };
        self.connect_inner(protocol, from_handler, port, encoding)
    }

    /// Connect with explicit transport options.
    pub fn connect_with(
        &self,
        option: TransportOption,
        port: u16,
        encoding: Encoding,
    ) -> Result<(), SessionError> {
        self.connect_inner(option.protocol(), Some(option), port, encoding)
    }

    fn connect_inner(
        &self,
        protocol: TransportProtocol,
        option: Option<TransportOption>,
        port: u16,
        encoding: Encoding,
    ) -> Result<(), SessionError> {
        let existing = {
            let mut state = self.state();
            match state.transport(protocol) {
                Some(transport) => {
                    if !transport.is_running() {
                        transport.set_endpoint(state.host.clone(), port);
                    }
                    Some(transport)
                }
                None => {
                    let option = option
                        .or_else(|| state.options[protocol.index()].clone())
                        .unwrap_or_else(|| TransportOption::default_for(protocol));
                    self.attach(&mut state, option, port, encoding)?;
                    None
                }
            }
        };

        match existing {
            Some(transport) => transport.start(),
            None => self.start_transports(),
        }
    }

    fn option_from_handler(&self, protocol: TransportProtocol, flavor: &str) -> Option<TransportOption> {
        let handler = self.inner.callbacks.transport_option()?;
        let option = handler(protocol, flavor)?;
        if option.protocol() != protocol {
            warn!(%protocol, given = %option.protocol(), "transport option for another protocol ignored");
            return None;
        }
        Some(option)
    }

    fn worker_for(&self, protocol: TransportProtocol) -> Result<Worker, SessionError> {
        if let Some(worker) = &self.inner.worker {
            return Ok(worker.clone());
        }
        let name = match protocol {
            TransportProtocol::Tcp | TransportProtocol::Udp => NETWORK_WORKER,
            TransportProtocol::Http => HTTP_WORKER,
            TransportProtocol::Websocket => WEBSOCKET_WORKER,
        };
        WorkerRegistry::global().get(name)
    }

    /// Create a transport for `option` and attach it, replacing nothing.
    fn attach(
        &self,
        state: &mut State,
        option: TransportOption,
        port: u16,
        encoding: Encoding,
    ) -> Result<Arc<Transport>, SessionError> {
        let protocol = option.protocol();
        state.next_generation += 1;
        let generation = state.next_generation;
        let listener = Arc::new(Link::new(
            Arc::downgrade(&self.inner),
            Arc::downgrade(&self.inner.tasks),
            protocol,
            generation,
        ));
        let transport = Arc::new(Transport::new(
            option.clone(),
            &self.inner.option,
            encoding,
            self.inner.identity.clone(),
            state.host.clone(),
            port,
            self.worker_for(protocol)?,
            listener,
        )?);

        debug!(%protocol, port, ?encoding, generation, "transport attached");
        state.slots[protocol.index()] = Some(Slot {
            transport: Arc::clone(&transport),
            generation,
        });
        state.options[protocol.index()] = Some(option);
        if state.default_protocol.is_none() {
            state.default_protocol = Some(protocol);
        }
        Ok(transport)
    }

    /// Without a session id only the first attached protocol connects; the
    /// rest follow `_session_opened`. With one, every idle transport starts.
    fn start_transports(&self) -> Result<(), SessionError> {
        let transports = {
            let state = self.state();
            if state.redirect.as_ref().is_some_and(Redirect::is_draining) {
                return Ok(());
            }
            state.transports()
        };

        if !self.inner.identity.is_set() {
            if let Some(first) = transports.first() {
                first.start()?;
            }
            return Ok(());
        }
        for transport in transports.iter().filter(|t| !t.is_running()) {
            transport.start()?;
        }
        Ok(())
    }

    /// Stop every transport. Queued traffic is flushed first.
    pub fn close(&self) {
        let transports = self.state().transports();
        if !transports.is_empty() {
            info!(count = transports.len(), "closing session transports");
        }
        for transport in transports {
            transport.stop();
        }
    }

    /// Stop one transport.
    pub fn close_protocol(&self, protocol: TransportProtocol) {
        if let Some(transport) = self.state().transport(protocol) {
            transport.stop();
        }
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Send a JSON message. `json` is the body object (may be empty) and
    /// `msg_type` is stored in `_msgtype` unless empty. `None` sends on the
    /// default protocol.
    pub fn send(
        &self,
        msg_type: &str,
        json: &str,
        protocol: Option<TransportProtocol>,
    ) -> Result<(), SessionError> {
        let msg_type = (!msg_type.is_empty()).then_some(msg_type);
        let message = Message::from_json_str(msg_type, json)
            .map_err(|e| SessionError::InvalidMessage(e.to_string()))?;
        self.send_message(message, protocol)
    }

    /// Send a prepared message. Its encoding must match the transport's.
    pub fn send_message(
        &self,
        message: Message,
        protocol: Option<TransportProtocol>,
    ) -> Result<(), SessionError> {
        let mut state = self.state();
        let Some(protocol) = protocol.or(state.default_protocol) else {
            return Err(SessionError::NoTransport("default protocol".into()));
        };
        let Some(transport) = state.transport(protocol) else {
            return Err(SessionError::NoTransport(protocol.to_string()));
        };
        if message.encoding() != transport.encoding() {
            return Err(SessionError::InvalidMessage(format!(
                "{:?} message on a {:?} transport",
                message.encoding(),
                transport.encoding()
            )));
        }

        if self.inner.option.use_redirect_queue {
            if let Some(redirect) = state.redirect.as_mut() {
                debug!(%protocol, "message held until the redirect completes");
                redirect.hold(protocol, message);
                return Ok(());
            }
        }
        drop(state);
        transport.send(message);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Update
    // -------------------------------------------------------------------------

    /// Run queued work: transport events, received messages, redirect
    /// progress and receive timeouts. Callbacks run inside this call.
    pub fn update(&self) {
        self.inner.tasks.update();
        self.poll_redirect();
        self.check_recv_timeouts();
    }

    /// [`update`](Self::update) every live session in the process.
    pub fn update_all() {
        let live: Vec<Session> = {
            let mut registry = sessions().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            registry.retain(|weak| weak.strong_count() > 0);
            registry
                .iter()
                .filter_map(Weak::upgrade)
                .map(Session::from_inner)
                .collect()
        };
        for session in &live {
            session.update();
        }
    }

    fn check_recv_timeouts(&self) {
        let expired = self.state().recv_timeouts.take_expired(Instant::now());
        if expired.is_empty() {
            return;
        }
        let handlers = self.inner.callbacks.recv_timeout();
        for msg_type in &expired {
            warn!(msg_type = %msg_type, "receive timed out");
            for handler in &handlers {
                handler(self, msg_type);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Handlers and timeouts
    // -------------------------------------------------------------------------

    /// Handle `msg_type` with `handler` instead of the receive callbacks.
    pub fn register_handler<F>(&self, msg_type: impl Into<MessageType>, handler: F)
    where
        F: Fn(&Session, TransportProtocol, &Message) + Send + Sync + 'static,
    {
        let msg_type = msg_type.into();
        debug!(msg_type = %msg_type, "handler registered");
        self.inner.callbacks.register(msg_type, Arc::new(handler));
    }

    /// Expect a `msg_type` message within `timeout`; otherwise the receive
    /// timeout callbacks fire once.
    pub fn set_recv_timeout(&self, msg_type: impl Into<MessageType>, timeout: Duration) {
        self.state()
            .recv_timeouts
            .set(msg_type.into(), timeout, Instant::now());
    }

    /// Cancel a receive timeout. Returns whether one was set.
    pub fn erase_recv_timeout(&self, msg_type: impl Into<MessageType>) -> bool {
        self.state().recv_timeouts.erase(&msg_type.into())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Whether any transport is connected.
    pub fn is_connected(&self) -> bool {
        self.state().transports().iter().any(|t| t.is_started())
    }

    /// Whether the transport for `protocol` is connected.
    pub fn is_protocol_connected(&self, protocol: TransportProtocol) -> bool {
        self.state()
            .transport(protocol)
            .is_some_and(|t| t.is_started())
    }

    /// Whether a transport is attached for `protocol`.
    pub fn has_transport(&self, protocol: TransportProtocol) -> bool {
        self.state().transport(protocol).is_some()
    }

    /// Connection state of the transport for `protocol`.
    pub fn transport_state(&self, protocol: TransportProtocol) -> Option<TransportState> {
        self.state().transport(protocol).map(|t| t.state())
    }

    /// Body encoding of the transport for `protocol`.
    pub fn encoding(&self, protocol: TransportProtocol) -> Option<Encoding> {
        self.state().transport(protocol).map(|t| t.encoding())
    }

    /// Whether a redirect is in progress.
    pub fn is_redirecting(&self) -> bool {
        self.state().redirect.is_some()
    }

    /// Current session id; empty before the server assigns one.
    pub fn session_id(&self) -> SessionId {
        self.inner.identity.get()
    }

    /// Protocol used by sends that name none.
    pub fn default_protocol(&self) -> Option<TransportProtocol> {
        self.state().default_protocol
    }

    /// Set the protocol used by sends that name none.
    pub fn set_default_protocol(&self, protocol: TransportProtocol) {
        self.state().default_protocol = Some(protocol);
    }

    /// Round trip of the last answered client ping.
    pub fn last_ping_rtt(&self) -> Option<Duration> {
        self.state().last_ping_rtt
    }

    // -------------------------------------------------------------------------
    // Callbacks
    // -------------------------------------------------------------------------

    /// Observe session lifecycle events.
    pub fn add_session_event_callback<F>(&self, callback: F)
    where
        F: Fn(&Session, TransportProtocol, SessionEventType, &SessionId, Option<&EventError>)
            + Send
            + Sync
            + 'static,
    {
        self.inner.callbacks.add_session_event(Arc::new(callback));
    }

    /// Observe transport lifecycle events.
    pub fn add_transport_event_callback<F>(&self, callback: F)
    where
        F: Fn(&Session, TransportProtocol, TransportEventType, Option<&EventError>)
            + Send
            + Sync
            + 'static,
    {
        self.inner.callbacks.add_transport_event(Arc::new(callback));
    }

    /// Receive messages no registered handler claims.
    pub fn add_recv_callback<F>(&self, callback: F)
    where
        F: Fn(&Session, TransportProtocol, &Message) + Send + Sync + 'static,
    {
        self.inner.callbacks.add_recv(Arc::new(callback));
    }

    /// Observe expired receive timeouts.
    pub fn add_recv_timeout_callback<F>(&self, callback: F)
    where
        F: Fn(&Session, &MessageType) + Send + Sync + 'static,
    {
        self.inner.callbacks.add_recv_timeout(Arc::new(callback));
    }

    /// Receive `_maintenance` notices.
    pub fn add_maintenance_callback<F>(&self, callback: F)
    where
        F: Fn(&Session, TransportProtocol, &Message) + Send + Sync + 'static,
    {
        self.inner.callbacks.add_maintenance(Arc::new(callback));
    }

    /// Choose transport options per protocol and server flavor. Consulted on
    /// [`connect`](Self::connect) (with an empty flavor) and on redirect.
    pub fn set_transport_option_callback<F>(&self, callback: F)
    where
        F: Fn(TransportProtocol, &str) -> Option<TransportOption> + Send + Sync + 'static,
    {
        self.inner.callbacks.set_transport_option(Arc::new(callback));
    }

    /// Vet messages held during a redirect before they are sent.
    pub fn set_redirect_queue_callback<F>(&self, callback: F)
    where
        F: Fn(TransportProtocol, &[String], &[String], &mut Vec<Message>) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_redirect_queue(Arc::new(callback));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Session")
            .field("host", &state.host)
            .field("session_id", &self.inner.identity.get())
            .field("transports", &state.transports())
            .field("redirecting", &state.redirect.is_some())
            .finish()
    }
}
