//! Transports: the shared state machine and the per-protocol socket drivers.
//!
//! - [`TransportCore`]: queues, sequence/ack bookkeeping and the codec
//!   pipeline, free of I/O
//! - [`Transport`]: handle owned by a session; starts and stops a driver task
//!   on a background [`Worker`]
//! - drivers: TCP (optionally TLS, ping, auto-reconnect), UDP, HTTP and
//!   WebSocket
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          Session             │  update thread
//! ├──────────────────────────────┤
//! │  Transport ─ TransportCore   │  shared under a lock
//! ├──────────────────────────────┤
//! │  driver task (tokio worker)  │  socket I/O
//! └──────────────────────────────┘
//! ```

#[cfg(feature = "http")]
mod http;
mod machine;
mod queues;
mod seq;
mod stream;
mod tcp;
mod udp;
mod websocket;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::Message;
use crate::config::{SessionOption, TransportOption};
use crate::core::{
    ConfigError, Encoding, EventError, SessionError, TransportError, TransportEventType,
    TransportProtocol, TransportState,
};
use crate::session::SessionIdentity;
use crate::tasks::Worker;

pub use machine::{HttpRequest, Inbound, TransportCore};
pub use queues::SendQueues;
pub use seq::seq_less;
pub use websocket::{WsFrame, WsFrameReader, encode_ws_frame};

/// Receiver of everything a transport reports. Called from the driver task;
/// implementations hand the work to the application thread.
pub trait TransportListener: Send + Sync + 'static {
    /// Lifecycle change, with error details for failures.
    fn on_event(&self, event: TransportEventType, error: Option<EventError>);

    /// A decoded message.
    fn on_message(&self, message: Message);
}

/// State shared between a [`Transport`] handle and its driver task.
pub(crate) struct Shared {
    protocol: TransportProtocol,
    core: Mutex<TransportCore>,
    state: Mutex<TransportState>,
    wake: Notify,
    listener: Arc<dyn TransportListener>,
}

impl Shared {
    pub(crate) fn core(&self) -> MutexGuard<'_, TransportCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> TransportState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub(crate) fn emit(&self, event: TransportEventType, error: Option<EventError>) {
        self.listener.on_event(event, error);
    }

    /// Hand decoded messages to the listener; returns the fatal error, if any.
    pub(crate) fn deliver(&self, inbound: Inbound) -> Option<TransportError> {
        for message in inbound.messages {
            self.listener.on_message(message);
        }
        inbound.fatal
    }

    /// Connected: reset the core and report `Started`.
    pub(crate) fn connected(&self) -> Result<(), TransportError> {
        self.core().on_connected()?;
        self.set_state(TransportState::Connected);
        info!(protocol = %self.protocol, "transport started");
        self.emit(TransportEventType::Started, None);
        Ok(())
    }

    /// A connect attempt failed for good.
    pub(crate) fn connect_failed(&self, error: TransportError) {
        self.set_state(TransportState::Disconnected);
        let event = match error {
            TransportError::ConnectTimeout => TransportEventType::ConnectionTimedOut,
            _ => TransportEventType::ConnectionFailed,
        };
        warn!(protocol = %self.protocol, error = %error, "connect failed");
        self.emit(event, Some(error.to_event_error()));
    }

    /// An established connection dropped.
    pub(crate) fn dropped(&self, error: TransportError) {
        self.core().on_disconnected();
        self.set_state(TransportState::Disconnected);
        warn!(protocol = %self.protocol, error = %error, "connection dropped");
        self.emit(TransportEventType::Disconnected, Some(error.to_event_error()));
    }

    /// The driver finished, on request or after a fatal error.
    pub(crate) fn stopped(&self, error: Option<TransportError>) {
        self.core().on_disconnected();
        self.set_state(TransportState::Disconnected);
        match &error {
            Some(e) => tracing::error!(protocol = %self.protocol, error = %e, "transport stopped"),
            None => info!(protocol = %self.protocol, "transport stopped"),
        }
        self.emit(
            TransportEventType::Stopped,
            error.as_ref().map(TransportError::to_event_error),
        );
    }
}

/// How a connection loop ended.
pub(crate) enum Exit {
    /// Local stop request; queued traffic was flushed.
    Stopped,
    /// The peer or the network dropped the connection.
    Dropped(TransportError),
    /// A protocol error that forbids continuing.
    Fatal(TransportError),
}

/// Inputs of one driver run.
pub(crate) struct DriverContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) delayed_ack: Duration,
    pub(crate) shutdown: oneshot::Receiver<()>,
}

impl DriverContext {
    /// Whether a stop was requested (or the handle is gone).
    pub(crate) fn stop_requested(&mut self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

struct Run {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// One transport of a session.
///
/// Dropping the handle stops the driver; queued traffic is flushed first.
pub struct Transport {
    shared: Arc<Shared>,
    option: TransportOption,
    delayed_ack: Duration,
    worker: Worker,
    endpoint: Mutex<(String, u16)>,
    run: Mutex<Option<Run>>,
}

impl Transport {
    /// Create a stopped transport for `host:port`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        option: TransportOption,
        session: &SessionOption,
        encoding: Encoding,
        identity: SessionIdentity,
        host: impl Into<String>,
        port: u16,
        worker: Worker,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Self, ConfigError> {
        let core = TransportCore::new(&option, session, encoding, identity)?;
        Ok(Self {
            shared: Arc::new(Shared {
                protocol: option.protocol(),
                core: Mutex::new(core),
                state: Mutex::new(TransportState::Disconnected),
                wake: Notify::new(),
                listener,
            }),
            option,
            delayed_ack: session.delayed_ack_interval,
            worker,
            endpoint: Mutex::new((host.into(), port)),
            run: Mutex::new(None),
        })
    }

    /// Protocol of this transport.
    pub fn protocol(&self) -> TransportProtocol {
        self.shared.protocol
    }

    /// Options the transport was built with.
    pub fn option(&self) -> &TransportOption {
        &self.option
    }

    /// Body encoding.
    pub fn encoding(&self) -> Encoding {
        self.shared.core().encoding()
    }

    /// Server host and port.
    pub fn endpoint(&self) -> (String, u16) {
        self.endpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Point the transport at another server; takes effect on the next start.
    pub fn set_endpoint(&self, host: impl Into<String>, port: u16) {
        *self
            .endpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = (host.into(), port);
    }

    /// Connection state.
    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    /// Whether the transport is connected.
    pub fn is_started(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Whether a driver is running (connecting, connected or reconnecting).
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|run| !run.task.is_finished())
    }

    /// Connect in the background. No-op while a driver is running and has
    /// not been asked to stop.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut run = self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if run
            .as_ref()
            .is_some_and(|r| r.shutdown.is_some() && !r.task.is_finished())
        {
            return Ok(());
        }

        let (host, port) = self.endpoint();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = DriverContext {
            shared: Arc::clone(&self.shared),
            host,
            port,
            delayed_ack: self.delayed_ack,
            shutdown: shutdown_rx,
        };
        self.shared.set_state(TransportState::Connecting);
        debug!(protocol = %self.protocol(), worker = %self.worker.name(), "starting transport");

        let task = match self.option.clone() {
            TransportOption::Tcp(option) => self.worker.spawn(tcp::run(ctx, option)),
            TransportOption::Udp(_) => self.worker.spawn(udp::run(ctx)),
            TransportOption::Websocket(option) => self.worker.spawn(websocket::run(ctx, option)),
            #[cfg(feature = "http")]
            TransportOption::Http(option) => self.worker.spawn(http::run(ctx, option)),
            #[cfg(not(feature = "http"))]
            TransportOption::Http(_) => {
                self.shared.set_state(TransportState::Disconnected);
                return Err(ConfigError::FeatureDisabled("http").into());
            }
        };
        *run = Some(Run {
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    /// Ask the driver to flush queued traffic and disconnect.
    pub fn stop(&self) {
        let mut run = self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(run) = run.as_mut() {
            if let Some(tx) = run.shutdown.take() {
                let _ = tx.send(());
            }
        }
        if self.state() == TransportState::Connected {
            self.shared.set_state(TransportState::Disconnecting);
        }
    }

    /// Queue an application message.
    pub fn send(&self, message: Message) {
        self.shared.core().push(message);
        self.shared.wake.notify_one();
    }

    /// Queue a control message that is neither numbered nor retained.
    pub fn send_unreliable(&self, message: Message) {
        self.shared.core().push_unreliable(message);
        self.shared.wake.notify_one();
    }

    /// Messages waiting in the normal queue.
    pub fn pending_len(&self) -> usize {
        self.shared.core().pending_len()
    }

    /// Forget queues and sequence state (session reset).
    pub fn reset(&self) {
        self.shared.core().reset();
    }

    /// Drop queued traffic.
    pub fn clear_queues(&self) {
        self.shared.core().clear_queues();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("protocol", &self.protocol())
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
