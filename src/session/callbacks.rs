//! Application callbacks.
//!
//! Every callback runs on the thread that calls [`Session::update`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::{Message, MessageType};
use crate::config::TransportOption;
use crate::core::{EventError, SessionEventType, TransportEventType, TransportProtocol};

use super::{Session, SessionId};

/// Session lifecycle callback.
pub type SessionEventHandler = Arc<
    dyn Fn(&Session, TransportProtocol, SessionEventType, &SessionId, Option<&EventError>)
        + Send
        + Sync,
>;

/// Transport lifecycle callback.
pub type TransportEventHandler =
    Arc<dyn Fn(&Session, TransportProtocol, TransportEventType, Option<&EventError>) + Send + Sync>;

/// Received-message callback, also used for per-type handlers and
/// maintenance notices.
pub type MessageHandler = Arc<dyn Fn(&Session, TransportProtocol, &Message) + Send + Sync>;

/// Receive-timeout callback.
pub type RecvTimeoutHandler = Arc<dyn Fn(&Session, &MessageType) + Send + Sync>;

/// Chooses transport options by protocol and server flavor.
pub type TransportOptionHandler =
    Arc<dyn Fn(TransportProtocol, &str) -> Option<TransportOption> + Send + Sync>;

/// Vets messages held during a redirect: `(protocol, previous_tags,
/// current_tags, queue)`. Entries left in the queue are sent.
pub type RedirectQueueHandler =
    Arc<dyn Fn(TransportProtocol, &[String], &[String], &mut Vec<Message>) + Send + Sync>;

#[derive(Default)]
struct Registry {
    session_event: Vec<SessionEventHandler>,
    transport_event: Vec<TransportEventHandler>,
    recv: Vec<MessageHandler>,
    recv_timeout: Vec<RecvTimeoutHandler>,
    maintenance: Vec<MessageHandler>,
    handlers: HashMap<MessageType, MessageHandler>,
    transport_option: Option<TransportOptionHandler>,
    redirect_queue: Option<RedirectQueueHandler>,
}

/// Callback tables. Callers clone what they need out of the lock before
/// invoking, so callbacks may register further callbacks.
#[derive(Default)]
pub(crate) struct Callbacks {
    registry: Mutex<Registry>,
}

impl Callbacks {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add_session_event(&self, handler: SessionEventHandler) {
        self.lock().session_event.push(handler);
    }

    pub(crate) fn add_transport_event(&self, handler: TransportEventHandler) {
        self.lock().transport_event.push(handler);
    }

    pub(crate) fn add_recv(&self, handler: MessageHandler) {
        self.lock().recv.push(handler);
    }

    pub(crate) fn add_recv_timeout(&self, handler: RecvTimeoutHandler) {
        self.lock().recv_timeout.push(handler);
    }

    pub(crate) fn add_maintenance(&self, handler: MessageHandler) {
        self.lock().maintenance.push(handler);
    }

    pub(crate) fn register(&self, msg_type: MessageType, handler: MessageHandler) {
        self.lock().handlers.insert(msg_type, handler);
    }

    pub(crate) fn set_transport_option(&self, handler: TransportOptionHandler) {
        self.lock().transport_option = Some(handler);
    }

    pub(crate) fn set_redirect_queue(&self, handler: RedirectQueueHandler) {
        self.lock().redirect_queue = Some(handler);
    }

    pub(crate) fn session_event(&self) -> Vec<SessionEventHandler> {
        self.lock().session_event.clone()
    }

    pub(crate) fn transport_event(&self) -> Vec<TransportEventHandler> {
        self.lock().transport_event.clone()
    }

    pub(crate) fn recv(&self) -> Vec<MessageHandler> {
        self.lock().recv.clone()
    }

    pub(crate) fn recv_timeout(&self) -> Vec<RecvTimeoutHandler> {
        self.lock().recv_timeout.clone()
    }

    pub(crate) fn maintenance(&self) -> Vec<MessageHandler> {
        self.lock().maintenance.clone()
    }

    pub(crate) fn handler(&self, msg_type: &MessageType) -> Option<MessageHandler> {
        self.lock().handlers.get(msg_type).cloned()
    }

    pub(crate) fn transport_option(&self) -> Option<TransportOptionHandler> {
        self.lock().transport_option.clone()
    }

    pub(crate) fn redirect_queue(&self) -> Option<RedirectQueueHandler> {
        self.lock().redirect_queue.clone()
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("Callbacks")
            .field("session_event", &registry.session_event.len())
            .field("transport_event", &registry.transport_event.len())
            .field("recv", &registry.recv.len())
            .field("handlers", &registry.handlers.len())
            .finish_non_exhaustive()
    }
}
