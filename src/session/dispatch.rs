//! Inbound side of the session: transport reports, built-in messages and the
//! redirect protocol. Everything here runs inside [`Session::update`].

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::codec::{Message, MessageType, PingPayload, RedirectConnectPayload, RedirectPayload};
use crate::config::TransportOption;
use crate::core::constants::{
    CLIENT_PING_TYPE, MAINTENANCE_TYPE, REDIRECT_CONNECT_TYPE, REDIRECT_TYPE, SERVER_PING_TYPE,
    SESSION_CLOSED_TYPE, SESSION_OPENED_TYPE,
};
use crate::core::{
    EventError, RedirectErrorCode, SessionEventType, TransportEventType, TransportProtocol,
};
use crate::tasks::TaskQueue;
use crate::transport::{Transport, TransportListener};

use super::identity::IdentityChange;
use super::redirect::{self, Redirect};
use super::{Session, SessionInner};

/// Listener handed to one transport. Reports are queued for the update
/// thread, tagged with the generation of the transport that made them.
pub(super) struct Link {
    session: Weak<SessionInner>,
    tasks: Weak<TaskQueue>,
    protocol: TransportProtocol,
    generation: u64,
}

impl Link {
    pub(super) fn new(
        session: Weak<SessionInner>,
        tasks: Weak<TaskQueue>,
        protocol: TransportProtocol,
        generation: u64,
    ) -> Self {
        Self {
            session,
            tasks,
            protocol,
            generation,
        }
    }

    fn post<F>(&self, task: F)
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        let Some(tasks) = self.tasks.upgrade() else {
            return;
        };
        let session = self.session.clone();
        tasks.push(move || {
            if let Some(inner) = session.upgrade() {
                task(&Session::from_inner(inner));
            }
            true
        });
    }
}

impl TransportListener for Link {
    fn on_event(&self, event: TransportEventType, error: Option<EventError>) {
        let (protocol, generation) = (self.protocol, self.generation);
        self.post(move |session| session.on_transport_event(protocol, generation, event, error));
    }

    fn on_message(&self, message: Message) {
        let (protocol, generation) = (self.protocol, self.generation);
        self.post(move |session| session.on_transport_message(protocol, generation, message));
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

impl Session {
    /// Whether `generation` is the transport currently attached for
    /// `protocol`. Reports from replaced transports are dropped.
    fn is_current(&self, protocol: TransportProtocol, generation: u64) -> bool {
        self.state().slots[protocol.index()]
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
    }

    pub(super) fn emit_session_event(
        &self,
        protocol: TransportProtocol,
        event: SessionEventType,
        error: Option<EventError>,
    ) {
        let redirect_event = matches!(
            event,
            SessionEventType::RedirectStarted
                | SessionEventType::RedirectSucceeded
                | SessionEventType::RedirectFailed
        );
        if self.is_redirecting() && !redirect_event {
            debug!(%protocol, ?event, "session event held back while redirecting");
            return;
        }
        let session_id = self.session_id();
        for callback in self.inner.callbacks.session_event() {
            callback(self, protocol, event, &session_id, error.as_ref());
        }
    }

    fn on_transport_event(
        &self,
        protocol: TransportProtocol,
        generation: u64,
        event: TransportEventType,
        error: Option<EventError>,
    ) {
        if !self.is_current(protocol, generation) {
            debug!(%protocol, generation, ?event, "event from a replaced transport");
            return;
        }
        let failure = matches!(
            event,
            TransportEventType::ConnectionFailed | TransportEventType::ConnectionTimedOut
        );
        if self.is_redirecting() && !failure {
            debug!(%protocol, ?event, "transport event held back while redirecting");
            return;
        }
        for callback in self.inner.callbacks.transport_event() {
            callback(self, protocol, event, error.as_ref());
        }
    }

    fn on_transport_message(&self, protocol: TransportProtocol, generation: u64, message: Message) {
        if !self.is_current(protocol, generation) {
            debug!(%protocol, generation, "message from a replaced transport dropped");
            return;
        }

        if let Some(received) = message.session_id() {
            match self.inner.identity.update(received) {
                IdentityChange::Assigned => {
                    info!(session_id = %self.session_id(), "session id assigned");
                }
                IdentityChange::Changed => {
                    info!(session_id = %self.session_id(), "session id changed");
                    self.emit_session_event(protocol, SessionEventType::Changed, None);
                }
                IdentityChange::Migrated | IdentityChange::Unchanged => {}
            }
        }

        let Some(msg_type) = message.msg_type() else {
            if self.inner.option.session_reliability {
                return;
            }
            self.deliver(protocol, &message);
            return;
        };
        self.state().recv_timeouts.erase(&msg_type);

        if let MessageType::Name(name) = &msg_type {
            match name.as_str() {
                SESSION_OPENED_TYPE => return self.on_session_opened(protocol),
                SESSION_CLOSED_TYPE => return self.on_session_closed(protocol),
                SERVER_PING_TYPE => return self.on_server_ping(protocol, message),
                CLIENT_PING_TYPE => return self.on_client_ping(&message),
                REDIRECT_TYPE => return self.on_redirect(protocol, &message),
                REDIRECT_CONNECT_TYPE => return self.on_redirect_connect(protocol, &message),
                MAINTENANCE_TYPE => {
                    for callback in self.inner.callbacks.maintenance() {
                        callback(self, protocol, &message);
                    }
                    return;
                }
                _ => {}
            }
        }

        match self.inner.callbacks.handler(&msg_type) {
            Some(handler) => handler(self, protocol, &message),
            None => self.deliver(protocol, &message),
        }
    }

    fn deliver(&self, protocol: TransportProtocol, message: &Message) {
        for callback in self.inner.callbacks.recv() {
            callback(self, protocol, message);
        }
    }

    // -------------------------------------------------------------------------
    // Built-in messages
    // -------------------------------------------------------------------------

    fn on_session_opened(&self, protocol: TransportProtocol) {
        info!(%protocol, session_id = %self.session_id(), "session opened");
        self.emit_session_event(protocol, SessionEventType::Opened, None);

        let (token, idle) = {
            let state = self.state();
            let token = state.redirect.as_ref().map(|r| r.token.clone());
            let idle: Vec<Arc<Transport>> = state
                .transports()
                .into_iter()
                .filter(|t| !t.is_running())
                .collect();
            (token, idle)
        };

        if let Some(token) = token {
            self.send_redirect_connect(protocol, token);
        }
        for transport in idle {
            if let Err(e) = transport.start() {
                warn!(protocol = %transport.protocol(), error = %e, "transport not started");
            }
        }
    }

    fn on_session_closed(&self, protocol: TransportProtocol) {
        info!(%protocol, "session closed by the server");
        self.emit_session_event(protocol, SessionEventType::Closed, None);
        self.inner.identity.clear();

        let transports = self.state().transports();
        for transport in transports {
            transport.stop();
            transport.reset();
        }
    }

    fn on_server_ping(&self, protocol: TransportProtocol, message: Message) {
        if let Some(transport) = self.state().transport(protocol) {
            transport.send_unreliable(message);
        }
    }

    fn on_client_ping(&self, message: &Message) {
        match message.payload::<PingPayload>() {
            Ok(ping) => {
                let micros = now_micros().saturating_sub(ping.timestamp).max(0);
                let rtt = Duration::from_micros(micros as u64);
                debug!(rtt_ms = rtt.as_millis() as u64, "ping answered");
                self.state().last_ping_rtt = Some(rtt);
            }
            Err(e) => warn!(error = %e, "malformed ping echo"),
        }
    }

    // -------------------------------------------------------------------------
    // Redirect
    // -------------------------------------------------------------------------

    fn on_redirect(&self, protocol: TransportProtocol, message: &Message) {
        let payload: RedirectPayload = match message.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "malformed redirect");
                return;
            }
        };
        let targets = redirect::targets(&payload);
        let chosen: Vec<(redirect::RedirectTarget, Option<TransportOption>)> = targets
            .into_iter()
            .map(|target| {
                let option = self.option_from_handler(target.protocol, &payload.flavor);
                (target, option)
            })
            .collect();

        let start_now = {
            let mut state = self.state();
            let draining: Vec<Arc<Transport>> = state
                .slots
                .iter_mut()
                .filter_map(Option::take)
                .map(|slot| {
                    slot.transport.stop();
                    slot.transport
                })
                .collect();
            let start_now = draining.is_empty();

            if !payload.host.is_empty() {
                state.host = payload.host.clone();
            }
            self.inner.identity.clear();

            for (target, option) in chosen {
                let option = option
                    .or_else(|| state.options[target.protocol.index()].clone())
                    .unwrap_or_else(|| TransportOption::default_for(target.protocol));
                if let Err(e) = self.attach(&mut state, option, target.port, target.encoding) {
                    warn!(protocol = %target.protocol, error = %e, "redirect endpoint not attached");
                }
            }
            if let Some(default) = state.default_protocol {
                if state.slots[default.index()].is_none() {
                    state.default_protocol = state.transports().first().map(|t| t.protocol());
                }
            }

            let previous_flavor = state.flavor.clone();
            state.redirect = Some(Redirect::new(
                payload.token.clone(),
                payload.flavor.clone(),
                previous_flavor,
                draining,
            ));
            start_now
        };

        info!(host = %payload.host, flavor = %payload.flavor, "redirect started");
        self.emit_session_event(protocol, SessionEventType::RedirectStarted, None);
        if start_now {
            if let Err(e) = self.start_transports() {
                warn!(error = %e, "redirect connect failed");
            }
        }
    }

    /// Start the new transports once the old ones are gone.
    pub(super) fn poll_redirect(&self) {
        let drained = self
            .state()
            .redirect
            .as_mut()
            .is_some_and(Redirect::poll_drained);
        if drained {
            debug!("old transports closed, connecting to the new server");
            if let Err(e) = self.start_transports() {
                warn!(error = %e, "redirect connect failed");
            }
        }
    }

    fn send_redirect_connect(&self, protocol: TransportProtocol, token: String) {
        let Some(transport) = self.state().transport(protocol) else {
            return;
        };
        let payload = RedirectConnectPayload { token, result: 0 };
        match Message::with_payload(transport.encoding(), REDIRECT_CONNECT_TYPE, &payload) {
            Ok(message) => {
                debug!(%protocol, "presenting redirect token");
                transport.send(message);
            }
            Err(e) => warn!(error = %e, "redirect token not sent"),
        }
    }

    fn on_redirect_connect(&self, protocol: TransportProtocol, message: &Message) {
        let payload: RedirectConnectPayload = match message.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "malformed redirect result");
                return;
            }
        };
        let Some(mut redirect) = self.state().redirect.take() else {
            warn!("redirect result without a redirect");
            return;
        };

        match RedirectErrorCode::from_result(payload.result) {
            None => {
                self.state().flavor = redirect.flavor.clone();
                info!(flavor = %redirect.flavor, "redirect succeeded");
                self.emit_session_event(protocol, SessionEventType::RedirectSucceeded, None);
                self.release_held(&mut redirect);
            }
            Some(code) => {
                warn!(
                    ?code,
                    discarded = redirect.held_len(),
                    "redirect failed"
                );
                self.emit_session_event(
                    protocol,
                    SessionEventType::RedirectFailed,
                    Some(EventError::redirect(code)),
                );
            }
        }
    }

    /// Send what was held during the redirect, after the application vetted
    /// it.
    fn release_held(&self, redirect: &mut Redirect) {
        let previous_tags = redirect::flavor_tags(&redirect.previous_flavor);
        let current_tags = redirect::flavor_tags(&redirect.flavor);
        let vet = self.inner.callbacks.redirect_queue();

        for (protocol, mut queue) in redirect.take_queues() {
            if let Some(vet) = &vet {
                vet(protocol, &previous_tags, &current_tags, &mut queue);
            }
            let Some(transport) = self.state().transport(protocol) else {
                warn!(%protocol, dropped = queue.len(), "no transport for held messages");
                continue;
            };
            debug!(%protocol, count = queue.len(), "sending held messages");
            for message in queue {
                transport.send(message);
            }
        }
    }
}
