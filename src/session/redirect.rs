//! Redirect state: the move of a live session to another server.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::codec::{Message, RedirectPayload};
use crate::core::{Encoding, TransportProtocol};
use crate::transport::Transport;

/// One endpoint of the new server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RedirectTarget {
    pub(crate) protocol: TransportProtocol,
    pub(crate) port: u16,
    pub(crate) encoding: Encoding,
}

/// Endpoints named by a redirect, skipping unknown protocol or encoding ids.
pub(crate) fn targets(payload: &RedirectPayload) -> Vec<RedirectTarget> {
    payload
        .ports
        .iter()
        .filter_map(|port| {
            let protocol = TransportProtocol::from_redirect_id(port.protocol);
            let encoding = Encoding::from_redirect_id(port.encoding);
            match (protocol, encoding) {
                (Some(protocol), Some(encoding)) => Some(RedirectTarget {
                    protocol,
                    port: port.port,
                    encoding,
                }),
                _ => {
                    warn!(
                        protocol = port.protocol,
                        encoding = port.encoding,
                        "redirect endpoint skipped"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Tags of a server flavor: its comma-separated, non-empty parts.
pub(crate) fn flavor_tags(flavor: &str) -> Vec<String> {
    flavor
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// A redirect in progress. The session is redirecting while one exists.
#[derive(Debug)]
pub(crate) struct Redirect {
    pub(crate) token: String,
    pub(crate) flavor: String,
    pub(crate) previous_flavor: String,
    /// Transports of the old server, still flushing.
    draining: Vec<Arc<Transport>>,
    /// Messages held until the new server accepts the token.
    queues: BTreeMap<TransportProtocol, Vec<Message>>,
}

impl Redirect {
    pub(crate) fn new(
        token: String,
        flavor: String,
        previous_flavor: String,
        draining: Vec<Arc<Transport>>,
    ) -> Self {
        Self {
            token,
            flavor,
            previous_flavor,
            draining,
            queues: BTreeMap::new(),
        }
    }

    /// Whether the old transports are still shutting down.
    pub(crate) fn is_draining(&self) -> bool {
        !self.draining.is_empty()
    }

    /// Release old transports whose driver has finished. Returns `true` once,
    /// when the last one is released.
    pub(crate) fn poll_drained(&mut self) -> bool {
        if self.draining.is_empty() {
            return false;
        }
        self.draining.retain(|transport| transport.is_running());
        self.draining.is_empty()
    }

    pub(crate) fn hold(&mut self, protocol: TransportProtocol, message: Message) {
        self.queues.entry(protocol).or_default().push(message);
    }

    pub(crate) fn held_len(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    /// Held messages per protocol, in send order.
    pub(crate) fn take_queues(&mut self) -> Vec<(TransportProtocol, Vec<Message>)> {
        std::mem::take(&mut self.queues).into_iter().collect()
    }
}
