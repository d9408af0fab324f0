//! One-shot receive timeouts keyed by message type.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::MessageType;

/// Deadlines for expected replies.
#[derive(Debug, Default)]
pub(crate) struct RecvTimeouts {
    deadlines: HashMap<MessageType, Instant>,
}

impl RecvTimeouts {
    /// Expect `msg_type` within `timeout` of `now`. Replaces an earlier
    /// deadline for the same type.
    pub(crate) fn set(&mut self, msg_type: MessageType, timeout: Duration, now: Instant) {
        self.deadlines.insert(msg_type, now + timeout);
    }

    /// Forget the deadline for `msg_type`. Returns whether one was set.
    pub(crate) fn erase(&mut self, msg_type: &MessageType) -> bool {
        self.deadlines.remove(msg_type).is_some()
    }

    /// Remove and return every type whose deadline has passed, earliest first.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<MessageType> {
        let mut expired: Vec<(Instant, MessageType)> = Vec::new();
        self.deadlines.retain(|msg_type, deadline| {
            if *deadline <= now {
                expired.push((*deadline, msg_type.clone()));
                false
            } else {
                true
            }
        });
        expired.sort_by_key(|(deadline, _)| *deadline);
        expired.into_iter().map(|(_, msg_type)| msg_type).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
