//! Session-wide options.

use std::time::Duration;

/// Options shared by every transport of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOption {
    /// Number and acknowledge messages on the stream transport, and redeliver
    /// unacknowledged ones after a reconnect.
    pub session_reliability: bool,
    /// Hold acknowledgements for this long, piggy-backing them on outgoing
    /// messages. Zero sends a dedicated ack immediately.
    pub delayed_ack_interval: Duration,
    /// Attach the session id only to the first message after it is known.
    pub send_session_id_only_once: bool,
    /// Hold messages sent during a redirect and release them once the new
    /// server accepts the session.
    pub use_redirect_queue: bool,
}

/// Builder for [`SessionOption`].
#[derive(Debug, Default)]
pub struct SessionOptionBuilder {
    option: SessionOption,
}

impl SessionOptionBuilder {
    /// Start from the defaults: everything off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable reliable delivery.
    pub fn session_reliability(mut self, enabled: bool) -> Self {
        self.option.session_reliability = enabled;
        self
    }

    /// Delay acknowledgements.
    pub fn delayed_ack_interval(mut self, interval: Duration) -> Self {
        self.option.delayed_ack_interval = interval;
        self
    }

    /// Send the session id only once.
    pub fn send_session_id_only_once(mut self, once: bool) -> Self {
        self.option.send_session_id_only_once = once;
        self
    }

    /// Queue messages sent while redirecting.
    pub fn use_redirect_queue(mut self, enabled: bool) -> Self {
        self.option.use_redirect_queue = enabled;
        self
    }

    /// Build the options.
    pub fn build(self) -> SessionOption {
        self.option
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let option = SessionOptionBuilder::new()
            .session_reliability(true)
            .delayed_ack_interval(Duration::from_millis(50))
            .build();
        assert!(option.session_reliability);
        assert!(!option.send_session_id_only_once);
        assert_eq!(option.delayed_ack_interval, Duration::from_millis(50));
        assert_eq!(SessionOption::default().delayed_ack_interval, Duration::ZERO);
    }
}
