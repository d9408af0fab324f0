//! Session identity.
//!
//! The server assigns an opaque token. JSON bodies carry it as text and binary
//! bodies as raw bytes; [`SessionId`] keeps both forms in sync.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Server-assigned session token in text and raw form.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionId {
    text: String,
    raw: Vec<u8>,
    from_binary: bool,
}

impl SessionId {
    /// Identity received in a JSON body.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let raw = text.as_bytes().to_vec();
        Self {
            text,
            raw,
            from_binary: false,
        }
    }

    /// Identity received in a binary body.
    ///
    /// The text form is the UUID-style rendering of the bytes unless the bytes
    /// already spell a dashed UUID, which is kept verbatim.
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        let text = match std::str::from_utf8(&raw) {
            Ok(s) if is_dashed_uuid(s) => s.to_string(),
            _ => uuid_text(&raw),
        };
        Self {
            text,
            raw,
            from_binary: true,
        }
    }

    /// Text form.
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// Raw form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Whether no identity has been assigned.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn is_binary(&self) -> bool {
        self.from_binary
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.text)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_dashed_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 36
        && bytes.iter().enumerate().all(|(i, &b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

fn uuid_text(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 2 + 4);
    for (i, byte) in raw.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&hex::encode([*byte]));
    }
    out
}

/// What [`SessionIdentity::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    /// Same identity, nothing to do.
    Unchanged,
    /// First identity of this session.
    Assigned,
    /// A different identity replaced the current one.
    Changed,
    /// The identity switched representation; not reported.
    Migrated,
}

/// Shared, lock-guarded session identity read by every transport.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    inner: Arc<Mutex<SessionId>>,
}

impl SessionIdentity {
    /// Empty identity.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionId> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current identity.
    pub fn get(&self) -> SessionId {
        self.lock().clone()
    }

    /// Whether an identity is known.
    pub fn is_set(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Store a received identity and report how it relates to the old one.
    pub fn update(&self, received: SessionId) -> IdentityChange {
        let mut current = self.lock();
        if received.is_empty() || *current == received {
            return IdentityChange::Unchanged;
        }
        if current.is_empty() {
            *current = received;
            return IdentityChange::Assigned;
        }
        if current.as_text() == received.as_text() {
            *current = received;
            return IdentityChange::Migrated;
        }
        let migrated = received.is_binary() && current.raw.len() != received.raw.len();
        *current = received;
        if migrated {
            IdentityChange::Migrated
        } else {
            IdentityChange::Changed
        }
    }

    /// Forget the identity.
    pub fn clear(&self) {
        *self.lock() = SessionId::default();
    }
}
