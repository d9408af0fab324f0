//! Cipher identities and the per-cipher encryptor.

use std::fmt;

use crate::core::CryptoError;

use super::cipher::{Aes128Stream, ChaCha20Stream};
use super::keys::HandshakeKeys;

/// Cipher identity carried in the `ENC` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum EncryptionType {
    /// No encryption.
    None,
    /// Whatever cipher the transport set up first.
    #[default]
    Default,
    /// Pass-through cipher.
    Dummy,
    /// Legacy engine cipher 1, pass-through.
    Ife1,
    /// Legacy engine cipher 2, pass-through.
    Ife2,
    /// ChaCha20 with x25519 key exchange.
    ChaCha20,
    /// AES-128-CTR with x25519 key exchange.
    Aes128,
}

impl EncryptionType {
    /// Wire id.
    pub fn id(self) -> i32 {
        match self {
            EncryptionType::None => 0,
            EncryptionType::Default => 100,
            EncryptionType::Dummy => 101,
            EncryptionType::Ife1 => 102,
            EncryptionType::Ife2 => 103,
            EncryptionType::ChaCha20 => 104,
            EncryptionType::Aes128 => 105,
        }
    }

    /// Cipher from its wire id.
    pub fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            0 => EncryptionType::None,
            100 => EncryptionType::Default,
            101 => EncryptionType::Dummy,
            102 => EncryptionType::Ife1,
            103 => EncryptionType::Ife2,
            104 => EncryptionType::ChaCha20,
            105 => EncryptionType::Aes128,
            _ => return None,
        })
    }

    /// Whether the cipher needs the x25519 handshake.
    pub fn uses_key_exchange(self) -> bool {
        matches!(self, EncryptionType::ChaCha20 | EncryptionType::Aes128)
    }

    /// Short name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            EncryptionType::None => "none",
            EncryptionType::Default => "default",
            EncryptionType::Dummy => "dummy",
            EncryptionType::Ife1 => "ife1",
            EncryptionType::Ife2 => "ife2",
            EncryptionType::ChaCha20 => "chacha20",
            EncryptionType::Aes128 => "aes128",
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum CipherState {
    Passthrough,
    AwaitingKey,
    ChaCha20(ChaCha20Stream),
    Aes128(Aes128Stream),
}

/// One cipher of a transport.
///
/// Key-exchange ciphers start with their handshake pending; the handshake
/// completes when the client public key is fetched for sending. Pass-through
/// ciphers are complete from the start.
pub struct Encryptor {
    encryption: EncryptionType,
    state: CipherState,
    handshake_string: String,
    handshake_completed: bool,
}

impl Encryptor {
    /// Factory from a concrete cipher identity.
    pub fn create(encryption: EncryptionType) -> Option<Self> {
        let (state, completed) = match encryption {
            EncryptionType::Dummy | EncryptionType::Ife1 | EncryptionType::Ife2 => {
                (CipherState::Passthrough, true)
            }
            EncryptionType::ChaCha20 | EncryptionType::Aes128 => (CipherState::AwaitingKey, false),
            EncryptionType::None | EncryptionType::Default => return None,
        };
        Some(Self {
            encryption,
            state,
            handshake_string: String::new(),
            handshake_completed: completed,
        })
    }

    /// Cipher identity.
    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption
    }

    /// Derive keys from the server public key (hex).
    ///
    /// No-op for pass-through ciphers.
    pub fn handshake(&mut self, server_public_hex: &str) -> Result<(), CryptoError> {
        let keys = match self.encryption {
            EncryptionType::ChaCha20 | EncryptionType::Aes128 => {
                HandshakeKeys::derive(server_public_hex)?
            }
            _ => return Ok(()),
        };
        self.state = match self.encryption {
            EncryptionType::ChaCha20 => CipherState::ChaCha20(ChaCha20Stream::from_secret(keys.secret())),
            _ => CipherState::Aes128(Aes128Stream::from_secret(keys.secret())),
        };
        self.handshake_string = keys.client_public_hex();
        Ok(())
    }

    /// Whether keys have been derived (or none are needed).
    pub fn has_keys(&self) -> bool {
        !matches!(self.state, CipherState::AwaitingKey)
    }

    /// Client public key for the handshake frame. Fetching it completes the
    /// handshake.
    pub fn handshake_string(&mut self) -> Result<&str, CryptoError> {
        if !self.has_keys() {
            return Err(CryptoError::HandshakeIncomplete(self.encryption.name()));
        }
        self.handshake_completed = true;
        Ok(&self.handshake_string)
    }

    /// Whether payloads may be encrypted.
    pub fn is_handshake_completed(&self) -> bool {
        self.handshake_completed
    }

    /// Encrypt in place.
    pub fn encrypt(&mut self, body: &mut [u8]) -> Result<(), CryptoError> {
        if !self.handshake_completed {
            return Err(CryptoError::HandshakeIncomplete(self.encryption.name()));
        }
        match &mut self.state {
            CipherState::Passthrough => Ok(()),
            CipherState::ChaCha20(stream) => stream.encrypt(body),
            CipherState::Aes128(stream) => stream.encrypt(body),
            CipherState::AwaitingKey => Err(CryptoError::HandshakeIncomplete(self.encryption.name())),
        }
    }

    /// Decrypt in place.
    pub fn decrypt(&mut self, body: &mut [u8]) -> Result<(), CryptoError> {
        match &mut self.state {
            CipherState::Passthrough => Ok(()),
            CipherState::ChaCha20(stream) => stream.decrypt(body),
            CipherState::Aes128(stream) => stream.decrypt(body),
            CipherState::AwaitingKey => Err(CryptoError::HandshakeIncomplete(self.encryption.name())),
        }
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("encryption", &self.encryption)
            .field("has_keys", &self.has_keys())
            .field("handshake_completed", &self.handshake_completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use x25519_dalek::{PublicKey, StaticSecret};

    fn server_hex() -> String {
        let secret = StaticSecret::random_from_rng(OsRng);
        hex::encode(PublicKey::from(&secret).as_bytes())
    }

    #[test]
    fn test_ids() {
        for id in [0, 100, 101, 102, 103, 104, 105] {
            assert_eq!(EncryptionType::from_id(id).unwrap().id(), id);
        }
        assert_eq!(EncryptionType::from_id(7), None);
    }

    #[test]
    fn test_refuses_before_handshake() {
        let mut e = Encryptor::create(EncryptionType::ChaCha20).unwrap();
        let mut body = b"secret".to_vec();
        assert!(matches!(
            e.encrypt(&mut body),
            Err(CryptoError::HandshakeIncomplete("chacha20"))
        ));
        assert!(e.handshake_string().is_err());

        e.handshake(&server_hex()).unwrap();
        // Keys exist but the handshake frame has not been sent.
        assert!(e.encrypt(&mut body).is_err());
        assert_eq!(e.handshake_string().unwrap().len(), 64);
        assert!(e.is_handshake_completed());
        e.encrypt(&mut body).unwrap();
        assert_ne!(body, b"secret");
    }

    #[test]
    fn test_passthrough_ciphers() {
        for t in [EncryptionType::Dummy, EncryptionType::Ife1, EncryptionType::Ife2] {
            let mut e = Encryptor::create(t).unwrap();
            assert!(e.is_handshake_completed());
            let mut body = b"plain".to_vec();
            e.encrypt(&mut body).unwrap();
            e.decrypt(&mut body).unwrap();
            assert_eq!(body, b"plain");
        }
        assert!(Encryptor::create(EncryptionType::Default).is_none());
    }
}
