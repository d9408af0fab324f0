//! Encryption pipeline step of one transport.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::codec::HeaderFields;
use crate::core::constants::{
    ENCRYPTION_DELIMITER, ENCRYPTION_FIELD, ENCRYPTION_HANDSHAKE_BEGIN, ENCRYPTION_LIST_DELIMITER,
};
use crate::core::CryptoError;

use super::encryptor::{EncryptionType, Encryptor};

/// All ciphers of one transport connection.
#[derive(Debug, Default)]
pub struct EncryptionSet {
    encryptors: BTreeMap<EncryptionType, Encryptor>,
    public_key: Option<String>,
}

impl EncryptionSet {
    /// No ciphers: bodies pass through and no `ENC` field is written.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cipher. Key-exchange ciphers derive their keys right away
    /// when `public_key` is given.
    pub fn set_encryption(
        &mut self,
        encryption: EncryptionType,
        public_key: Option<&str>,
    ) -> Result<(), CryptoError> {
        let Some(mut encryptor) = Encryptor::create(encryption) else {
            return Ok(());
        };
        if let Some(key) = public_key.filter(|k| !k.is_empty()) {
            self.public_key = Some(key.to_string());
            if encryption.uses_key_exchange() {
                encryptor.handshake(key)?;
            }
        }
        self.encryptors.insert(encryption, encryptor);
        Ok(())
    }

    /// Whether `encryption` is registered; `Default` asks for any cipher.
    pub fn has(&self, encryption: EncryptionType) -> bool {
        match encryption {
            EncryptionType::Default => !self.encryptors.is_empty(),
            other => self.encryptors.contains_key(&other),
        }
    }

    /// Whether a key-exchange cipher is registered.
    pub fn uses_key_exchange(&self) -> bool {
        self.encryptors.keys().any(|t| t.uses_key_exchange())
    }

    /// Whether every registered cipher finished its handshake.
    pub fn is_handshake_completed(&self) -> bool {
        self.encryptors.values().all(Encryptor::is_handshake_completed)
    }

    /// Whether the cipher selected by `encryption` finished its handshake.
    pub fn is_type_handshake_completed(&self, encryption: EncryptionType) -> bool {
        self.resolve_type(encryption)
            .and_then(|t| self.encryptors.get(&t))
            .is_some_and(Encryptor::is_handshake_completed)
    }

    /// Ciphers whose handshake frame can be sent now.
    pub fn pending_handshakes(&self) -> Vec<EncryptionType> {
        self.encryptors
            .values()
            .filter(|e| !e.is_handshake_completed() && e.has_keys())
            .map(Encryptor::encryption_type)
            .collect()
    }

    fn resolve_type(&self, encryption: EncryptionType) -> Option<EncryptionType> {
        match encryption {
            EncryptionType::None => None,
            EncryptionType::Default => self.encryptors.keys().next().copied(),
            other => self.encryptors.contains_key(&other).then_some(other),
        }
    }

    /// Encrypt an outgoing body with the cipher selected by `encryption`.
    ///
    /// While that cipher's handshake is pending the body is replaced by the
    /// handshake frame: `LEN:0` and `ENC:<id>-<client public key>`.
    pub fn encrypt(
        &mut self,
        header: &mut HeaderFields,
        body: &mut Vec<u8>,
        encryption: EncryptionType,
    ) -> Result<(), CryptoError> {
        let Some(resolved) = self.resolve_type(encryption) else {
            return Ok(());
        };
        let Some(encryptor) = self.encryptors.get_mut(&resolved) else {
            return Ok(());
        };

        if !encryptor.is_handshake_completed() {
            let handshake = encryptor.handshake_string()?;
            header.insert(
                ENCRYPTION_FIELD,
                format!("{}{}{}", resolved.id(), ENCRYPTION_DELIMITER, handshake),
            );
            body.clear();
            header.set_length(0);
            debug!(encryption = %resolved, "sending encryption handshake");
            return Ok(());
        }

        header.insert(ENCRYPTION_FIELD, resolved.id().to_string());
        if !body.is_empty() {
            encryptor.encrypt(body)?;
        }
        Ok(())
    }

    /// Decrypt an incoming body according to its `ENC` field.
    ///
    /// Returns the ciphers whose handshake frames must now be sent, which is
    /// non-empty after a `HELLO!` negotiation or a server key delivery.
    pub fn decrypt(
        &mut self,
        header: &HeaderFields,
        body: &mut Vec<u8>,
    ) -> Result<Vec<EncryptionType>, CryptoError> {
        let Some(marker) = header.encryption() else {
            return Ok(Vec::new());
        };
        let (name, data) = match marker.split_once(ENCRYPTION_DELIMITER) {
            Some((name, data)) => (name.trim(), data.trim()),
            None => (marker.trim(), ""),
        };
        if name.is_empty() {
            return Ok(Vec::new());
        }

        if name == ENCRYPTION_HANDSHAKE_BEGIN {
            return Ok(self.negotiate(data));
        }

        let encryption = name
            .parse::<i32>()
            .ok()
            .and_then(EncryptionType::from_id)
            .ok_or_else(|| CryptoError::UnknownEncryption(name.to_string()))?;
        let resolved = self
            .resolve_type(encryption)
            .ok_or_else(|| CryptoError::UnknownEncryption(name.to_string()))?;
        let Some(encryptor) = self.encryptors.get_mut(&resolved) else {
            return Err(CryptoError::UnknownEncryption(name.to_string()));
        };

        let mut handshakes = Vec::new();
        if resolved.uses_key_exchange() && !encryptor.has_keys() && !data.is_empty() {
            encryptor.handshake(data)?;
            self.public_key = Some(data.to_string());
            handshakes.push(resolved);
        }

        if !body.is_empty() {
            encryptor.decrypt(body)?;
        }
        Ok(handshakes)
    }

    fn negotiate(&mut self, list: &str) -> Vec<EncryptionType> {
        if list.is_empty() {
            return vec![EncryptionType::Default];
        }

        for id in list.split(ENCRYPTION_LIST_DELIMITER) {
            let Some(encryption) = id.trim().parse::<i32>().ok().and_then(EncryptionType::from_id)
            else {
                warn!(id, "server requested an unknown cipher");
                continue;
            };
            if self.encryptors.contains_key(&encryption) {
                continue;
            }
            let Some(mut encryptor) = Encryptor::create(encryption) else {
                continue;
            };
            if encryption.uses_key_exchange() {
                if let Some(key) = &self.public_key {
                    if let Err(e) = encryptor.handshake(key) {
                        warn!(encryption = %encryption, error = %e, "key derivation failed");
                    }
                }
            }
            self.encryptors.insert(encryption, encryptor);
        }

        let mut handshakes = Vec::new();
        for encryption in [EncryptionType::ChaCha20, EncryptionType::Aes128] {
            if self.encryptors.get(&encryption).is_some_and(Encryptor::has_keys) {
                handshakes.push(encryption);
            }
        }
        if !self.has(EncryptionType::Ife1) {
            handshakes.push(EncryptionType::Default);
        }
        handshakes
    }
}
