//! X25519 handshake key derivation.
//!
//! The client generates an ephemeral keypair, computes the shared point with
//! the server's public key and hashes `q || client_pub || server_pub` with
//! SHA-512. Each cipher slices its key and nonces out of the 64-byte digest.

use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::CryptoError;

/// X25519 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the derived secret.
pub const SECRET_SIZE: usize = 64;

/// Parse a server public key from its 64-character hex form.
pub fn parse_public_key(hex_key: &str) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
    if hex_key.len() != PUBLIC_KEY_SIZE * 2 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut key = [0u8; PUBLIC_KEY_SIZE];
    hex::decode_to_slice(hex_key, &mut key).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(key)
}

/// Result of one handshake: the derived secret and the client public key.
///
/// The secret is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HandshakeKeys {
    secret: [u8; SECRET_SIZE],
    #[zeroize(skip)]
    client_public: [u8; PUBLIC_KEY_SIZE],
}

impl HandshakeKeys {
    /// Run the client side of the key agreement against `server_public_hex`.
    pub fn derive(server_public_hex: &str) -> Result<Self, CryptoError> {
        let server_public = parse_public_key(server_public_hex)?;
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::derive_with(&secret, &server_public)
    }

    /// Key agreement with a caller-provided client secret.
    pub fn derive_with(
        client_secret: &StaticSecret,
        server_public: &[u8; PUBLIC_KEY_SIZE],
    ) -> Result<Self, CryptoError> {
        let client_public = PublicKey::from(client_secret);
        let shared = client_secret.diffie_hellman(&PublicKey::from(*server_public));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyDerivationFailed);
        }

        let mut hasher = Sha512::new();
        hasher.update(shared.as_bytes());
        hasher.update(client_public.as_bytes());
        hasher.update(server_public);

        let mut secret = [0u8; SECRET_SIZE];
        secret.copy_from_slice(&hasher.finalize());

        Ok(Self {
            secret,
            client_public: *client_public.as_bytes(),
        })
    }

    /// The derived 64-byte secret.
    pub fn secret(&self) -> &[u8; SECRET_SIZE] {
        &self.secret
    }

    /// Client public key as lowercase hex, sent back to the server.
    pub fn client_public_hex(&self) -> String {
        hex::encode(self.client_public)
    }
}

impl std::fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKeys")
            .field("client_public", &self.client_public_hex())
            .finish_non_exhaustive()
    }
}
