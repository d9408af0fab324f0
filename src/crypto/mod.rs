//! Encryption pipeline.
//!
//! - [`HandshakeKeys`]: x25519 agreement hashed with SHA-512
//! - [`ChaCha20Stream`] / [`Aes128Stream`]: keystream states for the two
//!   key-exchange ciphers
//! - [`Encryptor`]: one cipher with its handshake state
//! - [`EncryptionSet`]: the ciphers of one connection, `ENC` header handling
//!   and `HELLO!` negotiation

mod cipher;
mod encryption;
mod encryptor;
mod keys;

pub use cipher::{Aes128Stream, ChaCha20Stream};
pub use encryption::EncryptionSet;
pub use encryptor::{EncryptionType, Encryptor};
pub use keys::{HandshakeKeys, PUBLIC_KEY_SIZE, SECRET_SIZE, parse_public_key};
