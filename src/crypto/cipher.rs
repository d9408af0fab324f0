//! Stream cipher states for the key-exchange ciphers.
//!
//! Both ciphers XOR the body with a keystream; encryption and decryption are
//! the same operation on independent send and receive states.

use aes::Aes128;
use chacha20::ChaCha20Legacy;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::CryptoError;

use super::keys::SECRET_SIZE;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// ChaCha20 keystream block size.
const CHACHA_BLOCK_SIZE: u64 = 64;

/// One direction of a ChaCha20 stream.
///
/// The initial block counter of every message is the number of bytes already
/// processed in that direction.
#[derive(Zeroize, ZeroizeOnDrop)]
struct ChaChaDirection {
    nonce: [u8; 8],
    count: u64,
}

/// ChaCha20 with an 8-byte nonce.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChaCha20Stream {
    key: [u8; 32],
    enc: ChaChaDirection,
    dec: ChaChaDirection,
}

impl ChaCha20Stream {
    /// Slice key `[0..32]`, receive nonce `[32..40]`, send nonce `[40..48]`.
    pub fn from_secret(secret: &[u8; SECRET_SIZE]) -> Self {
        let mut key = [0u8; 32];
        let mut dec_nonce = [0u8; 8];
        let mut enc_nonce = [0u8; 8];
        key.copy_from_slice(&secret[..32]);
        dec_nonce.copy_from_slice(&secret[32..40]);
        enc_nonce.copy_from_slice(&secret[40..48]);
        Self {
            key,
            enc: ChaChaDirection {
                nonce: enc_nonce,
                count: 0,
            },
            dec: ChaChaDirection {
                nonce: dec_nonce,
                count: 0,
            },
        }
    }

    /// Encrypt in place.
    pub fn encrypt(&mut self, body: &mut [u8]) -> Result<(), CryptoError> {
        Self::apply(&self.key, &mut self.enc, body)
    }

    /// Decrypt in place.
    pub fn decrypt(&mut self, body: &mut [u8]) -> Result<(), CryptoError> {
        Self::apply(&self.key, &mut self.dec, body)
    }

    fn apply(key: &[u8; 32], dir: &mut ChaChaDirection, body: &mut [u8]) -> Result<(), CryptoError> {
        if body.is_empty() {
            return Ok(());
        }
        let mut cipher = ChaCha20Legacy::new(key.into(), (&dir.nonce).into());
        let offset = dir
            .count
            .checked_mul(CHACHA_BLOCK_SIZE)
            .ok_or_else(|| CryptoError::CipherFailure("counter overflow".into()))?;
        cipher
            .try_seek(offset)
            .map_err(|e| CryptoError::CipherFailure(e.to_string()))?;
        cipher
            .try_apply_keystream(body)
            .map_err(|e| CryptoError::CipherFailure(e.to_string()))?;
        dir.count += body.len() as u64;
        Ok(())
    }
}

/// AES-128 in counter mode with a 16-byte big-endian counter block.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Aes128Stream {
    key: [u8; 16],
    enc_nonce: [u8; 16],
    dec_nonce: [u8; 16],
}

impl Aes128Stream {
    /// Slice key `[0..16]`, receive nonce `[16..32]`, send nonce `[32..48]`.
    pub fn from_secret(secret: &[u8; SECRET_SIZE]) -> Self {
        let mut key = [0u8; 16];
        let mut dec_nonce = [0u8; 16];
        let mut enc_nonce = [0u8; 16];
        key.copy_from_slice(&secret[..16]);
        dec_nonce.copy_from_slice(&secret[16..32]);
        enc_nonce.copy_from_slice(&secret[32..48]);
        Self {
            key,
            enc_nonce,
            dec_nonce,
        }
    }

    /// Encrypt in place, then advance the send nonce.
    pub fn encrypt(&mut self, body: &mut [u8]) -> Result<(), CryptoError> {
        Self::apply(&self.key, &mut self.enc_nonce, body)
    }

    /// Decrypt in place, then advance the receive nonce.
    pub fn decrypt(&mut self, body: &mut [u8]) -> Result<(), CryptoError> {
        Self::apply(&self.key, &mut self.dec_nonce, body)
    }

    fn apply(key: &[u8; 16], nonce: &mut [u8; 16], body: &mut [u8]) -> Result<(), CryptoError> {
        if body.is_empty() {
            return Ok(());
        }
        let mut cipher = Aes128Ctr::new(key.into(), (&*nonce).into());
        cipher
            .try_apply_keystream(body)
            .map_err(|e| CryptoError::CipherFailure(e.to_string()))?;
        increment_le(nonce);
        Ok(())
    }
}

/// Little-endian increment of a nonce, wrapping at the top.
fn increment_le(nonce: &mut [u8]) {
    for byte in nonce.iter_mut() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            break;
        }
    }
}
