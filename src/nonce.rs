//! Repeated use of a nonce under one key is catastrophic for ChaCha20-Poly1305.
//!
//! The counter only ever moves forward, and only after a successful seal or open. Cipher states
//! rotate their key when the counter reaches [`KEY_ROTATION_INTERVAL`], so it never gets close to
//! exhausting the 64-bit space.

use zeroize::Zeroize;

use crate::KEY_ROTATION_INTERVAL;

#[derive(Zeroize, Default)]
#[cfg_attr(test, derive(Debug, PartialEq, Eq))]
pub(crate) struct Nonce(u64);

impl Nonce {
    pub(crate) fn new() -> Self {
        Self(0)
    }

    /// The 96-bit nonce handed to the AEAD: four zero bytes, then the counter little-endian.
    pub(crate) fn chacha_bytes(&self) -> [u8; 12] {
        let mut nonce = [0; 12];
        nonce[4..].copy_from_slice(&self.0.to_le_bytes());
        nonce
    }

    /// Steps the counter. Returns true once the key that was paired with it has been used
    /// [`KEY_ROTATION_INTERVAL`] times and must be ratcheted.
    pub(crate) fn advance(&mut self) -> bool {
        self.0 += 1;
        self.0 == KEY_ROTATION_INTERVAL
    }

    #[cfg(test)]
    pub(crate) fn value(&self) -> u64 {
        self.0
    }
}
