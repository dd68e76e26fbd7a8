//! ChaCha20-Poly1305 with a forward ratchet every [`KEY_ROTATION_INTERVAL`] operations.
use bytes::BytesMut;
use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, Key, KeyInit, Tag};
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{nonce::Nonce, symm_state::hkdf2, MAC_SIZE};

pub(crate) const KEY_LEN: usize = 32;

/// The tag did not verify under the current key, nonce and associated data.
///
/// A failed open leaves the cipher state exactly as it was.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("AEAD tag verification failed")]
pub(crate) struct AuthenticationFailed;

#[derive(Zeroize, Eq, PartialEq)]
#[cfg_attr(test, derive(Debug))]
struct CipherKey([u8; KEY_LEN]);

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct CipherState {
    nonce: Nonce,
    key: CipherKey,
    /// Salt for the next rotation. Zero during the handshake, where rotation never triggers.
    salt: [u8; KEY_LEN],
    #[zeroize(skip)]
    aead: ChaCha20Poly1305,
}

impl CipherState {
    pub(crate) fn init(key: [u8; KEY_LEN]) -> Self {
        Self::init_with_salt([0; KEY_LEN], key)
    }

    /// Cipher state for a transport direction. The salt seeds every later key rotation.
    pub(crate) fn init_with_salt(salt: [u8; KEY_LEN], key: [u8; KEY_LEN]) -> Self {
        Self {
            nonce: Nonce::new(),
            aead: ChaCha20Poly1305::new(Key::from_slice(&key)),
            key: CipherKey(key),
            salt,
        }
    }

    /// Installs a new key and sets the nonce back to 0. The salt is kept.
    pub(crate) fn reset_key(&mut self, new_key: [u8; KEY_LEN]) {
        self.aead = ChaCha20Poly1305::new(Key::from_slice(&new_key));
        self.key = CipherKey(new_key);
        self.nonce = Nonce::new();
    }

    /// Seals `plain_text` and appends `ciphertext || tag` to `out`.
    pub(crate) fn encrypt(&mut self, associated_data: &[u8], out: &mut BytesMut, plain_text: &[u8]) {
        let start = out.len();
        out.extend_from_slice(plain_text);

        let nonce = self.nonce.chacha_bytes();
        let Ok(tag) =
            self.aead
                .encrypt_in_place_detached(&nonce.into(), associated_data, &mut out[start..])
        else {
            unreachable!("ChaCha20-Poly1305 sealing cannot fail below the 256 GiB message limit");
        };
        out.extend_from_slice(&tag);

        self.step();
    }

    /// Opens `cipher_text` (which ends in its tag) and appends the plaintext to `out`.
    ///
    /// On failure neither `out` nor the nonce is touched, so a rejected record cannot knock the
    /// two peers' rotation schedules out of step.
    pub(crate) fn decrypt(
        &mut self,
        associated_data: &[u8],
        out: &mut BytesMut,
        cipher_text: &[u8],
    ) -> Result<(), AuthenticationFailed> {
        if cipher_text.len() < MAC_SIZE {
            return Err(AuthenticationFailed);
        }
        let (text, tag) = cipher_text.split_at(cipher_text.len() - MAC_SIZE);

        let start = out.len();
        out.extend_from_slice(text);

        let nonce = self.nonce.chacha_bytes();
        let opened = self.aead.decrypt_in_place_detached(
            &nonce.into(),
            associated_data,
            &mut out[start..],
            Tag::from_slice(tag),
        );
        if opened.is_err() {
            out.truncate(start);
            return Err(AuthenticationFailed);
        }

        self.step();
        Ok(())
    }

    fn step(&mut self) {
        if self.nonce.advance() {
            self.rotate_key();
        }
    }

    /// hkdf(salt, k) -> (salt', k'), then nonce = 0.
    fn rotate_key(&mut self) {
        let (next_salt, next_key) = hkdf2(&self.salt, &self.key.0);
        self.salt = next_salt;
        self.reset_key(next_key);
        debug!("transport key rotated");
    }

    #[cfg(test)]
    pub(crate) fn key(&self) -> &[u8; KEY_LEN] {
        &self.key.0
    }

    #[cfg(test)]
    pub(crate) fn salt(&self) -> &[u8; KEY_LEN] {
        &self.salt
    }

    #[cfg(test)]
    pub(crate) fn nonce(&self) -> u64 {
        self.nonce.value()
    }
}
