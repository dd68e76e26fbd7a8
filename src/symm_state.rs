use bytes::BytesMut;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher_state::{AuthenticationFailed, CipherState, KEY_LEN};

pub(crate) const HASH_LEN: usize = 32;

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SymmState {
    #[zeroize(skip)]
    cipher_state: CipherState,
    /// Salt for every `mix_key`; absorbs each DH output in turn.
    chaining_key: [u8; HASH_LEN],
    /// Second half of the latest `mix_key`, the key behind `cipher_state` until the next DH.
    temp_key: [u8; KEY_LEN],
    /// h: hash of every handshake byte so far, used as the AD of every handshake AEAD op.
    handshake_digest: [u8; HASH_LEN],
}

impl SymmState {
    /// h = SHA-256(protocol name), ck = h, k = zeroes.
    pub(crate) fn init(proto_name: &[u8]) -> Self {
        let handshake_digest: [u8; HASH_LEN] = Sha256::digest(proto_name).into();
        Self {
            cipher_state: CipherState::init([0; KEY_LEN]),
            chaining_key: handshake_digest,
            temp_key: [0; KEY_LEN],
            handshake_digest,
        }
    }

    /// hkdf(ck, input) -> (ck, k), then the cipher restarts under k at nonce 0.
    pub(crate) fn mix_key(&mut self, input: &[u8]) {
        let (chaining_key, temp_key) = hkdf2(&self.chaining_key, input);
        self.chaining_key = chaining_key;
        self.temp_key = temp_key;
        self.cipher_state.reset_key(self.temp_key);
    }

    pub(crate) fn mix_hash(&mut self, data: &[u8]) {
        self.handshake_digest = Sha256::new()
            .chain_update(self.handshake_digest)
            .chain_update(data)
            .finalize()
            .into();
    }

    /// Appends `ciphertext || tag` to `out` and hashes exactly those bytes into h.
    pub(crate) fn encrypt_and_hash(&mut self, plain_text: &[u8], out: &mut BytesMut) {
        let start = out.len();
        self.cipher_state
            .encrypt(&self.handshake_digest, out, plain_text);
        self.mix_hash(&out[start..]);
    }

    /// h only moves forward once the tag has verified.
    pub(crate) fn decrypt_and_hash(
        &mut self,
        cipher_text: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), AuthenticationFailed> {
        self.cipher_state
            .decrypt(&self.handshake_digest, out, cipher_text)?;
        self.mix_hash(cipher_text);
        Ok(())
    }

    pub(crate) fn chaining_key(&self) -> &[u8; HASH_LEN] {
        &self.chaining_key
    }

    #[cfg(test)]
    pub(crate) fn handshake_digest(&self) -> &[u8; HASH_LEN] {
        &self.handshake_digest
    }
}

/// HKDF-SHA256 with empty info, 64 bytes of output split into two 32-byte halves.
pub(crate) fn hkdf2(salt: &[u8], input: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), input);
    let mut okm = [0; 64];
    let Ok(()) = hk.expand(&[], &mut okm) else {
        unreachable!("64 bytes is well inside the HKDF-SHA256 output limit");
    };

    let mut first = [0; 32];
    let mut second = [0; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    okm.zeroize();
    (first, second)
}
