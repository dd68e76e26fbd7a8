//! Transport records.
//!
//! On the wire a record is
//!
//! ```text
//! [2-byte BE length][16-byte tag][length bytes of ciphertext][16-byte tag]
//! ```
//!
//! The length and the body are sealed as two independent AEAD operations with empty associated
//! data. The reader opens the 18-byte header first, which tells it exactly how many more bytes
//! belong to this record.

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::{
    buffer_pool::{ReadBuffer, ReadBufferPool},
    cipher_state::CipherState,
    error::{Error, Phase, Result},
    LENGTH_HEADER_SIZE, MAC_SIZE,
};

/// Size of the sealed length prefix.
pub const HEADER_SIZE: usize = LENGTH_HEADER_SIZE + MAC_SIZE;

/// Sending half of a transport session.
pub struct MessageWriter {
    cipher: CipherState,
}

impl MessageWriter {
    pub(crate) fn new(cipher: CipherState) -> Self {
        Self { cipher }
    }

    #[cfg(test)]
    pub(crate) fn cipher(&self) -> &CipherState {
        &self.cipher
    }

    /// Seals `payload` into a record appended to `out`.
    ///
    /// Payloads over [`MAX_MESSAGE_LENGTH`](crate::MAX_MESSAGE_LENGTH) are rejected before
    /// anything is encrypted.
    pub fn encode_message(&mut self, payload: &[u8], out: &mut BytesMut) -> Result<()> {
        let Ok(len) = u16::try_from(payload.len()) else {
            return Err(Error::MaxMessageLengthExceeded { len: payload.len() });
        };

        out.reserve(HEADER_SIZE + payload.len() + MAC_SIZE);
        self.cipher.encrypt(&[], out, &len.to_be_bytes());
        self.cipher.encrypt(&[], out, payload);
        Ok(())
    }

    /// Seals `payload` and writes the whole record to `w`. Fragmenting anything larger than
    /// [`MAX_MESSAGE_LENGTH`](crate::MAX_MESSAGE_LENGTH) is the caller's job.
    pub fn write_message<W: Write>(&mut self, w: &mut W, payload: &[u8]) -> Result<()> {
        let mut record = BytesMut::new();
        self.encode_message(payload, &mut record)?;
        w.write_all(&record)?;
        trace!(len = payload.len(), "wrote record");
        Ok(())
    }
}

/// Receiving half of a transport session.
///
/// Holds a pooled buffer from its first read until [`close`](Self::close) or drop.
pub struct MessageReader {
    cipher: CipherState,
    next_header: [u8; HEADER_SIZE],
    next_cipher_text: Option<ReadBuffer>,
    pool: ReadBufferPool,
}

impl MessageReader {
    pub(crate) fn new(cipher: CipherState, pool: ReadBufferPool) -> Self {
        Self {
            cipher,
            next_header: [0; HEADER_SIZE],
            next_cipher_text: None,
            pool,
        }
    }

    /// Reads and opens the next record from `r`.
    ///
    /// Any tag failure is fatal: the stream position can no longer be trusted.
    pub fn read_message<R: Read>(&mut self, r: &mut R) -> Result<Bytes> {
        r.read_exact(&mut self.next_header)?;

        let mut len_bytes = BytesMut::with_capacity(LENGTH_HEADER_SIZE);
        self.cipher
            .decrypt(&[], &mut len_bytes, &self.next_header)
            .map_err(|_| Error::Authentication { phase: Phase::RecordLength })?;
        let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));

        // Taken here rather than at construction so that peers which never finish a
        // handshake never hold one.
        let pool = &self.pool;
        let buffer = self.next_cipher_text.get_or_insert_with(|| pool.take());

        let cipher_text = &mut buffer[..len + MAC_SIZE];
        r.read_exact(cipher_text)?;

        let mut payload = BytesMut::with_capacity(len);
        self.cipher
            .decrypt(&[], &mut payload, cipher_text)
            .map_err(|_| Error::Authentication { phase: Phase::RecordBody })?;
        trace!(len, "read record");
        Ok(payload.freeze())
    }

    #[cfg(test)]
    pub(crate) fn cipher(&self) -> &CipherState {
        &self.cipher
    }

    /// Whether this reader currently holds a pooled buffer.
    pub fn holds_buffer(&self) -> bool {
        self.next_cipher_text.is_some()
    }

    /// Gives the read buffer back to the pool.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(buffer) = self.next_cipher_text.take() {
            self.pool.give_back(buffer);
        }
    }
}

impl Drop for MessageReader {
    fn drop(&mut self) {
        self.release();
    }
}
