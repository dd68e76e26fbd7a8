//! Authenticated, encrypted point-to-point transport for payment-channel peers.
//!
//! A Noise_XK handshake over secp256k1, followed by a record layer. The initiator must know the
//! responder's long-term key in advance; the responder learns and authenticates the
//! initiator's key in the third act.
//!
//! ```text
//!   <- s
//!   ...
//!   -> e, es
//!   <- e, ee
//!   -> s, se
//! ```
//!
//! Once the three acts are done, each direction gets its own ChaCha20-Poly1305 state whose key
//! is ratcheted forward every [`KEY_ROTATION_INTERVAL`] operations. Every record carries its
//! length in a separately sealed 2-byte prefix.

use std::time::Duration;

/// Reusable read buffers, handed out lazily after the handshake.
pub mod buffer_pool;
/// One each during handshake. During transport, each direction has its own.
mod cipher_state;
pub mod config;
pub mod conn;
pub mod error;
/// Contains a symmetric state, plus the diffie-hellman keys.
/// Deleted once handshake is complete.
mod hs_state;
pub mod machine;
mod nonce;
pub mod record;
/// Cipher state plus the chaining key and handshake digest.
/// Deleted once handshake is complete.
mod symm_state;

pub use buffer_pool::{ReadBuffer, ReadBufferPool};
pub use config::{fixed_ephemeral, random_ephemeral, EphemeralGenerator, MachineConfig, Role};
pub use conn::SecureStream;
pub use error::{Act, Error, ErrorKind, Phase, Result};
pub use machine::{HandshakeStage, Machine};
pub use record::{MessageReader, MessageWriter};

/// The exact Noise instantiation. Peers that disagree on it fail the handshake.
pub const PROTOCOL_NAME: &[u8] = b"Noise_XK_secp256k1_ChaChaPoly_SHA256";

/// Application-domain prologue mixed into the handshake digest.
pub const PROLOGUE: &[u8] = b"lightning";

/// The only handshake version. Acts carrying anything else are rejected outright.
pub const HANDSHAKE_VERSION: u8 = 0;

/// Version byte, compressed ephemeral key, tag.
pub const ACT_ONE_SIZE: usize = 1 + 33 + 16;

/// Same layout as act one.
pub const ACT_TWO_SIZE: usize = 1 + 33 + 16;

/// Version byte, encrypted static key with its tag, tag over the empty payload.
pub const ACT_THREE_SIZE: usize = 1 + 33 + 16 + 16;

/// Poly1305 tag length.
pub const MAC_SIZE: usize = 16;

/// Length prefix of a transport record.
pub const LENGTH_HEADER_SIZE: usize = 2;

/// Largest payload a single record can carry.
pub const MAX_MESSAGE_LENGTH: usize = u16::MAX as usize;

/// Encryptions (or decryptions) under one key before it is ratcheted.
pub const KEY_ROTATION_INTERVAL: u64 = 1000;

/// Upper bound on each act read in [`conn`].
pub const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(5);
