//! Error types for the handshake and the record layer.
//!
//! Nothing here is recoverable in place. The only sound reaction to any of these errors is to
//! drop the [`Machine`](crate::Machine) and, if wanted, start over with a fresh handshake.

use std::fmt;

use thiserror::Error;

use crate::{machine::HandshakeStage, HANDSHAKE_VERSION, MAX_MESSAGE_LENGTH};

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One of the three handshake messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Act {
    /// Initiator to responder: `e, es`.
    One,
    /// Responder to initiator: `e, ee`.
    Two,
    /// Initiator to responder: `s, se`.
    Three,
}

impl fmt::Display for Act {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Act::One => write!(f, "act one"),
            Act::Two => write!(f, "act two"),
            Act::Three => write!(f, "act three"),
        }
    }
}

/// Where an AEAD tag failed to verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// A handshake act.
    Act(Act),
    /// The encrypted 2-byte length prefix of a transport record.
    RecordLength,
    /// The encrypted body of a transport record.
    RecordBody,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Act(act) => write!(f, "{act}"),
            Phase::RecordLength => write!(f, "record length"),
            Phase::RecordBody => write!(f, "record body"),
        }
    }
}

/// Broad classes of failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or misuse, caught before any cryptography ran.
    Format,
    /// An AEAD tag did not verify, or a clear key field did not decode: wrong keys, tampering,
    /// or a transcript desync.
    Authentication,
    /// The underlying byte stream failed.
    Transport,
}

/// Errors from the handshake and the record layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The act did not start with the only known handshake version.
    #[error("{act}: invalid handshake version: {version}, only {} is valid", HANDSHAKE_VERSION)]
    InvalidVersion {
        /// Act that carried the bad byte
        act: Act,
        /// Version byte received
        version: u8,
    },

    /// A public key field did not decode to a point on secp256k1.
    ///
    /// The ephemeral keys travel in the clear, so a flipped bit can land here instead of at
    /// the tag. [`Error::kind`] reports it as an authentication failure.
    #[error("{act}: invalid public key: {source}")]
    InvalidPublicKey {
        /// Act that carried the key
        act: Act,
        /// Parse failure
        source: secp256k1::Error,
    },

    /// Payload too large for the 16-bit length prefix.
    #[error("payload of {len} bytes exceeds the max allowed message length of {}", MAX_MESSAGE_LENGTH)]
    MaxMessageLengthExceeded {
        /// Requested payload length
        len: usize,
    },

    /// Tag verification failed.
    #[error("{phase}: authentication failed")]
    Authentication {
        /// What was being opened
        phase: Phase,
    },

    /// An operation was driven from the wrong role or out of order.
    #[error("{operation} is not valid in handshake stage {stage}")]
    WrongState {
        /// Rejected operation
        operation: &'static str,
        /// Stage the machine was in
        stage: HandshakeStage,
    },

    /// A DH token ran before the key it needs was known.
    #[error("{key} key not available for DH")]
    MissingKey {
        /// Which side's key was missing
        key: &'static str,
    },

    /// The ephemeral key generator failed.
    #[error("ephemeral key generation failed: {0}")]
    EphemeralKey(#[source] secp256k1::Error),

    /// The byte stream failed; propagated unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classifies the error.
    ///
    /// A key field that fails to decode counts as an authentication failure: on a link with
    /// honest peers it only happens when the act was altered in flight.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVersion { .. }
            | Self::MaxMessageLengthExceeded { .. }
            | Self::WrongState { .. }
            | Self::MissingKey { .. }
            | Self::EphemeralKey(_) => ErrorKind::Format,
            Self::Authentication { .. } | Self::InvalidPublicKey { .. } => ErrorKind::Authentication,
            Self::Io(_) => ErrorKind::Transport,
        }
    }

    /// Every error is fatal to the connection attempt it came from. Retrying an identical
    /// exchange fails identically; the caller must start a fresh handshake.
    pub fn is_fatal(&self) -> bool {
        true
    }
}
