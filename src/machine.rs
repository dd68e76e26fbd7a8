//! The three-act handshake and the transport session it produces.
//!
//! The acts proceed in the following order (initiator on the left):
//!
//! ```text
//!  gen_act_one()   ->
//!                      recv_act_one()
//!                  <-  gen_act_two()
//!  recv_act_two()
//!  gen_act_three() ->
//!                      recv_act_three()
//! ```
//!
//! After act three both sides split the final chaining key into a sending and a receiving
//! cipher. From then on the machine is a record codec, see [`crate::record`].

use std::{
    fmt,
    io::{Read, Write},
};

use bytes::{BufMut, Bytes, BytesMut};
use secp256k1::PublicKey;
use tracing::{debug, trace, warn};

use crate::{
    buffer_pool::ReadBufferPool,
    cipher_state::CipherState,
    config::{EphemeralGenerator, MachineConfig, Role},
    error::{Act, Error, Result},
    hs_state::{HsState, Token, ACT_ONE_PATTERN, ACT_THREE_PATTERN, ACT_TWO_PATTERN},
    record::{MessageReader, MessageWriter},
    symm_state::hkdf2,
    ACT_ONE_SIZE, ACT_THREE_SIZE, ACT_TWO_SIZE, HANDSHAKE_VERSION, PROLOGUE, PROTOCOL_NAME,
};

/// Where a [`Machine`] is in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Nothing sent or received yet.
    Created,
    /// Act one sent (initiator) or accepted (responder).
    AfterActOne,
    /// Act two sent (responder) or accepted (initiator).
    AfterActTwo,
    /// Act three done and the transport ciphers split.
    Complete,
    /// An act failed; the machine must be discarded.
    Failed,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStage::Created => "created",
            HandshakeStage::AfterActOne => "after act one",
            HandshakeStage::AfterActTwo => "after act two",
            HandshakeStage::Complete => "complete",
            HandshakeStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Noise_XK over secp256k1, ChaCha20-Poly1305 and SHA-256, followed by length-prefixed
/// transport records.
///
/// Not meant to be shared between threads while running. Once the handshake is complete,
/// [`into_split`](Self::into_split) hands each direction to its own owner.
pub struct Machine {
    initiator: bool,
    stage: HandshakeStage,
    /// Only present while the handshake runs.
    handshake: Option<HsState>,
    ephemeral_gen: EphemeralGenerator,
    local_static: PublicKey,
    remote_static: Option<PublicKey>,
    reader: Option<MessageReader>,
    writer: Option<MessageWriter>,
    pool: ReadBufferPool,
}

impl Machine {
    /// Starts a handshake with the protocol name and prologue mixed in.
    pub fn new(config: MachineConfig) -> Self {
        let MachineConfig {
            local_static,
            role,
            ephemeral_gen,
            read_buffer_pool,
        } = config;

        let handshake = HsState::start(PROTOCOL_NAME, PROLOGUE, local_static, &role);
        Self {
            initiator: matches!(role, Role::Initiator { .. }),
            stage: HandshakeStage::Created,
            local_static: handshake.local_static_public(),
            remote_static: handshake.remote_static(),
            handshake: Some(handshake),
            ephemeral_gen,
            reader: None,
            writer: None,
            pool: read_buffer_pool,
        }
    }

    /// Whether we dialed.
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Current handshake stage.
    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    /// Our long-term public key.
    pub fn local_static_public(&self) -> PublicKey {
        self.local_static
    }

    /// The peer's long-term key. Known from the start on the initiator, and on the responder
    /// only once act three has authenticated it.
    pub fn remote_static(&self) -> Option<PublicKey> {
        self.remote_static
    }

    /// `-> e, es`
    ///
    /// The initiator generates a fresh ephemeral key, hashes it into the handshake digest and
    /// runs ECDH between it and the responder's static key.
    pub fn gen_act_one(&mut self) -> Result<[u8; ACT_ONE_SIZE]> {
        self.expect("gen_act_one", true, HandshakeStage::Created)?;
        let act = self.write_act::<ACT_ONE_SIZE>(Act::One, ACT_ONE_PATTERN);
        self.conclude(Act::One, HandshakeStage::AfterActOne, act)
    }

    /// Mirror of [`gen_act_one`](Self::gen_act_one) on the responder. Fails if the initiator
    /// does not actually know our static key.
    pub fn recv_act_one(&mut self, act_one: &[u8; ACT_ONE_SIZE]) -> Result<()> {
        self.expect("recv_act_one", false, HandshakeStage::Created)?;
        let res = self.read_act(Act::One, ACT_ONE_PATTERN, act_one);
        self.conclude(Act::One, HandshakeStage::AfterActOne, res)
    }

    /// `<- e, ee`
    pub fn gen_act_two(&mut self) -> Result<[u8; ACT_TWO_SIZE]> {
        self.expect("gen_act_two", false, HandshakeStage::AfterActOne)?;
        let act = self.write_act::<ACT_TWO_SIZE>(Act::Two, ACT_TWO_PATTERN);
        self.conclude(Act::Two, HandshakeStage::AfterActTwo, act)
    }

    /// Accepting act two authenticates the responder to the initiator.
    pub fn recv_act_two(&mut self, act_two: &[u8; ACT_TWO_SIZE]) -> Result<()> {
        self.expect("recv_act_two", true, HandshakeStage::AfterActOne)?;
        let res = self.read_act(Act::Two, ACT_TWO_PATTERN, act_two);
        self.conclude(Act::Two, HandshakeStage::AfterActTwo, res)
    }

    /// `-> s, se`
    ///
    /// Sends our static key under forward-secret encryption, runs the last ECDH and splits the
    /// transport keys.
    pub fn gen_act_three(&mut self) -> Result<[u8; ACT_THREE_SIZE]> {
        self.expect("gen_act_three", true, HandshakeStage::AfterActTwo)?;
        let act = self.write_act::<ACT_THREE_SIZE>(Act::Three, ACT_THREE_PATTERN);
        let act = self.conclude(Act::Three, HandshakeStage::Complete, act)?;
        self.split();
        Ok(act)
    }

    /// Learns and authenticates the initiator's static key, then splits the transport keys.
    pub fn recv_act_three(&mut self, act_three: &[u8; ACT_THREE_SIZE]) -> Result<()> {
        self.expect("recv_act_three", false, HandshakeStage::AfterActTwo)?;
        let res = self.read_act(Act::Three, ACT_THREE_PATTERN, act_three);
        self.conclude(Act::Three, HandshakeStage::Complete, res)?;
        self.split();
        Ok(())
    }

    /// Runs the initiator's side of the handshake over `stream`.
    ///
    /// Bounding how long each read may block is up to the caller (see [`crate::conn`]).
    pub fn initiate_handshake<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        let res = self.drive_initiator(stream);
        self.fail_on_err(res)
    }

    /// Runs the responder's side of the handshake over `stream`.
    pub fn respond_handshake<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        let res = self.drive_responder(stream);
        self.fail_on_err(res)
    }

    fn drive_initiator<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        let act_one = self.gen_act_one()?;
        stream.write_all(&act_one)?;
        stream.flush()?;

        let mut act_two = [0; ACT_TWO_SIZE];
        stream.read_exact(&mut act_two)?;
        self.recv_act_two(&act_two)?;

        let act_three = self.gen_act_three()?;
        stream.write_all(&act_three)?;
        stream.flush()?;
        Ok(())
    }

    fn drive_responder<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        let mut act_one = [0; ACT_ONE_SIZE];
        stream.read_exact(&mut act_one)?;
        self.recv_act_one(&act_one)?;

        let act_two = self.gen_act_two()?;
        stream.write_all(&act_two)?;
        stream.flush()?;

        let mut act_three = [0; ACT_THREE_SIZE];
        stream.read_exact(&mut act_three)?;
        self.recv_act_three(&act_three)
    }

    /// Seals `payload` as one record and writes it to `w`.
    pub fn write_message<W: Write>(&mut self, w: &mut W, payload: &[u8]) -> Result<()> {
        let stage = self.stage;
        self.writer
            .as_mut()
            .ok_or(Error::WrongState { operation: "write_message", stage })?
            .write_message(w, payload)
    }

    /// Seals `payload` as one record appended to `out`.
    pub fn encode_message(&mut self, payload: &[u8], out: &mut BytesMut) -> Result<()> {
        let stage = self.stage;
        self.writer
            .as_mut()
            .ok_or(Error::WrongState { operation: "encode_message", stage })?
            .encode_message(payload, out)
    }

    /// Reads and opens the next record from `r`.
    pub fn read_message<R: Read>(&mut self, r: &mut R) -> Result<Bytes> {
        let stage = self.stage;
        self.reader
            .as_mut()
            .ok_or(Error::WrongState { operation: "read_message", stage })?
            .read_message(r)
    }

    /// Separates the two directions so a read loop and a write loop can each own one.
    pub fn into_split(self) -> Result<(MessageReader, MessageWriter)> {
        match (self.reader, self.writer) {
            (Some(reader), Some(writer)) => Ok((reader, writer)),
            _ => Err(Error::WrongState { operation: "into_split", stage: self.stage }),
        }
    }

    /// Returns the read buffer to the pool and drops all key material.
    pub fn close(self) {
        if let Some(reader) = self.reader {
            reader.close();
        }
    }

    fn expect(&self, operation: &'static str, initiator: bool, stage: HandshakeStage) -> Result<()> {
        if self.initiator != initiator || self.stage != stage {
            return Err(Error::WrongState { operation, stage: self.stage });
        }
        Ok(())
    }

    fn write_act<const N: usize>(&mut self, act: Act, pattern: &[Token]) -> Result<[u8; N]> {
        let hs = self
            .handshake
            .as_mut()
            .ok_or(Error::WrongState { operation: "write act", stage: self.stage })?;

        let mut out = BytesMut::with_capacity(N);
        out.put_u8(HANDSHAKE_VERSION);
        hs.write_message(act, pattern, &[], &mut self.ephemeral_gen, &mut out)?;

        let mut packet = [0; N];
        packet.copy_from_slice(&out);
        trace!(%act, "generated act");
        Ok(packet)
    }

    /// The version byte is checked before any cryptography runs.
    fn read_act(&mut self, act: Act, pattern: &[Token], packet: &[u8]) -> Result<()> {
        if packet[0] != HANDSHAKE_VERSION {
            return Err(Error::InvalidVersion { act, version: packet[0] });
        }
        let hs = self
            .handshake
            .as_mut()
            .ok_or(Error::WrongState { operation: "read act", stage: self.stage })?;

        let mut payload = BytesMut::new();
        hs.read_message(act, pattern, &packet[1..], &mut payload)?;
        trace!(%act, "accepted act");
        Ok(())
    }

    fn conclude<T>(&mut self, act: Act, next: HandshakeStage, res: Result<T>) -> Result<T> {
        match res {
            Ok(value) => {
                self.stage = next;
                Ok(value)
            }
            Err(err) => {
                warn!(%act, initiator = self.initiator, %err, "handshake aborted");
                self.abort();
                Err(err)
            }
        }
    }

    fn fail_on_err(&mut self, res: Result<()>) -> Result<()> {
        if res.is_err() && self.stage != HandshakeStage::Failed {
            self.abort();
        }
        res
    }

    fn abort(&mut self) {
        self.stage = HandshakeStage::Failed;
        self.handshake = None;
        self.reader = None;
        self.writer = None;
    }

    /// Derives the two transport keys from the final chaining key. The initiator sends with
    /// the first and receives with the second; the responder the other way round. Both keep the
    /// chaining key as their rotation salt.
    fn split(&mut self) {
        let Some(hs) = self.handshake.take() else {
            return;
        };
        let chaining_key = *hs.symm_state.chaining_key();
        self.remote_static = hs.remote_static();
        drop(hs);

        let (first, second) = hkdf2(&chaining_key, &[]);
        let (send_key, recv_key) = if self.initiator {
            (first, second)
        } else {
            (second, first)
        };

        self.writer = Some(MessageWriter::new(CipherState::init_with_salt(chaining_key, send_key)));
        self.reader = Some(MessageReader::new(
            CipherState::init_with_salt(chaining_key, recv_key),
            self.pool.clone(),
        ));

        debug!(initiator = self.initiator, remote_static = ?self.remote_static, "handshake complete");
    }

    #[cfg(test)]
    pub(crate) fn transport_keys(&self) -> Option<([u8; 32], [u8; 32])> {
        let (reader, writer) = (self.reader.as_ref()?, self.writer.as_ref()?);
        Some((*writer.cipher().key(), *reader.cipher().key()))
    }
}
