use bytes::BytesMut;
use secp256k1::{ecdh::SharedSecret, All, PublicKey, Secp256k1, SecretKey};
use tracing::trace;

use crate::{
    config::{EphemeralGenerator, Role},
    error::{Act, Error, Phase, Result},
    symm_state::SymmState,
    MAC_SIZE,
};

/// Compressed secp256k1 point.
pub(crate) const PUB_KEY_LEN: usize = 33;

/// One step of a Noise message pattern.
///
/// XK reads as:
/// X: static key for initiator **X**mitted to responder
/// K: static key for responder **K**nown to initiator
///
/// ```text
///   <- s
///   ...
///   -> e, es
///   <- e, ee
///   -> s, se
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Token {
    /// Send/receive a fresh ephemeral key in the clear.
    E,
    /// Send/receive a static key, encrypted under the current handshake key.
    S,
    Es,
    Ee,
    Se,
}

pub(crate) const ACT_ONE_PATTERN: &[Token] = &[Token::E, Token::Es];
pub(crate) const ACT_TWO_PATTERN: &[Token] = &[Token::E, Token::Ee];
pub(crate) const ACT_THREE_PATTERN: &[Token] = &[Token::S, Token::Se];

/// Symmetric state plus the DH key material. Dropped once the handshake is done; only its
/// chaining key survives, and only long enough to split into the transport ciphers.
pub(crate) struct HsState {
    pub(crate) symm_state: SymmState,
    initiator: bool,
    secp: Secp256k1<All>,
    local_static: SecretKey,
    local_ephemeral: Option<SecretKey>,
    remote_static: Option<PublicKey>,
    remote_ephemeral: Option<PublicKey>,
}

impl HsState {
    /// Mixes the prologue, then the responder's static key (the `<- s` pre-message). An
    /// initiator holding the wrong responder key only finds out when act one fails to open.
    pub(crate) fn start(proto_name: &[u8], prologue: &[u8], local_static: SecretKey, role: &Role) -> Self {
        let secp = Secp256k1::new();
        let mut symm_state = SymmState::init(proto_name);
        symm_state.mix_hash(prologue);

        let (initiator, remote_static) = match role {
            Role::Initiator { remote_static } => {
                symm_state.mix_hash(&remote_static.serialize());
                (true, Some(*remote_static))
            }
            Role::Responder => {
                let local_pub = PublicKey::from_secret_key(&secp, &local_static);
                symm_state.mix_hash(&local_pub.serialize());
                (false, None)
            }
        };

        Self {
            symm_state,
            initiator,
            secp,
            local_static,
            local_ephemeral: None,
            remote_static,
            remote_ephemeral: None,
        }
    }

    pub(crate) fn local_static_public(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, &self.local_static)
    }

    pub(crate) fn remote_static(&self) -> Option<PublicKey> {
        self.remote_static
    }

    /// Writes the tokens of `pattern` followed by the encrypted `payload`.
    pub(crate) fn write_message(
        &mut self,
        act: Act,
        pattern: &[Token],
        payload: &[u8],
        ephemeral_gen: &mut EphemeralGenerator,
        out: &mut BytesMut,
    ) -> Result<()> {
        for token in pattern {
            trace!(%act, ?token, "writing token");
            match token {
                Token::E => {
                    let secret = ephemeral_gen().map_err(Error::EphemeralKey)?;
                    self.write_e(secret, out);
                }
                Token::S => {
                    let local_pub = self.local_static_public().serialize();
                    self.symm_state.encrypt_and_hash(&local_pub, out);
                }
                dh => self.mix_dh(*dh)?,
            }
        }
        self.symm_state.encrypt_and_hash(payload, out);
        Ok(())
    }

    /// Reads the tokens of `pattern` from `message`; whatever follows is the encrypted payload,
    /// which is opened into `payload`.
    pub(crate) fn read_message(
        &mut self,
        act: Act,
        pattern: &[Token],
        message: &[u8],
        payload: &mut BytesMut,
    ) -> Result<()> {
        let mut rest = message;
        for token in pattern {
            trace!(%act, ?token, "reading token");
            match token {
                Token::E => {
                    let field = take(&mut rest, PUB_KEY_LEN, act)?;
                    self.read_e(field, act)?;
                }
                Token::S => {
                    let field = take(&mut rest, PUB_KEY_LEN + MAC_SIZE, act)?;
                    let mut key = BytesMut::with_capacity(PUB_KEY_LEN);
                    self.symm_state
                        .decrypt_and_hash(field, &mut key)
                        .map_err(|_| Error::Authentication { phase: Phase::Act(act) })?;
                    let remote_static = PublicKey::from_slice(&key)
                        .map_err(|source| Error::InvalidPublicKey { act, source })?;
                    self.remote_static = Some(remote_static);
                }
                dh => self.mix_dh(*dh)?,
            }
        }
        self.symm_state
            .decrypt_and_hash(rest, payload)
            .map_err(|_| Error::Authentication { phase: Phase::Act(act) })
    }

    fn write_e(&mut self, secret: SecretKey, buff: &mut BytesMut) {
        let my_pub = PublicKey::from_secret_key(&self.secp, &secret).serialize();
        self.symm_state.mix_hash(&my_pub);
        buff.extend_from_slice(&my_pub);
        self.local_ephemeral = Some(secret);
    }

    fn read_e(&mut self, field: &[u8], act: Act) -> Result<()> {
        let re = PublicKey::from_slice(field).map_err(|source| Error::InvalidPublicKey { act, source })?;
        self.symm_state.mix_hash(&re.serialize());
        self.remote_ephemeral = Some(re);
        Ok(())
    }

    /// Which of our keys meets which of theirs depends on the side we're on.
    fn mix_dh(&mut self, token: Token) -> Result<()> {
        let (local, remote) = match (token, self.initiator) {
            (Token::Es, true) => (self.local_ephemeral.as_ref(), self.remote_static.as_ref()),
            (Token::Es, false) => (Some(&self.local_static), self.remote_ephemeral.as_ref()),
            (Token::Se, true) => (Some(&self.local_static), self.remote_ephemeral.as_ref()),
            (Token::Se, false) => (self.local_ephemeral.as_ref(), self.remote_static.as_ref()),
            (Token::Ee, _) => (self.local_ephemeral.as_ref(), self.remote_ephemeral.as_ref()),
            (Token::E | Token::S, _) => return Ok(()),
        };
        let local = local.ok_or(Error::MissingKey { key: "local" })?;
        let remote = remote.ok_or(Error::MissingKey { key: "remote" })?;

        let shared = ecdh(remote, local);
        self.symm_state.mix_key(&shared);
        Ok(())
    }
}

impl Drop for HsState {
    fn drop(&mut self) {
        self.local_static.non_secure_erase();
        if let Some(mut ephemeral) = self.local_ephemeral.take() {
            ephemeral.non_secure_erase();
        }
    }
}

/// SHA-256 of the compressed shared point.
pub(crate) fn ecdh(remote: &PublicKey, local: &SecretKey) -> [u8; 32] {
    SharedSecret::new(remote, local).secret_bytes()
}

fn take<'a>(rest: &mut &'a [u8], len: usize, act: Act) -> Result<&'a [u8]> {
    if rest.len() < len {
        return Err(Error::Authentication { phase: Phase::Act(act) });
    }
    let (field, tail) = rest.split_at(len);
    *rest = tail;
    Ok(field)
}
