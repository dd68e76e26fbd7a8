//! Construction parameters for a [`Machine`](crate::Machine).
use secp256k1::{rand, PublicKey, SecretKey};

use crate::buffer_pool::ReadBufferPool;

/// Source of per-handshake ephemeral keys.
pub type EphemeralGenerator = Box<dyn FnMut() -> Result<SecretKey, secp256k1::Error> + Send>;

/// Fresh keys from the thread-local CSPRNG. The default.
pub fn random_ephemeral() -> EphemeralGenerator {
    Box::new(|| Ok(SecretKey::new(&mut rand::thread_rng())))
}

/// Always hands out `key`. For reproducible transcripts in tests; never use it on a real link.
pub fn fixed_ephemeral(key: SecretKey) -> EphemeralGenerator {
    Box::new(move || Ok(key))
}

/// Which side of the handshake we run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// We dial, and already know who we're dialing.
    Initiator {
        /// The responder's long-term key, learned out of band.
        remote_static: PublicKey,
    },
    /// We accept, and learn the initiator's key in act three.
    Responder,
}

/// Everything a [`Machine`](crate::Machine) needs.
pub struct MachineConfig {
    /// Our long-term identity key.
    pub local_static: SecretKey,
    /// Initiator or responder.
    pub role: Role,
    /// Where ephemeral keys for act one / act two come from.
    pub ephemeral_gen: EphemeralGenerator,
    /// Pool the transport reader takes its buffer from.
    pub read_buffer_pool: ReadBufferPool,
}

impl MachineConfig {
    /// Config for dialing the peer whose static key is `remote_static`.
    pub fn initiator(local_static: SecretKey, remote_static: PublicKey) -> Self {
        Self::new(local_static, Role::Initiator { remote_static })
    }

    /// Config for answering an inbound handshake.
    pub fn responder(local_static: SecretKey) -> Self {
        Self::new(local_static, Role::Responder)
    }

    fn new(local_static: SecretKey, role: Role) -> Self {
        Self {
            local_static,
            role,
            ephemeral_gen: random_ephemeral(),
            read_buffer_pool: ReadBufferPool::new(),
        }
    }

    /// Replaces the ephemeral key source.
    pub fn with_ephemeral_generator(mut self, ephemeral_gen: EphemeralGenerator) -> Self {
        self.ephemeral_gen = ephemeral_gen;
        self
    }

    /// Shares `pool` with other machines instead of using a private one.
    pub fn with_read_buffer_pool(mut self, pool: ReadBufferPool) -> Self {
        self.read_buffer_pool = pool;
        self
    }
}
