//! Reusable read buffers for the record layer.
//!
//! Every transport reader needs one buffer large enough for the biggest possible record body.
//! The pool is an explicit object: whoever builds machines owns it and hands out clones. Buffers
//! are taken lazily on the first post-handshake read and given back on close or drop. Idle
//! buffers older than the pool's expiry are freed the next time the pool is touched; there is no
//! background sweeper.

use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::{MAC_SIZE, MAX_MESSAGE_LENGTH};

/// Largest ciphertext a single record body can take on the wire.
pub const READ_BUFFER_SIZE: usize = MAX_MESSAGE_LENGTH + MAC_SIZE;

/// How long an idle buffer is kept before being released.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(30);

/// A fixed-size buffer of [`READ_BUFFER_SIZE`] bytes.
///
/// Only ever holds record ciphertext, so it is not wiped between users.
pub struct ReadBuffer(Box<[u8]>);

impl ReadBuffer {
    fn new() -> Self {
        Self(vec![0; READ_BUFFER_SIZE].into_boxed_slice())
    }
}

impl Deref for ReadBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for ReadBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Shared pool of [`ReadBuffer`]s. Cloning shares the same idle list.
#[derive(Clone)]
pub struct ReadBufferPool {
    idle: Arc<Mutex<Vec<(Instant, ReadBuffer)>>>,
    expiry: Duration,
}

impl Default for ReadBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadBufferPool {
    /// Pool with [`DEFAULT_EXPIRY`].
    pub fn new() -> Self {
        Self::with_expiry(DEFAULT_EXPIRY)
    }

    /// Pool that releases buffers left idle for `expiry` or longer.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            idle: Arc::new(Mutex::new(Vec::new())),
            expiry,
        }
    }

    /// An idle buffer if there is one, otherwise a fresh allocation.
    pub fn take(&self) -> ReadBuffer {
        let mut idle = self.lock_pruned();
        match idle.pop() {
            Some((_, buffer)) => buffer,
            None => {
                trace!("allocating read buffer");
                ReadBuffer::new()
            }
        }
    }

    /// Returns a buffer to the idle list.
    pub fn give_back(&self, buffer: ReadBuffer) {
        let mut idle = self.lock_pruned();
        idle.push((Instant::now(), buffer));
    }

    /// Buffers currently idle, after dropping expired ones.
    pub fn idle_count(&self) -> usize {
        self.lock_pruned().len()
    }

    fn lock_pruned(&self) -> MutexGuard<'_, Vec<(Instant, ReadBuffer)>> {
        // the idle list is never left half-updated, so a poisoned lock is still usable
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let before = idle.len();
        idle.retain(|(since, _)| now.duration_since(*since) < self.expiry);
        if idle.len() != before {
            trace!(released = before - idle.len(), "released expired read buffers");
        }
        idle
    }
}
