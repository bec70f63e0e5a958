//! # Generic Timelock
//!
//! A pending-operation store for privileged changes that expand risk.
//! The pattern is always the same: **schedule → wait out the delay →
//! execute**, with a revocation path in between. Rather than re-implement
//! that per admin action, every timelocked change in the system (oracle
//! signer removal, vault cap increases) goes through this one store.
//!
//! Operations are keyed by a 32-byte digest of their canonical encoding,
//! so "increase cap for id X to 500" and "increase cap for id X to 600"
//! are distinct pending entries. Executing consumes the entry; scheduling
//! the same digest twice while pending is an error (no silent
//! delay-extension, no silent delay-reset).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::keccak256;

/// Errors from the pending-operation store.
#[derive(Debug, Error)]
pub enum TimelockError {
    /// The same operation digest is already scheduled.
    #[error("operation already pending, executable at {ready_at}")]
    AlreadyPending {
        /// When the existing entry becomes executable.
        ready_at: DateTime<Utc>,
    },

    /// Execute or revoke was called for a digest that was never scheduled
    /// (or was already consumed).
    #[error("operation is not pending")]
    NotPending,

    /// The delay has not elapsed yet.
    #[error("operation not ready: executable at {ready_at}, now {now}")]
    NotReady {
        ready_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

/// Computes an operation digest from the canonical parts of the change.
///
/// Callers concatenate a domain tag plus every parameter that makes the
/// operation unique. Two operations that differ in any parameter must get
/// different digests, or one could be executed under the other's clock.
pub fn operation_key(parts: &[&[u8]]) -> [u8; 32] {
    let mut buf = Vec::new();
    for part in parts {
        buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
        buf.extend_from_slice(part);
    }
    keccak256(&buf)
}

/// A store of pending privileged operations, each unlocking after a
/// fixed delay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timelock {
    delay_secs: i64,
    pending: HashMap<[u8; 32], DateTime<Utc>>,
}

impl Timelock {
    /// Creates a store with the given delay in seconds.
    pub fn new(delay_secs: i64) -> Self {
        Self {
            delay_secs,
            pending: HashMap::new(),
        }
    }

    /// The configured delay in seconds.
    pub fn delay_secs(&self) -> i64 {
        self.delay_secs
    }

    /// Schedules an operation. Returns the timestamp at which it becomes
    /// executable.
    pub fn schedule(
        &mut self,
        key: [u8; 32],
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TimelockError> {
        if let Some(ready_at) = self.pending.get(&key) {
            return Err(TimelockError::AlreadyPending {
                ready_at: *ready_at,
            });
        }
        let ready_at = now + Duration::seconds(self.delay_secs);
        self.pending.insert(key, ready_at);
        Ok(ready_at)
    }

    /// Returns the executable-at timestamp for a pending operation.
    pub fn pending_at(&self, key: &[u8; 32]) -> Option<DateTime<Utc>> {
        self.pending.get(key).copied()
    }

    /// Consumes a pending operation if its delay has elapsed.
    ///
    /// # Errors
    ///
    /// [`TimelockError::NotPending`] if the digest was never scheduled,
    /// [`TimelockError::NotReady`] if the delay has not passed. In the
    /// not-ready case the entry stays pending.
    pub fn consume(&mut self, key: &[u8; 32], now: DateTime<Utc>) -> Result<(), TimelockError> {
        let ready_at = *self.pending.get(key).ok_or(TimelockError::NotPending)?;
        if now < ready_at {
            return Err(TimelockError::NotReady { ready_at, now });
        }
        self.pending.remove(key);
        Ok(())
    }

    /// Revokes a pending operation before (or after) it matures.
    pub fn revoke(&mut self, key: &[u8; 32]) -> Result<(), TimelockError> {
        self.pending
            .remove(key)
            .map(|_| ())
            .ok_or(TimelockError::NotPending)
    }
}
