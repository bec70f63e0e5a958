//! # Allocation Caps
//!
//! Per-identifier ceilings checked after every allocation. Two ceilings
//! apply simultaneously: an absolute amount, and a fraction of the
//! vault's per-operation asset snapshot. An identifier with no cap
//! record, or an absolute cap of zero, may not receive allocation at
//! all — unset means forbidden, never unlimited.
//!
//! Cap changes are asymmetric: a decrease only restricts future
//! allocation and takes effect immediately; an increase widens risk and
//! must ride the shared two-phase timelock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::BPS_ONE;
use crate::timelock::{operation_key, Timelock, TimelockError};
use crate::types::AllocationId;

#[derive(Debug, Error)]
pub enum CapError {
    /// No cap record, or absolute cap zero.
    #[error("allocation to {0} is forbidden (no cap set)")]
    AllocationForbidden(AllocationId),

    #[error("allocation {allocation} to {id} exceeds absolute cap {cap}")]
    AboveAbsoluteCap {
        id: AllocationId,
        allocation: u64,
        cap: u64,
    },

    #[error("allocation {allocation} to {id} exceeds relative cap ({max} of snapshot)")]
    AboveRelativeCap {
        id: AllocationId,
        allocation: u64,
        max: u64,
    },

    /// Deallocation against an identifier with nothing allocated.
    #[error("nothing allocated to {0}")]
    NothingAllocated(AllocationId),

    /// Immediate-path change tried to widen a cap.
    #[error("cap change for {0} is not a decrease; schedule it instead")]
    NotADecrease(AllocationId),

    #[error(transparent)]
    Timelock(#[from] TimelockError),
}

/// Both ceilings for one identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapConfig {
    /// Hard ceiling in asset units. Zero forbids allocation outright.
    pub absolute: u64,
    /// Ceiling as bps of the vault's `first_total_assets` snapshot.
    pub relative_bps: u64,
}

#[derive(Debug)]
pub struct CapEnforcer {
    caps: HashMap<AllocationId, CapConfig>,
    increases: Timelock,
}

impl CapEnforcer {
    pub fn new(timelock_delay_secs: i64) -> Self {
        Self {
            caps: HashMap::new(),
            increases: Timelock::new(timelock_delay_secs),
        }
    }

    pub fn cap_of(&self, id: &AllocationId) -> Option<CapConfig> {
        self.caps.get(id).copied()
    }

    /// Validates one identifier's resulting allocation against both
    /// ceilings.
    pub fn check_allocation(
        &self,
        id: &AllocationId,
        allocation: u64,
        first_total_assets: u64,
    ) -> Result<(), CapError> {
        let cap = match self.caps.get(id) {
            Some(cap) if cap.absolute > 0 => cap,
            _ => return Err(CapError::AllocationForbidden(*id)),
        };
        if allocation > cap.absolute {
            return Err(CapError::AboveAbsoluteCap {
                id: *id,
                allocation,
                cap: cap.absolute,
            });
        }
        let max = (first_total_assets as u128 * cap.relative_bps as u128 / BPS_ONE as u128) as u64;
        if allocation > max {
            return Err(CapError::AboveRelativeCap {
                id: *id,
                allocation,
                max,
            });
        }
        Ok(())
    }

    /// The deallocate side only asks that something be allocated.
    pub fn check_deallocation(&self, id: &AllocationId, allocation: u64) -> Result<(), CapError> {
        if allocation == 0 {
            return Err(CapError::NothingAllocated(*id));
        }
        Ok(())
    }

    /// Immediate path: both ceilings must shrink (or stay). Widening in
    /// either dimension must go through the scheduled path.
    pub fn decrease_cap(&mut self, id: AllocationId, new: CapConfig) -> Result<(), CapError> {
        let current = self.caps.get(&id).copied().unwrap_or(CapConfig {
            absolute: 0,
            relative_bps: 0,
        });
        if new.absolute > current.absolute || new.relative_bps > current.relative_bps {
            return Err(CapError::NotADecrease(id));
        }
        info!(%id, absolute = new.absolute, relative_bps = new.relative_bps, "cap decreased");
        self.caps.insert(id, new);
        Ok(())
    }

    /// Schedules a cap increase. Effective after the timelock delay via
    /// [`execute_cap_increase`](Self::execute_cap_increase).
    pub fn submit_cap_increase(
        &mut self,
        id: AllocationId,
        new: CapConfig,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CapError> {
        let key = Self::increase_key(&id, &new);
        let ready_at = self.increases.schedule(key, now)?;
        info!(%id, absolute = new.absolute, relative_bps = new.relative_bps,
            %ready_at, "cap increase scheduled");
        Ok(ready_at)
    }

    /// When a scheduled increase becomes executable, if it is pending.
    pub fn pending_increase(&self, id: &AllocationId, new: &CapConfig) -> Option<DateTime<Utc>> {
        self.increases.pending_at(&Self::increase_key(id, new))
    }

    pub fn execute_cap_increase(
        &mut self,
        id: AllocationId,
        new: CapConfig,
        now: DateTime<Utc>,
    ) -> Result<(), CapError> {
        let key = Self::increase_key(&id, &new);
        self.increases.consume(&key, now)?;
        info!(%id, absolute = new.absolute, relative_bps = new.relative_bps, "cap increase executed");
        self.caps.insert(id, new);
        Ok(())
    }

    pub fn revoke_cap_increase(
        &mut self,
        id: AllocationId,
        new: CapConfig,
    ) -> Result<(), CapError> {
        let key = Self::increase_key(&id, &new);
        self.increases.revoke(&key)?;
        Ok(())
    }

    fn increase_key(id: &AllocationId, new: &CapConfig) -> [u8; 32] {
        operation_key(&[
            b"vault.cap.raise",
            id.as_bytes(),
            &new.absolute.to_be_bytes(),
            &new.relative_bps.to_be_bytes(),
        ])
    }
}
