//! # Strategy Configuration & Allocation Accounting
//!
//! Two records live here, one per allocation identifier:
//!
//! - [`StrategyConfig`] — who may execute the strategy, its canned call
//!   data, its daily execution budget, and whether it is enabled at all.
//! - [`AllocationEntry`] — the double ledger at the heart of the escrow:
//!   `allocation` is what the vault *believes* is deployed to the
//!   strategy; `external_deposits` is what has *actually* left the escrow
//!   into an external protocol. The gap between the two is the strategy's
//!   slack — funds recoverable without touching any external protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DAILY_LIMIT_WINDOW_SECS;
use crate::types::{Address, AllocationId};

/// Identifier-bearing request data passed through the adapter boundary.
/// The vault treats it as opaque; the escrow reads the target identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub id: AllocationId,
}

impl AllocationRequest {
    pub fn new(id: AllocationId) -> Self {
        Self { id }
    }
}

/// Owner-authored configuration for one strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// The only account besides the escrow owner allowed to execute this
    /// strategy's calls.
    pub agent: Address,
    /// Canned call data deployments attach to executions; opaque here.
    pub pre_configured_data: Vec<u8>,
    /// Maximum balance decrease this strategy may cause per rolling 24h
    /// window. Zero disables the check.
    pub daily_limit: u64,
    /// Disabled strategies reject allocation and execution.
    pub active: bool,
    /// Spent portion of the current window's budget.
    pub daily_used: u64,
    /// Start of the current budget window.
    pub last_reset: DateTime<Utc>,
}

impl StrategyConfig {
    pub fn new(agent: Address, daily_limit: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            agent,
            pre_configured_data: Vec::new(),
            daily_limit,
            active: true,
            daily_used: 0,
            last_reset: created_at,
        }
    }

    /// Charges `amount` against the rolling daily budget, resetting the
    /// window first if it has lapsed. Returns the remaining budget, or
    /// `None` when the charge would exceed it (caller turns that into the
    /// named error — this type doesn't know about escrow errors).
    pub fn charge_daily(&mut self, amount: u64, now: DateTime<Utc>) -> Option<u64> {
        if self.daily_limit == 0 {
            return Some(u64::MAX);
        }
        if (now - self.last_reset).num_seconds() >= DAILY_LIMIT_WINDOW_SECS {
            self.daily_used = 0;
            self.last_reset = now;
        }
        let used = self.daily_used.checked_add(amount)?;
        if used > self.daily_limit {
            return None;
        }
        self.daily_used = used;
        Some(self.daily_limit - used)
    }
}

/// The allocation / external-deposit pair for one identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Amount the vault has allocated to this strategy.
    pub allocation: u64,
    /// Amount actually deployed into external protocols.
    pub external_deposits: u64,
}

impl AllocationEntry {
    /// Funds that should be sitting idle in the escrow on this strategy's
    /// behalf: recorded allocation not yet externally deployed.
    pub fn slack(&self) -> u64 {
        self.allocation.saturating_sub(self.external_deposits)
    }

    /// An entry is retired (and its identifier dropped from the active
    /// set) once both trackers hit zero.
    pub fn is_empty(&self) -> bool {
        self.allocation == 0 && self.external_deposits == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn zero_daily_limit_is_unlimited() {
        let mut cfg = StrategyConfig::new(Address([1; 20]), 0, t0());
        assert!(cfg.charge_daily(u64::MAX / 2, t0()).is_some());
    }

    #[test]
    fn daily_budget_accumulates_and_rejects_overrun() {
        let mut cfg = StrategyConfig::new(Address([1; 20]), 1_000, t0());
        assert_eq!(cfg.charge_daily(600, t0()), Some(400));
        assert_eq!(cfg.charge_daily(400, t0()), Some(0));
        assert_eq!(cfg.charge_daily(1, t0()), None);
        // The failed charge did not consume budget state.
        assert_eq!(cfg.daily_used, 1_000);
    }

    #[test]
    fn daily_budget_resets_after_window() {
        let mut cfg = StrategyConfig::new(Address([1; 20]), 1_000, t0());
        cfg.charge_daily(1_000, t0()).unwrap();
        assert_eq!(cfg.charge_daily(1, t0()), None);

        let next_day = t0() + Duration::seconds(DAILY_LIMIT_WINDOW_SECS);
        assert_eq!(cfg.charge_daily(700, next_day), Some(300));
        assert_eq!(cfg.last_reset, next_day);
    }

    #[test]
    fn slack_is_allocation_minus_external() {
        let entry = AllocationEntry {
            allocation: 100,
            external_deposits: 40,
        };
        assert_eq!(entry.slack(), 60);
        // Desynced entry (external above allocation) clamps to zero
        // rather than underflowing.
        let desynced = AllocationEntry {
            allocation: 40,
            external_deposits: 100,
        };
        assert_eq!(desynced.slack(), 0);
    }
}
