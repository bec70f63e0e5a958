//! # Value Reports & Update Configuration
//!
//! A [`ValueReport`] is the oracle's record for one allocation identifier:
//! the last accepted value plus the metadata needed to judge it later
//! (when it arrived, how confident the keeper was, which nonce it carried,
//! who pushed it). Reports are overwritten on every accepted update and
//! never deleted — the nonce sequence for an identifier only ever goes up.
//!
//! [`UpdateConfig`] is the per-identifier admission policy. Identifiers
//! without an explicit config inherit the oracle-wide defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{
    BPS_ONE, DEFAULT_MAX_CHANGE_BPS, DEFAULT_MAX_INITIAL_VALUE, DEFAULT_MAX_STALENESS_SECS,
    DEFAULT_MIN_CONFIDENCE, DEFAULT_MIN_UPDATE_INTERVAL_SECS, DEFAULT_PUSH_THRESHOLD_BPS,
    MAX_CONFIDENCE, MAX_STALENESS_CEILING_SECS, MAX_UPDATE_INTERVAL_SECS,
};
use crate::types::Address;

/// Errors from update-config validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `min_update_interval` must be strictly less than `max_staleness`,
    /// or every identifier would go stale between legal updates.
    #[error("min_update_interval ({interval}s) must be below max_staleness ({staleness}s)")]
    IntervalAboveStaleness { interval: i64, staleness: i64 },

    /// A window exceeds its global ceiling.
    #[error("{field} of {value}s exceeds the global maximum of {max}s")]
    WindowTooLarge {
        field: &'static str,
        value: i64,
        max: i64,
    },

    /// Confidence values live on a 0–100 scale.
    #[error("min_confidence {0} exceeds the 0-100 scale")]
    ConfidenceOutOfScale(u8),
}

/// The stored report for one allocation identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueReport {
    /// Reported value, in asset units.
    pub value: u64,
    /// When the report was accepted (not when the keeper computed it).
    pub timestamp: DateTime<Utc>,
    /// Keeper confidence, 0–100.
    pub confidence: u8,
    /// Replay-protection nonce. Strictly increasing per identifier.
    pub nonce: u64,
    /// `true` if the report landed through the signed push path (as
    /// opposed to an emergency override).
    pub is_push: bool,
    /// The submitter account that delivered the report.
    pub last_updater: Address,
}

/// Per-identifier admission policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Minimum seconds between accepted updates. Inside this window only
    /// changes beyond `push_threshold_bps` get through.
    pub min_update_interval_secs: i64,
    /// Age beyond which the stored value is no longer served.
    pub max_staleness_secs: i64,
    /// Relative change (bps) that overrides the rate limit.
    pub push_threshold_bps: u64,
    /// Minimum confidence for acceptance and for reads.
    pub min_confidence: u8,
    /// Ceiling on relative change (bps) between consecutive nonzero values.
    pub max_change_bps: u64,
    /// Ceiling on the first value ever reported for the identifier —
    /// the decimal-mismatch guard.
    pub max_initial_value: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            min_update_interval_secs: DEFAULT_MIN_UPDATE_INTERVAL_SECS,
            max_staleness_secs: DEFAULT_MAX_STALENESS_SECS,
            push_threshold_bps: DEFAULT_PUSH_THRESHOLD_BPS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_change_bps: DEFAULT_MAX_CHANGE_BPS,
            max_initial_value: DEFAULT_MAX_INITIAL_VALUE,
        }
    }
}

impl UpdateConfig {
    /// Validates internal consistency and the global ceilings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_update_interval_secs >= self.max_staleness_secs {
            return Err(ConfigError::IntervalAboveStaleness {
                interval: self.min_update_interval_secs,
                staleness: self.max_staleness_secs,
            });
        }
        if self.min_update_interval_secs > MAX_UPDATE_INTERVAL_SECS {
            return Err(ConfigError::WindowTooLarge {
                field: "min_update_interval",
                value: self.min_update_interval_secs,
                max: MAX_UPDATE_INTERVAL_SECS,
            });
        }
        if self.max_staleness_secs > MAX_STALENESS_CEILING_SECS {
            return Err(ConfigError::WindowTooLarge {
                field: "max_staleness",
                value: self.max_staleness_secs,
                max: MAX_STALENESS_CEILING_SECS,
            });
        }
        if self.min_confidence > MAX_CONFIDENCE {
            return Err(ConfigError::ConfidenceOutOfScale(self.min_confidence));
        }
        Ok(())
    }
}

/// Relative change between two values, in basis points of the old value.
///
/// `old == 0` is treated as a 100% change when the new value is nonzero
/// and a 0% change otherwise — there is no meaningful ratio against zero.
pub fn change_bps(old: u64, new: u64) -> u64 {
    if old == 0 {
        return if new > 0 { BPS_ONE } else { 0 };
    }
    let diff = old.abs_diff(new) as u128;
    // Cannot overflow: diff and BPS_ONE both fit comfortably in u128.
    (diff * BPS_ONE as u128 / old as u128) as u64
}
