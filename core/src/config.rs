//! # Protocol Constants & Defaults
//!
//! Every magic number in ARX lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values define the risk posture of the custody core. Several of
//! them (the haircut, the circuit breaker, the nonce gap) are load-bearing
//! security parameters — changing them after deployment needs a risk
//! review, not a drive-by PR.

// ---------------------------------------------------------------------------
// Fixed-Point Conventions
// ---------------------------------------------------------------------------

/// Basis points denominator. 10_000 bps = 100%. Fees, caps, haircuts,
/// thresholds, and deviation bands are all expressed in bps.
pub const BPS_ONE: u64 = 10_000;

/// Scale for per-second interest rates. 1e18 = a rate of 1.0 per second.
/// Rates this large never occur in practice; the headroom is for u128
/// intermediate math, not for realistic values.
pub const RATE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Seconds per (non-leap) year. Used to convert annualized fee/rate
/// parameters to per-second form.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Virtual shares offset added to total supply in share-price math.
/// Together with [`VIRTUAL_ASSETS`] this defeats the classic
/// first-depositor inflation attack: the attacker can no longer push the
/// share price arbitrarily high by donating assets against a dust supply.
pub const VIRTUAL_SHARES: u128 = 1;

/// Virtual assets offset added to total assets in share-price math.
/// Keep equal to [`VIRTUAL_SHARES`] so the empty-vault price is exactly 1.
pub const VIRTUAL_ASSETS: u128 = 1;

// ---------------------------------------------------------------------------
// Oracle Admission Control
// ---------------------------------------------------------------------------

/// Maximum nonce jump an update may make over the stored nonce.
///
/// Nonces must be strictly increasing, but a compromised or buggy keeper
/// that submits `u64::MAX` would brick the identifier forever (no higher
/// nonce exists). Bounding the gap keeps every reachable state escapable.
pub const MAX_NONCE_GAP: u64 = 1_000;

/// Maximum distance into the future a report expiry may sit, in seconds.
/// An expiry further out than this is almost certainly a unit mistake
/// (milliseconds vs seconds) and is rejected.
pub const MAX_EXPIRY_WINDOW_SECS: i64 = 3_600;

/// Default minimum interval between accepted updates for one identifier.
/// Below this, only changes exceeding the push threshold get through.
pub const DEFAULT_MIN_UPDATE_INTERVAL_SECS: i64 = 300;

/// Global ceiling on any identifier's configured min-update-interval.
pub const MAX_UPDATE_INTERVAL_SECS: i64 = 86_400;

/// Default staleness window: a report older than this is not served by
/// `get_value` without a fallback.
pub const DEFAULT_MAX_STALENESS_SECS: i64 = 3_600;

/// Global ceiling on any identifier's configured max-staleness. A week of
/// staleness is already an incident; more than that is configuration abuse.
pub const MAX_STALENESS_CEILING_SECS: i64 = 604_800;

/// Default push threshold in bps: the minimum relative change that
/// justifies accepting an update inside the rate-limit interval.
pub const DEFAULT_PUSH_THRESHOLD_BPS: u64 = 100;

/// Default minimum confidence (0–100) for a report to be accepted and for
/// `get_value` to serve it.
pub const DEFAULT_MIN_CONFIDENCE: u8 = 80;

/// Relaxed confidence floor used only in the health classifier's
/// "stale but usable" tier.
pub const RELAXED_MIN_CONFIDENCE: u8 = 50;

/// How far past `max_staleness` a report may be and still count as
/// "stale but usable" (under the relaxed confidence floor) rather than
/// unusable. Expressed as a multiplier on the staleness window.
pub const RELAXED_STALENESS_FACTOR: i64 = 2;

/// Default ceiling on relative change between consecutive accepted values,
/// in bps. 5_000 = 50%. Identifier-specific configs may tighten or widen
/// this within reason; it guards against fat-fingered reports.
pub const DEFAULT_MAX_CHANGE_BPS: u64 = 5_000;

/// Default ceiling on the *first* value ever reported for an identifier.
/// There is no prior value to bound against, so this absolute ceiling
/// catches decimal-mismatch mistakes (reporting 1e18 where 1e6 was meant).
pub const DEFAULT_MAX_INITIAL_VALUE: u64 = 1_000_000_000_000;

/// Maximum confidence value. Emergency updates are forced to this.
pub const MAX_CONFIDENCE: u8 = 100;

/// Domain tag mixed into the deterministic escrow-total identifier, so no
/// strategy identifier can collide with an escrow's aggregate slot.
pub const ESCROW_TOTAL_TAG: &[u8] = b"arx.escrow.total.v1";

// ---------------------------------------------------------------------------
// Escrow Risk Parameters
// ---------------------------------------------------------------------------

/// Haircut applied to an oracle valuation when the oracle reports
/// staleness anywhere, or while the escrow is in emergency mode.
/// 500 bps = a 5% discount: value × 9_500 / 10_000.
pub const STALENESS_HAIRCUT_BPS: u64 = 500;

/// Circuit breaker: a strategy multicall whose net balance decrease
/// exceeds this fraction of the pre-call balance is rejected, unless the
/// caller explicitly used the bypass entry point.
pub const CIRCUIT_BREAKER_BPS: u64 = 1_000;

/// Maximum age of the cached valuation for it to be usable as an
/// emergency floor.
pub const CACHE_MAX_AGE_SECS: i64 = 3_600;

/// Lower edge of the plausibility band for `refresh_cached_valuation`:
/// an oracle reading below 75% of tracked allocations is treated as a
/// halt signal, not cached.
pub const DEVIATION_BAND_LOW_BPS: u64 = 7_500;

/// Upper edge of the plausibility band: readings above 150% of tracked
/// allocations are likewise rejected.
pub const DEVIATION_BAND_HIGH_BPS: u64 = 15_000;

/// Rolling window for per-strategy daily execution limits.
pub const DAILY_LIMIT_WINDOW_SECS: i64 = 86_400;

// ---------------------------------------------------------------------------
// Vault Parameters
// ---------------------------------------------------------------------------

/// Hard ceiling on the force-deallocate penalty: 200 bps = 2%.
pub const MAX_FORCE_DEALLOCATE_PENALTY_BPS: u64 = 200;

/// Hard ceiling on the performance fee: 50% of recognized interest.
pub const MAX_PERFORMANCE_FEE_BPS: u64 = 5_000;

/// Hard ceiling on the management fee: 5% per year.
pub const MAX_MANAGEMENT_FEE_BPS: u64 = 500;

/// Default cap on the modeled interest rate, per second, RATE_SCALE-fixed.
/// Equivalent to 200% per year — generous for any real strategy, tight
/// enough that a poisoned valuation cannot be recognized in one step.
pub const DEFAULT_MAX_RATE_PER_SECOND: u128 = 2 * RATE_SCALE / SECONDS_PER_YEAR as u128;

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

/// Default timelock delay for privileged changes that expand risk
/// (signer removal, cap increases). Two days: long enough to react,
/// short enough to operate.
pub const DEFAULT_TIMELOCK_DELAY_SECS: i64 = 172_800;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_defaults_are_internally_consistent() {
        // An identifier must be able to go stale, so the update interval
        // has to be shorter than the staleness window.
        assert!(DEFAULT_MIN_UPDATE_INTERVAL_SECS < DEFAULT_MAX_STALENESS_SECS);
        assert!(DEFAULT_MIN_UPDATE_INTERVAL_SECS <= MAX_UPDATE_INTERVAL_SECS);
        assert!(DEFAULT_MAX_STALENESS_SECS <= MAX_STALENESS_CEILING_SECS);
    }

    #[test]
    fn bps_parameters_stay_below_one() {
        assert!(STALENESS_HAIRCUT_BPS < BPS_ONE);
        assert!(CIRCUIT_BREAKER_BPS < BPS_ONE);
        assert!(MAX_FORCE_DEALLOCATE_PENALTY_BPS < BPS_ONE);
        assert!(MAX_PERFORMANCE_FEE_BPS <= BPS_ONE / 2);
        assert!(MAX_MANAGEMENT_FEE_BPS < BPS_ONE);
    }

    #[test]
    fn deviation_band_brackets_parity() {
        assert!(DEVIATION_BAND_LOW_BPS < BPS_ONE);
        assert!(DEVIATION_BAND_HIGH_BPS > BPS_ONE);
    }

    #[test]
    fn confidence_floors_are_ordered() {
        assert!(RELAXED_MIN_CONFIDENCE < DEFAULT_MIN_CONFIDENCE);
        assert!(DEFAULT_MIN_CONFIDENCE <= MAX_CONFIDENCE);
    }

    #[test]
    fn virtual_offsets_give_unit_empty_price() {
        // With equal offsets, an empty vault prices shares 1:1.
        assert_eq!(VIRTUAL_SHARES, VIRTUAL_ASSETS);
    }

    #[test]
    fn max_rate_is_roughly_two_x_per_year() {
        let per_year = DEFAULT_MAX_RATE_PER_SECOND * SECONDS_PER_YEAR as u128;
        // Integer division loses at most SECONDS_PER_YEAR - 1.
        assert!(per_year <= 2 * RATE_SCALE);
        assert!(per_year > 2 * RATE_SCALE - SECONDS_PER_YEAR as u128);
    }
}
