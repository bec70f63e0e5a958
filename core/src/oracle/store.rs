//! # Valuation Oracle Store
//!
//! [`ValuationOracle`] owns every report, every admission config, and the
//! signer set. The update path is deliberately paranoid: six fail-fast
//! checks, each with its own error, so a keeper can tell "refresh the
//! nonce and resubmit" apart from "wait out the rate limit" without
//! guessing.
//!
//! ## Trust model
//!
//! Two separate identities take part in every update:
//!
//! 1. The **submitter** — the account that delivers the transaction. A
//!    pure gatekeeper role; it holds no pricing authority.
//! 2. The **signers** — keeper keys recovered from the report signatures.
//!    Their combined authorized weight must reach the required quorum.
//!
//! Compromising the submitter alone gets an attacker nothing; they would
//! still need quorum weight. Compromising a minority of signers gets them
//! nothing either.
//!
//! ## Failure semantics
//!
//! Every validation failure is a synchronous rejection with zero state
//! mutation. The one deliberate nuance is the batch path: phase 1
//! validates every identifier without touching state, phase 2 commits all
//! writes. A failure anywhere in phase 1 leaves every report exactly as
//! it was — atomicity is a hard contract here, not an optimization.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{
    DEFAULT_TIMELOCK_DELAY_SECS, ESCROW_TOTAL_TAG, MAX_CONFIDENCE, MAX_EXPIRY_WINDOW_SECS,
    MAX_NONCE_GAP, RELAXED_MIN_CONFIDENCE, RELAXED_STALENESS_FACTOR,
};
use crate::timelock::{operation_key, Timelock, TimelockError};
use crate::types::{keccak256, Address, AllocationId};

use super::report::{change_bps, ConfigError, UpdateConfig, ValueReport};
use super::signers::SignerSet;
use super::wire::{batch_digest, recover_signer, report_digest, WireError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from oracle operations. Admission rejections mutate nothing.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Caller is not the designated submitter.
    #[error("caller {0} is not the report submitter")]
    NotSubmitter(Address),

    /// Caller is not the oracle owner.
    #[error("caller {0} is not the oracle owner")]
    NotOwner(Address),

    /// Submitted nonce does not exceed the stored one.
    #[error("stale nonce: submitted {submitted}, stored {stored}")]
    StaleNonce { submitted: u64, stored: u64 },

    /// Submitted nonce jumps too far ahead of the stored one.
    #[error("nonce gap too large: submitted {submitted}, stored {stored}, max gap {max_gap}")]
    NonceGapTooLarge {
        submitted: u64,
        stored: u64,
        max_gap: u64,
    },

    /// Report expiry is in the past.
    #[error("report expired at {expiry}, now {now}")]
    Expired {
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Report expiry sits implausibly far in the future.
    #[error("report expiry {expiry} is beyond the {max_secs}s future window")]
    ExpiryTooFar {
        expiry: DateTime<Utc>,
        max_secs: i64,
    },

    /// Update arrived inside the rate-limit interval without a change
    /// large enough to justify pushing through.
    #[error(
        "update too frequent: {elapsed_secs}s since last (min {min_interval_secs}s), \
         change {change_bps}bps below push threshold {threshold_bps}bps"
    )]
    UpdateTooFrequent {
        elapsed_secs: i64,
        min_interval_secs: i64,
        change_bps: u64,
        threshold_bps: u64,
    },

    /// Change against the prior value exceeds the configured bound.
    #[error("price change {change_bps}bps exceeds bound of {max_bps}bps")]
    ChangeOutOfBounds { change_bps: u64, max_bps: u64 },

    /// First-ever value for the identifier exceeds the initial ceiling —
    /// almost always a decimals mistake.
    #[error("initial value {value} exceeds ceiling {max}")]
    InitialValueTooLarge { value: u64, max: u64 },

    /// Confidence below the identifier's floor.
    #[error("confidence {confidence} below minimum {min}")]
    LowConfidence { confidence: u8, min: u8 },

    /// Deduplicated signer weight fell short of quorum.
    #[error("signature weight {weight} below required {required}")]
    InsufficientWeight { weight: u64, required: u64 },

    /// A signature failed to parse or recover.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] WireError),

    /// Stored value is older than the staleness window and no fallback
    /// is configured.
    #[error("value for {id} too stale: {age_secs}s old, max {max_staleness_secs}s")]
    ValueTooStale {
        id: AllocationId,
        age_secs: i64,
        max_staleness_secs: i64,
    },

    /// No report was ever accepted for the identifier and no fallback is
    /// configured.
    #[error("no value recorded for {0}")]
    NoValue(AllocationId),

    /// Batch arrays disagree in length.
    #[error("batch shape mismatch: {ids} ids, {values} values, {confidences} confidences")]
    BatchShapeMismatch {
        ids: usize,
        values: usize,
        confidences: usize,
    },

    /// The same identifier appears twice in one batch. Two writes under
    /// one nonce would make the committed value order-dependent.
    #[error("identifier {0} appears more than once in the batch")]
    DuplicateBatchId(AllocationId),

    /// Emergency update attempted outside emergency mode.
    #[error("emergency update requires emergency mode")]
    EmergencyOnly,

    /// Emergency mode toggled to the state it is already in.
    #[error("emergency mode already {0}")]
    EmergencyUnchanged(bool),

    /// Update config failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Timelock state machine rejected the signer-removal step.
    #[error(transparent)]
    Timelock(#[from] TimelockError),

    /// The escrow-total slot for this escrow is already bound.
    #[error("escrow total already registered for {0}")]
    TotalAlreadyRegistered(Address),
}

// ---------------------------------------------------------------------------
// Health classification
// ---------------------------------------------------------------------------

/// One identifier's freshness tier, as seen by the health classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueTier {
    /// Within the staleness window at full confidence.
    Fresh,
    /// Not fresh, but a nonzero fallback value covers it.
    Fallback,
    /// Past the staleness window but inside the relaxed grace window with
    /// at least relaxed confidence. Usable, but a reason to haircut.
    StaleUsable,
    /// No usable value at all.
    Unusable,
}

/// Summary of an escrow's active identifiers by tier.
///
/// Overall health requires that *no* identifier sits in the stale or
/// unusable tiers — fallback-covered identifiers are tolerated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValuationHealth {
    pub fresh: usize,
    pub fallback: usize,
    pub stale_usable: usize,
    pub unusable: usize,
}

impl ValuationHealth {
    pub fn is_healthy(&self) -> bool {
        self.stale_usable == 0 && self.unusable == 0
    }
}

/// The escrow failed to enumerate its active identifiers. Modeled as an
/// explicit value rather than a panic or an exception — the classifier
/// treats it as one unusable entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnumerationFailed;

/// The slice of the escrow the oracle is allowed to see: its identity and
/// its currently-active allocation identifiers.
pub trait ActiveAllocationSource {
    fn escrow_address(&self) -> Address;
    fn active_allocation_ids(&self) -> Result<Vec<AllocationId>, EnumerationFailed>;
}

// ---------------------------------------------------------------------------
// ValuationOracle
// ---------------------------------------------------------------------------

/// The signed-report store. See the module docs for the trust model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValuationOracle {
    owner: Address,
    submitter: Address,
    /// Chain identifier mixed into every digest — a report signed for one
    /// deployment cannot be replayed against another.
    chain_id: u64,
    /// This oracle's own identity, the second domain-separation input.
    identity: Address,
    required_weight: u64,
    emergency: bool,
    signers: SignerSet,
    reports: HashMap<AllocationId, ValueReport>,
    configs: HashMap<AllocationId, UpdateConfig>,
    fallbacks: HashMap<AllocationId, u64>,
    defaults: UpdateConfig,
    /// Reserved aggregate identifiers, bound one-time to an escrow each.
    escrow_totals: HashMap<AllocationId, Address>,
    removals: Timelock,
}

impl ValuationOracle {
    pub fn new(
        owner: Address,
        submitter: Address,
        chain_id: u64,
        identity: Address,
        required_weight: u64,
    ) -> Self {
        Self {
            owner,
            submitter,
            chain_id,
            identity,
            required_weight,
            emergency: false,
            signers: SignerSet::new(),
            reports: HashMap::new(),
            configs: HashMap::new(),
            fallbacks: HashMap::new(),
            defaults: UpdateConfig::default(),
            escrow_totals: HashMap::new(),
            removals: Timelock::new(DEFAULT_TIMELOCK_DELAY_SECS),
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn report(&self, id: &AllocationId) -> Option<&ValueReport> {
        self.reports.get(id)
    }

    pub fn required_weight(&self) -> u64 {
        self.required_weight
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn signers(&self) -> &SignerSet {
        &self.signers
    }

    fn config_for(&self, id: &AllocationId) -> &UpdateConfig {
        self.configs.get(id).unwrap_or(&self.defaults)
    }

    /// The deterministic aggregate identifier for an escrow. Domain-tagged
    /// so no strategy label can collide with it.
    pub fn escrow_total_id(escrow: &Address) -> AllocationId {
        let mut buf = Vec::with_capacity(ESCROW_TOTAL_TAG.len() + 20);
        buf.extend_from_slice(ESCROW_TOTAL_TAG);
        buf.extend_from_slice(escrow.as_bytes());
        AllocationId(keccak256(&buf))
    }

    // -- update path --------------------------------------------------------

    /// Submits a single signed report. Validation order is fixed and
    /// fail-fast; see [`OracleError`] for the distinct rejections.
    #[allow(clippy::too_many_arguments)]
    pub fn update_value(
        &mut self,
        caller: Address,
        id: AllocationId,
        value: u64,
        confidence: u8,
        nonce: u64,
        expiry: DateTime<Utc>,
        signatures: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> Result<(), OracleError> {
        if caller != self.submitter {
            return Err(OracleError::NotSubmitter(caller));
        }

        self.check_nonce(&id, nonce)?;
        check_expiry(expiry, now)?;
        self.check_rate_bounds_confidence(&id, value, confidence, now)?;

        let digest = report_digest(
            &id,
            value,
            confidence,
            nonce,
            expiry.timestamp() as u64,
            self.chain_id,
            &self.identity,
        );
        self.check_quorum(&digest, signatures)?;

        self.commit(id, value, confidence, nonce, true, caller, now);
        Ok(())
    }

    /// Submits a batch of reports under one shared nonce/expiry/signature
    /// set. Phase 1 validates every identifier without mutation; phase 2
    /// commits all writes. Any phase-1 failure leaves every report
    /// untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn batch_update_values(
        &mut self,
        caller: Address,
        ids: &[AllocationId],
        values: &[u64],
        confidences: &[u8],
        nonce: u64,
        expiry: DateTime<Utc>,
        signatures: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> Result<(), OracleError> {
        if caller != self.submitter {
            return Err(OracleError::NotSubmitter(caller));
        }
        if ids.len() != values.len() || ids.len() != confidences.len() {
            return Err(OracleError::BatchShapeMismatch {
                ids: ids.len(),
                values: values.len(),
                confidences: confidences.len(),
            });
        }

        check_expiry(expiry, now)?;

        // Phase 1: validate everything, mutate nothing. Per-id checks
        // only see stored state, so duplicates have to be caught here or
        // the same id would commit twice under one nonce.
        let mut seen = BTreeSet::new();
        for ((id, value), confidence) in ids.iter().zip(values).zip(confidences) {
            if !seen.insert(*id) {
                return Err(OracleError::DuplicateBatchId(*id));
            }
            self.check_nonce(id, nonce)?;
            self.check_rate_bounds_confidence(id, *value, *confidence, now)?;
        }

        let digest = batch_digest(
            ids,
            values,
            confidences,
            nonce,
            expiry.timestamp() as u64,
            self.chain_id,
            &self.identity,
        );
        self.check_quorum(&digest, signatures)?;

        // Phase 2: commit all writes.
        for ((id, value), confidence) in ids.iter().zip(values).zip(confidences) {
            self.commit(*id, *value, *confidence, nonce, true, caller, now);
        }
        Ok(())
    }

    fn check_nonce(&self, id: &AllocationId, nonce: u64) -> Result<(), OracleError> {
        let stored = self.reports.get(id).map(|r| r.nonce).unwrap_or(0);
        if nonce <= stored {
            return Err(OracleError::StaleNonce {
                submitted: nonce,
                stored,
            });
        }
        if nonce > stored.saturating_add(MAX_NONCE_GAP) {
            return Err(OracleError::NonceGapTooLarge {
                submitted: nonce,
                stored,
                max_gap: MAX_NONCE_GAP,
            });
        }
        Ok(())
    }

    /// Steps 3–5 of the admission pipeline: rate limiting, price bounds,
    /// confidence floor. Shared between the single and batch paths.
    fn check_rate_bounds_confidence(
        &self,
        id: &AllocationId,
        value: u64,
        confidence: u8,
        now: DateTime<Utc>,
    ) -> Result<(), OracleError> {
        let cfg = self.config_for(id);
        let prior = self.reports.get(id);

        if let Some(prior) = prior {
            let elapsed = (now - prior.timestamp).num_seconds();
            if elapsed < cfg.min_update_interval_secs {
                let cbps = change_bps(prior.value, value);
                if cbps <= cfg.push_threshold_bps {
                    return Err(OracleError::UpdateTooFrequent {
                        elapsed_secs: elapsed,
                        min_interval_secs: cfg.min_update_interval_secs,
                        change_bps: cbps,
                        threshold_bps: cfg.push_threshold_bps,
                    });
                }
            }
        }

        match prior {
            Some(prior) if prior.value > 0 => {
                let cbps = change_bps(prior.value, value);
                if cbps > cfg.max_change_bps {
                    return Err(OracleError::ChangeOutOfBounds {
                        change_bps: cbps,
                        max_bps: cfg.max_change_bps,
                    });
                }
            }
            // First value ever (or recovering from zero): no ratio to
            // bound against, so apply the absolute ceiling instead.
            _ => {
                if value > cfg.max_initial_value {
                    return Err(OracleError::InitialValueTooLarge {
                        value,
                        max: cfg.max_initial_value,
                    });
                }
            }
        }

        if confidence < cfg.min_confidence {
            return Err(OracleError::LowConfidence {
                confidence,
                min: cfg.min_confidence,
            });
        }
        Ok(())
    }

    fn check_quorum(&self, digest: &[u8; 32], signatures: &[Vec<u8>]) -> Result<(), OracleError> {
        let mut recovered = Vec::with_capacity(signatures.len());
        for sig in signatures {
            recovered.push(recover_signer(digest, sig)?);
        }
        let weight = self.signers.quorum_weight(&recovered);
        if weight < self.required_weight {
            return Err(OracleError::InsufficientWeight {
                weight,
                required: self.required_weight,
            });
        }
        Ok(())
    }

    fn commit(
        &mut self,
        id: AllocationId,
        value: u64,
        confidence: u8,
        nonce: u64,
        is_push: bool,
        updater: Address,
        now: DateTime<Utc>,
    ) {
        info!(%id, value, confidence, nonce, "valuation report accepted");
        self.reports.insert(
            id,
            ValueReport {
                value,
                timestamp: now,
                confidence,
                nonce,
                is_push,
                last_updater: updater,
            },
        );
    }

    // -- reads --------------------------------------------------------------

    /// Returns the stored value if fresh and confident enough, otherwise a
    /// configured nonzero fallback, otherwise a named failure.
    pub fn get_value(&self, id: &AllocationId, now: DateTime<Utc>) -> Result<u64, OracleError> {
        let cfg = self.config_for(id);
        let fallback = self.fallbacks.get(id).copied().filter(|v| *v > 0);

        match self.reports.get(id) {
            Some(report) => {
                let age = (now - report.timestamp).num_seconds();
                if age <= cfg.max_staleness_secs && report.confidence >= cfg.min_confidence {
                    return Ok(report.value);
                }
                if let Some(fb) = fallback {
                    return Ok(fb);
                }
                if age > cfg.max_staleness_secs {
                    Err(OracleError::ValueTooStale {
                        id: *id,
                        age_secs: age,
                        max_staleness_secs: cfg.max_staleness_secs,
                    })
                } else {
                    Err(OracleError::LowConfidence {
                        confidence: report.confidence,
                        min: cfg.min_confidence,
                    })
                }
            }
            None => fallback.ok_or(OracleError::NoValue(*id)),
        }
    }

    /// Classifies one identifier into a freshness tier.
    pub fn classify(&self, id: &AllocationId, now: DateTime<Utc>) -> ValueTier {
        let cfg = self.config_for(id);
        let fallback = self.fallbacks.get(id).copied().filter(|v| *v > 0);

        match self.reports.get(id) {
            Some(report) => {
                let age = (now - report.timestamp).num_seconds();
                if age <= cfg.max_staleness_secs && report.confidence >= cfg.min_confidence {
                    ValueTier::Fresh
                } else if fallback.is_some() {
                    ValueTier::Fallback
                } else if age <= cfg.max_staleness_secs * RELAXED_STALENESS_FACTOR
                    && report.confidence >= RELAXED_MIN_CONFIDENCE
                {
                    ValueTier::StaleUsable
                } else {
                    ValueTier::Unusable
                }
            }
            None => {
                if fallback.is_some() {
                    ValueTier::Fallback
                } else {
                    ValueTier::Unusable
                }
            }
        }
    }

    /// Classifies every active identifier of the escrow and summarizes.
    ///
    /// A failed enumeration counts as one unusable entry: if we cannot
    /// even list the positions, we certainly cannot vouch for them.
    pub fn valuation_health(
        &self,
        source: &dyn ActiveAllocationSource,
        now: DateTime<Utc>,
    ) -> ValuationHealth {
        let mut health = ValuationHealth::default();
        let ids = match source.active_allocation_ids() {
            Ok(ids) => ids,
            Err(EnumerationFailed) => {
                warn!(escrow = %source.escrow_address(), "active-allocation enumeration failed");
                health.unusable = 1;
                return health;
            }
        };
        for id in &ids {
            match self.classify(id, now) {
                ValueTier::Fresh => health.fresh += 1,
                ValueTier::Fallback => health.fallback += 1,
                ValueTier::StaleUsable => health.stale_usable += 1,
                ValueTier::Unusable => health.unusable += 1,
            }
        }
        health
    }

    // -- emergency path -----------------------------------------------------

    /// Toggles emergency mode. Rejects a toggle to the current state so a
    /// confused operator script cannot "re-enable" silently.
    pub fn set_emergency_mode(&mut self, caller: Address, enabled: bool) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        if self.emergency == enabled {
            return Err(OracleError::EmergencyUnchanged(enabled));
        }
        warn!(enabled, "oracle emergency mode toggled");
        self.emergency = enabled;
        Ok(())
    }

    /// Bypasses all validation while emergency mode is active. Confidence
    /// is forced to maximum and the nonce is bumped by exactly one, so the
    /// normal update path resumes cleanly afterwards.
    pub fn emergency_update(
        &mut self,
        caller: Address,
        id: AllocationId,
        value: u64,
        now: DateTime<Utc>,
    ) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        if !self.emergency {
            return Err(OracleError::EmergencyOnly);
        }
        let nonce = self.reports.get(&id).map(|r| r.nonce).unwrap_or(0) + 1;
        warn!(%id, value, nonce, "emergency valuation override");
        self.commit(id, value, MAX_CONFIDENCE, nonce, false, caller, now);
        Ok(())
    }

    // -- signer management --------------------------------------------------

    fn removal_key(signer: &Address) -> [u8; 32] {
        operation_key(&[b"oracle.signer.remove", signer.as_bytes()])
    }

    /// Adds or re-weights a signer immediately, or schedules a removal
    /// (weight zero) behind the timelock. Returns the executable-at time
    /// for scheduled removals, `None` for immediate additions.
    pub fn initiate_signer_change(
        &mut self,
        caller: Address,
        signer: Address,
        weight: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, OracleError> {
        self.require_owner(caller)?;
        if weight > 0 {
            self.signers.authorize(signer, weight);
            info!(%signer, weight, "signer authorized");
            return Ok(None);
        }
        let ready_at = self.removals.schedule(Self::removal_key(&signer), now)?;
        info!(%signer, %ready_at, "signer removal scheduled");
        Ok(Some(ready_at))
    }

    /// Executes a matured signer removal, zeroing the signer.
    pub fn execute_signer_removal(
        &mut self,
        caller: Address,
        signer: Address,
        now: DateTime<Utc>,
    ) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        self.removals.consume(&Self::removal_key(&signer), now)?;
        self.signers.revoke(&signer);
        warn!(%signer, "signer removed");
        Ok(())
    }

    /// Aborts a pending signer removal.
    pub fn cancel_signer_removal(
        &mut self,
        caller: Address,
        signer: Address,
    ) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        self.removals.revoke(&Self::removal_key(&signer))?;
        info!(%signer, "signer removal cancelled");
        Ok(())
    }

    // -- configuration ------------------------------------------------------

    pub fn set_update_config(
        &mut self,
        caller: Address,
        id: AllocationId,
        cfg: UpdateConfig,
    ) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        cfg.validate()?;
        self.configs.insert(id, cfg);
        Ok(())
    }

    pub fn set_fallback_value(
        &mut self,
        caller: Address,
        id: AllocationId,
        value: u64,
    ) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        self.fallbacks.insert(id, value);
        Ok(())
    }

    pub fn set_required_weight(&mut self, caller: Address, weight: u64) -> Result<(), OracleError> {
        self.require_owner(caller)?;
        self.required_weight = weight;
        Ok(())
    }

    /// One-time binding of the reserved aggregate identifier to the
    /// calling escrow. The identifier is derived from the escrow's own
    /// identity, so no strategy identifier can overwrite its total slot.
    pub fn register_escrow_total(&mut self, escrow: Address) -> Result<AllocationId, OracleError> {
        let id = Self::escrow_total_id(&escrow);
        if self.escrow_totals.contains_key(&id) {
            return Err(OracleError::TotalAlreadyRegistered(escrow));
        }
        self.escrow_totals.insert(id, escrow);
        info!(%escrow, %id, "escrow total identifier registered");
        Ok(id)
    }

    fn require_owner(&self, caller: Address) -> Result<(), OracleError> {
        if caller != self.owner {
            return Err(OracleError::NotOwner(caller));
        }
        Ok(())
    }
}

/// Step 2 of the admission pipeline: expiry sanity.
fn check_expiry(expiry: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), OracleError> {
    if expiry < now {
        return Err(OracleError::Expired { expiry, now });
    }
    if expiry > now + Duration::seconds(MAX_EXPIRY_WINDOW_SECS) {
        return Err(OracleError::ExpiryTooFar {
            expiry,
            max_secs: MAX_EXPIRY_WINDOW_SECS,
        });
    }
    Ok(())
}
