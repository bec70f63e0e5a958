//! # Escrow Ledger
//!
//! [`EscrowLedger`] owns the per-strategy allocation books and the
//! strategy execution machinery. Three numbers rule everything here:
//!
//! - the escrow's **idle balance** — tokens physically sitting in the
//!   escrow's account on the underlying ledger;
//! - **allocation** — what the vault has earmarked per strategy;
//! - **external deposits** — what has actually been pushed out into
//!   external protocols.
//!
//! `real_assets` reconciles the three against the oracle to produce the
//! single number the vault's share price hangs off. When the oracle goes
//! quiet, the waterfall degrades deliberately: haircut, cached floor,
//! haircut baseline, and finally a hard "valuation unavailable" — the
//! vault never silently prices shares off stale air.
//!
//! ## Multicall atomicity
//!
//! Strategy executions are whitelist-checked multicalls. A failing
//! sub-call aborts the batch before any accounting effect is applied.
//! The [`CallExecutor`] collaborator models a transactional external
//! environment: it must not leave partial effects behind when it reports
//! failure, mirroring the revert semantics of the systems it stands for.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BPS_ONE, CACHE_MAX_AGE_SECS, CIRCUIT_BREAKER_BPS, DEVIATION_BAND_HIGH_BPS,
    DEVIATION_BAND_LOW_BPS, STALENESS_HAIRCUT_BPS};
use crate::oracle::store::{ActiveAllocationSource, EnumerationFailed, ValuationOracle};
use crate::token::{TokenError, TokenLedger};
use crate::types::{Address, AllocationId, Selector};

use super::strategy::{AllocationEntry, AllocationRequest, StrategyConfig};
use super::whitelist::{CallPermission, StrategyCall, Whitelist};

// ---------------------------------------------------------------------------
// Errors & collaborator traits
// ---------------------------------------------------------------------------

/// Failure reported by an external call. Carries the inner reason
/// verbatim; the escrow propagates it without interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallFailure(pub String);

/// The external environment strategy calls execute against. Implementors
/// mutate the token ledger the way the real external protocol would.
pub trait CallExecutor {
    fn execute(&mut self, token: &mut TokenLedger, call: &StrategyCall)
        -> Result<(), CallFailure>;
}

/// Errors from escrow operations.
#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("caller {0} is not the vault")]
    NotVault(Address),

    #[error("caller {0} is not the escrow owner")]
    NotOwner(Address),

    #[error("caller {0} is neither the strategy agent nor the owner")]
    NotAuthorizedExecutor(Address),

    /// The identifier has no configuration, or it is disabled.
    #[error("strategy {0} is not active")]
    StrategyNotActive(AllocationId),

    /// Zero-amount allocation is a no-op and almost certainly a bug
    /// upstream.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// Regular deallocation asked for more than is physically idle.
    #[error("insufficient idle balance: available {available}, requested {requested}")]
    InsufficientIdleBalance { available: u64, requested: u64 },

    /// Strategy removal while balances remain.
    #[error("strategy {id} not empty: allocation {allocation}, external {external}")]
    StrategyNotEmpty {
        id: AllocationId,
        allocation: u64,
        external: u64,
    },

    #[error("call to {target} selector {selector} is not whitelisted")]
    FunctionNotWhitelisted { target: Address, selector: Selector },

    /// An external sub-call failed; the whole batch aborted.
    #[error("external call failed: {0}")]
    CallFailed(String),

    /// Circuit breaker: batch lost more than the allowed fraction of the
    /// pre-call balance.
    #[error("excessive balance loss: lost {loss}, maximum {max_loss}")]
    ExcessiveBalanceLoss { loss: u64, max_loss: u64 },

    /// Slippage variant tried to loosen the breaker instead of
    /// tightening it.
    #[error("slippage bound {max_loss_bps}bps exceeds the {CIRCUIT_BREAKER_BPS}bps breaker")]
    SlippageTooLoose { max_loss_bps: u64 },

    /// Per-strategy daily budget exhausted.
    #[error("daily limit exceeded: requested {requested}, used {used} of {limit}")]
    DailyLimitExceeded {
        requested: u64,
        used: u64,
        limit: u64,
    },

    /// No sanctioned valuation path produced a number.
    #[error("valuation unavailable")]
    ValuationUnavailable,

    /// Oracle reading outside the plausibility band; refusing to cache.
    #[error("oracle reading {reading} deviates from tracked allocations {tracked}")]
    CacheDeviation { reading: u64, tracked: u64 },

    #[error("emergency mode already {0}")]
    EmergencyUnchanged(bool),

    /// Cannot leave emergency mode while the oracle remains unusable.
    #[error("valuer still unavailable; emergency mode stays on")]
    OracleStillUnavailable,

    #[error("token ledger error: {0}")]
    Token(#[from] TokenError),
}

/// What an allocate call reports back through the adapter boundary: the
/// identifiers it touched and the signed allocation delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterReceipt {
    pub ids: Vec<AllocationId>,
    pub delta: i128,
}

/// Which policy branch a deallocation runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeallocateContext {
    /// Requires the full amount to be idle; no partial fill.
    Regular,
    /// Emergency exit valve: fills up to slack and physical balance,
    /// partial fills allowed.
    Forced,
}

/// Result of a deallocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeallocateOutcome {
    pub ids: Vec<AllocationId>,
    pub delta: i128,
    /// Amount actually freed; under `Forced` this may be below the
    /// request.
    pub filled: u64,
    /// Distinct signal that a forced fill came up short.
    pub partial: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CachedValuation {
    value: u64,
    at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExecutionMode {
    Standard,
    WithSlippage { max_loss_bps: u64 },
    Bypass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExecutionKind {
    Deploy,
    Withdraw,
}

// ---------------------------------------------------------------------------
// EscrowLedger
// ---------------------------------------------------------------------------

/// The adapter/escrow accounting ledger. See the module docs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowLedger {
    address: Address,
    vault: Address,
    owner: Address,
    /// The oracle-registered aggregate identifier for this escrow.
    total_id: Option<AllocationId>,
    strategies: HashMap<AllocationId, StrategyConfig>,
    entries: HashMap<AllocationId, AllocationEntry>,
    /// Identifiers with nonzero balances, in deterministic order for
    /// enumeration.
    active: BTreeSet<AllocationId>,
    total_allocations: u64,
    total_external_deposits: u64,
    whitelist: Whitelist,
    emergency: bool,
    cached: Option<CachedValuation>,
    /// Idle floor kept back when sweeping withdrawal proceeds to the
    /// vault.
    required_idle: u64,
}

impl EscrowLedger {
    pub fn new(address: Address, vault: Address, owner: Address) -> Self {
        Self {
            address,
            vault,
            owner,
            total_id: None,
            strategies: HashMap::new(),
            entries: HashMap::new(),
            active: BTreeSet::new(),
            total_allocations: 0,
            total_external_deposits: 0,
            whitelist: Whitelist::new(),
            emergency: false,
            cached: None,
            required_idle: 0,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn entry(&self, id: &AllocationId) -> AllocationEntry {
        self.entries.get(id).copied().unwrap_or_default()
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn total_external_deposits(&self) -> u64 {
        self.total_external_deposits
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn total_id(&self) -> Option<AllocationId> {
        self.total_id
    }

    // -- registration & admin -----------------------------------------------

    /// Binds this escrow's aggregate identifier in the oracle. One-time;
    /// the oracle rejects re-registration.
    pub fn register_with_oracle(
        &mut self,
        oracle: &mut ValuationOracle,
    ) -> Result<AllocationId, crate::oracle::store::OracleError> {
        let id = oracle.register_escrow_total(self.address)?;
        self.total_id = Some(id);
        Ok(id)
    }

    /// Creates or replaces a strategy configuration.
    pub fn configure_strategy(
        &mut self,
        caller: Address,
        id: AllocationId,
        config: StrategyConfig,
    ) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        info!(%id, agent = %config.agent, daily_limit = config.daily_limit, "strategy configured");
        self.strategies.insert(id, config);
        Ok(())
    }

    /// Deletes a strategy. Only legal once both its allocation and
    /// external-deposit balances are zero.
    pub fn remove_strategy(&mut self, caller: Address, id: AllocationId) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        let entry = self.entry(&id);
        if !entry.is_empty() {
            return Err(EscrowError::StrategyNotEmpty {
                id,
                allocation: entry.allocation,
                external: entry.external_deposits,
            });
        }
        self.strategies.remove(&id);
        self.entries.remove(&id);
        self.active.remove(&id);
        Ok(())
    }

    pub fn allow_call(
        &mut self,
        caller: Address,
        target: Address,
        selector: Selector,
        permission: CallPermission,
    ) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        self.whitelist.allow(target, selector, permission);
        Ok(())
    }

    pub fn revoke_call(
        &mut self,
        caller: Address,
        target: Address,
        selector: Selector,
    ) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        self.whitelist.revoke(&target, &selector);
        Ok(())
    }

    pub fn set_required_idle(&mut self, caller: Address, amount: u64) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        self.required_idle = amount;
        Ok(())
    }

    // -- allocation ---------------------------------------------------------

    /// Records an allocation. Vault-only; the vault moves the tokens and
    /// then validates the resulting allocation against its caps — if that
    /// check fails the vault compensates with a reverse deallocation, so
    /// the pair is all-or-nothing from the outside.
    pub fn allocate(
        &mut self,
        caller: Address,
        request: &AllocationRequest,
        assets: u64,
    ) -> Result<AdapterReceipt, EscrowError> {
        self.require_vault(caller)?;
        let id = request.id;
        match self.strategies.get(&id) {
            Some(cfg) if cfg.active => {}
            _ => return Err(EscrowError::StrategyNotActive(id)),
        }
        if assets == 0 {
            return Err(EscrowError::ZeroAmount);
        }

        let entry = self.entries.entry(id).or_default();
        entry.allocation = entry.allocation.saturating_add(assets);
        let allocation = entry.allocation;
        self.total_allocations = self.total_allocations.saturating_add(assets);
        self.active.insert(id);

        info!(%id, assets, allocation, "allocated");
        Ok(AdapterReceipt {
            ids: vec![id],
            delta: assets as i128,
        })
    }

    /// Releases allocation back toward the vault.
    ///
    /// `Regular` context demands the full amount be idle and never
    /// partially fills. `Forced` context is the exit valve: it fills
    /// `min(request, slack, physical idle)` and reports a partial fill
    /// distinctly instead of failing.
    pub fn deallocate(
        &mut self,
        caller: Address,
        request: &AllocationRequest,
        assets: u64,
        context: DeallocateContext,
        token: &TokenLedger,
    ) -> Result<DeallocateOutcome, EscrowError> {
        self.require_vault(caller)?;
        let id = request.id;
        if !self.entries.contains_key(&id) {
            return Err(EscrowError::StrategyNotActive(id));
        }
        let idle = token.balance_of(&self.address);

        let filled = match context {
            DeallocateContext::Regular => {
                if assets > idle {
                    return Err(EscrowError::InsufficientIdleBalance {
                        available: idle,
                        requested: assets,
                    });
                }
                assets
            }
            DeallocateContext::Forced => {
                let slack = self.entry(&id).slack();
                assets.min(slack).min(idle)
            }
        };
        let partial = filled < assets;
        if partial {
            warn!(%id, requested = assets, filled, "forced deallocation partially filled");
        }

        let entry = self.entries.entry(id).or_default();
        let decrease = filled.min(entry.allocation);
        entry.allocation -= decrease;
        self.sub_total_allocations(decrease);
        self.retire_if_empty(&id);

        Ok(DeallocateOutcome {
            ids: vec![id],
            delta: -(decrease as i128),
            filled,
            partial,
        })
    }

    // -- strategy execution -------------------------------------------------

    /// Executes a whitelisted multicall under the standard 10% circuit
    /// breaker, accounting any balance decrease as a new external
    /// deployment.
    pub fn execute_strategy(
        &mut self,
        caller: Address,
        id: AllocationId,
        calls: &[StrategyCall],
        executor: &mut dyn CallExecutor,
        token: &mut TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        self.run_calls(caller, id, calls, executor, token, ExecutionMode::Standard,
            ExecutionKind::Deploy, now)
    }

    /// Like [`execute_strategy`](Self::execute_strategy) but with a
    /// caller-supplied loss bound. The bound may only tighten the
    /// breaker, never loosen it.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_strategy_with_slippage(
        &mut self,
        caller: Address,
        id: AllocationId,
        calls: &[StrategyCall],
        max_loss_bps: u64,
        executor: &mut dyn CallExecutor,
        token: &mut TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        if max_loss_bps > CIRCUIT_BREAKER_BPS {
            return Err(EscrowError::SlippageTooLoose { max_loss_bps });
        }
        self.run_calls(caller, id, calls, executor, token,
            ExecutionMode::WithSlippage { max_loss_bps }, ExecutionKind::Deploy, now)
    }

    /// Audited escape hatch: executes without the circuit breaker. Every
    /// use is logged loudly.
    pub fn execute_strategy_bypass_circuit_breaker(
        &mut self,
        caller: Address,
        id: AllocationId,
        calls: &[StrategyCall],
        executor: &mut dyn CallExecutor,
        token: &mut TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        warn!(%id, "circuit breaker bypassed for strategy execution");
        self.run_calls(caller, id, calls, executor, token, ExecutionMode::Bypass,
            ExecutionKind::Deploy, now)
    }

    /// Withdrawal variant: balance increases are accounted as
    /// repatriation of external deposits, and proceeds above the required
    /// idle floor are swept back to the vault.
    pub fn withdraw_from_strategy(
        &mut self,
        caller: Address,
        id: AllocationId,
        calls: &[StrategyCall],
        executor: &mut dyn CallExecutor,
        token: &mut TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        self.run_calls(caller, id, calls, executor, token, ExecutionMode::Standard,
            ExecutionKind::Withdraw, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_calls(
        &mut self,
        caller: Address,
        id: AllocationId,
        calls: &[StrategyCall],
        executor: &mut dyn CallExecutor,
        token: &mut TokenLedger,
        mode: ExecutionMode,
        kind: ExecutionKind,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        let config = match self.strategies.get(&id) {
            Some(cfg) if cfg.active => cfg,
            _ => return Err(EscrowError::StrategyNotActive(id)),
        };
        if caller != config.agent && caller != self.owner {
            return Err(EscrowError::NotAuthorizedExecutor(caller));
        }

        // Whitelist every call before executing any.
        for call in calls {
            if !self.whitelist.is_allowed(&call.target, &call.selector) {
                return Err(EscrowError::FunctionNotWhitelisted {
                    target: call.target,
                    selector: call.selector,
                });
            }
        }

        let pre = token.balance_of(&self.address);
        for call in calls {
            executor
                .execute(token, call)
                .map_err(|CallFailure(reason)| EscrowError::CallFailed(reason))?;
        }
        let post = token.balance_of(&self.address);

        if post < pre {
            let loss = pre - post;
            let breaker_bps = match mode {
                ExecutionMode::Standard => Some(CIRCUIT_BREAKER_BPS),
                ExecutionMode::WithSlippage { max_loss_bps } => Some(max_loss_bps),
                ExecutionMode::Bypass => None,
            };
            if let Some(bps) = breaker_bps {
                let max_loss = (pre as u128 * bps as u128 / BPS_ONE as u128) as u64;
                if loss > max_loss {
                    warn!(%id, loss, max_loss, "circuit breaker tripped");
                    return Err(EscrowError::ExcessiveBalanceLoss { loss, max_loss });
                }
            }

            let config = match self.strategies.get_mut(&id) {
                Some(cfg) => cfg,
                None => return Err(EscrowError::StrategyNotActive(id)),
            };
            if config.charge_daily(loss, now).is_none() {
                return Err(EscrowError::DailyLimitExceeded {
                    requested: loss,
                    used: config.daily_used,
                    limit: config.daily_limit,
                });
            }

            let entry = self.entries.entry(id).or_default();
            entry.external_deposits = entry.external_deposits.saturating_add(loss);
            self.total_external_deposits = self.total_external_deposits.saturating_add(loss);
            self.active.insert(id);
            info!(%id, deployed = loss, "external deployment recorded");
        } else if post > pre && kind == ExecutionKind::Withdraw {
            let gain = post - pre;
            let entry = self.entries.entry(id).or_default();
            let reduction = gain
                .min(entry.external_deposits)
                .min(self.total_external_deposits);
            entry.external_deposits -= reduction;
            self.sub_total_external_raw(reduction);
            info!(%id, repatriated = gain, reduction, "external deposits reduced");
            self.retire_if_empty(&id);

            // Sweep proceeds above the idle floor back to the vault.
            let idle = token.balance_of(&self.address);
            let sweep = gain.min(idle.saturating_sub(self.required_idle));
            if sweep > 0 {
                token.transfer(self.address, self.vault, sweep)?;
            }
        }
        Ok(())
    }

    // -- valuation ----------------------------------------------------------

    /// The valuation entry point consumed by the vault's share-price
    /// math. Degrades in a fixed priority order; see module docs.
    pub fn real_assets(
        &self,
        oracle: &ValuationOracle,
        token: &TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<u64, EscrowError> {
        let idle = token.balance_of(&self.address);
        let allocated_in_adapter = self
            .total_allocations
            .saturating_sub(self.total_external_deposits)
            .min(idle);

        let oracle_total = self
            .total_id
            .and_then(|id| oracle.get_value(&id, now).ok())
            .filter(|value| *value > 0);

        if let Some(total) = oracle_total {
            let health = oracle.valuation_health(self, now);
            if health.is_healthy() && !self.emergency {
                return Ok(total);
            }
            return Ok(haircut(total));
        }

        if self.total_allocations == 0 && self.total_external_deposits == 0 {
            // Legitimate empty state, not an error.
            return Ok(0);
        }

        if self.emergency {
            let baseline = allocated_in_adapter.saturating_add(self.total_external_deposits);
            let floor = haircut(baseline);
            if let Some(cached) = self.cached {
                if (now - cached.at).num_seconds() <= CACHE_MAX_AGE_SECS {
                    return Ok(cached.value.min(floor));
                }
            }
            return Ok(floor);
        }

        Err(EscrowError::ValuationUnavailable)
    }

    // -- reconciliation -----------------------------------------------------

    /// Snaps one strategy's external-deposit tracking to the oracle's
    /// per-strategy value. Loss recognition is bounded by what the oracle
    /// actually reports; large drift is logged, never auto-resolved.
    pub fn sync_strategy_with_valuer(
        &mut self,
        caller: Address,
        id: AllocationId,
        oracle: &ValuationOracle,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        let value = oracle
            .get_value(&id, now)
            .map_err(|_| EscrowError::ValuationUnavailable)?;

        let entry = self.entries.entry(id).or_default();
        let old = entry.external_deposits;
        if value == old {
            return Ok(());
        }
        warn!(%id, old, new = value, "external deposit drift corrected from valuer");
        entry.external_deposits = value;
        if value > old {
            self.total_external_deposits = self.total_external_deposits.saturating_add(value - old);
            self.active.insert(id);
        } else {
            self.sub_total_external_raw(old - value);
            self.retire_if_empty(&id);
        }
        Ok(())
    }

    /// Recomputes the global external-deposit aggregate from the
    /// per-strategy entries, restoring the sum invariant after any drift.
    pub fn sync_external_deposits_per_strategy(
        &mut self,
        caller: Address,
    ) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        let sum: u64 = self.entries.values().map(|e| e.external_deposits).sum();
        if sum != self.total_external_deposits {
            warn!(
                aggregate = self.total_external_deposits,
                recomputed = sum,
                "external deposit aggregate desync detected"
            );
            self.total_external_deposits = sum;
        }
        Ok(())
    }

    /// Manually reduces one strategy's external-deposit tracking, clamped
    /// to what is recorded. The owner's tool for recognizing losses the
    /// oracle cannot see.
    pub fn reduce_external_deposits(
        &mut self,
        caller: Address,
        id: AllocationId,
        amount: u64,
    ) -> Result<u64, EscrowError> {
        self.require_owner(caller)?;
        let entry = self.entries.entry(id).or_default();
        let reduction = amount.min(entry.external_deposits);
        entry.external_deposits -= reduction;
        self.sub_total_external_raw(reduction);
        warn!(%id, requested = amount, reduction, "external deposits manually reduced");
        self.retire_if_empty(&id);
        Ok(reduction)
    }

    /// Caches a fresh oracle total for use as the emergency floor.
    /// Readings outside 75%–150% of tracked allocations are treated as a
    /// halt signal and rejected.
    pub fn refresh_cached_valuation(
        &mut self,
        caller: Address,
        oracle: &ValuationOracle,
        now: DateTime<Utc>,
    ) -> Result<u64, EscrowError> {
        self.require_owner(caller)?;
        let id = self.total_id.ok_or(EscrowError::ValuationUnavailable)?;
        let reading = oracle
            .get_value(&id, now)
            .map_err(|_| EscrowError::ValuationUnavailable)?;

        if self.total_allocations > 0 {
            let tracked = self.total_allocations as u128;
            let low = (tracked * DEVIATION_BAND_LOW_BPS as u128 / BPS_ONE as u128) as u64;
            let high = (tracked * DEVIATION_BAND_HIGH_BPS as u128 / BPS_ONE as u128) as u64;
            if reading < low || reading > high {
                warn!(reading, tracked = self.total_allocations, "cache refresh outside band");
                return Err(EscrowError::CacheDeviation {
                    reading,
                    tracked: self.total_allocations,
                });
            }
        }
        self.cached = Some(CachedValuation { value: reading, at: now });
        Ok(reading)
    }

    // -- emergency mode -----------------------------------------------------

    /// Toggles emergency mode. Entering invalidates the valuation cache
    /// immediately. Exiting requires a fresh successful oracle read,
    /// nonzero while allocations exist — you cannot declare the all-clear
    /// while the valuer is still dark.
    pub fn set_emergency_mode(
        &mut self,
        caller: Address,
        enabled: bool,
        oracle: &ValuationOracle,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        self.require_owner(caller)?;
        if self.emergency == enabled {
            return Err(EscrowError::EmergencyUnchanged(enabled));
        }
        if enabled {
            self.cached = None;
            warn!("escrow entering emergency mode; valuation cache invalidated");
            self.emergency = true;
            return Ok(());
        }

        let id = self.total_id.ok_or(EscrowError::OracleStillUnavailable)?;
        match oracle.get_value(&id, now) {
            Ok(value) if self.total_allocations == 0 || value > 0 => {
                warn!("escrow exiting emergency mode");
                self.emergency = false;
                Ok(())
            }
            _ => Err(EscrowError::OracleStillUnavailable),
        }
    }

    // -- internals ----------------------------------------------------------

    fn require_vault(&self, caller: Address) -> Result<(), EscrowError> {
        if caller != self.vault {
            return Err(EscrowError::NotVault(caller));
        }
        Ok(())
    }

    fn require_owner(&self, caller: Address) -> Result<(), EscrowError> {
        if caller != self.owner {
            return Err(EscrowError::NotOwner(caller));
        }
        Ok(())
    }

    fn sub_total_allocations(&mut self, amount: u64) {
        if amount > self.total_allocations {
            warn!(
                aggregate = self.total_allocations,
                decrement = amount,
                "allocation aggregate desync; clamping to zero"
            );
            self.total_allocations = 0;
        } else {
            self.total_allocations -= amount;
        }
    }

    fn sub_total_external_raw(&mut self, amount: u64) {
        if amount > self.total_external_deposits {
            warn!(
                aggregate = self.total_external_deposits,
                decrement = amount,
                "external deposit aggregate desync; clamping to zero"
            );
            self.total_external_deposits = 0;
        } else {
            self.total_external_deposits -= amount;
        }
    }

    fn retire_if_empty(&mut self, id: &AllocationId) {
        if self.entry(id).is_empty() {
            self.active.remove(id);
            self.entries.remove(id);
        }
    }
}

/// Applies the fixed staleness/emergency haircut.
fn haircut(value: u64) -> u64 {
    (value as u128 * (BPS_ONE - STALENESS_HAIRCUT_BPS) as u128 / BPS_ONE as u128) as u64
}

impl ActiveAllocationSource for EscrowLedger {
    fn escrow_address(&self) -> Address {
        self.address
    }

    fn active_allocation_ids(&self) -> Result<Vec<AllocationId>, EnumerationFailed> {
        Ok(self.active.iter().copied().collect())
    }
}
