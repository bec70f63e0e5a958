//! # Vault Accounting
//!
//! The per-operation state machine every top-level entry point walks:
//! **accrue interest → gate checks → core effect → postconditions**. One
//! valuation snapshot (`first_total_assets`) is taken per operation and
//! reused by any nested accrual, so a caller cannot move the snapshot
//! mid-operation no matter how it re-enters.
//!
//! Share-price math uses the virtual-shares offset throughout: supply and
//! assets each get a constant added before the ratio, which pins the
//! empty-vault price at 1 and kills the first-depositor inflation attack.
//!
//! Interest recognition is rate-bounded. `real_assets` may jump by any
//! amount; the vault recognizes at most `max_rate × elapsed` of it per
//! accrual, so a poisoned valuation cannot be monetized in one step.
//! Losses have no such bound — they are recognized immediately and in
//! full.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BPS_ONE, DEFAULT_MAX_RATE_PER_SECOND, MAX_FORCE_DEALLOCATE_PENALTY_BPS,
    MAX_MANAGEMENT_FEE_BPS, MAX_PERFORMANCE_FEE_BPS, RATE_SCALE, SECONDS_PER_YEAR,
    VIRTUAL_ASSETS, VIRTUAL_SHARES};
use crate::escrow::ledger::{AdapterReceipt, DeallocateContext, DeallocateOutcome, EscrowError};
use crate::escrow::strategy::AllocationRequest;
use crate::token::{TokenError, TokenLedger};
use crate::types::{Address, AllocationId};

use super::adapter::StrategyAdapter;
use super::caps::{CapConfig, CapEnforcer, CapError};
use super::gate::{GateKind, GatePredicate, GateSet};
use super::shares::{ShareError, ShareLedger};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("caller {0} is not the vault owner")]
    NotOwner(Address),

    #[error("caller {0} is not the allocator")]
    NotAllocator(Address),

    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// The deposit is too small to mint a single share at the current
    /// price.
    #[error("amount converts to zero shares")]
    ZeroShares,

    #[error("account {account} rejected by the {gate} gate")]
    GateRejected { account: Address, gate: GateKind },

    /// A shortfall deallocation came back short. Withdrawals must fully
    /// deliver or fail.
    #[error("shortfall only partially filled: requested {requested}, filled {filled}")]
    PartialFill { requested: u64, filled: u64 },

    /// Idle balance insufficient and no default strategy to pull from.
    #[error("no default strategy configured")]
    NoDefaultStrategy,

    #[error("penalty {bps}bps exceeds the {MAX_FORCE_DEALLOCATE_PENALTY_BPS}bps ceiling")]
    PenaltyTooHigh { bps: u64 },

    #[error("fee {bps}bps exceeds the {max}bps ceiling")]
    FeeTooHigh { bps: u64, max: u64 },

    #[error(transparent)]
    Cap(#[from] CapError),

    #[error(transparent)]
    Shares(#[from] ShareError),

    #[error("token ledger error: {0}")]
    Token(#[from] TokenError),

    #[error("adapter error: {0}")]
    Adapter(#[from] EscrowError),
}

/// The vault engine. Owns shares, caps, gates, and the stored-assets
/// accounting; consumes the token ledger and an adapter per call.
pub struct Vault {
    address: Address,
    owner: Address,
    allocator: Address,
    shares: ShareLedger,
    gates: GateSet,
    caps: CapEnforcer,
    /// Vault-side mirror of per-identifier allocation, maintained from
    /// adapter receipts. The cap checks read this, never the escrow.
    allocations: HashMap<AllocationId, u64>,
    total_assets: u64,
    /// Per-operation accrual snapshot. `Some` means interest has already
    /// been recognized within the current top-level operation.
    first_total_assets: Option<u64>,
    last_update: DateTime<Utc>,
    max_rate_per_second: u128,
    performance_fee_bps: u64,
    management_fee_bps: u64,
    performance_recipient: Address,
    management_recipient: Address,
    default_strategy: Option<AllocationRequest>,
    force_deallocate_penalty_bps: u64,
}

impl Vault {
    pub fn new(
        address: Address,
        owner: Address,
        allocator: Address,
        timelock_delay_secs: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            owner,
            allocator,
            shares: ShareLedger::new(),
            gates: GateSet::new(),
            caps: CapEnforcer::new(timelock_delay_secs),
            allocations: HashMap::new(),
            total_assets: 0,
            first_total_assets: None,
            last_update: created_at,
            max_rate_per_second: DEFAULT_MAX_RATE_PER_SECOND,
            performance_fee_bps: 0,
            management_fee_bps: 0,
            performance_recipient: owner,
            management_recipient: owner,
            default_strategy: None,
            force_deallocate_penalty_bps: 0,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn total_assets(&self) -> u64 {
        self.total_assets
    }

    pub fn total_supply(&self) -> u64 {
        self.shares.total_supply()
    }

    pub fn balance_of(&self, holder: &Address) -> u64 {
        self.shares.balance_of(holder)
    }

    pub fn allocation_of(&self, id: &AllocationId) -> u64 {
        self.allocations.get(id).copied().unwrap_or(0)
    }

    /// Assets → shares at the current stored price, rounding down.
    pub fn convert_to_shares(&self, assets: u64) -> u64 {
        self.to_shares_down(assets)
    }

    /// Shares → assets at the current stored price, rounding down.
    pub fn convert_to_assets(&self, shares: u64) -> u64 {
        self.to_assets_down(shares)
    }

    // -- share-price math ---------------------------------------------------

    fn to_shares_down(&self, assets: u64) -> u64 {
        let supply = self.shares.total_supply() as u128 + VIRTUAL_SHARES;
        let total = self.total_assets as u128 + VIRTUAL_ASSETS;
        (assets as u128 * supply / total) as u64
    }

    fn to_shares_up(&self, assets: u64) -> u64 {
        let supply = self.shares.total_supply() as u128 + VIRTUAL_SHARES;
        let total = self.total_assets as u128 + VIRTUAL_ASSETS;
        ((assets as u128 * supply + total - 1) / total) as u64
    }

    fn to_assets_down(&self, shares: u64) -> u64 {
        let supply = self.shares.total_supply() as u128 + VIRTUAL_SHARES;
        let total = self.total_assets as u128 + VIRTUAL_ASSETS;
        (shares as u128 * total / supply) as u64
    }

    fn to_assets_up(&self, shares: u64) -> u64 {
        let supply = self.shares.total_supply() as u128 + VIRTUAL_SHARES;
        let total = self.total_assets as u128 + VIRTUAL_ASSETS;
        ((shares as u128 * total + supply - 1) / supply) as u64
    }

    // -- accrual ------------------------------------------------------------

    /// Recognizes interest since the last update and mints fee shares.
    /// Idempotent within one top-level operation: if the snapshot is
    /// already set, this is a no-op.
    fn accrue(
        &mut self,
        token: &TokenLedger,
        adapter: &dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        if self.first_total_assets.is_some() {
            return Ok(());
        }

        let idle = token.balance_of(&self.address);
        let external = adapter.real_assets(token, now)?;
        let real_total = idle.saturating_add(external);
        let stored = self.total_assets;
        let elapsed = (now - self.last_update).num_seconds().max(0) as u128;

        let new_total = if real_total > stored {
            // Saturating: an extreme owner-set rate must widen the bound,
            // never wrap it.
            let max_interest = ((stored as u128)
                .saturating_mul(self.max_rate_per_second)
                .saturating_mul(elapsed)
                / RATE_SCALE)
                .min(u64::MAX as u128) as u64;
            let recognized = (real_total - stored).min(max_interest);
            if recognized < real_total - stored {
                warn!(
                    reported = real_total - stored,
                    recognized, "interest recognition clipped by rate bound"
                );
            }
            stored + recognized
        } else {
            // Losses are recognized in full, immediately.
            real_total
        };

        let interest = new_total.saturating_sub(stored);
        let perf_fee =
            (interest as u128 * self.performance_fee_bps as u128 / BPS_ONE as u128) as u64;
        let mgmt_fee = (new_total as u128 * self.management_fee_bps as u128 * elapsed
            / (BPS_ONE as u128 * SECONDS_PER_YEAR as u128)) as u64;

        // Both fees convert at the pre-fee price: same supply/total
        // snapshot for both, before either mint.
        let supply = self.shares.total_supply() as u128 + VIRTUAL_SHARES;
        let total = new_total as u128 + VIRTUAL_ASSETS;
        let perf_shares = (perf_fee as u128 * supply / total) as u64;
        let mgmt_shares = (mgmt_fee as u128 * supply / total) as u64;

        if perf_shares > 0 {
            self.shares.mint(self.performance_recipient, perf_shares)?;
        }
        if mgmt_shares > 0 {
            self.shares.mint(self.management_recipient, mgmt_shares)?;
        }
        if interest > 0 || perf_shares > 0 || mgmt_shares > 0 {
            info!(interest, perf_shares, mgmt_shares, new_total, "interest accrued");
        }

        self.total_assets = new_total;
        self.first_total_assets = Some(new_total);
        self.last_update = now;
        Ok(())
    }

    fn begin(
        &mut self,
        token: &TokenLedger,
        adapter: &dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        self.first_total_assets = None;
        self.accrue(token, adapter, now)
    }

    fn finish(&mut self) {
        self.first_total_assets = None;
    }

    /// Standalone keeper entry point: accrue and return the resulting
    /// total assets.
    pub fn accrue_interest(
        &mut self,
        token: &TokenLedger,
        adapter: &dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<u64, VaultError> {
        self.begin(token, adapter, now)?;
        self.finish();
        Ok(self.total_assets)
    }

    // -- deposit / mint -----------------------------------------------------

    /// Pulls `assets` from `caller`, mints shares to `on_behalf`. If a
    /// default strategy is configured, the fresh liquidity is allocated
    /// to it on a best-effort basis (a cap rejection there does not fail
    /// the deposit).
    ///
    /// Note the relative cap leg reads the pre-deposit accrual snapshot,
    /// so the first deposit into an empty vault can never clear a
    /// relative cap: its auto-allocation is skipped and the assets stay
    /// idle until a later operation allocates them.
    pub fn deposit(
        &mut self,
        caller: Address,
        assets: u64,
        on_behalf: Address,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<u64, VaultError> {
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;
        self.check_gate(GateKind::SendAssets, &caller)?;
        self.check_gate(GateKind::ReceiveShares, &on_behalf)?;

        let shares = self.to_shares_down(assets);
        if shares == 0 {
            return Err(VaultError::ZeroShares);
        }

        token.transfer(caller, self.address, assets)?;
        self.shares.mint(on_behalf, shares)?;
        self.total_assets = self.total_assets.saturating_add(assets);
        info!(%on_behalf, assets, shares, "deposit");

        self.auto_allocate(assets, token, adapter, now);
        self.finish();
        Ok(shares)
    }

    /// Exact-shares variant of deposit: mints `shares` to `on_behalf`
    /// and pulls the asset cost, rounded against the depositor.
    pub fn mint(
        &mut self,
        caller: Address,
        shares: u64,
        on_behalf: Address,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<u64, VaultError> {
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;
        self.check_gate(GateKind::SendAssets, &caller)?;
        self.check_gate(GateKind::ReceiveShares, &on_behalf)?;

        let assets = self.to_assets_up(shares);
        token.transfer(caller, self.address, assets)?;
        self.shares.mint(on_behalf, shares)?;
        self.total_assets = self.total_assets.saturating_add(assets);
        info!(%on_behalf, assets, shares, "mint");

        self.auto_allocate(assets, token, adapter, now);
        self.finish();
        Ok(assets)
    }

    fn auto_allocate(
        &mut self,
        assets: u64,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) {
        let Some(request) = self.default_strategy.clone() else {
            return;
        };
        if let Err(err) = self.allocate_core(&request, assets, token, adapter, now) {
            warn!(%err, "default-strategy auto-allocation skipped");
        }
    }

    // -- withdraw / redeem --------------------------------------------------

    /// Burns shares from `on_behalf` and delivers exactly `assets` to
    /// `receiver`, pulling any idle shortfall from the default strategy.
    /// A shortfall that cannot be fully furnished fails the whole
    /// withdrawal.
    pub fn withdraw(
        &mut self,
        caller: Address,
        assets: u64,
        receiver: Address,
        on_behalf: Address,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<u64, VaultError> {
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;
        let shares = self.to_shares_up(assets);
        self.settle_out(caller, shares, assets, receiver, on_behalf, token, adapter, now)?;
        self.finish();
        Ok(shares)
    }

    /// Burns exactly `shares` and delivers their asset value, rounded
    /// against the redeemer.
    pub fn redeem(
        &mut self,
        caller: Address,
        shares: u64,
        receiver: Address,
        on_behalf: Address,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<u64, VaultError> {
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;
        let assets = self.to_assets_down(shares);
        self.settle_out(caller, shares, assets, receiver, on_behalf, token, adapter, now)?;
        self.finish();
        Ok(assets)
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_out(
        &mut self,
        caller: Address,
        shares: u64,
        assets: u64,
        receiver: Address,
        on_behalf: Address,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        self.check_gate(GateKind::SendShares, &on_behalf)?;
        self.check_gate(GateKind::ReceiveAssets, &receiver)?;

        // Validate everything fallible before any mutation.
        let held = self.shares.balance_of(&on_behalf);
        if held < shares {
            return Err(ShareError::InsufficientShares {
                holder: on_behalf,
                available: held,
                requested: shares,
            }
            .into());
        }
        if caller != on_behalf {
            let allowance = self.shares.allowance(&on_behalf, &caller);
            if allowance != u64::MAX && allowance < shares {
                return Err(ShareError::InsufficientAllowance {
                    owner: on_behalf,
                    spender: caller,
                    available: allowance,
                    requested: shares,
                }
                .into());
            }
        }

        let idle = token.balance_of(&self.address);
        if idle < assets {
            let shortfall = assets - idle;
            let request = self
                .default_strategy
                .clone()
                .ok_or(VaultError::NoDefaultStrategy)?;
            let outcome = adapter.deallocate(
                token,
                &request,
                shortfall,
                DeallocateContext::Regular,
                now,
            )?;
            self.decrement_allocations(&outcome);
            if outcome.filled < shortfall {
                return Err(VaultError::PartialFill {
                    requested: shortfall,
                    filled: outcome.filled,
                });
            }
        }

        if caller != on_behalf {
            self.shares.spend_allowance(on_behalf, caller, shares)?;
        }
        self.shares.burn(on_behalf, shares)?;
        if assets > self.total_assets {
            warn!(
                total = self.total_assets,
                out = assets,
                "withdrawal exceeds stored total; clamping"
            );
            self.total_assets = 0;
        } else {
            self.total_assets -= assets;
        }
        token.transfer(self.address, receiver, assets)?;
        info!(%receiver, %on_behalf, assets, shares, "withdrawal settled");
        Ok(())
    }

    // -- allocation passthroughs --------------------------------------------

    /// Moves idle vault assets into the adapter and validates every
    /// touched identifier against its caps. On a cap rejection the
    /// allocation is compensated with a reverse deallocation, so the
    /// operation has no net effect.
    pub fn allocate(
        &mut self,
        caller: Address,
        request: &AllocationRequest,
        assets: u64,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<AdapterReceipt, VaultError> {
        self.require_allocator(caller)?;
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;
        let receipt = self.allocate_core(request, assets, token, adapter, now)?;
        self.finish();
        Ok(receipt)
    }

    fn allocate_core(
        &mut self,
        request: &AllocationRequest,
        assets: u64,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<AdapterReceipt, VaultError> {
        token.transfer(self.address, adapter.address(), assets)?;
        let receipt = adapter.allocate(token, request, assets, now)?;

        for id in &receipt.ids {
            let entry = self.allocations.entry(*id).or_insert(0);
            *entry = entry.saturating_add(receipt.delta.unsigned_abs() as u64);
        }

        let snapshot = self.first_total_assets.unwrap_or(self.total_assets);
        for id in &receipt.ids {
            if let Err(err) = self.caps.check_allocation(id, self.allocation_of(id), snapshot) {
                self.compensate_allocation(request, assets, &receipt, token, adapter, now);
                return Err(err.into());
            }
        }
        Ok(receipt)
    }

    /// Reverses a just-made allocation after a failed cap check: regular
    /// deallocate plus token return. The funds never left the escrow's
    /// idle balance, so the reverse cannot legitimately fail; if it does
    /// anyway, that is logged as an accounting incident.
    fn compensate_allocation(
        &mut self,
        request: &AllocationRequest,
        assets: u64,
        receipt: &AdapterReceipt,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) {
        match adapter.deallocate(token, request, assets, DeallocateContext::Regular, now) {
            Ok(outcome) => self.decrement_allocations(&outcome),
            Err(err) => {
                warn!(%err, "compensating deallocation failed after cap rejection");
                for id in &receipt.ids {
                    let entry = self.allocations.entry(*id).or_insert(0);
                    *entry = entry.saturating_sub(receipt.delta.unsigned_abs() as u64);
                }
            }
        }
    }

    /// Releases allocation through the regular path.
    pub fn deallocate(
        &mut self,
        caller: Address,
        request: &AllocationRequest,
        assets: u64,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<DeallocateOutcome, VaultError> {
        self.require_allocator(caller)?;
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;
        self.caps
            .check_deallocation(&request.id, self.allocation_of(&request.id))?;

        let outcome =
            adapter.deallocate(token, request, assets, DeallocateContext::Regular, now)?;
        self.decrement_allocations(&outcome);
        self.finish();
        Ok(outcome)
    }

    /// The guaranteed exit valve: pulls from an arbitrary strategy via
    /// the forced partial-fill path, charging a penalty burned from
    /// `on_behalf` in the remaining holders' favor. Anyone may call it
    /// against their own shares (or with allowance).
    #[allow(clippy::too_many_arguments)]
    pub fn force_deallocate(
        &mut self,
        caller: Address,
        request: &AllocationRequest,
        assets: u64,
        on_behalf: Address,
        token: &mut TokenLedger,
        adapter: &mut dyn StrategyAdapter,
        now: DateTime<Utc>,
    ) -> Result<DeallocateOutcome, VaultError> {
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.begin(token, adapter, now)?;

        let outcome =
            adapter.deallocate(token, request, assets, DeallocateContext::Forced, now)?;
        self.decrement_allocations(&outcome);

        let penalty_assets = (outcome.filled as u128 * self.force_deallocate_penalty_bps as u128
            / BPS_ONE as u128) as u64;
        let penalty_shares = self.to_shares_up(penalty_assets);
        if penalty_shares > 0 {
            if caller != on_behalf {
                self.shares.spend_allowance(on_behalf, caller, penalty_shares)?;
            }
            // Burned without reducing total assets: the penalty value
            // accrues to the remaining holders.
            self.shares.burn(on_behalf, penalty_shares)?;
            info!(%on_behalf, penalty_shares, "force-deallocate penalty burned");
        }
        self.finish();
        Ok(outcome)
    }

    fn decrement_allocations(&mut self, outcome: &DeallocateOutcome) {
        for id in &outcome.ids {
            let entry = self.allocations.entry(*id).or_insert(0);
            *entry = entry.saturating_sub(outcome.delta.unsigned_abs() as u64);
        }
    }

    // -- share transfers ----------------------------------------------------

    pub fn transfer_shares(
        &mut self,
        caller: Address,
        to: Address,
        amount: u64,
    ) -> Result<(), VaultError> {
        self.check_gate(GateKind::SendShares, &caller)?;
        self.check_gate(GateKind::ReceiveShares, &to)?;
        self.shares.transfer(caller, to, amount)?;
        Ok(())
    }

    pub fn approve_shares(&mut self, caller: Address, spender: Address, amount: u64) {
        self.shares.approve(caller, spender, amount);
    }

    // -- administration -----------------------------------------------------

    pub fn set_fees(
        &mut self,
        caller: Address,
        performance_bps: u64,
        management_bps: u64,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        if performance_bps > MAX_PERFORMANCE_FEE_BPS {
            return Err(VaultError::FeeTooHigh {
                bps: performance_bps,
                max: MAX_PERFORMANCE_FEE_BPS,
            });
        }
        if management_bps > MAX_MANAGEMENT_FEE_BPS {
            return Err(VaultError::FeeTooHigh {
                bps: management_bps,
                max: MAX_MANAGEMENT_FEE_BPS,
            });
        }
        self.performance_fee_bps = performance_bps;
        self.management_fee_bps = management_bps;
        Ok(())
    }

    pub fn set_fee_recipients(
        &mut self,
        caller: Address,
        performance: Address,
        management: Address,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.performance_recipient = performance;
        self.management_recipient = management;
        Ok(())
    }

    pub fn set_max_rate(&mut self, caller: Address, rate_per_second: u128) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.max_rate_per_second = rate_per_second;
        Ok(())
    }

    pub fn set_default_strategy(
        &mut self,
        caller: Address,
        request: Option<AllocationRequest>,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.default_strategy = request;
        Ok(())
    }

    pub fn set_force_deallocate_penalty(
        &mut self,
        caller: Address,
        bps: u64,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        if bps > MAX_FORCE_DEALLOCATE_PENALTY_BPS {
            return Err(VaultError::PenaltyTooHigh { bps });
        }
        self.force_deallocate_penalty_bps = bps;
        Ok(())
    }

    pub fn set_allocator(&mut self, caller: Address, allocator: Address) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.allocator = allocator;
        Ok(())
    }

    pub fn set_gate(
        &mut self,
        caller: Address,
        kind: GateKind,
        predicate: Option<Box<dyn GatePredicate>>,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.gates.set(kind, predicate);
        Ok(())
    }

    // Cap administration rides the shared timelock: decreases are
    // immediate, increases wait out the delay.

    pub fn decrease_cap(
        &mut self,
        caller: Address,
        id: AllocationId,
        new: CapConfig,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.caps.decrease_cap(id, new)?;
        Ok(())
    }

    pub fn submit_cap_increase(
        &mut self,
        caller: Address,
        id: AllocationId,
        new: CapConfig,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, VaultError> {
        self.require_owner(caller)?;
        Ok(self.caps.submit_cap_increase(id, new, now)?)
    }

    pub fn execute_cap_increase(
        &mut self,
        caller: Address,
        id: AllocationId,
        new: CapConfig,
        now: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.caps.execute_cap_increase(id, new, now)?;
        Ok(())
    }

    pub fn revoke_cap_increase(
        &mut self,
        caller: Address,
        id: AllocationId,
        new: CapConfig,
    ) -> Result<(), VaultError> {
        self.require_owner(caller)?;
        self.caps.revoke_cap_increase(id, new)?;
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    fn check_gate(&self, kind: GateKind, account: &Address) -> Result<(), VaultError> {
        if !self.gates.allows(kind, account) {
            return Err(VaultError::GateRejected {
                account: *account,
                gate: kind,
            });
        }
        Ok(())
    }

    fn require_owner(&self, caller: Address) -> Result<(), VaultError> {
        if caller != self.owner {
            return Err(VaultError::NotOwner(caller));
        }
        Ok(())
    }

    fn require_allocator(&self, caller: Address) -> Result<(), VaultError> {
        if caller != self.allocator && caller != self.owner {
            return Err(VaultError::NotAllocator(caller));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::ledger::EscrowError;
    use chrono::Duration;

    const VAULT: Address = Address([0x7A; 20]);
    const OWNER: Address = Address([0xAA; 20]);
    const ALLOCATOR: Address = Address([0xAC; 20]);
    const ALICE: Address = Address([0x01; 20]);
    const BOB: Address = Address([0x02; 20]);
    const ADAPTER: Address = Address([0xE5; 20]);

    fn t0() -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn strat() -> AllocationRequest {
        AllocationRequest::new(AllocationId::from_label("alpha"))
    }

    /// Minimal adapter: physically holds what is allocated to it, and
    /// models external worth with a settable knob.
    struct MockAdapter {
        address: Address,
        vault: Address,
        external: u64,
    }

    impl MockAdapter {
        fn new() -> Self {
            Self { address: ADAPTER, vault: VAULT, external: 0 }
        }
    }

    impl StrategyAdapter for MockAdapter {
        fn address(&self) -> Address {
            self.address
        }

        fn allocate(
            &mut self,
            _token: &mut TokenLedger,
            request: &AllocationRequest,
            assets: u64,
            _now: DateTime<Utc>,
        ) -> Result<AdapterReceipt, EscrowError> {
            Ok(AdapterReceipt { ids: vec![request.id], delta: assets as i128 })
        }

        fn deallocate(
            &mut self,
            token: &mut TokenLedger,
            request: &AllocationRequest,
            assets: u64,
            context: DeallocateContext,
            _now: DateTime<Utc>,
        ) -> Result<DeallocateOutcome, EscrowError> {
            let available = token.balance_of(&self.address);
            let filled = match context {
                DeallocateContext::Regular => {
                    if assets > available {
                        return Err(EscrowError::InsufficientIdleBalance {
                            available,
                            requested: assets,
                        });
                    }
                    assets
                }
                DeallocateContext::Forced => assets.min(available),
            };
            token.transfer(self.address, self.vault, filled)?;
            Ok(DeallocateOutcome {
                ids: vec![request.id],
                delta: -(filled as i128),
                filled,
                partial: filled < assets,
            })
        }

        fn real_assets(
            &self,
            token: &TokenLedger,
            _now: DateTime<Utc>,
        ) -> Result<u64, EscrowError> {
            Ok(token.balance_of(&self.address) + self.external)
        }
    }

    fn setup() -> (Vault, TokenLedger, MockAdapter) {
        let vault = Vault::new(VAULT, OWNER, ALLOCATOR, 3600, t0());
        let mut token = TokenLedger::new();
        token.mint(ALICE, 1_000_000).unwrap();
        (vault, token, MockAdapter::new())
    }

    fn raise_cap(vault: &mut Vault, absolute: u64, relative_bps: u64) {
        let cfg = CapConfig { absolute, relative_bps };
        vault.submit_cap_increase(OWNER, strat().id, cfg, t0()).unwrap();
        vault
            .execute_cap_increase(OWNER, strat().id, cfg, t0() + Duration::seconds(3600))
            .unwrap();
    }

    #[test]
    fn first_deposit_mints_one_to_one() {
        let (mut vault, mut token, mut adapter) = setup();
        let shares = vault
            .deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0())
            .unwrap();
        assert_eq!(shares, 1_000);
        assert_eq!(vault.total_assets(), 1_000);
        assert_eq!(vault.total_supply(), 1_000);
    }

    #[test]
    fn subsequent_deposits_do_not_move_the_price() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        let shares = vault
            .deposit(ALICE, 500, ALICE, &mut token, &mut adapter, t0())
            .unwrap();
        assert_eq!(shares, 500);
        // Price still 1.0.
        assert_eq!(vault.total_assets(), vault.total_supply());
        assert_eq!(vault.convert_to_assets(100), 100);
    }

    #[test]
    fn zero_amounts_rejected_up_front() {
        let (mut vault, mut token, mut adapter) = setup();
        assert!(matches!(
            vault.deposit(ALICE, 0, ALICE, &mut token, &mut adapter, t0()).unwrap_err(),
            VaultError::ZeroAmount
        ));
        assert!(matches!(
            vault.withdraw(ALICE, 0, ALICE, ALICE, &mut token, &mut adapter, t0()).unwrap_err(),
            VaultError::ZeroAmount
        ));
    }

    #[test]
    fn gate_rejection_names_the_gate() {
        struct DenyAll;
        impl GatePredicate for DenyAll {
            fn allows(&self, _account: &Address) -> bool {
                false
            }
        }

        let (mut vault, mut token, mut adapter) = setup();
        vault
            .set_gate(OWNER, GateKind::ReceiveShares, Some(Box::new(DenyAll)))
            .unwrap();
        let result = vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0());
        assert!(matches!(
            result.unwrap_err(),
            VaultError::GateRejected { gate: GateKind::ReceiveShares, .. }
        ));
        assert_eq!(vault.total_supply(), 0);
    }

    #[test]
    fn mint_rounds_asset_cost_up() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        let assets = vault
            .mint(ALICE, 300, BOB, &mut token, &mut adapter, t0())
            .unwrap();
        assert_eq!(assets, 300);
        assert_eq!(vault.balance_of(&BOB), 300);
    }

    #[test]
    fn withdraw_burns_and_delivers() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        let shares = vault
            .withdraw(ALICE, 400, BOB, ALICE, &mut token, &mut adapter, t0())
            .unwrap();
        assert_eq!(shares, 400);
        assert_eq!(token.balance_of(&BOB), 400);
        assert_eq!(vault.total_assets(), 600);
        assert_eq!(vault.balance_of(&ALICE), 600);
    }

    #[test]
    fn third_party_withdraw_needs_allowance() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        let denied = vault.withdraw(BOB, 100, BOB, ALICE, &mut token, &mut adapter, t0());
        assert!(matches!(
            denied.unwrap_err(),
            VaultError::Shares(ShareError::InsufficientAllowance { .. })
        ));

        vault.approve_shares(ALICE, BOB, 100);
        vault.withdraw(BOB, 100, BOB, ALICE, &mut token, &mut adapter, t0()).unwrap();
        assert_eq!(token.balance_of(&BOB), 100);
    }

    #[test]
    fn first_deposit_auto_allocation_skipped_under_relative_cap() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, 10_000, BPS_ONE);
        vault.set_default_strategy(OWNER, Some(strat())).unwrap();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        // The first deposit snapshots an empty vault, so even a 100%
        // relative cap resolves to zero and the auto-allocation is
        // compensated away. The deposit itself still lands.
        assert_eq!(vault.total_assets(), 1_000);
        assert_eq!(token.balance_of(&VAULT), 1_000);
        assert_eq!(vault.allocation_of(&strat().id), 0);
    }

    #[test]
    fn withdraw_pulls_shortfall_from_default_strategy() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, 10_000, BPS_ONE);
        vault.set_default_strategy(OWNER, Some(strat())).unwrap();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        // The second deposit snapshots the 1_000 already stored, so its
        // auto-allocation clears the relative cap and moves to the
        // adapter. The first deposit's 1_000 stays idle.
        vault.deposit(ALICE, 500, ALICE, &mut token, &mut adapter, t0()).unwrap();
        assert_eq!(token.balance_of(&VAULT), 1_000);
        assert_eq!(vault.allocation_of(&strat().id), 500);

        // Withdrawing 1_200 needs 200 more than sits idle; the shortfall
        // is pulled from the default strategy.
        vault
            .withdraw(ALICE, 1_200, ALICE, ALICE, &mut token, &mut adapter, t0())
            .unwrap();
        assert_eq!(token.balance_of(&ALICE), 1_000_000 - 1_500 + 1_200);
        assert_eq!(token.balance_of(&VAULT), 0);
        assert_eq!(vault.allocation_of(&strat().id), 300);
    }

    #[test]
    fn withdraw_without_default_strategy_fails_on_shortfall() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, 10_000, BPS_ONE);
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        vault
            .allocate(ALLOCATOR, &strat(), 800, &mut token, &mut adapter, t0())
            .unwrap();

        let result = vault.withdraw(ALICE, 500, ALICE, ALICE, &mut token, &mut adapter, t0());
        assert!(matches!(result.unwrap_err(), VaultError::NoDefaultStrategy));
    }

    #[test]
    fn allocate_enforces_absolute_cap_with_compensation() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, 100, BPS_ONE);
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        let result = vault.allocate(ALLOCATOR, &strat(), 101, &mut token, &mut adapter, t0());
        assert!(matches!(
            result.unwrap_err(),
            VaultError::Cap(CapError::AboveAbsoluteCap { cap: 100, .. })
        ));
        // Compensated: tokens back in the vault, mirror back to zero.
        assert_eq!(token.balance_of(&VAULT), 1_000);
        assert_eq!(vault.allocation_of(&strat().id), 0);

        vault.allocate(ALLOCATOR, &strat(), 100, &mut token, &mut adapter, t0()).unwrap();
        assert_eq!(vault.allocation_of(&strat().id), 100);
    }

    #[test]
    fn allocate_enforces_relative_cap_against_snapshot() {
        let (mut vault, mut token, mut adapter) = setup();
        // 50% of the snapshot.
        raise_cap(&mut vault, u64::MAX / 2, 5_000);
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        let over = vault.allocate(ALLOCATOR, &strat(), 501, &mut token, &mut adapter, t0());
        assert!(matches!(
            over.unwrap_err(),
            VaultError::Cap(CapError::AboveRelativeCap { max: 500, .. })
        ));
        vault.allocate(ALLOCATOR, &strat(), 500, &mut token, &mut adapter, t0()).unwrap();
    }

    #[test]
    fn allocate_requires_allocator_role() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, 10_000, BPS_ONE);
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        let result = vault.allocate(ALICE, &strat(), 100, &mut token, &mut adapter, t0());
        assert!(matches!(result.unwrap_err(), VaultError::NotAllocator(_)));
    }

    #[test]
    fn interest_recognition_is_rate_bounded() {
        let (mut vault, mut token, mut adapter) = setup();
        token.mint(ALICE, 1_000_000_000).unwrap();
        vault.deposit(ALICE, 1_000_000_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        // A 10% jump reported after one day; the default bound allows
        // roughly 2x/year, i.e. about 0.55% per day.
        adapter.external = 100_000_000;
        let t1 = t0() + Duration::seconds(86_400);
        let total = vault.accrue_interest(&token, &adapter, t1).unwrap();
        assert_eq!(total, 1_000_000_000 + 5_479_452);
    }

    #[test]
    fn extreme_rate_setting_does_not_overflow_accrual() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.set_max_rate(OWNER, u128::MAX).unwrap();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        // A maximal rate over a decade saturates the bound instead of
        // wrapping it; the reported gain is recognized in full.
        adapter.external = 500;
        let decade = t0() + Duration::seconds(10 * SECONDS_PER_YEAR as i64);
        let total = vault.accrue_interest(&token, &adapter, decade).unwrap();
        assert_eq!(total, 1_500);
    }

    #[test]
    fn losses_are_recognized_in_full() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, u64::MAX / 2, BPS_ONE);
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        vault.allocate(ALLOCATOR, &strat(), 1_000, &mut token, &mut adapter, t0()).unwrap();

        // The adapter physically lost 300 (simulated by moving tokens
        // away from it).
        token.transfer(ADAPTER, BOB, 300).unwrap();
        let total = vault
            .accrue_interest(&token, &adapter, t0() + Duration::seconds(60))
            .unwrap();
        assert_eq!(total, 700);
    }

    #[test]
    fn accrual_is_idempotent_within_an_operation() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        adapter.external = 500;

        let t1 = t0() + Duration::seconds(600);
        vault.begin(&token, &adapter, t1).unwrap();
        let after_first = vault.total_assets();

        // Nested accrual inside the same operation: snapshot already
        // set, nothing moves.
        adapter.external = 5_000;
        vault.accrue(&token, &adapter, t1 + Duration::seconds(30)).unwrap();
        assert_eq!(vault.total_assets(), after_first);
        vault.finish();
    }

    #[test]
    fn performance_fee_minted_at_pre_fee_price() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.set_fees(OWNER, 2_000, 0).unwrap();
        vault.set_fee_recipients(OWNER, BOB, BOB).unwrap();
        // Uncap the rate bound so the whole jump is recognized.
        vault.set_max_rate(OWNER, RATE_SCALE).unwrap();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        adapter.external = 100;
        vault
            .accrue_interest(&token, &adapter, t0() + Duration::seconds(60))
            .unwrap();

        // Interest 100, fee 20 assets; at pre-fee price those are
        // 20 × 1001 / 1101 = 18 shares.
        assert_eq!(vault.balance_of(&BOB), 18);
        assert_eq!(vault.total_assets(), 1_100);
    }

    #[test]
    fn management_fee_scales_with_elapsed_time() {
        let (mut vault, mut token, mut adapter) = setup();
        vault.set_fees(OWNER, 0, 100).unwrap();
        vault.set_fee_recipients(OWNER, BOB, BOB).unwrap();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();

        // One year at 1% annual on a flat 1000: 10 assets of fees, at an
        // unchanged price of 1.0.
        let year = t0() + Duration::seconds(SECONDS_PER_YEAR as i64);
        vault.accrue_interest(&token, &adapter, year).unwrap();
        assert_eq!(vault.balance_of(&BOB), 10);
    }

    #[test]
    fn force_deallocate_burns_penalty_from_on_behalf() {
        let (mut vault, mut token, mut adapter) = setup();
        raise_cap(&mut vault, 10_000, BPS_ONE);
        vault.set_force_deallocate_penalty(OWNER, 200).unwrap();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        vault.allocate(ALLOCATOR, &strat(), 500, &mut token, &mut adapter, t0()).unwrap();

        let outcome = vault
            .force_deallocate(ALICE, &strat(), 500, ALICE, &mut token, &mut adapter, t0())
            .unwrap();
        assert_eq!(outcome.filled, 500);
        // 2% of 500 = 10 assets, burned as shares at price 1.0.
        assert_eq!(vault.balance_of(&ALICE), 990);
        // Total assets untouched: the burn accrues to remaining holders.
        assert_eq!(vault.total_assets(), 1_000);
    }

    #[test]
    fn penalty_ceiling_enforced() {
        let (mut vault, _token, _adapter) = setup();
        assert!(matches!(
            vault.set_force_deallocate_penalty(OWNER, 201).unwrap_err(),
            VaultError::PenaltyTooHigh { bps: 201 }
        ));
    }

    #[test]
    fn fee_ceilings_enforced() {
        let (mut vault, _token, _adapter) = setup();
        assert!(matches!(
            vault.set_fees(OWNER, 5_001, 0).unwrap_err(),
            VaultError::FeeTooHigh { .. }
        ));
        assert!(matches!(
            vault.set_fees(OWNER, 0, 501).unwrap_err(),
            VaultError::FeeTooHigh { .. }
        ));
    }

    #[test]
    fn deallocate_requires_existing_allocation() {
        let (mut vault, mut token, mut adapter) = setup();
        let result = vault.deallocate(ALLOCATOR, &strat(), 100, &mut token, &mut adapter, t0());
        assert!(matches!(
            result.unwrap_err(),
            VaultError::Cap(CapError::NothingAllocated(_))
        ));
    }

    #[test]
    fn share_transfers_respect_gates() {
        struct Blocklist(Address);
        impl GatePredicate for Blocklist {
            fn allows(&self, account: &Address) -> bool {
                *account != self.0
            }
        }

        let (mut vault, mut token, mut adapter) = setup();
        vault.deposit(ALICE, 1_000, ALICE, &mut token, &mut adapter, t0()).unwrap();
        vault
            .set_gate(OWNER, GateKind::ReceiveShares, Some(Box::new(Blocklist(BOB))))
            .unwrap();

        assert!(matches!(
            vault.transfer_shares(ALICE, BOB, 100).unwrap_err(),
            VaultError::GateRejected { gate: GateKind::ReceiveShares, .. }
        ));
        vault.transfer_shares(ALICE, OWNER, 100).unwrap();
    }
}
