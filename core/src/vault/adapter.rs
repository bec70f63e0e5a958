//! # Adapter Boundary
//!
//! [`StrategyAdapter`] is the entire contract the vault knows about the
//! allocation layer: push assets out, pull assets back, ask what they are
//! worth. The vault never sees strategy internals, oracle plumbing, or
//! whitelists — those live behind the trait.
//!
//! [`EscrowAdapter`] is the production binding: an [`EscrowLedger`]
//! answering with the help of a [`ValuationOracle`]. Token movement
//! between vault and escrow happens here, at the boundary, so the escrow
//! ledger itself never initiates transfers on the vault's behalf.

use chrono::{DateTime, Utc};

use crate::escrow::ledger::{AdapterReceipt, DeallocateContext, DeallocateOutcome, EscrowError,
    EscrowLedger};
use crate::escrow::strategy::AllocationRequest;
use crate::oracle::store::ValuationOracle;
use crate::token::TokenLedger;
use crate::types::Address;

/// The allocation surface the vault consumes.
pub trait StrategyAdapter {
    /// Where allocated tokens are sent.
    fn address(&self) -> Address;

    /// Records an allocation of `assets` already transferred to the
    /// adapter. Returns the identifiers touched and the signed delta.
    fn allocate(
        &mut self,
        token: &mut TokenLedger,
        request: &AllocationRequest,
        assets: u64,
        now: DateTime<Utc>,
    ) -> Result<AdapterReceipt, EscrowError>;

    /// Releases assets back to the vault, transferring the filled amount.
    fn deallocate(
        &mut self,
        token: &mut TokenLedger,
        request: &AllocationRequest,
        assets: u64,
        context: DeallocateContext,
        now: DateTime<Utc>,
    ) -> Result<DeallocateOutcome, EscrowError>;

    /// Current worth of everything the adapter holds or has deployed.
    fn real_assets(
        &self,
        token: &TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<u64, EscrowError>;
}

/// Binds an escrow ledger and its oracle behind the adapter trait for
/// one vault call.
pub struct EscrowAdapter<'a> {
    pub escrow: &'a mut EscrowLedger,
    pub oracle: &'a ValuationOracle,
    /// The vault address the escrow recognizes as its caller.
    pub vault: Address,
}

impl StrategyAdapter for EscrowAdapter<'_> {
    fn address(&self) -> Address {
        self.escrow.address()
    }

    fn allocate(
        &mut self,
        _token: &mut TokenLedger,
        request: &AllocationRequest,
        assets: u64,
        _now: DateTime<Utc>,
    ) -> Result<AdapterReceipt, EscrowError> {
        self.escrow.allocate(self.vault, request, assets)
    }

    fn deallocate(
        &mut self,
        token: &mut TokenLedger,
        request: &AllocationRequest,
        assets: u64,
        context: DeallocateContext,
        _now: DateTime<Utc>,
    ) -> Result<DeallocateOutcome, EscrowError> {
        let outcome = self.escrow.deallocate(self.vault, request, assets, context, token)?;
        if outcome.filled > 0 {
            token.transfer(self.escrow.address(), self.vault, outcome.filled)?;
        }
        Ok(outcome)
    }

    fn real_assets(
        &self,
        token: &TokenLedger,
        now: DateTime<Utc>,
    ) -> Result<u64, EscrowError> {
        self.escrow.real_assets(self.oracle, token, now)
    }
}
