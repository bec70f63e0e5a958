//! # Escrow Ledger
//!
//! The adapter layer between the vault and the outside world. The escrow
//! holds the liquidity the vault has allocated, tracks how much of it has
//! actually been pushed into external protocols, executes whitelisted
//! strategy calls under a balance-loss circuit breaker, and answers the
//! vault's single most important question — "what are your assets worth
//! right now?" — by reconciling its books against the valuation oracle.
//!
//! Split by concern:
//!
//! - [`strategy`] — per-strategy configuration and the
//!   allocation / external-deposit accounting entries.
//! - [`whitelist`] — the (target, selector) call whitelist with wildcard
//!   support.
//! - [`ledger`] — [`EscrowLedger`](ledger::EscrowLedger) itself.

pub mod ledger;
pub mod strategy;
pub mod whitelist;

pub use ledger::{
    AdapterReceipt, CallExecutor, CallFailure, DeallocateContext, DeallocateOutcome, EscrowError,
    EscrowLedger,
};
pub use strategy::{AllocationEntry, AllocationRequest, StrategyConfig};
pub use whitelist::{CallPermission, StrategyCall, Whitelist};
