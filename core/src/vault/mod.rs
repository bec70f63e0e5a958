//! # Vault
//!
//! The share-accounting engine and everything it leans on:
//!
//! - [`shares`] — balances, allowances, supply.
//! - [`gate`] — the four optional account predicates.
//! - [`caps`] — per-identifier allocation ceilings with timelocked
//!   increases.
//! - [`adapter`] — the [`StrategyAdapter`](adapter::StrategyAdapter)
//!   boundary and its escrow binding.
//! - [`accounting`] — [`Vault`](accounting::Vault): deposits,
//!   withdrawals, accrual, fees, allocation passthroughs, and the forced
//!   exit valve.

pub mod accounting;
pub mod adapter;
pub mod caps;
pub mod gate;
pub mod shares;

pub use accounting::{Vault, VaultError};
pub use adapter::{EscrowAdapter, StrategyAdapter};
pub use caps::{CapConfig, CapEnforcer, CapError};
pub use gate::{GateKind, GatePredicate, GateSet};
pub use shares::{ShareError, ShareLedger};
