//! # Underlying Asset Ledger
//!
//! The custody core assumes the underlying token behaves as a standard,
//! non-reentrant, non-fee-on-transfer balance ledger. [`TokenLedger`] is
//! exactly that: a map from [`Address`] to `u64` with checked credit and
//! debit. The vault and escrow move liquidity through it, tests and mock
//! external protocols mint into it.
//!
//! Nothing here is clever on purpose. Every interesting accounting
//! property in this repository is defined *relative to* this ledger being
//! boring and exact.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Address;

/// Errors that can occur during token ledger operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Attempted to move more than the holder has.
    #[error("insufficient token balance: {holder} has {available}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited.
        holder: Address,
        /// Current balance of that account.
        available: u64,
        /// Amount the caller tried to move.
        requested: u64,
    },

    /// A credit would overflow `u64`. Either a bug or an attack; both
    /// deserve a hard stop.
    #[error("token balance overflow: {holder} at {current}, credit {credit}")]
    Overflow {
        holder: Address,
        current: u64,
        credit: u64,
    },
}

/// An in-memory single-asset balance ledger.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    balances: HashMap<Address, u64>,
    total_supply: u64,
}

impl TokenLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the balance of `holder`, zero if never credited.
    pub fn balance_of(&self, holder: &Address) -> u64 {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    /// Total tokens in existence across all holders.
    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    /// Mints `amount` new tokens to `to`.
    pub fn mint(&mut self, to: Address, amount: u64) -> Result<(), TokenError> {
        let current = self.balance_of(&to);
        let new = current.checked_add(amount).ok_or(TokenError::Overflow {
            holder: to,
            current,
            credit: amount,
        })?;
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow {
                holder: to,
                current: self.total_supply,
                credit: amount,
            })?;
        self.balances.insert(to, new);
        Ok(())
    }

    /// Burns `amount` tokens from `from`.
    pub fn burn(&mut self, from: Address, amount: u64) -> Result<(), TokenError> {
        let current = self.balance_of(&from);
        if current < amount {
            return Err(TokenError::InsufficientBalance {
                holder: from,
                available: current,
                requested: amount,
            });
        }
        self.balances.insert(from, current - amount);
        self.total_supply -= amount;
        Ok(())
    }

    /// Moves `amount` from `from` to `to`. No fees, no hooks, no surprises.
    pub fn transfer(&mut self, from: Address, to: Address, amount: u64) -> Result<(), TokenError> {
        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(TokenError::InsufficientBalance {
                holder: from,
                available: from_balance,
                requested: amount,
            });
        }
        let to_balance = self.balance_of(&to);
        let to_new = to_balance
            .checked_add(amount)
            .ok_or(TokenError::Overflow {
                holder: to,
                current: to_balance,
                credit: amount,
            })?;
        self.balances.insert(from, from_balance - amount);
        self.balances.insert(to, to_new);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address([tag; 20])
    }

    #[test]
    fn mint_credits_holder_and_supply() {
        let mut ledger = TokenLedger::new();
        ledger.mint(addr(1), 1_000).unwrap();
        assert_eq!(ledger.balance_of(&addr(1)), 1_000);
        assert_eq!(ledger.total_supply(), 1_000);
    }

    #[test]
    fn transfer_moves_exact_amount() {
        let mut ledger = TokenLedger::new();
        ledger.mint(addr(1), 1_000).unwrap();
        ledger.transfer(addr(1), addr(2), 400).unwrap();
        assert_eq!(ledger.balance_of(&addr(1)), 600);
        assert_eq!(ledger.balance_of(&addr(2)), 400);
        assert_eq!(ledger.total_supply(), 1_000);
    }

    #[test]
    fn transfer_insufficient_rejected() {
        let mut ledger = TokenLedger::new();
        ledger.mint(addr(1), 100).unwrap();
        let result = ledger.transfer(addr(1), addr(2), 101);
        assert!(matches!(
            result.unwrap_err(),
            TokenError::InsufficientBalance {
                available: 100,
                requested: 101,
                ..
            }
        ));
        // Failed transfer leaves both sides untouched.
        assert_eq!(ledger.balance_of(&addr(1)), 100);
        assert_eq!(ledger.balance_of(&addr(2)), 0);
    }

    #[test]
    fn burn_reduces_supply() {
        let mut ledger = TokenLedger::new();
        ledger.mint(addr(1), 500).unwrap();
        ledger.burn(addr(1), 200).unwrap();
        assert_eq!(ledger.balance_of(&addr(1)), 300);
        assert_eq!(ledger.total_supply(), 300);
    }

    #[test]
    fn mint_overflow_rejected() {
        let mut ledger = TokenLedger::new();
        ledger.mint(addr(1), u64::MAX).unwrap();
        assert!(ledger.mint(addr(1), 1).is_err());
    }
}
