//! # Share Ledger
//!
//! Balance and allowance book for vault shares. Pure bookkeeping: the
//! share *price* lives in the vault's accounting layer; this ledger only
//! guarantees that balances never underflow, the supply never overflows,
//! and third-party spends stay within approvals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareError {
    #[error("insufficient shares for {holder}: available {available}, requested {requested}")]
    InsufficientShares {
        holder: Address,
        available: u64,
        requested: u64,
    },

    #[error("insufficient allowance from {owner} to {spender}: available {available}, requested {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        available: u64,
        requested: u64,
    },

    #[error("share supply overflow minting {amount} to {holder}")]
    SupplyOverflow { holder: Address, amount: u64 },
}

/// Balances, allowances, total supply.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: HashMap<Address, u64>,
    allowances: HashMap<(Address, Address), u64>,
    total_supply: u64,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: &Address) -> u64 {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> u64 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    pub fn mint(&mut self, holder: Address, amount: u64) -> Result<(), ShareError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(ShareError::SupplyOverflow { holder, amount })?;
        let balance = self
            .balance_of(&holder)
            .checked_add(amount)
            .ok_or(ShareError::SupplyOverflow { holder, amount })?;
        self.total_supply = supply;
        self.balances.insert(holder, balance);
        Ok(())
    }

    pub fn burn(&mut self, holder: Address, amount: u64) -> Result<(), ShareError> {
        let balance = self.balance_of(&holder);
        if balance < amount {
            return Err(ShareError::InsufficientShares {
                holder,
                available: balance,
                requested: amount,
            });
        }
        self.balances.insert(holder, balance - amount);
        self.total_supply -= amount;
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: u64) -> Result<(), ShareError> {
        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(ShareError::InsufficientShares {
                holder: from,
                available: from_balance,
                requested: amount,
            });
        }
        let to_balance = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or(ShareError::SupplyOverflow { holder: to, amount })?;
        self.balances.insert(from, from_balance - amount);
        self.balances.insert(to, to_balance);
        Ok(())
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: u64) {
        self.allowances.insert((owner, spender), amount);
    }

    /// Consumes allowance for a third-party spend. A `u64::MAX` approval
    /// is treated as unlimited and never decremented.
    pub fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        amount: u64,
    ) -> Result<(), ShareError> {
        let current = self.allowance(&owner, &spender);
        if current == u64::MAX {
            return Ok(());
        }
        if current < amount {
            return Err(ShareError::InsufficientAllowance {
                owner,
                spender,
                available: current,
                requested: amount,
            });
        }
        self.allowances.insert((owner, spender), current - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address([1; 20]);
    const BOB: Address = Address([2; 20]);

    #[test]
    fn mint_burn_transfer_roundtrip() {
        let mut shares = ShareLedger::new();
        shares.mint(ALICE, 1_000).unwrap();
        assert_eq!(shares.total_supply(), 1_000);

        shares.transfer(ALICE, BOB, 400).unwrap();
        assert_eq!(shares.balance_of(&ALICE), 600);
        assert_eq!(shares.balance_of(&BOB), 400);

        shares.burn(BOB, 400).unwrap();
        assert_eq!(shares.total_supply(), 600);
    }

    #[test]
    fn burn_beyond_balance_rejected() {
        let mut shares = ShareLedger::new();
        shares.mint(ALICE, 10).unwrap();
        assert_eq!(
            shares.burn(ALICE, 11),
            Err(ShareError::InsufficientShares {
                holder: ALICE,
                available: 10,
                requested: 11
            })
        );
    }

    #[test]
    fn allowance_spend_decrements_and_enforces() {
        let mut shares = ShareLedger::new();
        shares.approve(ALICE, BOB, 100);
        shares.spend_allowance(ALICE, BOB, 60).unwrap();
        assert_eq!(shares.allowance(&ALICE, &BOB), 40);
        assert!(matches!(
            shares.spend_allowance(ALICE, BOB, 41),
            Err(ShareError::InsufficientAllowance { available: 40, .. })
        ));
    }

    #[test]
    fn max_allowance_is_unlimited() {
        let mut shares = ShareLedger::new();
        shares.approve(ALICE, BOB, u64::MAX);
        shares.spend_allowance(ALICE, BOB, 1_000_000).unwrap();
        assert_eq!(shares.allowance(&ALICE, &BOB), u64::MAX);
    }

    #[test]
    fn mint_overflow_guarded() {
        let mut shares = ShareLedger::new();
        shares.mint(ALICE, u64::MAX).unwrap();
        assert!(matches!(
            shares.mint(BOB, 1),
            Err(ShareError::SupplyOverflow { .. })
        ));
    }
}
