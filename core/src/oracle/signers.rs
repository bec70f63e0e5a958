//! # Weighted Signer Set
//!
//! The oracle's trust anchor: a set of keeper addresses, each carrying an
//! integer weight. An update is accepted only if the deduplicated signers
//! recovered from its signatures sum to at least the oracle's required
//! weight.
//!
//! Addition is immediate (a new signer can only *add* security margin).
//! Removal shrinks the quorum and therefore goes through the two-phase
//! timelock in [`super::store`] — this module only provides the raw
//! mutations.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Authorization record for one signer address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Whether the signer currently counts toward quorum.
    pub authorized: bool,
    /// Quorum weight contributed while authorized.
    pub weight: u64,
}

/// The set of authorized report signers and their weights.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignerSet {
    signers: HashMap<Address, SignerConfig>,
}

impl SignerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorizes a signer with the given weight, or updates the weight of
    /// an existing one. Weight zero still authorizes — it just contributes
    /// nothing, which is occasionally useful for staging a key.
    pub fn authorize(&mut self, signer: Address, weight: u64) {
        self.signers.insert(
            signer,
            SignerConfig {
                authorized: true,
                weight,
            },
        );
    }

    /// Zeroes a signer: deauthorized, weight cleared. The entry is kept so
    /// history-sensitive tooling can see the signer once existed.
    pub fn revoke(&mut self, signer: &Address) {
        if let Some(cfg) = self.signers.get_mut(signer) {
            cfg.authorized = false;
            cfg.weight = 0;
        }
    }

    /// The config for a signer, if one was ever recorded.
    pub fn get(&self, signer: &Address) -> Option<&SignerConfig> {
        self.signers.get(signer)
    }

    /// Weight contributed by one signer; zero for unknown or revoked keys.
    pub fn weight_of(&self, signer: &Address) -> u64 {
        match self.signers.get(signer) {
            Some(cfg) if cfg.authorized => cfg.weight,
            _ => 0,
        }
    }

    /// Sums the authorized weight over a set of recovered signer
    /// addresses, deduplicating first. A signature submitted twice must
    /// not count twice.
    pub fn quorum_weight(&self, recovered: &[Address]) -> u64 {
        let unique: BTreeSet<&Address> = recovered.iter().collect();
        unique.iter().map(|addr| self.weight_of(addr)).sum()
    }

    /// Total weight of every authorized signer.
    pub fn total_weight(&self) -> u64 {
        self.signers
            .values()
            .filter(|cfg| cfg.authorized)
            .map(|cfg| cfg.weight)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address([tag; 20])
    }

    #[test]
    fn authorize_and_weigh() {
        let mut set = SignerSet::new();
        set.authorize(addr(1), 10);
        set.authorize(addr(2), 5);
        assert_eq!(set.weight_of(&addr(1)), 10);
        assert_eq!(set.total_weight(), 15);
    }

    #[test]
    fn revoked_signer_contributes_nothing() {
        let mut set = SignerSet::new();
        set.authorize(addr(1), 10);
        set.revoke(&addr(1));
        assert_eq!(set.weight_of(&addr(1)), 0);
        assert_eq!(set.total_weight(), 0);
        // The record survives revocation.
        assert!(set.get(&addr(1)).is_some());
    }

    #[test]
    fn quorum_weight_deduplicates() {
        let mut set = SignerSet::new();
        set.authorize(addr(1), 10);
        set.authorize(addr(2), 7);
        // addr(1) appears twice; it must only count once.
        let weight = set.quorum_weight(&[addr(1), addr(1), addr(2)]);
        assert_eq!(weight, 17);
    }

    #[test]
    fn unknown_signers_ignored_in_quorum() {
        let mut set = SignerSet::new();
        set.authorize(addr(1), 10);
        assert_eq!(set.quorum_weight(&[addr(1), addr(9)]), 10);
    }
}
