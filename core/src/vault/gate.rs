//! # Transfer Gates
//!
//! Four independently-settable predicates over accounts. Each guards one
//! direction of one flow: shares in, shares out, assets in, assets out.
//! An unset gate is unrestricted. The vault consults the relevant gates
//! before every share mint/burn/transfer and asset movement.

use std::fmt;

use crate::types::Address;

/// An account predicate plugged into one gate slot.
pub trait GatePredicate {
    fn allows(&self, account: &Address) -> bool;
}

/// Which gate rejected an operation; carried in the vault's error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateKind {
    ReceiveShares,
    SendShares,
    ReceiveAssets,
    SendAssets,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateKind::ReceiveShares => "receive-shares",
            GateKind::SendShares => "send-shares",
            GateKind::ReceiveAssets => "receive-assets",
            GateKind::SendAssets => "send-assets",
        };
        f.write_str(name)
    }
}

/// The four gate slots.
#[derive(Default)]
pub struct GateSet {
    receive_shares: Option<Box<dyn GatePredicate>>,
    send_shares: Option<Box<dyn GatePredicate>>,
    receive_assets: Option<Box<dyn GatePredicate>>,
    send_assets: Option<Box<dyn GatePredicate>>,
}

impl fmt::Debug for GateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateSet")
            .field("receive_shares", &self.receive_shares.is_some())
            .field("send_shares", &self.send_shares.is_some())
            .field("receive_assets", &self.receive_assets.is_some())
            .field("send_assets", &self.send_assets.is_some())
            .finish()
    }
}

impl GateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or clears one gate slot.
    pub fn set(&mut self, kind: GateKind, predicate: Option<Box<dyn GatePredicate>>) {
        let slot = match kind {
            GateKind::ReceiveShares => &mut self.receive_shares,
            GateKind::SendShares => &mut self.send_shares,
            GateKind::ReceiveAssets => &mut self.receive_assets,
            GateKind::SendAssets => &mut self.send_assets,
        };
        *slot = predicate;
    }

    /// Checks `account` against one gate. Unset means allowed.
    pub fn allows(&self, kind: GateKind, account: &Address) -> bool {
        let slot = match kind {
            GateKind::ReceiveShares => &self.receive_shares,
            GateKind::SendShares => &self.send_shares,
            GateKind::ReceiveAssets => &self.receive_assets,
            GateKind::SendAssets => &self.send_assets,
        };
        slot.as_ref().map(|p| p.allows(account)).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blocklist(Vec<Address>);
    impl GatePredicate for Blocklist {
        fn allows(&self, account: &Address) -> bool {
            !self.0.contains(account)
        }
    }

    const ALICE: Address = Address([1; 20]);
    const MALLORY: Address = Address([9; 20]);

    #[test]
    fn unset_gates_allow_everyone() {
        let gates = GateSet::new();
        assert!(gates.allows(GateKind::ReceiveShares, &MALLORY));
        assert!(gates.allows(GateKind::SendAssets, &MALLORY));
    }

    #[test]
    fn gates_are_independent_slots() {
        let mut gates = GateSet::new();
        gates.set(GateKind::ReceiveShares, Some(Box::new(Blocklist(vec![MALLORY]))));

        assert!(!gates.allows(GateKind::ReceiveShares, &MALLORY));
        assert!(gates.allows(GateKind::ReceiveShares, &ALICE));
        // Other slots untouched.
        assert!(gates.allows(GateKind::SendShares, &MALLORY));
    }

    #[test]
    fn clearing_a_gate_restores_unrestricted() {
        let mut gates = GateSet::new();
        gates.set(GateKind::SendAssets, Some(Box::new(Blocklist(vec![MALLORY]))));
        assert!(!gates.allows(GateKind::SendAssets, &MALLORY));
        gates.set(GateKind::SendAssets, None);
        assert!(gates.allows(GateKind::SendAssets, &MALLORY));
    }
}
