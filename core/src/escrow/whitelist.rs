//! # Call Whitelist
//!
//! Strategy execution is a controlled multicall: every sub-call's
//! (target, selector) pair must be pre-approved by the escrow owner
//! before the batch runs. A wildcard entry under [`Selector::WILDCARD`]
//! allows any selector on its target — used for protocols with wide but
//! trusted surfaces.
//!
//! Each entry carries an advisory numeric limit. It is recorded and
//! surfaced in logs but not enforced at call time; the enforced budget is
//! the per-strategy daily limit (charging the same movement against two
//! counters would make them drift apart).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Address, Selector};

/// One whitelisted call shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPermission {
    /// Advisory per-call value limit. Not enforced at runtime.
    pub limit: u64,
}

/// A sub-call of a strategy multicall.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyCall {
    pub target: Address,
    pub selector: Selector,
    /// Argument bytes, opaque to the escrow.
    pub data: Vec<u8>,
}

/// The (target, selector) → permission map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Whitelist {
    entries: HashMap<(Address, Selector), CallPermission>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approves a call shape. Use [`Selector::WILDCARD`] to approve every
    /// selector on the target.
    pub fn allow(&mut self, target: Address, selector: Selector, permission: CallPermission) {
        self.entries.insert((target, selector), permission);
    }

    /// Removes an approval. Removing a wildcard does not remove explicit
    /// per-selector entries on the same target, and vice versa.
    pub fn revoke(&mut self, target: &Address, selector: &Selector) -> bool {
        self.entries.remove(&(*target, *selector)).is_some()
    }

    /// Looks up the permission covering a call: the exact pair first,
    /// then the target's wildcard.
    pub fn permission_for(&self, target: &Address, selector: &Selector) -> Option<&CallPermission> {
        self.entries
            .get(&(*target, *selector))
            .or_else(|| self.entries.get(&(*target, Selector::WILDCARD)))
    }

    pub fn is_allowed(&self, target: &Address, selector: &Selector) -> bool {
        self.permission_for(target, selector).is_some()
    }
}
