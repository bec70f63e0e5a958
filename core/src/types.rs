//! # Core Identifier Types
//!
//! The small, copyable keys the whole system is indexed by:
//!
//! - [`Address`] — a 20-byte account identity, derived from a secp256k1
//!   public key the usual way (Keccak-256 of the uncompressed point, last
//!   20 bytes). Used for signers, owners, agents, vaults, and escrows.
//! - [`AllocationId`] — an opaque 32-byte key naming a strategy or risk
//!   bucket. The vault, escrow, and oracle all agree on these keys but
//!   never interpret their contents.
//! - [`Selector`] — a 4-byte function selector, used as half of a
//!   whitelist key on the escrow side.
//!
//! All three are plain newtypes with hex `Display` impls so they read
//! sanely in logs and error messages.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Computes the Keccak-256 digest of `data`.
///
/// Used for report digests, address derivation, and deterministic
/// identifier construction. Keccak (not SHA-3 proper) because the signed
/// report wire format follows the Ethereum personal-message convention.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account identity.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Used as "unset" in a few config slots; never a
    /// valid signer or recipient.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derives an address from an uncompressed SEC1 public key
    /// (65 bytes, leading `0x04` tag).
    ///
    /// Keccak-256 over the 64 coordinate bytes, keep the last 20.
    pub fn from_uncompressed_pubkey(sec1_bytes: &[u8]) -> Option<Address> {
        if sec1_bytes.len() != 65 || sec1_bytes[0] != 0x04 {
            return None;
        }
        let digest = keccak256(&sec1_bytes[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Some(Address(out))
    }

    /// Returns `true` for the zero address.
    pub fn is_zero(&self) -> bool {
        *self == Address::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self)
    }
}

// ---------------------------------------------------------------------------
// AllocationId
// ---------------------------------------------------------------------------

/// An opaque 32-byte key identifying a strategy or risk bucket.
///
/// Every cap, every oracle report, and every escrow allocation entry is
/// keyed by one of these. Deployments typically derive them by hashing a
/// human-readable strategy label, but nothing in the core depends on that.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct AllocationId(pub [u8; 32]);

impl AllocationId {
    /// Derives an id from an arbitrary label. Convenience for deployments
    /// and tests; the core treats the result as fully opaque.
    pub fn from_label(label: &str) -> AllocationId {
        AllocationId(keccak256(label.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Full 32 bytes is unreadable in logs; show a truncated prefix.
        write!(f, "0x{}…", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Debug for AllocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AllocationId(0x{})", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// A 4-byte function selector, the second half of an escrow whitelist key.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// The wildcard selector: a whitelist entry under this selector allows
    /// *any* selector on its target.
    pub const WILDCARD: Selector = Selector([0xff; 4]);

    /// Derives a selector from a function signature string, Ethereum-style:
    /// first 4 bytes of `keccak256(signature)`.
    pub fn from_signature(signature: &str) -> Selector {
        let digest = keccak256(signature.as_bytes());
        Selector([digest[0], digest[1], digest[2], digest[3]])
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Selector({})", self)
    }
}
