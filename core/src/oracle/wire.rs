//! # Signed-Report Wire Format
//!
//! The only bit-exact surface in the system. A keeper signs the Keccak-256
//! digest of the report tuple, wrapped in the standard personal-message
//! prefix, with a recoverable secp256k1 signature. The oracle recovers the
//! signer address from each 65-byte `r ‖ s ‖ v` signature and weighs it
//! against the signer set — the submitter that delivers the transaction is
//! authenticated separately and independently.
//!
//! ## Digest layout
//!
//! Single report:
//!
//! ```text
//! keccak256( id(32) ‖ value(u64 BE) ‖ confidence(u8) ‖ nonce(u64 BE)
//!          ‖ expiry(u64 BE, unix secs) ‖ chain_id(u64 BE) ‖ oracle(20) )
//! ```
//!
//! Batch: a u32 BE count, then all ids, all values, all confidences in
//! submission order, followed by the same nonce/expiry/chain/oracle tail.
//! Hashing the whole batch under one signature set is what makes the
//! two-phase commit atomic — you cannot replay a subset.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;

use crate::types::{keccak256, Address, AllocationId};

/// Length of a recoverable signature: 32-byte r, 32-byte s, 1-byte v.
pub const SIGNATURE_LENGTH: usize = 65;

/// Prefix of the personal-message convention for 32-byte payloads.
const PERSONAL_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Errors from signature parsing and recovery.
#[derive(Debug, Error)]
pub enum WireError {
    /// Signatures are exactly 65 bytes; anything else is rejected before
    /// any curve math happens.
    #[error("malformed signature: expected {SIGNATURE_LENGTH} bytes, got {0}")]
    MalformedLength(usize),

    /// The recovery byte was not 0, 1, 27, or 28.
    #[error("invalid recovery byte {0}")]
    InvalidRecoveryByte(u8),

    /// The r‖s pair did not parse as a valid signature, or recovery
    /// produced no point. Intentionally not more specific.
    #[error("signature recovery failed")]
    RecoveryFailed,
}

fn encode_tail(buf: &mut Vec<u8>, nonce: u64, expiry_unix: u64, chain_id: u64, oracle: &Address) {
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.extend_from_slice(&expiry_unix.to_be_bytes());
    buf.extend_from_slice(&chain_id.to_be_bytes());
    buf.extend_from_slice(oracle.as_bytes());
}

/// Digest of a single-identifier report tuple.
pub fn report_digest(
    id: &AllocationId,
    value: u64,
    confidence: u8,
    nonce: u64,
    expiry_unix: u64,
    chain_id: u64,
    oracle: &Address,
) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 8 + 1 + 8 + 8 + 8 + 20);
    buf.extend_from_slice(id.as_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
    buf.push(confidence);
    encode_tail(&mut buf, nonce, expiry_unix, chain_id, oracle);
    keccak256(&buf)
}

/// Digest of a whole batch under one shared nonce/expiry.
pub fn batch_digest(
    ids: &[AllocationId],
    values: &[u64],
    confidences: &[u8],
    nonce: u64,
    expiry_unix: u64,
    chain_id: u64,
    oracle: &Address,
) -> [u8; 32] {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(ids.len() as u32).to_be_bytes());
    for id in ids {
        buf.extend_from_slice(id.as_bytes());
    }
    for value in values {
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf.extend_from_slice(confidences);
    encode_tail(&mut buf, nonce, expiry_unix, chain_id, oracle);
    keccak256(&buf)
}

/// Wraps a digest in the personal-message prefix and hashes again. This
/// is the prehash the keeper actually signs.
pub fn signed_message(digest: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(PERSONAL_PREFIX.len() + 32);
    buf.extend_from_slice(PERSONAL_PREFIX);
    buf.extend_from_slice(digest);
    keccak256(&buf)
}

/// Recovers the signer address from a 65-byte signature over `digest`.
///
/// Accepts both raw (0/1) and offset (27/28) recovery bytes.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Result<Address, WireError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(WireError::MalformedLength(signature.len()));
    }
    let v = signature[64];
    let rec_byte = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(WireError::InvalidRecoveryByte(other)),
    };
    let recovery_id = RecoveryId::from_byte(rec_byte).ok_or(WireError::RecoveryFailed)?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| WireError::RecoveryFailed)?;

    let message = signed_message(digest);
    let key = VerifyingKey::recover_from_prehash(&message, &sig, recovery_id)
        .map_err(|_| WireError::RecoveryFailed)?;

    let point = key.to_encoded_point(false);
    Address::from_uncompressed_pubkey(point.as_bytes()).ok_or(WireError::RecoveryFailed)
}

/// Signs a report digest, producing the 65-byte wire signature with a
/// 27/28 recovery byte. Used by keepers and by tests.
pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> [u8; 65] {
    let message = signed_message(digest);
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&message)
        .expect("signing over a 32-byte prehash cannot fail");
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recovery_id.to_byte() + 27;
    out
}

/// The address corresponding to a verifying key.
pub fn signer_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_uncompressed_pubkey(point.as_bytes())
        .expect("uncompressed SEC1 encoding is always 65 bytes")
}
