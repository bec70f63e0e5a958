//! # Valuation Oracle
//!
//! The signed-report store that prices everything the escrow has deployed
//! off-ledger. Keepers compute strategy values off-chain, sign them with a
//! weighted multi-sig, and submit them here; the escrow reads them back
//! through staleness- and confidence-gated queries.
//!
//! The module is split by concern:
//!
//! - [`report`] — the per-identifier [`ValueReport`](report::ValueReport)
//!   record and its [`UpdateConfig`](report::UpdateConfig) admission knobs.
//! - [`signers`] — the weighted signer set.
//! - [`wire`] — the bit-exact signed-report format: Keccak digests, the
//!   personal-message prefix, and 65-byte recoverable ECDSA.
//! - [`store`] — [`ValuationOracle`](store::ValuationOracle) itself: the
//!   fail-fast update pipeline, atomic batch updates, fallback reads, the
//!   health classifier, and the emergency path.

pub mod report;
pub mod signers;
pub mod store;
pub mod wire;

pub use report::{UpdateConfig, ValueReport};
pub use signers::{SignerConfig, SignerSet};
pub use store::{
    ActiveAllocationSource, EnumerationFailed, OracleError, ValuationHealth, ValuationOracle,
};
pub use wire::{batch_digest, recover_signer, report_digest, sign_digest, WireError};
