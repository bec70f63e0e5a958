// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ARX Custody Core
//!
//! The accounting heart of ARX: a vault that issues shares against
//! custodied assets, farms those assets out to strategies through an
//! escrow layer, and prices everything off a signed, quorum-verified
//! valuation oracle that refuses to be rushed, spoofed, or replayed.
//!
//! Three components, one trust chain:
//!
//! - **oracle** — Signed value reports with nonce, expiry, rate-limit,
//!   and weight-quorum admission control. Recoverable 65-byte ECDSA over
//!   Keccak-256, personal-message prefix and all.
//! - **escrow** — The adapter ledger: allocation vs. external-deposit
//!   double bookkeeping, whitelisted strategy multicalls behind a
//!   circuit breaker, and a valuation waterfall that degrades loudly
//!   instead of failing quietly.
//! - **vault** — Share accounting with virtual-shares pricing,
//!   rate-bounded interest recognition, allocation caps behind a
//!   timelock, and a forced exit valve that works even when everyone
//!   else is unresponsive.
//!
//! Supporting cast: **types** (addresses, identifiers, selectors),
//! **token** (the underlying asset ledger), **timelock** (the shared
//! pending-operation store), and **config** (every constant, documented).
//!
//! ## Design Philosophy
//!
//! 1. Checked arithmetic everywhere value moves; saturating only where
//!    desync clamps are deliberate, and then always with a warning.
//! 2. Every failure is a named variant. "Something went wrong" is not
//!    an error message, it's a confession.
//! 3. Time is always a parameter, never an ambient read. If it touches
//!    a clock, a test can control it.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod escrow;
pub mod oracle;
pub mod timelock;
pub mod token;
pub mod types;
pub mod vault;
