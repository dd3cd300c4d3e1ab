//! Claim layer for the IDShield privacy vault.
//!
//! "Proofs" in the vault are textual claims, not cryptographic artifacts. This crate contains:
//! - The catalog of supported proof kinds and their typed attributes.
//! - Claim text templating (what a verifier gets to read).
//! - Expiry rules for issued claims.

pub mod claim;
pub mod constants;
pub mod types;

pub use claim::{describe_claim, expires_at, is_expired, validate, ClaimError};
pub use types::{ProofAttributes, ProofKind};
