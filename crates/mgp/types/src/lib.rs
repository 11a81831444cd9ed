//! # mgp-types
//!
//! Shared vocabulary for the mutation governance pipeline.
//!
//! ## Key Types
//!
//! - [`ContentHash`]: BLAKE3 digest, hex-serialized, with a defined zero hash
//! - [`MutationRequest`] / [`MutationOp`]: a proposed code mutation
//! - [`Tier`] / [`Severity`]: trust tiers and rule severities
//! - [`PromotionState`]: promotion lifecycle and its fixed transition graph
//! - [`SignatureVerifier`]: Ed25519 request signature checks
//! - [`ChainStatus`]: outcome of a hash-chain verification
//!
//! All digests are computed over canonical JSON (see [`canonical`]).

#![deny(unsafe_code)]

pub mod canonical;
pub mod chain;
pub mod hash;
pub mod promotion;
pub mod request;
pub mod signature;
pub mod tier;

pub use canonical::{canonical_bytes, canonical_string, canonical_value, round_to};
pub use chain::ChainStatus;
pub use hash::{ContentHash, ContentHashError};
pub use promotion::PromotionState;
pub use request::{MutationOp, MutationRequest, OpContent};
pub use signature::{
    sign_request, SignatureCheck, SignatureMethod, SignatureVerifier, DEV_SIGNATURE_PREFIX,
};
pub use tier::{determine_tier, Severity, Tier};
