//! # mgp-law
//!
//! Governance of the governance rules themselves.
//!
//! ## Key Types
//!
//! - [`LawManifest`] / [`LawModule`]: the law modules a node runs under,
//!   with `requires` and `conflicts` edges expressed as semver ranges
//! - [`CompatibilityResult`]: peer classification with a digest both
//!   sides compute identically
//! - [`NegotiationOutcome`]: result of the manifest handshake
//! - [`LawEvolutionCertificate`]: signed, digest-anchored record of a
//!   law change between epochs

#![deny(unsafe_code)]

pub mod certificate;
pub mod compat;
pub mod error;
pub mod manifest;
pub mod versioning;

pub use certificate::{
    certificate_digest, epoch_law_transition_metadata, issue_certificate, law_surface_digest,
    sign_certificate, validate_certificate, validate_law_transition, CertificateParams,
    LawEvolutionCertificate, DEFAULT_SIGNER_ALGO,
};
pub use compat::{
    evaluate_compatibility, negotiate_manifests, CompatClass, CompatibilityResult,
    NegotiationOutcome, NegotiationState,
};
pub use error::{LawError, LawResult};
pub use manifest::{
    manifest_digest, validate_manifest, LawManifest, LawModule, LawRef, LawRule,
    ManifestSignature,
};
pub use versioning::{parse_semver, semver_satisfies};
