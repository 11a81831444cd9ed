//! Law evolution certificates.
//!
//! A certificate binds an old and a new law surface together with the
//! epochs they apply to. The law surface excludes the node, epoch and
//! signature envelope, so two nodes running the same law agree on it.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use mgp_types::{canonical_bytes, ContentHash};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::LawResult;
use crate::manifest::LawManifest;

pub const DEFAULT_SIGNER_ALGO: &str = "ed25519";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawEvolutionCertificate {
    pub certificate_id: String,
    pub old_manifest_digest: ContentHash,
    pub new_manifest_digest: ContentHash,
    pub old_epoch_id: String,
    pub new_epoch_id: String,
    pub reason: String,
    pub replay_safe: bool,
    pub signer_key_id: String,
    pub signer_algo: String,
    pub signature: String,
}

/// Issuer-chosen fields of a certificate.
#[derive(Clone, Debug)]
pub struct CertificateParams {
    pub reason: String,
    pub signer_key_id: String,
    pub signer_algo: String,
    pub replay_safe: bool,
}

impl CertificateParams {
    pub fn new(reason: impl Into<String>, signer_key_id: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            signer_key_id: signer_key_id.into(),
            signer_algo: DEFAULT_SIGNER_ALGO.into(),
            replay_safe: false,
        }
    }

    pub fn replay_safe(mut self) -> Self {
        self.replay_safe = true;
        self
    }

    pub fn with_algo(mut self, algo: impl Into<String>) -> Self {
        self.signer_algo = algo.into();
        self
    }
}

pub fn law_surface_digest(manifest: &LawManifest) -> LawResult<ContentHash> {
    let surface = json!({
        "law_version": manifest.law_version,
        "trust_mode": manifest.trust_mode,
        "modules": manifest.modules,
    });
    Ok(ContentHash::hash(&canonical_bytes(&surface)?))
}

/// Digest of everything except the signature. This is the signed message.
pub fn certificate_digest(cert: &LawEvolutionCertificate) -> LawResult<ContentHash> {
    let mut value = serde_json::to_value(cert)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("signature");
    }
    Ok(ContentHash::hash(&canonical_bytes(&value)?))
}

fn certificate_id(
    old_digest: &ContentHash,
    new_digest: &ContentHash,
    old_epoch: &str,
    new_epoch: &str,
    params: &CertificateParams,
) -> String {
    let preimage = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        old_digest.to_hex(),
        new_digest.to_hex(),
        old_epoch,
        new_epoch,
        params.reason,
        params.replay_safe,
        params.signer_key_id,
        params.signer_algo,
    );
    ContentHash::hash(preimage.as_bytes()).to_hex()
}

/// Issue an unsigned certificate. Call [`sign_certificate`] before publishing.
pub fn issue_certificate(
    old: &LawManifest,
    new: &LawManifest,
    params: &CertificateParams,
) -> LawResult<LawEvolutionCertificate> {
    let old_digest = law_surface_digest(old)?;
    let new_digest = law_surface_digest(new)?;
    let certificate_id = certificate_id(&old_digest, &new_digest, &old.epoch_id, &new.epoch_id, params);
    info!(
        certificate_id = %certificate_id,
        old_epoch = %old.epoch_id,
        new_epoch = %new.epoch_id,
        "Issued law evolution certificate"
    );
    Ok(LawEvolutionCertificate {
        certificate_id,
        old_manifest_digest: old_digest,
        new_manifest_digest: new_digest,
        old_epoch_id: old.epoch_id.clone(),
        new_epoch_id: new.epoch_id.clone(),
        reason: params.reason.clone(),
        replay_safe: params.replay_safe,
        signer_key_id: params.signer_key_id.clone(),
        signer_algo: params.signer_algo.clone(),
        signature: String::new(),
    })
}

pub fn sign_certificate(cert: &mut LawEvolutionCertificate, key: &SigningKey) -> LawResult<()> {
    let digest = certificate_digest(cert)?;
    cert.signature = hex::encode(key.sign(digest.as_bytes()).to_bytes());
    Ok(())
}

fn signature_verifies(cert: &LawEvolutionCertificate, key: &VerifyingKey) -> LawResult<bool> {
    let Ok(bytes) = hex::decode(cert.signature.trim()) else {
        return Ok(false);
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return Ok(false);
    };
    let digest = certificate_digest(cert)?;
    Ok(key.verify(digest.as_bytes(), &signature).is_ok())
}

/// Every problem with `cert` as a record of the `old -> new` transition.
/// The signature is only checked cryptographically when `key` is given.
pub fn validate_certificate(
    cert: &LawEvolutionCertificate,
    old: &LawManifest,
    new: &LawManifest,
    require_replay_safe: bool,
    key: Option<&VerifyingKey>,
) -> LawResult<Vec<String>> {
    let mut errors = Vec::new();
    let old_digest = law_surface_digest(old)?;
    let new_digest = law_surface_digest(new)?;

    if cert.old_manifest_digest != old_digest {
        errors.push("old manifest digest does not match certificate".to_string());
    }
    if cert.new_manifest_digest != new_digest {
        errors.push("new manifest digest does not match certificate".to_string());
    }
    if cert.old_epoch_id != old.epoch_id {
        errors.push("old epoch id mismatch".to_string());
    }
    if cert.new_epoch_id != new.epoch_id {
        errors.push("new epoch id mismatch".to_string());
    }
    if cert.old_manifest_digest == cert.new_manifest_digest {
        errors.push("certificate must reference a manifest change".to_string());
    }

    let params = CertificateParams {
        reason: cert.reason.clone(),
        signer_key_id: cert.signer_key_id.clone(),
        signer_algo: cert.signer_algo.clone(),
        replay_safe: cert.replay_safe,
    };
    let expected = certificate_id(&old_digest, &new_digest, &old.epoch_id, &new.epoch_id, &params);
    if cert.certificate_id != expected {
        errors.push("certificate id is not deterministic for payload".to_string());
    }

    if require_replay_safe && !cert.replay_safe {
        errors.push("certificate is not replay-safe".to_string());
    }
    if cert.signer_key_id.trim().is_empty() {
        errors.push("missing signer key id".to_string());
    }
    if cert.signature.trim().is_empty() {
        errors.push("missing certificate signature".to_string());
    } else if let Some(key) = key {
        if !signature_verifies(cert, key)? {
            errors.push("certificate signature does not verify".to_string());
        }
    }
    Ok(errors)
}

/// Decide whether moving from `old` to `new` is legitimate.
///
/// No manifests on either side is not a law transition. A changed law
/// surface must carry a certificate; an unchanged one may still carry one,
/// in which case it is validated like any other.
pub fn validate_law_transition(
    old: Option<&LawManifest>,
    new: Option<&LawManifest>,
    certificate: Option<&LawEvolutionCertificate>,
    require_replay_safe: bool,
    key: Option<&VerifyingKey>,
) -> LawResult<Vec<String>> {
    let (old, new) = match (old, new) {
        (None, None) => return Ok(Vec::new()),
        (Some(old), Some(new)) => (old, new),
        _ => {
            return Ok(vec![
                "both old and new manifests are required for law transition validation".into(),
            ])
        }
    };
    let changed = law_surface_digest(old)? != law_surface_digest(new)?;
    match certificate {
        None if changed => Ok(vec!["law transition requires a law evolution certificate".into()]),
        None => Ok(Vec::new()),
        Some(cert) => validate_certificate(cert, old, new, require_replay_safe, key),
    }
}

/// Anchors recorded on an epoch so its law can be audited later.
pub fn epoch_law_transition_metadata(
    manifest: Option<&LawManifest>,
    certificate: Option<&LawEvolutionCertificate>,
) -> LawResult<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    let Some(manifest) = manifest else {
        return Ok(metadata);
    };
    metadata.insert("law_surface_digest".into(), law_surface_digest(manifest)?.to_hex());
    metadata.insert("law_trust_mode".into(), manifest.trust_mode.clone());
    if let Some(cert) = certificate {
        metadata.insert("law_evolution_certificate_id".into(), cert.certificate_id.clone());
    }
    Ok(metadata)
}
