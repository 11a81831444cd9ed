//! Peer compatibility classification and the negotiation handshake.

use std::fmt;

use mgp_types::{canonical_bytes, ContentHash};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::LawResult;
use crate::manifest::{manifest_digest, LawManifest};
use crate::versioning::semver_satisfies;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatClass {
    FullCompatible,
    DownlevelCompatible,
    Incompatible,
}

impl CompatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullCompatible => "FULL_COMPATIBLE",
            Self::DownlevelCompatible => "DOWNLEVEL_COMPATIBLE",
            Self::Incompatible => "INCOMPATIBLE",
        }
    }

    pub fn is_compatible(&self) -> bool {
        !matches!(self, Self::Incompatible)
    }
}

impl fmt::Display for CompatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub compat_class: CompatClass,
    pub compat_digest: ContentHash,
    pub reasons: Vec<String>,
}

/// Put the pair in a fixed order so both peers hash the same view.
fn ordered<'a>(a: &'a LawManifest, b: &'a LawManifest) -> LawResult<(&'a LawManifest, &'a LawManifest)> {
    let key_a = (a.node_id.as_str(), manifest_digest(a)?);
    let key_b = (b.node_id.as_str(), manifest_digest(b)?);
    Ok(if key_a <= key_b { (a, b) } else { (b, a) })
}

fn compat_digest(a: &LawManifest, b: &LawManifest, class: CompatClass) -> LawResult<ContentHash> {
    let (first, second) = ordered(a, b)?;
    let first_modules = first.module_map();
    let second_modules = second.module_map();
    let intersection: Vec<_> = first_modules
        .iter()
        .filter_map(|(id, m)| {
            second_modules.get(id).map(|other| {
                json!({"id": id, "version_a": m.version, "version_b": other.version})
            })
        })
        .collect();
    let view = json!({
        "law_version_a": first.law_version,
        "law_version_b": second.law_version,
        "intersection": intersection,
        "class": class,
    });
    Ok(ContentHash::hash(&canonical_bytes(&view)?))
}

fn result(
    a: &LawManifest,
    b: &LawManifest,
    class: CompatClass,
    reasons: Vec<String>,
) -> LawResult<CompatibilityResult> {
    Ok(CompatibilityResult {
        compat_class: class,
        compat_digest: compat_digest(a, b, class)?,
        reasons,
    })
}

/// `newer` may talk to `older` when shared modules do not conflict and
/// modules only `newer` has do not require an out-of-range version of
/// something `older` runs.
fn is_downlevel_compatible(newer: &LawManifest, older: &LawManifest) -> bool {
    let older_map = older.module_map();
    let newer_map = newer.module_map();

    for old in &older.modules {
        if let Some(new) = newer_map.get(old.id.as_str()) {
            if new.conflicts_with(old) || old.conflicts_with(new) {
                return false;
            }
        }
    }
    for module in newer.modules.iter().filter(|m| !older_map.contains_key(m.id.as_str())) {
        for dep in &module.requires {
            if let Some(present) = older_map.get(dep.id.as_str()) {
                if !semver_satisfies(&present.version, &dep.version_range).unwrap_or(false) {
                    return false;
                }
            }
        }
    }
    true
}

pub fn evaluate_compatibility(a: &LawManifest, b: &LawManifest) -> LawResult<CompatibilityResult> {
    use CompatClass::*;

    if a.law_version != b.law_version {
        return result(a, b, Incompatible, vec!["law_version mismatch without bridge".into()]);
    }

    let a_map = a.module_map();
    let b_map = b.module_map();

    for (id, left) in &a_map {
        if let Some(right) = b_map.get(id) {
            if left.conflicts_with(right) || right.conflicts_with(left) {
                return result(a, b, Incompatible, vec![format!("conflict active on shared module {id}")]);
            }
        }
    }
    if let Some(m) = a.modules.iter().find(|m| m.missing_required(&b_map)) {
        return result(a, b, Incompatible, vec![format!("requires unsatisfied from {} into peer", m.id)]);
    }
    if let Some(m) = b.modules.iter().find(|m| m.missing_required(&a_map)) {
        return result(
            a,
            b,
            Incompatible,
            vec![format!("requires unsatisfied from peer {} into local", m.id)],
        );
    }

    if a.modules.len() == b.modules.len() && a.modules.iter().all(|m| b_map.contains_key(m.id.as_str())) {
        return result(a, b, FullCompatible, Vec::new());
    }
    let (newer, older) = if a.modules.len() >= b.modules.len() { (a, b) } else { (b, a) };
    if is_downlevel_compatible(newer, older) {
        result(a, b, DownlevelCompatible, Vec::new())
    } else {
        result(a, b, Incompatible, vec!["downlevel constraints unsatisfied".into()])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    Init,
    ManifestExchanged,
    Evaluated,
    Agreed,
    Bound,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub state: NegotiationState,
    pub compat_class: CompatClass,
    pub compat_digest: ContentHash,
}

/// Binding requires both sides to have independently computed the same
/// compatible class and digest.
pub fn negotiate_manifests(
    local: &LawManifest,
    peer: &LawManifest,
    peer_result: Option<&CompatibilityResult>,
) -> LawResult<NegotiationOutcome> {
    let local_result = evaluate_compatibility(local, peer)?;
    let outcome = |state, r: &CompatibilityResult| NegotiationOutcome {
        state,
        compat_class: r.compat_class,
        compat_digest: r.compat_digest,
    };

    if !local_result.compat_class.is_compatible() {
        warn!(peer = %peer.node_id, reasons = ?local_result.reasons, "Law negotiation rejected locally");
        return Ok(outcome(NegotiationState::Rejected, &local_result));
    }
    let Some(peer_result) = peer_result else {
        return Ok(outcome(NegotiationState::Evaluated, &local_result));
    };
    if !peer_result.compat_class.is_compatible() {
        return Ok(outcome(NegotiationState::Rejected, peer_result));
    }
    let state = if peer_result.compat_class == local_result.compat_class
        && peer_result.compat_digest == local_result.compat_digest
    {
        NegotiationState::Bound
    } else {
        NegotiationState::Rejected
    };
    debug!(peer = %peer.node_id, state = ?state, class = %local_result.compat_class, "Law negotiation finished");
    Ok(outcome(state, &local_result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::fixtures::{make_manifest, make_module};
    use crate::manifest::LawRef;

    #[test]
    fn full_when_same_module_set() {
        let local = make_manifest("n1", "e", vec![make_module("Core", "2.0.0"), make_module("Life", "2.0.0")]);
        let peer = make_manifest("n2", "e", vec![make_module("Core", "2.0.1"), make_module("Life", "2.0.1")]);
        let r = evaluate_compatibility(&local, &peer).unwrap();
        assert_eq!(r.compat_class, CompatClass::FullCompatible);
        assert_eq!(r.compat_digest.to_hex().len(), 64);
    }

    #[test]
    fn downlevel_when_peer_adds_module() {
        let local = make_manifest("n1", "e", vec![make_module("Core", "2.0.0")]);
        let peer = make_manifest("n2", "e", vec![make_module("Core", "2.0.0"), make_module("Fed", "2.0.0")]);
        let r = evaluate_compatibility(&local, &peer).unwrap();
        assert_eq!(r.compat_class, CompatClass::DownlevelCompatible);
    }

    #[test]
    fn extra_module_requirements_are_checked_against_local() {
        let local = make_manifest("n1", "e", vec![make_module("Core", "2.0.0")]);
        let mut fed = make_module("Fed", "2.0.0");
        fed.requires.push(LawRef::new("Core", ">=2.0.0"));
        let peer = make_manifest("n2", "e", vec![make_module("Core", "2.0.0"), fed.clone()]);
        assert_eq!(
            evaluate_compatibility(&local, &peer).unwrap().compat_class,
            CompatClass::DownlevelCompatible
        );

        fed.requires[0] = LawRef::new("Core", ">=3.0.0");
        let peer = make_manifest("n2", "e", vec![make_module("Core", "2.0.0"), fed]);
        let r = evaluate_compatibility(&local, &peer).unwrap();
        assert_eq!(r.compat_class, CompatClass::Incompatible);
        assert_eq!(r.reasons, vec!["requires unsatisfied from peer Fed into local"]);
    }

    #[test]
    fn law_version_mismatch() {
        let local = make_manifest("n1", "e", vec![make_module("Core", "2.0.0")]);
        let mut peer = local.clone();
        peer.law_version = "founders_law@v3".into();
        let r = evaluate_compatibility(&local, &peer).unwrap();
        assert_eq!(r.compat_class, CompatClass::Incompatible);
        assert_eq!(r.reasons, vec!["law_version mismatch without bridge"]);
    }

    #[test]
    fn shared_module_conflict() {
        let mut core = make_module("Core", "2.0.0");
        core.conflicts.push(LawRef::new("Core", "<2.0.0"));
        let local = make_manifest("n1", "e", vec![core]);
        let peer = make_manifest("n2", "e", vec![make_module("Core", "1.5.0")]);
        let r = evaluate_compatibility(&local, &peer).unwrap();
        assert_eq!(r.reasons, vec!["conflict active on shared module Core"]);
    }

    #[test]
    fn digest_is_symmetric_across_peers() {
        let local = make_manifest("n1", "e", vec![make_module("Core", "2.0.0")]);
        let peer = make_manifest("n2", "e", vec![make_module("Core", "2.0.3")]);
        let mine = evaluate_compatibility(&local, &peer).unwrap();
        let theirs = evaluate_compatibility(&peer, &local).unwrap();
        assert_eq!(mine, theirs);
    }

    #[test]
    fn negotiation_binds_on_matching_results() {
        let local = make_manifest("n1", "e", vec![make_module("Core", "2.0.0")]);
        let peer = make_manifest("n2", "e", vec![make_module("Core", "2.1.0")]);
        let peer_eval = evaluate_compatibility(&peer, &local).unwrap();

        let pending = negotiate_manifests(&local, &peer, None).unwrap();
        assert_eq!(pending.state, NegotiationState::Evaluated);

        let bound = negotiate_manifests(&local, &peer, Some(&peer_eval)).unwrap();
        assert_eq!(bound.state, NegotiationState::Bound);
        assert_eq!(bound.compat_digest, peer_eval.compat_digest);

        let mut forged = peer_eval.clone();
        forged.compat_digest = ContentHash::hash(b"forged");
        let rejected = negotiate_manifests(&local, &peer, Some(&forged)).unwrap();
        assert_eq!(rejected.state, NegotiationState::Rejected);
    }
}
