//! Law manifests: the set of law modules a node runs under.

use std::collections::{BTreeMap, BTreeSet};

use mgp_types::{canonical_bytes, ContentHash};
use serde::{Deserialize, Serialize};

use crate::error::LawResult;
use crate::versioning::{parse_semver, semver_satisfies};

pub const KIND_VALUES: [&str; 3] = ["core", "extension", "federation"];
pub const SCOPE_VALUES: [&str; 3] = ["local", "federated", "both"];
pub const SEVERITY_VALUES: [&str; 3] = ["hard", "soft", "advisory"];

/// Reference to another module by id and version range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawRef {
    pub id: String,
    pub version_range: String,
}

impl LawRef {
    pub fn new(id: impl Into<String>, version_range: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version_range: version_range.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawRule {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    pub severity: String,
    #[serde(default)]
    pub applies_to: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawModule {
    pub id: String,
    pub version: String,
    pub kind: String,
    pub scope: String,
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub trust_modes: Vec<String>,
    #[serde(default)]
    pub lifecycle_states: Vec<String>,
    #[serde(default)]
    pub requires: Vec<LawRef>,
    #[serde(default)]
    pub conflicts: Vec<LawRef>,
    #[serde(default)]
    pub supersedes: Vec<LawRef>,
    #[serde(default)]
    pub rules: Vec<LawRule>,
}

impl LawModule {
    /// True when `self` declares a conflict that `other`'s version falls in.
    /// Unparseable ranges count as no conflict here; `validate_manifest`
    /// reports them.
    pub fn conflicts_with(&self, other: &LawModule) -> bool {
        self.conflicts.iter().any(|r| {
            r.id == other.id && semver_satisfies(&other.version, &r.version_range).unwrap_or(false)
        })
    }

    /// True when some `requires` entry is absent from `peers` or out of range.
    pub fn missing_required(&self, peers: &BTreeMap<&str, &LawModule>) -> bool {
        self.requires.iter().any(|dep| match peers.get(dep.id.as_str()) {
            None => true,
            Some(peer) => !semver_satisfies(&peer.version, &dep.version_range).unwrap_or(false),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSignature {
    pub algo: String,
    pub key_id: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawManifest {
    pub schema_version: String,
    pub node_id: String,
    pub law_version: String,
    pub trust_mode: String,
    pub epoch_id: String,
    pub modules: Vec<LawModule>,
    pub signature: ManifestSignature,
}

impl LawManifest {
    pub fn module_map(&self) -> BTreeMap<&str, &LawModule> {
        self.modules.iter().map(|m| (m.id.as_str(), m)).collect()
    }

    pub fn module_ids(&self) -> BTreeSet<&str> {
        self.modules.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn from_json(text: &str) -> LawResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Digest over the whole manifest, envelope included.
pub fn manifest_digest(manifest: &LawManifest) -> LawResult<ContentHash> {
    Ok(ContentHash::hash(&canonical_bytes(manifest)?))
}

/// Every problem found, in module order. Empty means valid.
pub fn validate_manifest(manifest: &LawManifest) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();
    let modules = manifest.module_map();

    for module in &manifest.modules {
        if !seen.insert(module.id.as_str()) {
            errors.push(format!("duplicate module id: {}", module.id));
        }
        if let Err(e) = parse_semver(&module.version) {
            errors.push(e.to_string());
        }
        if !KIND_VALUES.contains(&module.kind.as_str()) {
            errors.push(format!("invalid module kind for {}: {}", module.id, module.kind));
        }
        if !SCOPE_VALUES.contains(&module.scope.as_str()) {
            errors.push(format!("invalid module scope for {}: {}", module.id, module.scope));
        }
        if !module.trust_modes.contains(&manifest.trust_mode) {
            errors.push(format!(
                "module {} does not support trust mode {}",
                module.id, manifest.trust_mode
            ));
        }

        for dep in &module.requires {
            let Some(target) = modules.get(dep.id.as_str()) else {
                errors.push(format!("module {} requires missing dependency {}", module.id, dep.id));
                continue;
            };
            match semver_satisfies(&target.version, &dep.version_range) {
                Ok(true) => {}
                Ok(false) => errors.push(format!(
                    "module {} requires {}{}, found {}",
                    module.id, dep.id, dep.version_range, target.version
                )),
                Err(e) => errors.push(e.to_string()),
            }
        }

        for conflict in &module.conflicts {
            let Some(target) = modules.get(conflict.id.as_str()) else {
                continue;
            };
            match semver_satisfies(&target.version, &conflict.version_range) {
                Ok(true) => errors.push(format!(
                    "module {} conflicts with active module {}{}",
                    module.id, target.id, conflict.version_range
                )),
                Ok(false) => {}
                Err(e) => errors.push(e.to_string()),
            }
        }

        for rule in &module.rules {
            if !SEVERITY_VALUES.contains(&rule.severity.as_str()) {
                errors.push(format!("invalid severity for {}: {}", rule.rule_id, rule.severity));
            }
            let unsupported: Vec<&str> = rule
                .applies_to
                .iter()
                .filter(|s| !module.applies_to.contains(s))
                .map(String::as_str)
                .collect();
            if !unsupported.is_empty() {
                errors.push(format!(
                    "rule {} applies_to [{}] not in module {} applies_to",
                    rule.rule_id,
                    unsupported.join(", "),
                    module.id
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn make_module(id: &str, version: &str) -> LawModule {
        LawModule {
            id: id.into(),
            version: version.into(),
            kind: "core".into(),
            scope: "both".into(),
            applies_to: vec!["epoch".into(), "mutation".into(), "lifecycle".into()],
            trust_modes: vec!["dev".into(), "prod".into()],
            lifecycle_states: vec!["proposed".into(), "certified".into()],
            requires: Vec::new(),
            conflicts: Vec::new(),
            supersedes: vec![LawRef::new(id, "<2.0.0")],
            rules: vec![LawRule {
                rule_id: format!("{id}-RULE"),
                name: "sample-rule".into(),
                description: "sample".into(),
                severity: "hard".into(),
                applies_to: vec!["epoch".into(), "mutation".into()],
            }],
        }
    }

    pub fn make_manifest(node_id: &str, epoch_id: &str, modules: Vec<LawModule>) -> LawManifest {
        LawManifest {
            schema_version: "2.0.0".into(),
            node_id: node_id.into(),
            law_version: "founders_law@v2".into(),
            trust_mode: "prod".into(),
            epoch_id: epoch_id.into(),
            modules,
            signature: ManifestSignature {
                algo: "ed25519".into(),
                key_id: "law-signer-01".into(),
                value: "sig".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn valid_manifest_has_no_errors() {
        let m = make_manifest("n1", "e1", vec![make_module("FL-Core", "2.0.0")]);
        assert!(validate_manifest(&m).is_empty());
    }

    #[test]
    fn missing_dependency_reported() {
        let mut lifecycle = make_module("FL-Lifecycle", "2.0.0");
        lifecycle.requires.push(LawRef::new("FL-Security", ">=2.0.0"));
        let m = make_manifest("n1", "e1", vec![make_module("FL-Core", "2.0.0"), lifecycle]);
        let errors = validate_manifest(&m);
        assert_eq!(errors, vec!["module FL-Lifecycle requires missing dependency FL-Security"]);
    }

    #[test]
    fn unsatisfied_dependency_and_active_conflict() {
        let mut a = make_module("A", "2.0.0");
        a.requires.push(LawRef::new("B", ">=3.0.0"));
        a.conflicts.push(LawRef::new("B", "<2.5.0"));
        let m = make_manifest("n1", "e1", vec![a, make_module("B", "2.1.0")]);
        let errors = validate_manifest(&m);
        assert!(errors.contains(&"module A requires B>=3.0.0, found 2.1.0".to_string()));
        assert!(errors.contains(&"module A conflicts with active module B<2.5.0".to_string()));
    }

    #[test]
    fn shape_errors() {
        let mut bad = make_module("X", "2.0");
        bad.kind = "plugin".into();
        bad.scope = "global".into();
        bad.trust_modes = vec!["dev".into()];
        bad.rules[0].severity = "fatal".into();
        bad.rules[0].applies_to.push("network".into());
        let m = make_manifest("n1", "e1", vec![bad.clone(), bad]);
        let errors = validate_manifest(&m);
        assert!(errors.contains(&"duplicate module id: X".to_string()));
        assert!(errors.contains(&"invalid semver: 2.0".to_string()));
        assert!(errors.contains(&"invalid module kind for X: plugin".to_string()));
        assert!(errors.contains(&"invalid module scope for X: global".to_string()));
        assert!(errors.contains(&"module X does not support trust mode prod".to_string()));
        assert!(errors.contains(&"invalid severity for X-RULE: fatal".to_string()));
        assert!(errors
            .contains(&"rule X-RULE applies_to [network] not in module X applies_to".to_string()));
    }

    #[test]
    fn digest_changes_with_envelope() {
        let a = make_manifest("n1", "e1", vec![make_module("A", "2.0.0")]);
        let mut b = a.clone();
        b.node_id = "n2".into();
        assert_ne!(manifest_digest(&a).unwrap(), manifest_digest(&b).unwrap());
        assert_eq!(manifest_digest(&a).unwrap(), manifest_digest(&a.clone()).unwrap());
    }
}
