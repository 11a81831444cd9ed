use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_bytes;
use crate::hash::ContentHash;

/// Content carried by a single edit operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpContent {
    /// Full replacement source for the target.
    Replace { source: String },
    /// Structured patch applied to the target by the agent runtime.
    Patch { patch: String },
}

/// One edit operation in a mutation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOp {
    /// Target file or path, relative to the agent root.
    pub target: String,
    pub content: OpContent,
}

impl MutationOp {
    pub fn replace(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            content: OpContent::Replace {
                source: source.into(),
            },
        }
    }

    pub fn patch(target: impl Into<String>, patch: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            content: OpContent::Patch {
                patch: patch.into(),
            },
        }
    }

    /// Replacement source, if the op carries one.
    pub fn source(&self) -> Option<&str> {
        match &self.content {
            OpContent::Replace { source } => Some(source),
            OpContent::Patch { .. } => None,
        }
    }

    /// Text of the op regardless of kind, for token scanning.
    pub fn text(&self) -> &str {
        match &self.content {
            OpContent::Replace { source } => source,
            OpContent::Patch { patch } => patch,
        }
    }
}

/// A proposed mutation of an agent's code.
///
/// `(agent_id, nonce)` is unique within an epoch. `ops` may be empty, which
/// marks a metadata-only change that the pipeline records and skips.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub agent_id: String,
    pub epoch_id: String,
    pub nonce: String,
    pub intent: String,
    pub ops: Vec<MutationOp>,
    /// Extra targets touched without carrying content (renames, deletions).
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Hex-encoded signature over [`MutationRequest::signing_message`].
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SigningView<'a> {
    agent_id: &'a str,
    epoch_id: &'a str,
    intent: &'a str,
    nonce: &'a str,
    ops: &'a [MutationOp],
    random_seed: Option<u64>,
    targets: &'a [String],
}

impl MutationRequest {
    pub fn new(
        agent_id: impl Into<String>,
        epoch_id: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            epoch_id: epoch_id.into(),
            nonce: nonce.into(),
            intent: String::new(),
            ops: Vec::new(),
            targets: Vec::new(),
            random_seed: None,
            signature: String::new(),
            generated_at: None,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = intent.into();
        self
    }

    pub fn with_op(mut self, op: MutationOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn is_noop(&self) -> bool {
        self.ops.is_empty()
    }

    /// Deduplicated targets in first-seen order: op targets, then explicit targets.
    pub fn all_targets(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for target in self
            .ops
            .iter()
            .map(|op| op.target.as_str())
            .chain(self.targets.iter().map(String::as_str))
        {
            if !seen.contains(&target) {
                seen.push(target);
            }
        }
        seen
    }

    /// Last replacement source supplied for a target.
    pub fn source_for(&self, target: &str) -> Option<&str> {
        self.ops
            .iter()
            .rev()
            .filter(|op| op.target == target)
            .find_map(MutationOp::source)
    }

    /// Canonical bytes covered by the request signature.
    pub fn signing_message(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical_bytes(&SigningView {
            agent_id: &self.agent_id,
            epoch_id: &self.epoch_id,
            intent: &self.intent,
            nonce: &self.nonce,
            ops: &self.ops,
            random_seed: self.random_seed,
            targets: &self.targets,
        })
    }

    /// Digest of the signed content.
    pub fn request_hash(&self) -> Result<ContentHash, serde_json::Error> {
        Ok(ContentHash::hash(&self.signing_message()?))
    }

    /// Stable mutation identifier derived from the signed content.
    pub fn mutation_id(&self) -> Result<String, serde_json::Error> {
        Ok(format!("mut-{}", &self.request_hash()?.to_hex()[..16]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request() -> MutationRequest {
        MutationRequest::new("sample_agent", "epoch-1", "n-1")
            .with_intent("refactor")
            .with_op(MutationOp::replace("agent/main.py", "print('a')"))
            .with_op(MutationOp::patch("agent/util.py", "@@ -1 +1 @@"))
            .with_op(MutationOp::replace("agent/main.py", "print('b')"))
            .with_target("agent/util.py")
            .with_target("agent/old.py")
    }

    #[test]
    fn targets_deduplicated_in_order() {
        let req = make_request();
        assert_eq!(
            req.all_targets(),
            vec!["agent/main.py", "agent/util.py", "agent/old.py"]
        );
    }

    #[test]
    fn source_for_takes_last_replacement() {
        let req = make_request();
        assert_eq!(req.source_for("agent/main.py"), Some("print('b')"));
        assert_eq!(req.source_for("agent/util.py"), None);
    }

    #[test]
    fn signature_not_part_of_signed_content() {
        let req = make_request();
        let signed = req.clone().with_signature("deadbeef");
        assert_eq!(
            req.signing_message().unwrap(),
            signed.signing_message().unwrap()
        );
        assert_eq!(req.mutation_id().unwrap(), signed.mutation_id().unwrap());
    }

    #[test]
    fn nonce_changes_identity() {
        let a = make_request();
        let mut b = make_request();
        b.nonce = "n-2".into();
        assert_ne!(a.request_hash().unwrap(), b.request_hash().unwrap());
        assert!(a.mutation_id().unwrap().starts_with("mut-"));
    }

    #[test]
    fn noop_detection() {
        assert!(MutationRequest::new("a", "e", "n").is_noop());
        assert!(!make_request().is_noop());
    }

    #[test]
    fn serde_roundtrip_with_defaults() {
        let json = r#"{"agent_id":"a","epoch_id":"e","nonce":"n","intent":"i","ops":[{"target":"x.py","content":{"kind":"replace","source":"pass"}}]}"#;
        let req: MutationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ops.len(), 1);
        assert!(req.signature.is_empty());
        assert!(req.random_seed.is_none());
    }
}
