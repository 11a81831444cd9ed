use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::request::MutationRequest;

/// Prefix accepted in place of a real signature when development signatures are allowed.
pub const DEV_SIGNATURE_PREFIX: &str = "dev-";

/// How a request signature was accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMethod {
    Verified,
    DevSignature,
}

/// Outcome of checking a request signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCheck {
    pub ok: bool,
    pub method: Option<SignatureMethod>,
    pub reason: String,
}

impl SignatureCheck {
    fn accepted(method: SignatureMethod) -> Self {
        Self {
            ok: true,
            method: Some(method),
            reason: "ok".into(),
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            method: None,
            reason: reason.into(),
        }
    }
}

/// Verifies mutation-request signatures against a set of trusted Ed25519 keys.
#[derive(Clone, Debug, Default)]
pub struct SignatureVerifier {
    trusted: Vec<VerifyingKey>,
    allow_dev_signatures: bool,
}

impl SignatureVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trusted_key(mut self, key: VerifyingKey) -> Self {
        self.trusted.push(key);
        self
    }

    pub fn allow_dev_signatures(mut self, allow: bool) -> Self {
        self.allow_dev_signatures = allow;
        self
    }

    pub fn trusted_key_count(&self) -> usize {
        self.trusted.len()
    }

    pub fn verify(&self, request: &MutationRequest) -> SignatureCheck {
        let signature = request.signature.trim();
        if signature.is_empty() {
            return SignatureCheck::rejected("missing_signature");
        }
        if let Some(sig) = decode_signature(signature) {
            let message = match request.signing_message() {
                Ok(m) => m,
                Err(e) => return SignatureCheck::rejected(format!("unsignable_request:{e}")),
            };
            if self
                .trusted
                .iter()
                .any(|key| key.verify(&message, &sig).is_ok())
            {
                return SignatureCheck::accepted(SignatureMethod::Verified);
            }
        }
        if self.allow_dev_signatures && signature.starts_with(DEV_SIGNATURE_PREFIX) {
            return SignatureCheck::accepted(SignatureMethod::DevSignature);
        }
        SignatureCheck::rejected("invalid_signature")
    }
}

fn decode_signature(value: &str) -> Option<Signature> {
    let mut bytes = [0u8; 64];
    hex::decode_to_slice(value, &mut bytes).ok()?;
    Some(Signature::from_bytes(&bytes))
}

/// Sign a request in place with the given key.
pub fn sign_request(
    key: &SigningKey,
    request: &mut MutationRequest,
) -> Result<(), serde_json::Error> {
    let message = request.signing_message()?;
    request.signature = hex::encode(key.sign(&message).to_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::MutationOp;

    fn make_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn make_request() -> MutationRequest {
        MutationRequest::new("sample_agent", "epoch-1", "n-1")
            .with_op(MutationOp::replace("a.py", "x = 1"))
    }

    #[test]
    fn verifies_signed_request() {
        let key = make_key(7);
        let verifier = SignatureVerifier::new().with_trusted_key(key.verifying_key());
        let mut req = make_request();
        sign_request(&key, &mut req).unwrap();
        let check = verifier.verify(&req);
        assert!(check.ok);
        assert_eq!(check.method, Some(SignatureMethod::Verified));
    }

    #[test]
    fn rejects_untrusted_key() {
        let verifier = SignatureVerifier::new().with_trusted_key(make_key(1).verifying_key());
        let mut req = make_request();
        sign_request(&make_key(2), &mut req).unwrap();
        assert_eq!(verifier.verify(&req).reason, "invalid_signature");
    }

    #[test]
    fn rejects_tampered_request() {
        let key = make_key(7);
        let verifier = SignatureVerifier::new().with_trusted_key(key.verifying_key());
        let mut req = make_request();
        sign_request(&key, &mut req).unwrap();
        req.intent = "something else".into();
        assert!(!verifier.verify(&req).ok);
    }

    #[test]
    fn dev_signatures_only_when_allowed() {
        let req = make_request().with_signature("dev-local");
        assert!(!SignatureVerifier::new().verify(&req).ok);
        let check = SignatureVerifier::new().allow_dev_signatures(true).verify(&req);
        assert_eq!(check.method, Some(SignatureMethod::DevSignature));
    }

    #[test]
    fn missing_signature() {
        assert_eq!(
            SignatureVerifier::new().verify(&make_request()).reason,
            "missing_signature"
        );
    }
}
