//! Consent gate (C9): a scoped, pluggable approval step between
//! verification and minting.

use chrono::Utc;
use shared::{CanonicalValue, Hash256};

use crate::trust::VerificationReport;

#[derive(Debug, Clone)]
pub struct ConsentRequest<'a> {
    pub content_hashes: Vec<String>,
    pub reports: &'a [VerificationReport],
}

#[derive(Debug, Clone)]
pub struct ConsentDecision {
    pub approved: bool,
    pub consent_id: String,
    pub signer: String,
    pub signature_hash: Hash256,
    pub reason: Option<String>,
}

/// A signed, out-of-core approval for a batch commit. Object-safe so
/// the pipeline can hold `Box<dyn ConsentGate>` without knowing the
/// concrete collaborator.
pub trait ConsentGate: Send + Sync {
    fn request(&self, consent_id: &str, batch: &ConsentRequest<'_>) -> ConsentDecision;
}

fn signature_hash(consent_id: &str, signer: &str, content_hashes: &[String]) -> Hash256 {
    let mut map = CanonicalValue::map();
    map.insert("consent_id", CanonicalValue::Str(consent_id.to_string()));
    map.insert("timestamp", CanonicalValue::Str(Utc::now().to_rfc3339()));
    map.insert("signer", CanonicalValue::Str(signer.to_string()));
    map.insert(
        "content_hashes",
        CanonicalValue::Seq(
            content_hashes
                .iter()
                .map(|h| CanonicalValue::Str(h.clone()))
                .collect(),
        ),
    );
    Hash256::sha3_256(&map.encode())
}

/// Always approves and stamps a synthetic signer. Sufficient for the
/// `require_consent = false` / test-friendly path; production
/// deployments supply their own [`ConsentGate`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConsentGate;

impl ConsentGate for AutoConsentGate {
    fn request(&self, consent_id: &str, batch: &ConsentRequest<'_>) -> ConsentDecision {
        let signer = "auto-consent".to_string();
        ConsentDecision {
            approved: true,
            consent_id: consent_id.to_string(),
            signature_hash: signature_hash(consent_id, &signer, &batch.content_hashes),
            signer,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_consent_gate_always_approves() {
        let gate = AutoConsentGate;
        let request = ConsentRequest {
            content_hashes: vec!["a".repeat(64)],
            reports: &[],
        };
        let decision = gate.request("consent-1", &request);
        assert!(decision.approved);
        assert_eq!(decision.signer, "auto-consent");
    }

    #[test]
    fn signature_hash_changes_with_content_hashes() {
        let a = signature_hash("c1", "signer", &["a".repeat(64)]);
        let b = signature_hash("c1", "signer", &["b".repeat(64)]);
        assert_ne!(a, b);
    }
}
