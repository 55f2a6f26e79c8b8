//! Verification-without-commit snapshots (C12): run the same checks
//! [`crate::pipeline::Ledger::mint`] would, without touching the chain,
//! and hand back a time-boxed token that can later be redeemed for the
//! real commit without re-running verification.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::RngCore;
use shared::{CanonicalValue, Hash256};

use crate::artifact::Artifact;
use crate::chain::Chain;
use crate::config::LedgerConfig;
use crate::dependency::{self, DependencyOrder};
use crate::error::{LedgerError, Result};
use crate::policy::{self, PolicyDecision};
use crate::trust::{DefaultTrustChecker, TrustChecker, VerificationLevel, VerificationReport};

/// A 128-bit fast-track token, hex-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotToken(String);

impl SnapshotToken {
    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }
}

impl std::fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One artifact's contribution to a snapshot's cryptographic binding:
/// enough to prove, after the fact, exactly what was checked and with
/// what result, without re-running verification.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactVerification {
    pub id: String,
    pub content_hash: String,
    pub verification_hash: Hash256,
}

fn policy_label(decision: &PolicyDecision) -> String {
    match decision {
        PolicyDecision::Accept => "ACCEPT".to_string(),
        PolicyDecision::NeedsCorroboration { actions } => {
            format!("NEEDS_CORROBORATION:{}", actions.join("|"))
        }
        PolicyDecision::Reject { reason } => format!("REJECT:{reason}"),
    }
}

fn verification_hash(
    artifact: &Artifact,
    report: &VerificationReport,
    decision: &PolicyDecision,
) -> Hash256 {
    let mut map = CanonicalValue::map();
    map.insert("id", CanonicalValue::Str(artifact.id.clone()));
    map.insert(
        "content_hash",
        CanonicalValue::Str(artifact.content_hash.clone()),
    );
    map.insert("trust_score", CanonicalValue::Float(report.trust_score));
    map.insert("failed", CanonicalValue::Bool(report.failed));
    map.insert("policy", CanonicalValue::Str(policy_label(decision)));
    Hash256::sha3_256(&map.encode())
}

fn report_hash(
    report_id: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    order: &DependencyOrder,
    would_commit: bool,
    verifications: &[ArtifactVerification],
) -> Hash256 {
    let mut map = CanonicalValue::map();
    map.insert("report_id", CanonicalValue::Str(report_id.to_string()));
    map.insert("issued_at", CanonicalValue::Str(issued_at.to_rfc3339()));
    map.insert("expires_at", CanonicalValue::Str(expires_at.to_rfc3339()));
    map.insert(
        "order",
        CanonicalValue::Seq(
            order
                .order
                .iter()
                .map(|id| CanonicalValue::Str(id.clone()))
                .collect(),
        ),
    );
    map.insert("would_commit", CanonicalValue::Bool(would_commit));
    map.insert(
        "verifications",
        CanonicalValue::Seq(
            verifications
                .iter()
                .map(|v| {
                    let mut entry = CanonicalValue::map();
                    entry.insert("id", CanonicalValue::Str(v.id.clone()));
                    entry.insert("content_hash", CanonicalValue::Str(v.content_hash.clone()));
                    entry.insert(
                        "verification_hash",
                        CanonicalValue::Str(v.verification_hash.to_string()),
                    );
                    entry
                })
                .collect(),
        ),
    );
    Hash256::sha3_256(&map.encode())
}

/// The outcome of running the pipeline's checks against a batch without
/// committing it. `report_hash` binds every field below to a single
/// value over the canonical encoder, the same way a block or a consent
/// decision is bound to its contents — a snapshot cannot be replayed
/// with a result silently swapped in after the fact.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub report_id: String,
    pub report_hash: Hash256,
    pub token: SnapshotToken,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub order: DependencyOrder,
    pub reports: Vec<VerificationReport>,
    pub policy: Vec<PolicyDecision>,
    pub verifications: Vec<ArtifactVerification>,
    pub would_commit: bool,
}

struct PendingSnapshot {
    batch: Vec<Artifact>,
    expires_at: DateTime<Utc>,
}

/// Holds outstanding snapshots until they are redeemed or expire.
/// Intentionally a thin in-memory registry: the pipeline owns the
/// chain, this only owns the token-to-batch mapping.
#[derive(Default)]
pub struct SnapshotRegistry {
    pending: Mutex<HashMap<String, PendingSnapshot>>,
}

impl SnapshotRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs dependency, verification, and policy checks for `batch`
    /// against `chain` without ever mining or appending anything. On
    /// success the batch is held under a token redeemable via
    /// [`Self::commit_from_token`] until `config.snapshot_ttl` elapses.
    #[must_use]
    pub fn verify_only(
        &self,
        chain: &Chain,
        batch: Vec<Artifact>,
        level: VerificationLevel,
        config: &LedgerConfig,
    ) -> SnapshotReport {
        let order = dependency::order(&batch, chain);
        let checker = DefaultTrustChecker;
        let reports: Vec<VerificationReport> =
            batch.iter().map(|a| checker.analyze(a, level)).collect();
        let policy_decisions: Vec<PolicyDecision> = batch
            .iter()
            .map(|a| policy::evaluate(a, config))
            .collect();
        let verifications: Vec<ArtifactVerification> = batch
            .iter()
            .zip(&reports)
            .zip(&policy_decisions)
            .map(|((artifact, report), decision)| ArtifactVerification {
                id: artifact.id.clone(),
                content_hash: artifact.content_hash.clone(),
                verification_hash: verification_hash(artifact, report, decision),
            })
            .collect();

        let would_commit = order.unresolvable.is_empty()
            && reports.iter().all(|r| !r.failed)
            && policy_decisions.iter().all(PolicyDecision::is_accept);

        let now = Utc::now();
        let token = SnapshotToken::generate();
        let expires_at = now + config.snapshot_ttl;
        let report_id = uuid::Uuid::new_v4().to_string();
        let hash = report_hash(&report_id, now, expires_at, &order, would_commit, &verifications);

        if would_commit {
            self.pending.lock().expect("snapshot registry poisoned").insert(
                token.0.clone(),
                PendingSnapshot {
                    batch,
                    expires_at,
                },
            );
        }

        SnapshotReport {
            report_id,
            report_hash: hash,
            token,
            issued_at: now,
            expires_at,
            order,
            reports,
            policy: policy_decisions,
            verifications,
            would_commit,
        }
    }

    /// Redeems a token minted by a `would_commit = true` snapshot,
    /// returning the batch it held so the caller can hand it to
    /// [`crate::pipeline::Ledger::mint`] without re-verifying.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::SnapshotInvalid`] if the token is unknown,
    /// or [`LedgerError::SnapshotExpired`] if its TTL has elapsed — in
    /// the latter case the token is also evicted.
    pub fn commit_from_token(&self, token: &SnapshotToken) -> Result<Vec<Artifact>> {
        let mut guard = self.pending.lock().expect("snapshot registry poisoned");
        let Some(pending) = guard.get(&token.0) else {
            return Err(LedgerError::SnapshotInvalid {
                report_id: token.0.clone(),
                reason: "no such snapshot, or it was already redeemed".to_string(),
            });
        };

        if Utc::now() > pending.expires_at {
            guard.remove(&token.0);
            return Err(LedgerError::SnapshotExpired {
                report_id: token.0.clone(),
            });
        }

        Ok(guard.remove(&token.0).expect("checked present above").batch)
    }

    /// Drops every snapshot whose TTL has elapsed. Callers running a
    /// long-lived registry should invoke this periodically; nothing
    /// here does so on its own.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.pending
            .lock()
            .expect("snapshot registry poisoned")
            .retain(|_, pending| pending.expires_at > now);
    }
}
