//! Minting pipeline (C10) and the `Ledger` handle: the crate's single
//! entry point, coordinating C5–C9 and delegating the actual block
//! append to C3.
//!
//! Concurrency model: reads (query, proofs, validation) go through an
//! `Arc<RwLock<Chain>>` and may run alongside each other; a commit is
//! additionally serialized by a dedicated `Mutex<()>`, the same
//! `Arc<Mutex<_>>` coordination idiom the teacher's `Miner` uses to
//! guard its parallel nonce search, lifted here to guard the whole
//! pipeline instead of a single block's nonce race.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::block::Block;
use crate::chain::{Chain, QueryFilter};
use crate::config::LedgerConfig;
use crate::consent::{AutoConsentGate, ConsentGate, ConsentRequest};
use crate::contradiction::{find_contradictions, Severity};
use crate::dependency;
use crate::error::{LedgerError, Result};
use crate::policy::{self, PolicyDecision};
use crate::trust::{self, DefaultTrustChecker, TrustChecker, VerificationLevel, VerificationReport};
use crate::validator::{self, ChainValidation};

/// Why a single artifact never made it into the committed block.
#[derive(Debug, Clone)]
pub struct RejectedArtifact {
    pub artifact_id: String,
    pub reason: String,
}

/// Outcome of a successful [`Ledger::mint`] call.
#[derive(Debug, Clone)]
pub struct MintResult {
    pub block_index: u64,
    pub block_hash: String,
    pub minted: Vec<String>,
    pub rejected: Vec<RejectedArtifact>,
}

/// The pipeline's terminal outcomes when it does not reach `Committed`.
#[derive(Debug, Clone)]
pub enum MintOutcome {
    Committed(MintResult),
    /// Nothing to do: an empty batch is not an error.
    Empty,
}

/// The top-level handle. Owns the chain behind a reader-writer lock and
/// serializes commits with a dedicated mutex.
pub struct Ledger {
    chain: Arc<RwLock<Chain>>,
    commit_lock: Mutex<()>,
    config: LedgerConfig,
    trust_checker: Box<dyn TrustChecker>,
    consent_gate: Box<dyn ConsentGate>,
}

impl Ledger {
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_collaborators(
            config,
            Box::new(DefaultTrustChecker),
            Box::new(AutoConsentGate),
        )
    }

    #[must_use]
    pub fn with_collaborators(
        config: LedgerConfig,
        trust_checker: Box<dyn TrustChecker>,
        consent_gate: Box<dyn ConsentGate>,
    ) -> Self {
        let chain = Chain::new(config.mining_difficulty);
        Self {
            chain: Arc::new(RwLock::new(chain)),
            commit_lock: Mutex::new(()),
            config,
            trust_checker,
            consent_gate,
        }
    }

    /// Read-only snapshot of the chain for query/proof/validation
    /// callers. Never blocks on an in-progress commit longer than the
    /// time it takes the writer to finish appending one block.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned by a prior panicking writer.
    pub fn with_chain<R>(&self, f: impl FnOnce(&Chain) -> R) -> R {
        let guard = self.chain.read().expect("chain lock poisoned");
        f(&guard)
    }

    #[must_use]
    pub fn query(&self, filter: &QueryFilter) -> Vec<(u64, Artifact)> {
        self.with_chain(|chain| {
            chain
                .query(filter)
                .into_iter()
                .map(|(idx, a)| (idx, a.clone()))
                .collect()
        })
    }

    #[must_use]
    pub fn validate(&self) -> ChainValidation {
        self.with_chain(validator::validate_chain)
    }

    /// Runs the full minting pipeline over `batch`. Any step's failure
    /// is final for the *whole* batch unless stated otherwise (the
    /// contradiction step drops only the offending artifacts and
    /// continues with the rest).
    ///
    /// # Errors
    ///
    /// Returns the first hard failure: unresolved required
    /// dependencies, a failed verification, consent denial, or a
    /// chain-append error. A batch that resolves to zero survivors
    /// after contradiction filtering returns `Ok(MintOutcome::Empty)`,
    /// not an error.
    pub fn mint(&self, batch: Vec<Artifact>, level: VerificationLevel) -> Result<MintOutcome> {
        if batch.is_empty() {
            return Ok(MintOutcome::Empty);
        }

        let _commit_guard = self.commit_lock.lock().expect("commit lock poisoned");

        let ordered = self.resolve_dependencies(&batch)?;
        let reports = self.verify(&ordered, level)?;
        let (surviving, rejected) = self.filter_contradictions(ordered);

        if surviving.is_empty() {
            return Ok(MintOutcome::Empty);
        }

        self.consent(&surviving, &reports)?;

        let result = self.mine_and_append(surviving, rejected)?;
        Ok(MintOutcome::Committed(result))
    }

    fn resolve_dependencies(&self, batch: &[Artifact]) -> Result<Vec<Artifact>> {
        self.with_chain(|chain| {
            let check = dependency::check(batch, chain);
            if !check.satisfied {
                let missing = check
                    .missing
                    .iter()
                    .map(|m| m.dependency_ref.clone())
                    .collect();
                return Err(LedgerError::Dependency {
                    artifact_id: check.missing[0].artifact_id.clone(),
                    missing,
                });
            }

            let ordered = dependency::order(batch, chain);
            if !ordered.unresolvable.is_empty() {
                return Err(LedgerError::Dependency {
                    artifact_id: ordered.unresolvable[0].clone(),
                    missing: ordered.unresolvable,
                });
            }

            let by_id: std::collections::HashMap<&str, &Artifact> =
                batch.iter().map(|a| (a.id.as_str(), a)).collect();
            Ok(ordered
                .order
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied().cloned())
                .collect())
        })
    }

    fn verify(
        &self,
        batch: &[Artifact],
        level: VerificationLevel,
    ) -> Result<Vec<VerificationReport>> {
        let reports: Vec<VerificationReport> = batch
            .iter()
            .map(|a| self.trust_checker.analyze(a, level))
            .collect();

        if let Some((artifact, report)) = batch.iter().zip(&reports).find(|(_, r)| r.failed) {
            warn!(artifact_id = %artifact.id, "artifact failed verification");
            return Err(LedgerError::PolicyRejection {
                artifact_id: artifact.id.clone(),
                reason: format!(
                    "verification failed with trust_score {:.3}",
                    report.trust_score
                ),
            });
        }

        for artifact in batch {
            match policy::evaluate(artifact, &self.config) {
                PolicyDecision::Accept => {}
                PolicyDecision::Reject { reason } => {
                    return Err(LedgerError::PolicyRejection {
                        artifact_id: artifact.id.clone(),
                        reason,
                    });
                }
                // No corroborating-action mechanism exists yet, so a
                // corroboration requirement is always unfulfilled at
                // mint time: treat it the same as an outright reject
                // rather than silently letting it through.
                PolicyDecision::NeedsCorroboration { actions } => {
                    return Err(LedgerError::PolicyRejection {
                        artifact_id: artifact.id.clone(),
                        reason: format!("corroboration required but not fulfilled: {actions:?}"),
                    });
                }
            }
        }

        Ok(reports)
    }

    fn filter_contradictions(
        &self,
        batch: Vec<Artifact>,
    ) -> (Vec<Artifact>, Vec<RejectedArtifact>) {
        self.with_chain(|chain| {
            let mut surviving = Vec::with_capacity(batch.len());
            let mut rejected = Vec::new();

            for artifact in batch {
                let conflicts = find_contradictions(chain, &artifact);
                if let Some(blocking) = conflicts.iter().find(|c| c.severity == Severity::High) {
                    rejected.push(RejectedArtifact {
                        artifact_id: artifact.id.clone(),
                        reason: format!("blocked by contradiction: {}", blocking.description),
                    });
                } else {
                    surviving.push(artifact);
                }
            }

            (surviving, rejected)
        })
    }

    fn consent(&self, batch: &[Artifact], reports: &[VerificationReport]) -> Result<()> {
        let auto_ok = trust::auto_approve(reports) && !self.config.default_require_consent;
        if auto_ok {
            return Ok(());
        }

        let content_hashes = batch.iter().map(|a| a.content_hash.clone()).collect();
        let request = ConsentRequest {
            content_hashes,
            reports,
        };
        let consent_id = format!("consent-{}", uuid::Uuid::new_v4());
        let decision = self.consent_gate.request(&consent_id, &request);

        if decision.approved {
            Ok(())
        } else {
            Err(LedgerError::ConsentDenied {
                consent_id: decision.consent_id,
                reason: decision.reason.unwrap_or_else(|| "denied".to_string()),
            })
        }
    }

    fn mine_and_append(
        &self,
        mut surviving: Vec<Artifact>,
        rejected: Vec<RejectedArtifact>,
    ) -> Result<MintResult> {
        let mut chain = self.chain.write().expect("chain lock poisoned");

        let next_index = chain.height() + 1;
        let previous_hash = chain.latest().hash();
        let difficulty = chain.difficulty();
        let now = chrono::Utc::now();

        for artifact in &mut surviving {
            artifact.block_index = Some(next_index);
            artifact.minted_at = Some(now);
        }

        let mut block = Block::new(next_index, previous_hash, surviving, now, difficulty);
        let cancel = Arc::new(AtomicBool::new(true));
        let deadline = self
            .config
            .mining_budget
            .map(|budget| std::time::Instant::now() + budget);
        block.mine(difficulty, self.config.mining_threads, &cancel, deadline)?;

        let minted: Vec<String> = block.artifacts.iter().map(|a| a.id.clone()).collect();
        let block_hash = block.hash().to_string();
        let block_index = block.header.index;

        chain.append(block)?;
        info!(block_index, minted = minted.len(), "batch minted and committed");

        Ok(MintResult {
            block_index,
            block_hash,
            minted,
            rejected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Tier;
    use chrono::Utc;

    fn config() -> LedgerConfig {
        LedgerConfig {
            mining_difficulty: 1,
            mining_threads: 1,
            mining_budget: Some(std::time::Duration::from_secs(5)),
            default_require_consent: false,
            ..LedgerConfig::default()
        }
    }

    fn artifact(id: &str, hash_char: char) -> Artifact {
        Artifact::proposed(
            id,
            hash_char.to_string().repeat(64),
            "claim",
            0.95,
            Tier::Government,
            "COURT_ORDER",
            Utc::now(),
        )
    }

    #[test]
    fn empty_batch_produces_no_block_and_no_error() {
        let ledger = Ledger::new(config());
        let outcome = ledger.mint(vec![], VerificationLevel::Standard).unwrap();
        assert!(matches!(outcome, MintOutcome::Empty));
        assert_eq!(ledger.with_chain(Chain::height), 0);
    }

    #[test]
    fn single_artifact_commits_and_updates_the_index() {
        let ledger = Ledger::new(config());
        let a = artifact("A1", 'a');
        let outcome = ledger
            .mint(vec![a], VerificationLevel::Standard)
            .unwrap();
        match outcome {
            MintOutcome::Committed(result) => {
                assert_eq!(result.block_index, 1);
                assert_eq!(result.minted, vec!["A1".to_string()]);
            }
            MintOutcome::Empty => panic!("expected a committed block"),
        }
        assert!(ledger.with_chain(|c| c.contains_content_hash(&"a".repeat(64))));
    }

    #[test]
    fn dependency_ordering_lands_prerequisite_in_the_same_block() {
        let ledger = Ledger::new(config());
        let mut b = artifact("B", 'b');
        b.dependencies = vec!["A".to_string()];
        let a = artifact("A", 'a');

        let outcome = ledger
            .mint(vec![b, a], VerificationLevel::Standard)
            .unwrap();
        match outcome {
            MintOutcome::Committed(result) => {
                assert_eq!(result.minted, vec!["A".to_string(), "B".to_string()]);
            }
            MintOutcome::Empty => panic!("expected a committed block"),
        }
    }

    #[test]
    fn second_commit_with_duplicate_content_hash_is_rejected() {
        let ledger = Ledger::new(config());
        ledger
            .mint(vec![artifact("A1", 'a')], VerificationLevel::Standard)
            .unwrap();

        let err = ledger
            .mint(vec![artifact("A2", 'a')], VerificationLevel::Standard)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateArtifact { .. }));
    }

    #[test]
    fn unresolved_dependency_rejects_the_whole_batch() {
        let ledger = Ledger::new(config());
        let mut b = artifact("B", 'b');
        b.dependencies = vec!["ghost".to_string()];
        let err = ledger
            .mint(vec![b], VerificationLevel::Standard)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Dependency { .. }));
    }
}
