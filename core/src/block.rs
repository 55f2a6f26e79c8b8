//! Block: a Merkle-rooted, proof-of-work-hashed batch of artifacts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Canonical, CanonicalValue, Hash256};
use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::error::{ChainIntegrityKind, LedgerError, Result};

/// Which side of its parent a Merkle sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Left,
    Right,
}

/// One step of a Merkle inclusion proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling_hash: Hash256,
    pub position: Position,
}

pub type MerkleProof = Vec<ProofStep>;

/// The Merkle leaf value for an artifact: `H(canonical(artifact))`, per
/// the field subset [`Artifact::to_canonical`] selects.
#[must_use]
pub fn leaf_hash(artifact: &Artifact) -> Hash256 {
    Hash256::sha3_256(&artifact.to_canonical().encode())
}

fn combine(left: Hash256, right: Hash256) -> Hash256 {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    Hash256::sha3_256(&data)
}

/// Computes the Merkle root over a batch of artifacts.
///
/// An empty batch roots to `H("empty")`, reserved for the genesis block.
/// A single artifact roots to its own leaf hash. Odd levels duplicate
/// their last leaf before combining, matching the teacher's
/// `calculate_merkle_root` chunking strategy.
#[must_use]
pub fn merkle_root(artifacts: &[Artifact]) -> Hash256 {
    if artifacts.is_empty() {
        return Hash256::sha3_256(b"empty");
    }

    let mut level: Vec<Hash256> = artifacts.iter().map(leaf_hash).collect();
    if level.len() == 1 {
        return level[0];
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            let combined = if chunk.len() == 2 {
                combine(chunk[0], chunk[1])
            } else {
                combine(chunk[0], chunk[0])
            };
            next.push(combined);
        }
        level = next;
    }

    level[0]
}

/// Builds the inclusion proof for the artifact at `leaf_index` among
/// `artifacts`. Returns `None` if the index is out of range.
#[must_use]
pub fn merkle_proof_for_index(artifacts: &[Artifact], leaf_index: usize) -> Option<MerkleProof> {
    if leaf_index >= artifacts.len() {
        return None;
    }

    let mut level: Vec<Hash256> = artifacts.iter().map(leaf_hash).collect();
    let mut index = leaf_index;
    let mut proof = Vec::new();

    while level.len() > 1 {
        let padded_len = level.len() + (level.len() % 2);
        let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
        let sibling = if sibling_index < level.len() {
            level[sibling_index]
        } else {
            level[index]
        };
        let position = if index % 2 == 0 {
            Position::Right
        } else {
            Position::Left
        };
        proof.push(ProofStep {
            sibling_hash: sibling,
            position,
        });

        let mut next = Vec::with_capacity(padded_len / 2);
        for chunk in level.chunks(2) {
            let combined = if chunk.len() == 2 {
                combine(chunk[0], chunk[1])
            } else {
                combine(chunk[0], chunk[0])
            };
            next.push(combined);
        }
        level = next;
        index /= 2;
    }

    Some(proof)
}

/// Reconstructs a root from a leaf and its proof and compares it to
/// `expected_root`. Pure: consults no block state.
#[must_use]
pub fn verify_proof(leaf: Hash256, proof: &[ProofStep], expected_root: Hash256) -> bool {
    let mut current = leaf;
    for step in proof {
        current = match step.position {
            Position::Left => combine(step.sibling_hash, current),
            Position::Right => combine(current, step.sibling_hash),
        };
    }
    current == expected_root
}

/// Fields that identify a block and are folded into its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: u64,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: DateTime<Utc>,
    pub difficulty: u32,
    pub nonce: u64,
}

impl BlockHeader {
    /// Computes the block hash over the canonical encoding of the
    /// header. Infallible: unlike the teacher's `serde_json`-backed
    /// `hash()`, the canonical encoder has no failure mode.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        let mut map = CanonicalValue::map();
        map.insert("index", CanonicalValue::UInt(self.index));
        map.insert(
            "previous_hash",
            CanonicalValue::Str(self.previous_hash.to_string()),
        );
        map.insert(
            "merkle_root",
            CanonicalValue::Str(self.merkle_root.to_string()),
        );
        map.insert(
            "timestamp",
            CanonicalValue::Str(self.timestamp.to_rfc3339()),
        );
        map.insert("difficulty", CanonicalValue::UInt(u64::from(self.difficulty)));
        map.insert("nonce", CanonicalValue::UInt(self.nonce));
        Hash256::sha3_256(&map.encode())
    }

    #[must_use]
    pub fn meets_difficulty(&self) -> bool {
        self.hash().meets_difficulty(self.difficulty)
    }
}

/// Metadata recorded alongside a mined block; informational only, not
/// covered by the block hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub mining_duration: Option<Duration>,
    pub miner: Option<String>,
}

/// Ordered container of artifacts, linked to its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub artifacts: Vec<Artifact>,
    pub metadata: BlockMetadata,
}

impl Block {
    /// Builds an unmined block: `nonce = 0`, `merkle_root` computed now.
    #[must_use]
    pub fn new(
        index: u64,
        previous_hash: Hash256,
        artifacts: Vec<Artifact>,
        timestamp: DateTime<Utc>,
        difficulty: u32,
    ) -> Self {
        let merkle_root = merkle_root(&artifacts);
        Self {
            header: BlockHeader {
                index,
                previous_hash,
                merkle_root,
                timestamp,
                difficulty,
                nonce: 0,
            },
            artifacts,
            metadata: BlockMetadata::default(),
        }
    }

    /// The fixed first block: one synthetic artifact, minimal difficulty.
    #[must_use]
    pub fn genesis(timestamp: DateTime<Utc>) -> Self {
        let genesis_artifact = Artifact::genesis(timestamp);
        let mut block = Self::new(0, Hash256::zero(), vec![genesis_artifact], timestamp, 1);
        block
            .mine(1, 1, &Arc::new(AtomicBool::new(true)), None)
            .expect("genesis mining at difficulty 1 cannot fail");
        block
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Mines the block: increments `nonce` until the header hash meets
    /// `difficulty`, splitting the nonce space across `threads` the same
    /// way the teacher's `Miner::mine_header_parallel` does. Returns
    /// once a solution is found, `cancel` is cleared, or `deadline`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Recovery`]-shaped... actually returns a
    /// `Validation` error if mining is cancelled or the deadline passes
    /// before a solution is found.
    pub fn mine(
        &mut self,
        difficulty: u32,
        threads: usize,
        cancel: &Arc<AtomicBool>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let threads = threads.max(1);
        self.header.difficulty = difficulty;

        let found: Arc<Mutex<Option<(u64, Hash256)>>> = Arc::new(Mutex::new(None));
        let nonce_span = u64::MAX / threads as u64;
        let mut handles = Vec::with_capacity(threads);

        for thread_id in 0..threads {
            let mut header = self.header.clone();
            let cancel = Arc::clone(cancel);
            let found = Arc::clone(&found);
            let start = thread_id as u64 * nonce_span;
            let end = if thread_id == threads - 1 {
                u64::MAX
            } else {
                (thread_id as u64 + 1) * nonce_span
            };

            handles.push(thread::spawn(move || {
                for nonce in start..end {
                    if !cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return;
                        }
                    }
                    if found.lock().unwrap().is_some() {
                        return;
                    }
                    header.nonce = nonce;
                    let hash = header.hash();
                    if hash.meets_difficulty(header.difficulty) {
                        cancel.store(false, Ordering::SeqCst);
                        *found.lock().unwrap() = Some((nonce, hash));
                        return;
                    }
                }
            }));
        }

        let start_time = Instant::now();
        for handle in handles {
            let _ = handle.join();
        }

        match found.lock().unwrap().take() {
            Some((nonce, hash)) => {
                self.header.nonce = nonce;
                self.metadata.mining_duration = Some(start_time.elapsed());
                debug!(block_index = self.header.index, nonce, %hash, "block mined");
                Ok(())
            }
            None => Err(LedgerError::Validation {
                block_index: Some(self.header.index),
                artifact_id: None,
                reason: "mining cancelled or deadline exceeded before a solution was found"
                    .to_string(),
            }),
        }
    }

    /// Structural validation: recomputes the hash and Merkle root,
    /// checks the timestamp is not in the future, and flags blocks
    /// older than one hour as a warning. Does not check linkage to a
    /// predecessor — that is [`crate::validator`]'s job.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.header.index > 0 && self.artifacts.is_empty() {
            errors.push("non-genesis block has no artifacts".to_string());
        }

        let expected_root = merkle_root(&self.artifacts);
        if expected_root != self.header.merkle_root {
            errors.push("merkle root mismatch".to_string());
        }

        if !self.header.meets_difficulty() {
            errors.push("block hash does not meet declared difficulty".to_string());
        }

        let now = Utc::now();
        if self.header.timestamp > now {
            errors.push("block timestamp is in the future".to_string());
        } else if now - self.header.timestamp > chrono::Duration::hours(1) {
            warnings.push("block is older than one hour".to_string());
        }

        for artifact in &self.artifacts {
            if let Err(e) = artifact.validate_basic() {
                errors.push(e.to_string());
            }
        }

        (errors, warnings)
    }

    /// Returns `Ok(())` if [`Self::validate`] produced no errors,
    /// otherwise the first error as a [`LedgerError::ChainIntegrity`]
    /// (merkle mismatch) or [`LedgerError::Validation`].
    pub fn validate_strict(&self) -> Result<()> {
        let (errors, _warnings) = self.validate();
        if let Some(first) = errors.first() {
            if first.contains("merkle root") {
                return Err(LedgerError::ChainIntegrity {
                    kind: ChainIntegrityKind::MerkleMismatch,
                    block_index: self.header.index,
                });
            }
            return Err(LedgerError::Validation {
                block_index: Some(self.header.index),
                artifact_id: None,
                reason: first.clone(),
            });
        }
        Ok(())
    }

    /// Finds the artifact's position among this block's artifacts and
    /// builds its inclusion proof.
    #[must_use]
    pub fn merkle_proof(&self, artifact_id: &str) -> Option<MerkleProof> {
        let index = self.artifacts.iter().position(|a| a.id == artifact_id)?;
        merkle_proof_for_index(&self.artifacts, index)
    }

    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }
}

pub fn log_block_mined(block: &Block) {
    info!(
        index = block.header.index,
        artifacts = block.artifacts.len(),
        nonce = block.header.nonce,
        "block mined"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Tier;

    fn artifact(id: &str) -> Artifact {
        Artifact::proposed(
            id,
            format!("{id:0>64}").replace(' ', "0"),
            "claim",
            0.9,
            Tier::Government,
            "COURT_ORDER",
            Utc::now(),
        )
    }

    #[test]
    fn empty_batch_roots_to_reserved_empty_hash() {
        assert_eq!(merkle_root(&[]), Hash256::sha3_256(b"empty"));
    }

    #[test]
    fn single_artifact_root_equals_its_leaf() {
        let a = artifact("a1");
        assert_eq!(merkle_root(&[a.clone()]), leaf_hash(&a));
    }

    #[test]
    fn two_artifact_proof_for_second_has_one_left_sibling() {
        let artifacts = vec![artifact("a1"), artifact("a2")];
        let root = merkle_root(&artifacts);
        let proof = merkle_proof_for_index(&artifacts, 1).unwrap();
        assert_eq!(proof.len(), 1);
        assert_eq!(proof[0].position, Position::Left);
        assert!(verify_proof(leaf_hash(&artifacts[1]), &proof, root));
    }

    #[test]
    fn tampering_with_proof_breaks_verification() {
        let artifacts = vec![artifact("a1"), artifact("a2"), artifact("a3")];
        let root = merkle_root(&artifacts);
        let mut proof = merkle_proof_for_index(&artifacts, 0).unwrap();
        assert!(verify_proof(leaf_hash(&artifacts[0]), &proof, root));
        proof[0].sibling_hash = Hash256::zero();
        assert!(!verify_proof(leaf_hash(&artifacts[0]), &proof, root));
    }

    #[test]
    fn genesis_block_is_mined_and_valid() {
        let block = Block::genesis(Utc::now());
        assert_eq!(block.header.index, 0);
        let (errors, _warnings) = block.validate();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn mining_at_low_difficulty_terminates_and_satisfies_it() {
        let mut block = Block::new(1, Hash256::zero(), vec![artifact("a1")], Utc::now(), 1);
        let cancel = Arc::new(AtomicBool::new(true));
        block.mine(1, 2, &cancel, None).unwrap();
        assert!(block.header.meets_difficulty());
    }

    #[test]
    fn mining_respects_cancellation() {
        let mut block = Block::new(1, Hash256::zero(), vec![artifact("a1")], Utc::now(), 32);
        let cancel = Arc::new(AtomicBool::new(false));
        let err = block.mine(32, 1, &cancel, None).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }

    #[test]
    fn merkle_proof_is_none_for_unknown_artifact() {
        let block = Block::new(1, Hash256::zero(), vec![artifact("a1")], Utc::now(), 1);
        assert!(block.merkle_proof("missing").is_none());
    }
}
