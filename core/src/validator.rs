//! Chain-wide structural and continuity validation (C4). Complements
//! [`crate::block::Block::validate`], which only checks a block in
//! isolation.

use crate::chain::Chain;
use crate::error::ChainIntegrityKind;

/// One structural problem found while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub block_index: u64,
    pub kind: ChainIntegrityKind,
    pub detail: String,
}

/// A non-fatal observation: still worth surfacing, never blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub block_index: u64,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChainValidation {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ChainValidation {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walks every block checking continuity, hash/merkle recomputation,
/// and artifact schema, per §4.4.
#[must_use]
pub fn validate_chain(chain: &Chain) -> ChainValidation {
    let mut report = ChainValidation::default();

    let mut previous_hash = None;
    let mut previous_timestamp = None;

    for index in 0..=chain.height() {
        let Some(block) = chain.block_at(index) else {
            report.errors.push(ValidationError {
                block_index: index,
                kind: ChainIntegrityKind::BrokenLink,
                detail: "missing block in sequence".to_string(),
            });
            continue;
        };

        if let Some(expected_previous) = previous_hash {
            if block.header.previous_hash != expected_previous {
                report.errors.push(ValidationError {
                    block_index: index,
                    kind: ChainIntegrityKind::BrokenLink,
                    detail: "previous_hash does not match the prior block's hash".to_string(),
                });
            }
        }

        if let Some(expected_timestamp) = previous_timestamp {
            if block.header.timestamp < expected_timestamp {
                report.warnings.push(ValidationWarning {
                    block_index: index,
                    detail: "block timestamp regressed relative to its predecessor".to_string(),
                });
            }
        }

        let (block_errors, block_warnings) = block.validate();
        for detail in block_errors {
            let kind = if detail.contains("merkle root") {
                ChainIntegrityKind::MerkleMismatch
            } else if detail.contains("difficulty") {
                ChainIntegrityKind::HashMismatch
            } else {
                ChainIntegrityKind::HashMismatch
            };
            report.errors.push(ValidationError {
                block_index: index,
                kind,
                detail,
            });
        }
        for detail in block_warnings {
            report.warnings.push(ValidationWarning {
                block_index: index,
                detail,
            });
        }

        previous_hash = Some(block.hash());
        previous_timestamp = Some(block.header.timestamp);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, Tier};
    use crate::block::Block;
    use chrono::Utc;
    use shared::Hash256;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn fresh_chain_validates_clean() {
        let chain = Chain::new(1);
        let report = validate_chain(&chain);
        assert!(report.is_ok(), "{:?}", report.errors);
    }

    #[test]
    fn tampered_nonce_is_reported_as_an_error() {
        let mut chain = Chain::new(1);
        let artifact = Artifact::proposed(
            "a1",
            "a".repeat(64),
            "claim",
            0.9,
            Tier::Government,
            "COURT_ORDER",
            Utc::now(),
        );
        let mut block = Block::new(1, chain.latest().hash(), vec![artifact], Utc::now(), 1);
        block
            .mine(1, 1, &Arc::new(AtomicBool::new(true)), None)
            .unwrap();
        chain.append(block).unwrap();

        // Re-derive a chain whose second block has a tampered nonce by
        // round-tripping through export/import is overkill here; instead
        // assert directly on the block-level contract the validator
        // relies on.
        let tampered = {
            let mut b = chain.block_at(1).unwrap().clone();
            b.header.nonce = b.header.nonce.wrapping_add(1);
            b
        };
        assert!(tampered.validate_strict().is_err());
    }

    #[test]
    fn chain_append_rejects_a_block_that_would_break_continuity() {
        // `Chain::append` is the enforcement point for the continuity
        // invariant `validate_chain` re-checks; a chain built only
        // through `append` can never reach the validator in a broken
        // state, so this documents the guarantee at its source.
        let mut chain = Chain::new(1);
        let artifact = Artifact::proposed(
            "a1",
            "a".repeat(64),
            "claim",
            0.9,
            Tier::Government,
            "COURT_ORDER",
            Utc::now(),
        );
        let mut block = Block::new(1, Hash256::zero(), vec![artifact], Utc::now(), 1);
        block
            .mine(1, 1, &Arc::new(AtomicBool::new(true)), None)
            .unwrap();
        let err = chain.append(block).unwrap_err();
        assert!(matches!(err, crate::error::LedgerError::ChainIntegrity { .. }));
    }
}
