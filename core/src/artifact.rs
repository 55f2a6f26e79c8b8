//! The atomic ledger entry: a piece of evidence, proposed or committed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Canonical, CanonicalValue};

use crate::error::{LedgerError, Result};
use shared::{ArtifactId, BlockIndex, CaseId, ContentHash};

/// Qualitative source-credibility class, ordered most to least trusted.
/// The discriminant order matters: `Tier::rank` relies on declaration
/// order to compare tiers without a separate lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    SelfAuthenticating,
    Government,
    FinancialInstitution,
    IndependentThirdParty,
    BusinessRecords,
    FirstPartyAdverse,
    FirstPartyFriendly,
    UncorroboratedPerson,
}

impl Tier {
    /// Inclusive weight range this tier's artifacts are expected to fall
    /// within. This is advisory for the trust checks in §4.8, not
    /// enforced as a hard validation rule — a weight outside the range
    /// is merely unusual, not invalid.
    #[must_use]
    pub const fn weight_range(self) -> (f64, f64) {
        match self {
            Self::SelfAuthenticating => (0.95, 1.00),
            Self::Government => (0.90, 0.99),
            Self::FinancialInstitution => (0.85, 0.95),
            Self::IndependentThirdParty => (0.80, 0.90),
            Self::BusinessRecords => (0.75, 0.85),
            Self::FirstPartyAdverse => (0.70, 0.80),
            Self::FirstPartyFriendly => (0.50, 0.70),
            Self::UncorroboratedPerson => (0.00, 0.50),
        }
    }

    /// Lower rank is more trusted. Used by the contradiction engine to
    /// decide whether a conflicting artifact outranks the candidate.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }
}

/// A structured value an artifact asserts, used by the contradiction
/// engine to compare artifacts that share a `subject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ArtifactValue {
    Date(DateTime<Utc>),
    Bool(bool),
    Text(String),
    Number(f64),
}

/// The atomic ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub content_hash: ContentHash,
    pub statement: String,
    pub weight: f64,
    pub tier: Tier,
    /// Free-form category, e.g. `"COURT_ORDER"`, `"FINANCIAL_RECORD"`,
    /// `"DATE"` (used by the temporal contradiction check).
    pub kind: String,
    pub case_id: Option<CaseId>,
    pub timestamp: DateTime<Utc>,
    /// Ids or content hashes of artifacts this one logically requires.
    pub dependencies: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Set by an external verifier ahead of proposal; consulted by the
    /// `INDEPENDENT_THIRD_PARTY` policy rule.
    pub verified: bool,
    /// E.g. `"DIGITAL_SEAL"`; a sealed document with sufficient weight
    /// upgrades straight to `Accept` regardless of tier.
    pub authentication_method: Option<String>,

    /// Subject + event/value-type + value make up the comparison key the
    /// contradiction engine uses to find conflicting artifacts.
    pub subject: Option<String>,
    pub event_type: Option<String>,
    pub value_type: Option<String>,
    pub value: Option<ArtifactValue>,
    /// Explicit conflict ids, checked both directions.
    pub contradicts: Vec<String>,

    pub minted_by: Option<String>,
    pub minted_at: Option<DateTime<Utc>>,
    pub block_index: Option<BlockIndex>,
}

impl Artifact {
    /// Builds a proposal with the required fields and every optional
    /// field at its default ("not yet committed", "no extra evidence").
    #[must_use]
    pub fn proposed(
        id: impl Into<String>,
        content_hash: impl Into<String>,
        statement: impl Into<String>,
        weight: f64,
        tier: Tier,
        kind: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content_hash: content_hash.into().to_lowercase(),
            statement: statement.into(),
            weight,
            tier,
            kind: kind.into(),
            case_id: None,
            timestamp,
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
            verified: false,
            authentication_method: None,
            subject: None,
            event_type: None,
            value_type: None,
            value: None,
            contradicts: Vec::new(),
            minted_by: None,
            minted_at: None,
            block_index: None,
        }
    }

    /// The single synthetic artifact that fills the genesis block.
    #[must_use]
    pub fn genesis(timestamp: DateTime<Utc>) -> Self {
        let mut genesis = Self::proposed(
            "GENESIS",
            "0".repeat(64),
            "Genesis block",
            1.0,
            Tier::SelfAuthenticating,
            "GENESIS",
            timestamp,
        );
        genesis.minted_at = Some(timestamp);
        genesis.block_index = Some(0);
        genesis
    }

    /// Structural checks that do not depend on the rest of the chain:
    /// content hash shape and weight bounds. See §4.4 for the chain-wide
    /// validator, which additionally checks continuity.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] if the content hash is not 64
    /// hex characters or the weight is outside `[0, 1]`.
    pub fn validate_basic(&self) -> Result<()> {
        if self.content_hash.len() != 64 || !self.content_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(LedgerError::Validation {
                block_index: None,
                artifact_id: Some(self.id.clone()),
                reason: "content_hash must be 64 hex characters".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(LedgerError::Validation {
                block_index: None,
                artifact_id: Some(self.id.clone()),
                reason: format!("weight {} is outside [0, 1]", self.weight),
            });
        }
        Ok(())
    }

    /// Whether this artifact is the one, first, synthetic genesis entry.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.block_index == Some(0)
    }
}

impl Canonical for Artifact {
    /// The Merkle leaf value (§4.2): only the fields that identify the
    /// artifact within the tree are hashed, not its full content — the
    /// content itself is represented by `content_hash`.
    fn to_canonical(&self) -> CanonicalValue {
        let mut map = CanonicalValue::map();
        map.insert("id", CanonicalValue::Str(self.id.clone()));
        map.insert("content_hash", CanonicalValue::Str(self.content_hash.clone()));
        map.insert("weight", CanonicalValue::Float(self.weight));
        map.insert(
            "timestamp",
            CanonicalValue::Str(self.timestamp.to_rfc3339()),
        );
        map.insert(
            "case_id",
            match &self.case_id {
                Some(c) => CanonicalValue::Str(c.clone()),
                None => CanonicalValue::Str(String::new()),
            },
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(weight: f64) -> Artifact {
        Artifact::proposed(
            "A1",
            "a".repeat(64),
            "claim",
            weight,
            Tier::Government,
            "COURT_ORDER",
            Utc::now(),
        )
    }

    #[test]
    fn validate_basic_accepts_boundary_weights() {
        assert!(artifact(0.0).validate_basic().is_ok());
        assert!(artifact(1.0).validate_basic().is_ok());
    }

    #[test]
    fn validate_basic_rejects_out_of_range_weight() {
        assert!(artifact(1.5).validate_basic().is_err());
        assert!(artifact(-0.1).validate_basic().is_err());
    }

    #[test]
    fn validate_basic_rejects_malformed_content_hash() {
        let mut a = artifact(0.5);
        a.content_hash = "too-short".to_string();
        assert!(a.validate_basic().is_err());
    }

    #[test]
    fn content_hash_is_lower_cased_on_construction() {
        let a = Artifact::proposed(
            "A1",
            "A".repeat(64),
            "claim",
            0.5,
            Tier::Government,
            "COURT_ORDER",
            Utc::now(),
        );
        assert_eq!(a.content_hash, "a".repeat(64));
    }

    #[test]
    fn tier_rank_orders_most_to_least_trusted() {
        assert!(Tier::SelfAuthenticating.rank() < Tier::Government.rank());
        assert!(Tier::Government.rank() < Tier::UncorroboratedPerson.rank());
    }

    #[test]
    fn genesis_artifact_is_flagged_and_stable() {
        let g = Artifact::genesis(Utc::now());
        assert!(g.is_genesis());
        assert_eq!(g.id, "GENESIS");
    }
}
