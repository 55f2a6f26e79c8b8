use shared::HashFormatError;
use thiserror::Error;

/// The sub-kind of a [`LedgerError::ChainIntegrity`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainIntegrityKind {
    /// `blocks[i].previous_hash != blocks[i-1].hash`.
    BrokenLink,
    /// Recomputing a block's hash disagrees with the stored value.
    HashMismatch,
    /// Recomputing a block's Merkle root disagrees with the stored value.
    MerkleMismatch,
}

impl std::fmt::Display for ChainIntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BrokenLink => "broken link",
            Self::HashMismatch => "hash mismatch",
            Self::MerkleMismatch => "merkle mismatch",
        };
        write!(f, "{s}")
    }
}

/// Error taxonomy surfaced at the ledger boundary (§7). Each variant
/// carries a machine-readable kind (the variant itself), an
/// actor-identifiable target (its fields), and renders a single
/// human-readable reason sentence via `Display`.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("validation failed{}{}: {reason}",
        block_index.map(|i| format!(" (block {i})")).unwrap_or_default(),
        artifact_id.as_ref().map(|a| format!(" (artifact {a})")).unwrap_or_default())]
    Validation {
        block_index: Option<u64>,
        artifact_id: Option<String>,
        reason: String,
    },

    #[error("chain integrity error at block {block_index}: {kind}")]
    ChainIntegrity {
        kind: ChainIntegrityKind,
        block_index: u64,
    },

    #[error("duplicate artifact: content hash {content_hash} already committed")]
    DuplicateArtifact { content_hash: String },

    #[error("artifact {artifact_id} has unresolved dependencies: {missing:?}")]
    Dependency {
        artifact_id: String,
        missing: Vec<String>,
    },

    #[error("policy rejected artifact {artifact_id}: {reason}")]
    PolicyRejection { artifact_id: String, reason: String },

    #[error("artifact {artifact_id} contradicts prior evidence: {conflicts:?}")]
    Contradiction {
        artifact_id: String,
        conflicts: Vec<String>,
    },

    #[error("consent {consent_id} denied: {reason}")]
    ConsentDenied { consent_id: String, reason: String },

    #[error("snapshot {report_id} has expired")]
    SnapshotExpired { report_id: String },

    #[error("snapshot {report_id} is invalid: {reason}")]
    SnapshotInvalid { report_id: String, reason: String },

    #[error("recovery error ({kind}): {detail}")]
    Recovery { kind: String, detail: String },

    #[error("storage error at {path}: {cause}")]
    Storage { path: String, cause: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),
}

impl From<HashFormatError> for LedgerError {
    fn from(err: HashFormatError) -> Self {
        Self::Validation {
            block_index: None,
            artifact_id: None,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias used throughout `ledger-core`.
pub type Result<T> = std::result::Result<T, LedgerError>;
