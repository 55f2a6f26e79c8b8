pub mod artifact;
pub mod block;
pub mod chain;
pub mod config;
pub mod consent;
pub mod contradiction;
pub mod dependency;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod recovery;
pub mod snapshot;
pub mod trust;
pub mod validator;

pub use artifact::{Artifact, ArtifactValue, Tier};
pub use block::{Block, BlockHeader, MerkleProof, Position, ProofStep};
pub use chain::{BlockExport, Chain, ChainExport, IndexEntry, QueryFilter};
pub use config::LedgerConfig;
pub use consent::{AutoConsentGate, ConsentDecision, ConsentGate, ConsentRequest};
pub use contradiction::{find_contradictions, Contradiction, ContradictionKind, Severity};
pub use dependency::{DependencyCheck, DependencyOrder, MissingDependency};
pub use error::{LedgerError, Result};
pub use pipeline::{Ledger, MintOutcome, MintResult, RejectedArtifact};
pub use policy::PolicyDecision;
pub use recovery::{
    repair, BackupStore, CorruptionKind, DroppedBlock, FilesystemBackupStore, MemoryBackupStore,
    RecoveryStrategy, RepairReport,
};
pub use snapshot::{ArtifactVerification, SnapshotRegistry, SnapshotReport, SnapshotToken};
pub use trust::{DefaultTrustChecker, TrustChecker, VerificationLevel, VerificationReport};
pub use validator::{validate_chain, ChainValidation, ValidationError, ValidationWarning};

pub use shared::{ArtifactId, BlockIndex, CaseId, ContentHash, Hash256};
