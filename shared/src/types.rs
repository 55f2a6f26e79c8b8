//! Common type aliases shared across the ledger crates.

/// Opaque unique identifier for an artifact.
pub type ArtifactId = String;

/// Hex-encoded SHA3-256 content hash, 64 lower-case hex characters.
pub type ContentHash = String;

/// Monotonic block index, genesis is 0.
pub type BlockIndex = u64;

/// Grouping key shared by artifacts that belong to the same legal matter.
pub type CaseId = String;
