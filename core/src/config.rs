//! Ledger-wide tunables, constructed explicitly and threaded through —
//! no global or `static` configuration, per the "no hidden statics"
//! design note.

use std::time::Duration;

use crate::trust::VerificationLevel;

/// Configuration for a [`crate::pipeline::Ledger`], mirroring the
/// teacher's `NetworkParams` role: one explicit value, constructed once
/// and passed to `Ledger::new`.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Leading hex-zero nibbles a block hash must have.
    pub mining_difficulty: u32,
    /// Threads used for proof-of-work search.
    pub mining_threads: usize,
    /// Wall-clock budget for a single block's mining attempt. `None`
    /// means unbounded (still cancellable via the pipeline's signal).
    pub mining_budget: Option<Duration>,
    /// Directory backup/restore operations read and write under.
    pub backup_dir: std::path::PathBuf,
    /// Verification level applied when the caller does not specify one.
    pub default_verification_level: VerificationLevel,
    /// Whether the minting pipeline consults the consent gate by
    /// default when a batch auto-qualifies per §4.8.
    pub default_require_consent: bool,
    /// How long a snapshot's fast-track token remains redeemable.
    pub snapshot_ttl: chrono::Duration,
    /// Minimum weight at which an `UNCORROBORATED_PERSON` artifact is
    /// still auto-minted rather than rejected outright. A known soft
    /// default; tighten for production deployments.
    pub uncorroborated_person_floor: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mining_difficulty: 2,
            mining_threads: std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1),
            mining_budget: Some(Duration::from_secs(30)),
            backup_dir: std::path::PathBuf::from("./ledger-backups"),
            default_verification_level: VerificationLevel::Standard,
            default_require_consent: true,
            snapshot_ttl: chrono::Duration::hours(24),
            uncorroborated_person_floor: 0.30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_snapshot_ttl() {
        let config = LedgerConfig::default();
        assert_eq!(config.snapshot_ttl, chrono::Duration::hours(24));
        assert!((config.uncorroborated_person_floor - 0.30).abs() < f64::EPSILON);
    }
}
