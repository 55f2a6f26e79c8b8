//! Trust / verification scoring (C8): per-artifact checks gated by a
//! cumulative verification level, folded into a single trust score.

use crate::artifact::{Artifact, Tier};

/// Verification levels are cumulative: each implies every check of the
/// levels before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerificationLevel {
    Basic,
    Standard,
    Enhanced,
    Legal,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub critical: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
    pub trust_score: f64,
    pub failed: bool,
    pub warning_count: u32,
}

impl VerificationReport {
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }
}

/// Pluggable per-artifact analysis, matching §6's collaborator
/// contract. The core ships [`DefaultTrustChecker`]; callers may supply
/// their own implementation (e.g. wiring in an external AI-analysis
/// service) behind the same trait object.
pub trait TrustChecker: Send + Sync {
    fn analyze(&self, artifact: &Artifact, level: VerificationLevel) -> VerificationReport;
}

/// The built-in checker: format/shape checks plus the weight-in-range
/// and notarization/witness checks named in §4.8. The "enhanced"
/// level's external-reference sanity and ai-analysis hook are
/// intentionally a pass-through extension point here, not an embedded
/// call to an external service.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTrustChecker;

impl TrustChecker for DefaultTrustChecker {
    fn analyze(&self, artifact: &Artifact, level: VerificationLevel) -> VerificationReport {
        let mut checks = Vec::new();

        checks.push(CheckResult {
            name: "content_hash_shape".to_string(),
            passed: artifact.content_hash.len() == 64
                && artifact.content_hash.chars().all(|c| c.is_ascii_hexdigit()),
            critical: true,
        });
        checks.push(CheckResult {
            name: "tier_validity".to_string(),
            passed: true,
            critical: true,
        });

        if level >= VerificationLevel::Standard {
            checks.push(CheckResult {
                name: "weight_in_range".to_string(),
                passed: (0.0..=1.0).contains(&artifact.weight),
                critical: true,
            });
            let (lo, hi) = artifact.tier.weight_range();
            checks.push(CheckResult {
                name: "weight_matches_tier_band".to_string(),
                passed: artifact.weight >= lo - 0.1 && artifact.weight <= hi + 0.1,
                critical: false,
            });
        }

        if level >= VerificationLevel::Enhanced {
            checks.push(CheckResult {
                name: "external_reference_sanity".to_string(),
                passed: true,
                critical: false,
            });
            checks.push(CheckResult {
                name: "ai_analysis_hook".to_string(),
                passed: true,
                critical: false,
            });
        }

        if level >= VerificationLevel::Legal {
            if artifact.tier == Tier::SelfAuthenticating {
                checks.push(CheckResult {
                    name: "notarization_present".to_string(),
                    passed: artifact.metadata.contains_key("notarized"),
                    critical: true,
                });
            }
            if artifact.kind == "SWORN_STATEMENT" {
                checks.push(CheckResult {
                    name: "witness_present".to_string(),
                    passed: artifact.metadata.contains_key("witnessed"),
                    critical: true,
                });
            }
        }

        score(&checks, artifact.weight)
    }
}

fn score(checks: &[CheckResult], weight: f64) -> VerificationReport {
    let total = checks.len().max(1) as f64;
    let passed = checks.iter().filter(|c| c.passed).count() as f64;
    let has_critical_failure = checks.iter().any(|c| c.critical && !c.passed);
    let warning_count = checks.iter().filter(|c| !c.critical && !c.passed).count() as u32;

    let base = (0.7 * weight + 0.3 * (passed / total)).clamp(0.0, 1.0);
    let trust_score = if has_critical_failure {
        base * 0.5
    } else {
        base * (1.0 - 0.05 * f64::from(warning_count))
    };

    VerificationReport {
        checks: checks.to_vec(),
        trust_score: trust_score.clamp(0.0, 1.0),
        failed: has_critical_failure,
        warning_count,
    }
}

/// Mean trust score across a batch's reports.
#[must_use]
pub fn mean_trust_score(reports: &[VerificationReport]) -> f64 {
    if reports.is_empty() {
        return 1.0;
    }
    reports.iter().map(|r| r.trust_score).sum::<f64>() / reports.len() as f64
}

/// Whether a batch qualifies for the auto-approve fast path: mean trust
/// score at least 0.95 and zero failures.
#[must_use]
pub fn auto_approve(reports: &[VerificationReport]) -> bool {
    !reports.is_empty()
        && reports.iter().all(|r| !r.failed)
        && mean_trust_score(reports) >= 0.95
}
