//! Tier/weight admissibility policy (C5): the first gate a proposed
//! artifact must clear before it can be auto-minted.

use crate::artifact::{Artifact, Tier};
use crate::config::LedgerConfig;

/// What the policy recommends for a proposed artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Accept,
    NeedsCorroboration { actions: Vec<String> },
    Reject { reason: String },
}

impl PolicyDecision {
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

const DIGITAL_SEAL_WEIGHT_FLOOR: f64 = 0.85;

/// Evaluates a single artifact against the tier table in §4.5.
#[must_use]
pub fn evaluate(artifact: &Artifact, config: &LedgerConfig) -> PolicyDecision {
    if artifact.authentication_method.as_deref() == Some("DIGITAL_SEAL")
        && artifact.weight >= DIGITAL_SEAL_WEIGHT_FLOOR
    {
        return PolicyDecision::Accept;
    }

    match artifact.tier {
        Tier::SelfAuthenticating => PolicyDecision::Accept,

        Tier::Government => {
            if artifact.weight >= 0.90 {
                PolicyDecision::Accept
            } else {
                corroborate("government artifact below auto-mint weight")
            }
        }

        Tier::FinancialInstitution => {
            if artifact.weight >= 0.95 {
                PolicyDecision::Accept
            } else {
                corroborate("financial institution artifact below auto-mint weight")
            }
        }

        Tier::IndependentThirdParty => {
            if artifact.verified && artifact.weight >= 0.90 {
                PolicyDecision::Accept
            } else {
                corroborate("independent third-party artifact unverified or under weight")
            }
        }

        Tier::BusinessRecords => corroborate("business records always require corroboration"),

        Tier::FirstPartyAdverse => {
            corroborate("first-party adverse statements always require corroboration")
        }

        Tier::FirstPartyFriendly => PolicyDecision::NeedsCorroboration {
            actions: vec!["obtain at least two independent corroborating artifacts".to_string()],
        },

        Tier::UncorroboratedPerson => {
            if artifact.weight >= config.uncorroborated_person_floor {
                PolicyDecision::Accept
            } else {
                PolicyDecision::Reject {
                    reason: format!(
                        "uncorroborated-person weight {} below floor {}",
                        artifact.weight, config.uncorroborated_person_floor
                    ),
                }
            }
        }
    }
}

fn corroborate(reason: &str) -> PolicyDecision {
    PolicyDecision::NeedsCorroboration {
        actions: vec![reason.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn artifact(tier: Tier, weight: f64) -> Artifact {
        Artifact::proposed(
            "a1",
            "a".repeat(64),
            "claim",
            weight,
            tier,
            "DOC",
            Utc::now(),
        )
    }

    #[test]
    fn self_authenticating_always_accepts() {
        let config = LedgerConfig::default();
        let a = artifact(Tier::SelfAuthenticating, 0.95);
        assert_eq!(evaluate(&a, &config), PolicyDecision::Accept);
    }

    #[test]
    fn government_below_weight_needs_corroboration() {
        let config = LedgerConfig::default();
        let a = artifact(Tier::Government, 0.80);
        assert!(!evaluate(&a, &config).is_accept());
    }

    #[test]
    fn uncorroborated_person_below_floor_is_rejected() {
        let config = LedgerConfig::default();
        let a = artifact(Tier::UncorroboratedPerson, 0.10);
        assert!(matches!(
            evaluate(&a, &config),
            PolicyDecision::Reject { .. }
        ));
    }

    #[test]
    fn uncorroborated_person_at_floor_is_accepted() {
        let config = LedgerConfig::default();
        let a = artifact(Tier::UncorroboratedPerson, 0.30);
        assert_eq!(evaluate(&a, &config), PolicyDecision::Accept);
    }

    #[test]
    fn digital_seal_upgrades_low_tier_to_accept() {
        let config = LedgerConfig::default();
        let mut a = artifact(Tier::FirstPartyFriendly, 0.85);
        a.authentication_method = Some("DIGITAL_SEAL".to_string());
        assert_eq!(evaluate(&a, &config), PolicyDecision::Accept);
    }

    #[test]
    fn independent_third_party_requires_verified_flag() {
        let config = LedgerConfig::default();
        let mut a = artifact(Tier::IndependentThirdParty, 0.95);
        assert!(!evaluate(&a, &config).is_accept());
        a.verified = true;
        assert!(evaluate(&a, &config).is_accept());
    }
}
