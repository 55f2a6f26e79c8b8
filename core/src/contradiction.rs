//! Contradiction detection (C6): scans committed artifacts sharing a
//! case id for conflicts with a candidate. Never mutates state.

use crate::artifact::{Artifact, ArtifactValue, Tier};
use crate::chain::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContradictionKind {
    Explicit,
    Temporal,
    Boolean,
}

#[derive(Debug, Clone)]
pub struct Contradiction {
    pub block_index: u64,
    pub artifact_id: String,
    pub kind: ContradictionKind,
    pub severity: Severity,
    pub description: String,
}

/// Finds every committed artifact that contradicts `candidate`.
///
/// Temporal and boolean checks additionally require `subject` and
/// `event_type`/`value_type` to match — a deliberate tightening over
/// source behavior that sometimes skipped that check.
#[must_use]
pub fn find_contradictions(chain: &Chain, candidate: &Artifact) -> Vec<Contradiction> {
    let Some(case_id) = candidate.case_id.as_deref() else {
        return Vec::new();
    };

    let filter = crate::chain::QueryFilter {
        case_id: Some(case_id.to_string()),
        ..Default::default()
    };

    chain
        .query(&filter)
        .into_iter()
        .filter_map(|(block_index, other)| {
            contradiction_kind(candidate, other)
                .map(|kind| build_contradiction(block_index, candidate, other, kind))
        })
        .collect()
}

fn contradiction_kind(candidate: &Artifact, other: &Artifact) -> Option<ContradictionKind> {
    if candidate.contradicts.contains(&other.id) || other.contradicts.contains(&candidate.id) {
        return Some(ContradictionKind::Explicit);
    }

    if candidate.kind == "DATE"
        && other.kind == "DATE"
        && candidate.subject.is_some()
        && candidate.subject == other.subject
        && candidate.event_type.is_some()
        && candidate.event_type == other.event_type
    {
        if let (Some(ArtifactValue::Date(a)), Some(ArtifactValue::Date(b))) =
            (&candidate.value, &other.value)
        {
            let delta = (*a - *b).num_hours().abs();
            if delta > 24 {
                return Some(ContradictionKind::Temporal);
            }
        }
    }

    if candidate.value_type.as_deref() == Some("boolean")
        && other.value_type.as_deref() == Some("boolean")
        && candidate.subject.is_some()
        && candidate.subject == other.subject
    {
        if let (Some(ArtifactValue::Bool(a)), Some(ArtifactValue::Bool(b))) =
            (&candidate.value, &other.value)
        {
            if a != b {
                return Some(ContradictionKind::Boolean);
            }
        }
    }

    None
}

fn build_contradiction(
    block_index: u64,
    candidate: &Artifact,
    other: &Artifact,
    kind: ContradictionKind,
) -> Contradiction {
    let severity = severity_of(candidate, other);
    let description = match kind {
        ContradictionKind::Explicit => {
            format!("{} explicitly contradicts {}", candidate.id, other.id)
        }
        ContradictionKind::Temporal => format!(
            "{} and {} disagree on the timing of '{}'",
            candidate.id,
            other.id,
            other.event_type.as_deref().unwrap_or("an event")
        ),
        ContradictionKind::Boolean => format!(
            "{} and {} disagree on '{}'",
            candidate.id,
            other.id,
            other.subject.as_deref().unwrap_or("a claim")
        ),
    };

    Contradiction {
        block_index,
        artifact_id: other.id.clone(),
        kind,
        severity,
        description,
    }
}

fn severity_of(candidate: &Artifact, other: &Artifact) -> Severity {
    match other.tier.rank().cmp(&candidate.tier.rank()) {
        std::cmp::Ordering::Less => Severity::High,
        std::cmp::Ordering::Greater => Severity::Low,
        std::cmp::Ordering::Equal => {
            let gap = (other.weight - candidate.weight).abs();
            if gap >= 0.2 {
                if other.weight > candidate.weight {
                    Severity::High
                } else {
                    Severity::Low
                }
            } else {
                Severity::Medium
            }
        }
    }
}
