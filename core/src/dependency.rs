//! Dependency resolution (C7): orders a batch of proposals so
//! prerequisites mint before their dependents, via Kahn's topological
//! sort over an arena of owned artifacts plus index-based edges — never
//! mutable cross-links between artifacts.

use std::collections::{HashMap, VecDeque};

use crate::artifact::Artifact;
use crate::chain::Chain;

#[derive(Debug, Clone)]
pub struct MissingDependency {
    pub artifact_id: String,
    pub dependency_ref: String,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub missing: Vec<MissingDependency>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyOrder {
    /// Flattened topological order.
    pub order: Vec<String>,
    /// `batches[k]` groups artifacts whose longest path to a leaf is
    /// `k`; artifacts in the same batch may be mined together.
    pub batches: Vec<Vec<String>>,
    pub unresolvable: Vec<String>,
}

/// A dependency is satisfied if it names an id or content hash already
/// committed to `chain`, or one present elsewhere in `batch`.
fn is_satisfied(dep_ref: &str, batch: &[Artifact], chain: &Chain) -> bool {
    if chain.contains_artifact_ref(dep_ref) {
        return true;
    }
    batch
        .iter()
        .any(|a| a.id == dep_ref || a.content_hash == dep_ref)
}

/// Checks whether every declared dependency in `batch` resolves to
/// something already committed or present in the same batch.
#[must_use]
pub fn check(batch: &[Artifact], chain: &Chain) -> DependencyCheck {
    let mut missing = Vec::new();
    for artifact in batch {
        for dep in &artifact.dependencies {
            if !is_satisfied(dep, batch, chain) {
                missing.push(MissingDependency {
                    artifact_id: artifact.id.clone(),
                    dependency_ref: dep.clone(),
                    required: true,
                });
            }
        }
    }
    DependencyCheck {
        satisfied: missing.is_empty(),
        missing,
    }
}

/// Orders `batch` via Kahn's algorithm, ties broken by input order.
///
/// Dependencies that resolve to something already committed (not in
/// `batch`) are treated as already satisfied and do not constrain
/// ordering. A cycle or an intra-batch dependency that cannot be
/// resolved to any artifact in `batch` or the chain leaves every
/// artifact in that cycle's closure in `unresolvable`; everything else
/// is still ordered when `allow_partial` is set by the caller (the
/// caller decides what to do with `unresolvable`, this function always
/// reports it).
#[must_use]
pub fn order(batch: &[Artifact], chain: &Chain) -> DependencyOrder {
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(batch.len() * 2);
    for (i, a) in batch.iter().enumerate() {
        index_of.insert(a.id.as_str(), i);
        index_of.insert(a.content_hash.as_str(), i);
    }

    // edge: dependent -> prerequisite, both as indices into `batch`.
    // Dependencies that resolve to an already-committed artifact are
    // satisfied by construction and add no edge.
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); batch.len()];
    let mut in_degree = vec![0usize; batch.len()];

    let mut hard_missing = vec![false; batch.len()];
    for (i, artifact) in batch.iter().enumerate() {
        for dep in &artifact.dependencies {
            if let Some(&j) = index_of.get(dep.as_str()) {
                if j != i {
                    edges[j].push(i);
                    in_degree[i] += 1;
                }
            } else if !chain.contains_artifact_ref(dep) {
                hard_missing[i] = true;
            }
        }
    }

    // Propagate unresolvability: anything depending, directly or
    // transitively, on a node that can never be satisfied is itself
    // unresolvable.
    let mut unresolvable_flags = hard_missing.clone();
    let mut frontier: VecDeque<usize> = (0..batch.len()).filter(|&i| hard_missing[i]).collect();
    while let Some(i) = frontier.pop_front() {
        for &dependent in &edges[i] {
            if !unresolvable_flags[dependent] {
                unresolvable_flags[dependent] = true;
                frontier.push_back(dependent);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..batch.len())
        .filter(|&i| in_degree[i] == 0 && !unresolvable_flags[i])
        .collect();
    let mut order_indices = Vec::with_capacity(batch.len());
    let mut longest_path = vec![0u32; batch.len()];

    while let Some(i) = queue.pop_front() {
        order_indices.push(i);
        for &dependent in &edges[i] {
            if unresolvable_flags[dependent] {
                continue;
            }
            longest_path[dependent] = longest_path[dependent].max(longest_path[i] + 1);
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    let resolved: std::collections::HashSet<usize> = order_indices.iter().copied().collect();
    let unresolvable: Vec<String> = (0..batch.len())
        .filter(|i| !resolved.contains(i))
        .map(|i| batch[i].id.clone())
        .collect();

    let mut batches: Vec<Vec<String>> = Vec::new();
    for &i in &order_indices {
        let depth = longest_path[i] as usize;
        if batches.len() <= depth {
            batches.resize_with(depth + 1, Vec::new);
        }
        batches[depth].push(batch[i].id.clone());
    }

    DependencyOrder {
        order: order_indices.into_iter().map(|i| batch[i].id.clone()).collect(),
        batches,
        unresolvable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Tier;
    use chrono::Utc;

    fn artifact(id: &str, deps: Vec<&str>) -> Artifact {
        let mut a = Artifact::proposed(
            id,
            format!("{id:0>64}").chars().rev().collect::<String>(),
            "claim",
            0.9,
            Tier::Government,
            "DOC",
            Utc::now(),
        );
        a.dependencies = deps.into_iter().map(String::from).collect();
        a
    }

    #[test]
    fn independent_artifacts_order_by_input_order() {
        let chain = Chain::new(1);
        let batch = vec![artifact("A", vec![]), artifact("B", vec![])];
        let result = order(&batch, &chain);
        assert_eq!(result.order, vec!["A", "B"]);
        assert!(result.unresolvable.is_empty());
    }

    #[test]
    fn dependent_orders_after_its_prerequisite() {
        let chain = Chain::new(1);
        let batch = vec![artifact("B", vec!["A"]), artifact("A", vec![])];
        let result = order(&batch, &chain);
        let pos_a = result.order.iter().position(|x| x == "A").unwrap();
        let pos_b = result.order.iter().position(|x| x == "B").unwrap();
        assert!(pos_a < pos_b);
        assert_eq!(result.batches[0], vec!["A"]);
        assert_eq!(result.batches[1], vec!["B"]);
    }

    #[test]
    fn cycle_is_reported_as_unresolvable() {
        let chain = Chain::new(1);
        let batch = vec![artifact("A", vec!["B"]), artifact("B", vec!["A"])];
        let result = order(&batch, &chain);
        assert_eq!(result.unresolvable.len(), 2);
        assert!(result.order.is_empty());
    }

    #[test]
    fn order_reports_a_truly_missing_dependency_as_unresolvable() {
        let chain = Chain::new(1);
        let batch = vec![artifact("A", vec!["ghost"]), artifact("B", vec!["A"])];
        let result = order(&batch, &chain);
        assert_eq!(result.unresolvable.len(), 2);
    }

    #[test]
    fn check_flags_dependency_missing_from_batch_and_chain() {
        let chain = Chain::new(1);
        let batch = vec![artifact("A", vec!["ghost"])];
        let result = check(&batch, &chain);
        assert!(!result.satisfied);
        assert_eq!(result.missing[0].dependency_ref, "ghost");
    }

    #[test]
    fn check_accepts_a_dependency_already_committed_to_the_chain() {
        let mut chain = Chain::new(1);
        let prior = artifact("A", vec![]);
        let mut block = crate::block::Block::new(
            1,
            chain.latest().hash(),
            vec![prior],
            Utc::now(),
            chain.difficulty(),
        );
        block
            .mine(
                chain.difficulty(),
                1,
                &std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
                None,
            )
            .unwrap();
        chain.append(block).unwrap();

        let batch = vec![artifact("B", vec!["A"])];
        let result = check(&batch, &chain);
        assert!(result.satisfied);
    }
}
