//! Dependency ordering.
//!
//! Kahn's algorithm over the declared-dependency graph. Dependencies on
//! ids outside the input set are ignored. Nodes that cannot be placed
//! (members of a cycle, and everything depending on one) are excluded and
//! reported, never ordered by an arbitrary tie-break.

use crate::Plugin;
use bamz_log::warn;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Anything with an id and a list of dependency ids.
pub trait DependencyNode {
    fn node_id(&self) -> &str;
    fn node_dependencies(&self) -> Vec<String>;
}

impl DependencyNode for Arc<dyn Plugin> {
    fn node_id(&self) -> &str {
        self.id()
    }

    fn node_dependencies(&self) -> Vec<String> {
        self.dependencies()
    }
}

/// A bare `(id, dependencies)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub id: String,
    pub dependencies: Vec<String>,
}

impl PluginSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

impl DependencyNode for PluginSpec {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

/// Result of [`sort_by_dependency`].
#[derive(Debug, Clone)]
pub struct SortOutcome<T> {
    /// Every node after all of its dependencies
    pub sorted: Vec<T>,
    /// Ids that could not be placed
    pub excluded: Vec<String>,
}

impl<T: DependencyNode> SortOutcome<T> {
    pub fn ids(&self) -> Vec<&str> {
        self.sorted.iter().map(|n| n.node_id()).collect()
    }

    pub fn has_cycle(&self) -> bool {
        !self.excluded.is_empty()
    }
}

/// Order `nodes` so that each comes after its dependencies.
///
/// Ties keep input order. Repeated ids keep their first occurrence.
pub fn sort_by_dependency<T: DependencyNode + Clone>(nodes: &[T]) -> SortOutcome<T> {
    let mut seen = HashSet::new();
    let nodes: Vec<&T> = nodes.iter().filter(|n| seen.insert(n.node_id())).collect();

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.node_id(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let mut deps = node.node_dependencies();
        deps.sort();
        deps.dedup();
        for dep in deps {
            if let Some(&d) = index.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = vec![false; nodes.len()];
    let mut sorted = Vec::with_capacity(nodes.len());

    while let Some(i) = queue.pop_front() {
        placed[i] = true;
        sorted.push(nodes[i].clone());
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    let excluded: Vec<String> = nodes
        .iter()
        .zip(&placed)
        .filter(|(_, placed)| !**placed)
        .map(|(n, _)| n.node_id().to_string())
        .collect();

    if !excluded.is_empty() {
        warn!(
            target: "bamz::plugins",
            kv: [("excluded", excluded.join(","))],
            "Circular plugin dependencies, skipping {} plugin(s)",
            excluded.len()
        );
    }

    SortOutcome { sorted, excluded }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(outcome: &SortOutcome<PluginSpec>, id: &str) -> usize {
        outcome.ids().iter().position(|n| *n == id).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let plugins = vec![
            PluginSpec::new("billing").depends_on("accounts"),
            PluginSpec::new("reports").depends_on("billing").depends_on("accounts"),
            PluginSpec::new("accounts"),
            PluginSpec::new("theme"),
        ];

        let outcome = sort_by_dependency(&plugins);

        assert!(!outcome.has_cycle());
        assert_eq!(outcome.sorted.len(), 4);
        assert!(position(&outcome, "accounts") < position(&outcome, "billing"));
        assert!(position(&outcome, "billing") < position(&outcome, "reports"));
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let plugins = vec![PluginSpec::new("billing").depends_on("not-installed")];
        let outcome = sort_by_dependency(&plugins);
        assert_eq!(outcome.ids(), vec!["billing"]);
    }

    #[test]
    fn test_cycle_members_are_excluded() {
        let plugins = vec![
            PluginSpec::new("a").depends_on("b"),
            PluginSpec::new("b").depends_on("a"),
            PluginSpec::new("base"),
            PluginSpec::new("c").depends_on("base"),
        ];

        let outcome = sort_by_dependency(&plugins);

        assert_eq!(outcome.ids(), vec!["base", "c"]);
        assert_eq!(outcome.excluded, vec!["a", "b"]);
    }

    #[test]
    fn test_dependents_of_a_cycle_are_excluded() {
        let plugins = vec![
            PluginSpec::new("a").depends_on("b"),
            PluginSpec::new("b").depends_on("a"),
            PluginSpec::new("d").depends_on("a"),
            PluginSpec::new("e"),
        ];

        let outcome = sort_by_dependency(&plugins);

        assert_eq!(outcome.ids(), vec!["e"]);
        assert_eq!(outcome.excluded, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let plugins = vec![PluginSpec::new("loop").depends_on("loop"), PluginSpec::new("ok")];
        let outcome = sort_by_dependency(&plugins);
        assert_eq!(outcome.excluded, vec!["loop"]);
    }

    #[test]
    fn test_duplicates_and_repeated_dependencies() {
        let plugins = vec![
            PluginSpec::new("billing").depends_on("accounts").depends_on("accounts"),
            PluginSpec::new("accounts"),
            PluginSpec::new("billing"),
        ];

        let outcome = sort_by_dependency(&plugins);
        assert_eq!(outcome.ids(), vec!["accounts", "billing"]);
    }

    #[test]
    fn test_every_ordering_respects_dependencies() {
        // a chain and a diamond, fed in several orders
        let base = vec![
            PluginSpec::new("d").depends_on("b").depends_on("c"),
            PluginSpec::new("b").depends_on("a"),
            PluginSpec::new("c").depends_on("a"),
            PluginSpec::new("a"),
            PluginSpec::new("z").depends_on("y"),
            PluginSpec::new("y"),
        ];

        for rotation in 0..base.len() {
            let mut plugins = base.clone();
            plugins.rotate_left(rotation);
            let outcome = sort_by_dependency(&plugins);

            assert_eq!(outcome.sorted.len(), base.len());
            for node in &outcome.sorted {
                for dep in &node.dependencies {
                    assert!(position(&outcome, dep) < position(&outcome, &node.id));
                }
            }
        }
    }
}
