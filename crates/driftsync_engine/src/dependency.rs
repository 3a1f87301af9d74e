//! Model dependency graph.
//!
//! An edge `A -> B` means "A depends on B": records of type A reference
//! records of type B, so B must be created remotely before A and deleted
//! after A. The graph is kept acyclic; an edge that would close a cycle is
//! rejected.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tracks "depends on" edges between model types.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    edges: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl DependencyResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` depends on `dependency`.
    ///
    /// Registering an existing edge is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DependencyCycle`] if the edge would make the
    /// graph cyclic, including a self-edge. Nothing is recorded then.
    pub fn register_dependency(&self, dependent: &str, dependency: &str) -> SyncResult<()> {
        let mut edges = self.edges.write();
        if add_edge(&mut edges, dependent, dependency)? {
            tracing::debug!(dependent, dependency, "registered model dependency");
        }
        Ok(())
    }

    /// Records every edge `dependent -> dependency` or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DependencyCycle`] for the first edge that would
    /// make the graph cyclic, leaving the graph as it was.
    pub fn register_dependencies<'a, I>(&self, dependent: &str, dependencies: I) -> SyncResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut edges = self.edges.write();
        let mut staged = edges.clone();
        let mut added = Vec::new();
        for dependency in dependencies {
            if add_edge(&mut staged, dependent, dependency)? {
                added.push(dependency);
            }
        }
        *edges = staged;
        for dependency in added {
            tracing::debug!(dependent, dependency, "registered model dependency");
        }
        Ok(())
    }

    /// Returns the length of the longest dependency chain starting at
    /// `model_type`. Models with no dependencies are level 0.
    pub fn compute_level(&self, model_type: &str) -> usize {
        let edges = self.edges.read();
        level(&edges, model_type, &mut HashMap::new())
    }

    /// Returns the direct dependencies of `model_type`.
    pub fn dependencies_of(&self, model_type: &str) -> Vec<String> {
        self.edges
            .read()
            .get(model_type)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the model types that directly depend on `model_type`.
    pub fn dependents_of(&self, model_type: &str) -> Vec<String> {
        self.edges
            .read()
            .iter()
            .filter(|(_, deps)| deps.contains(model_type))
            .map(|(dependent, _)| dependent.clone())
            .collect()
    }

    /// Groups `model_types` by level, lowest level first.
    pub fn order_by_level<'a, I>(&self, model_types: I) -> Vec<(usize, Vec<String>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let edges = self.edges.read();
        let mut memo = HashMap::new();
        let mut levels: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for model_type in model_types {
            let lvl = level(&edges, model_type, &mut memo);
            levels.entry(lvl).or_default().insert(model_type.to_string());
        }
        levels
            .into_iter()
            .map(|(lvl, types)| (lvl, types.into_iter().collect()))
            .collect()
    }
}

/// Inserts an edge unless it would close a cycle. Returns false if the
/// edge was already present.
fn add_edge(
    edges: &mut BTreeMap<String, BTreeSet<String>>,
    dependent: &str,
    dependency: &str,
) -> SyncResult<bool> {
    if edges
        .get(dependent)
        .is_some_and(|deps| deps.contains(dependency))
    {
        return Ok(false);
    }
    if dependent == dependency || reaches(edges, dependency, dependent) {
        return Err(SyncError::DependencyCycle {
            dependent: dependent.to_string(),
            dependency: dependency.to_string(),
        });
    }
    edges
        .entry(dependent.to_string())
        .or_default()
        .insert(dependency.to_string());
    Ok(true)
}

/// Returns true if `to` is reachable from `from`.
fn reaches(edges: &BTreeMap<String, BTreeSet<String>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut seen = BTreeSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(deps) = edges.get(node) {
            stack.extend(deps.iter().map(String::as_str));
        }
    }
    false
}

fn level<'a>(
    edges: &'a BTreeMap<String, BTreeSet<String>>,
    model_type: &'a str,
    memo: &mut HashMap<&'a str, usize>,
) -> usize {
    if let Some(&lvl) = memo.get(model_type) {
        return lvl;
    }
    let lvl = edges.get(model_type).map_or(0, |deps| {
        deps.iter()
            .map(|dep| level(edges, dep, memo) + 1)
            .max()
            .unwrap_or(0)
    });
    memo.insert(model_type, lvl);
    lvl
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn independent_models_are_level_zero() {
        let resolver = DependencyResolver::new();
        assert_eq!(resolver.compute_level("project"), 0);
    }

    #[test]
    fn levels_follow_longest_chain() {
        let resolver = DependencyResolver::new();
        resolver.register_dependency("todo", "project").unwrap();
        resolver.register_dependency("comment", "todo").unwrap();
        resolver.register_dependency("comment", "user").unwrap();

        assert_eq!(resolver.compute_level("project"), 0);
        assert_eq!(resolver.compute_level("user"), 0);
        assert_eq!(resolver.compute_level("todo"), 1);
        assert_eq!(resolver.compute_level("comment"), 2);
    }

    #[test]
    fn registration_is_idempotent() {
        let resolver = DependencyResolver::new();
        resolver.register_dependency("todo", "project").unwrap();
        resolver.register_dependency("todo", "project").unwrap();
        assert_eq!(resolver.dependencies_of("todo"), vec!["project"]);
        assert_eq!(resolver.dependents_of("project"), vec!["todo"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let resolver = DependencyResolver::new();
        resolver.register_dependency("a", "b").unwrap();
        resolver.register_dependency("b", "c").unwrap();

        let err = resolver.register_dependency("c", "a").unwrap_err();
        assert!(matches!(err, SyncError::DependencyCycle { .. }));
        assert!(resolver.dependencies_of("c").is_empty());

        let err = resolver.register_dependency("a", "a").unwrap_err();
        assert!(matches!(err, SyncError::DependencyCycle { .. }));
        assert_eq!(resolver.compute_level("a"), 2);
    }

    #[test]
    fn rejected_group_leaves_no_edges() {
        let resolver = DependencyResolver::new();
        resolver.register_dependency("project", "todo").unwrap();

        let err = resolver
            .register_dependencies("todo", ["user", "project", "tag"])
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::DependencyCycle { ref dependency, .. } if dependency == "project"
        ));
        assert!(resolver.dependencies_of("todo").is_empty());
        assert!(resolver.dependents_of("user").is_empty());
        assert_eq!(resolver.compute_level("todo"), 0);

        resolver
            .register_dependencies("todo", ["user", "tag"])
            .unwrap();
        assert_eq!(resolver.dependencies_of("todo"), vec!["tag", "user"]);
    }

    #[test]
    fn dynamic_edges_change_levels() {
        let resolver = DependencyResolver::new();
        resolver.register_dependency("todo", "project").unwrap();
        assert_eq!(resolver.compute_level("todo"), 1);

        resolver.register_dependency("project", "workspace").unwrap();
        assert_eq!(resolver.compute_level("todo"), 2);
    }

    #[test]
    fn order_by_level_groups_types() {
        let resolver = DependencyResolver::new();
        resolver.register_dependency("todo", "project").unwrap();
        resolver.register_dependency("comment", "todo").unwrap();

        let order = resolver.order_by_level(["comment", "project", "todo", "tag"]);
        assert_eq!(
            order,
            vec![
                (0, vec!["project".to_string(), "tag".to_string()]),
                (1, vec!["todo".to_string()]),
                (2, vec!["comment".to_string()]),
            ]
        );
    }

    proptest! {
        #[test]
        fn dependents_sit_above_dependencies(
            edges in proptest::collection::vec((0u8..8, 0u8..8), 0..24),
        ) {
            let resolver = DependencyResolver::new();
            let mut accepted = Vec::new();
            for (a, b) in edges {
                let (a, b) = (format!("m{a}"), format!("m{b}"));
                if resolver.register_dependency(&a, &b).is_ok() {
                    accepted.push((a, b));
                }
            }
            for (a, b) in accepted {
                prop_assert!(resolver.compute_level(&a) > resolver.compute_level(&b));
            }
        }
    }
}
