//! Closing a requested block set over the dependency graph.
//!
//! Edges are first normalised (family names expand to one edge per member,
//! children rebuilt from dependencies). The downward pass then adds every
//! dependent of a rerun block; the upward pass adds every prerequisite
//! whose output is not complete and marks the complete ones as satisfied.

use blockflow_core::FlowError;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::block::{extend_unique, Block, Family};

/// Replace family-name edges with member edges and rebuild children.
pub fn normalize_edges(
    blocks: &mut IndexMap<String, Block>,
    families: &IndexMap<String, Family>,
) -> Result<(), FlowError> {
    for (name, block) in blocks.iter_mut() {
        let mut resolved = Vec::with_capacity(block.dependencies.len());
        for dep in &block.dependencies {
            if let Some(family) = families.get(dep) {
                extend_unique(&mut resolved, family.members.iter().cloned());
            } else {
                extend_unique(&mut resolved, [dep.clone()]);
            }
        }
        block.dependencies = resolved;
        block.children.clear();
        if let Some(dep) = block.dependencies.iter().find(|d| *d == name) {
            return Err(FlowError::InvalidDependency {
                block: name.clone(),
                dependency: dep.clone(),
            });
        }
    }

    let edges: Vec<(String, String)> = blocks
        .iter()
        .flat_map(|(name, block)| {
            block
                .dependencies
                .iter()
                .map(move |dep| (dep.clone(), name.clone()))
        })
        .collect();

    for (parent, child) in edges {
        match blocks.get_mut(&parent) {
            Some(block) => extend_unique(&mut block.children, [child]),
            None => {
                return Err(FlowError::InvalidDependency {
                    block: child,
                    dependency: parent,
                })
            }
        }
    }
    Ok(())
}

/// Add every (transitive) child of the requested blocks.
pub fn close_downward(blocks: &IndexMap<String, Block>, requested: &mut IndexSet<String>) {
    let mut frontier: Vec<String> = requested.iter().cloned().collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for name in &frontier {
            let Some(block) = blocks.get(name) else { continue };
            for child in &block.children {
                if requested.insert(child.clone()) {
                    debug!(block = %child, parent = %name, "rerun extends to dependent");
                    next.push(child.clone());
                }
            }
        }
        frontier = next;
    }
}

/// Add every prerequisite without complete output; mark the others done.
pub fn close_upward(blocks: &mut IndexMap<String, Block>, requested: &mut IndexSet<String>) {
    let mut frontier: Vec<String> = requested.iter().cloned().collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for name in &frontier {
            let deps = match blocks.get(name) {
                Some(block) => block.dependencies.clone(),
                None => continue,
            };
            for dep in deps {
                if requested.contains(&dep) {
                    continue;
                }
                let Some(block) = blocks.get_mut(&dep) else { continue };
                if block.target.is_complete() {
                    block.complete = true;
                } else {
                    debug!(block = %dep, dependent = %name, "missing prerequisite added");
                    requested.insert(dep.clone());
                    next.push(dep);
                }
            }
        }
        frontier = next;
    }
}

/// Take excluded blocks out of the requested set. Excluded blocks with
/// complete output count as satisfied. Requested blocks left waiting on a
/// prerequisite that is neither complete nor requested are dropped too, so
/// their existing output is never removed for a run that cannot reach them.
/// Returns the dropped dependents.
pub fn apply_exclusions(
    blocks: &mut IndexMap<String, Block>,
    requested: &mut IndexSet<String>,
    excluded: &IndexSet<String>,
) -> Vec<String> {
    requested.retain(|name| !excluded.contains(name));
    for name in excluded {
        if let Some(block) = blocks.get_mut(name) {
            if block.target.is_complete() {
                block.complete = true;
            }
        }
    }

    let mut dropped = Vec::new();
    loop {
        let stranded: Vec<String> = requested
            .iter()
            .filter(|name| {
                blocks.get(*name).is_some_and(|block| {
                    block.dependencies.iter().any(|dep| {
                        !requested.contains(dep) && !blocks.get(dep).is_some_and(|d| d.complete)
                    })
                })
            })
            .cloned()
            .collect();
        if stranded.is_empty() {
            break;
        }
        for name in stranded {
            warn!(block = %name, "excluded prerequisite has no complete output; skipping");
            requested.shift_remove(&name);
            dropped.push(name);
        }
    }
    dropped
}

/// A block may start once every dependency has completed.
pub fn is_ready(blocks: &IndexMap<String, Block>, name: &str) -> bool {
    blocks.get(name).is_some_and(|block| {
        block
            .dependencies
            .iter()
            .all(|dep| blocks.get(dep).is_some_and(|d| d.complete))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use blockflow_core::{Args, Records};
    use blockflow_store::Target;

    use crate::deferred::{erase, BlockContext, DeferredFunction};

    fn block(dir: &std::path::Path, name: &str, deps: &[&str]) -> Block {
        let func = erase(|_: &mut BlockContext| Ok(()));
        let mut b = Block::new(
            DeferredFunction::new(func, Args::new()),
            Target::for_block(dir, "test", name, "rec"),
        );
        b.dependencies = deps.iter().map(|d| d.to_string()).collect();
        b
    }

    fn chain(dir: &std::path::Path) -> IndexMap<String, Block> {
        let mut blocks = IndexMap::new();
        blocks.insert("A".to_string(), block(dir, "A", &[]));
        blocks.insert("B".to_string(), block(dir, "B", &["A"]));
        blocks.insert("C".to_string(), block(dir, "C", &["B"]));
        normalize_edges(&mut blocks, &IndexMap::new()).unwrap();
        blocks
    }

    fn set(names: &[&str]) -> IndexSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn commit(block: &Block) {
        block.target.write(&Records::new()).unwrap();
        block.target.commit().unwrap();
    }

    #[test]
    fn children_mirror_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = chain(dir.path());
        assert_eq!(blocks["A"].children, vec!["B"]);
        assert_eq!(blocks["B"].children, vec!["C"]);
        assert!(blocks["C"].children.is_empty());
    }

    #[test]
    fn downward_closure_follows_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = chain(dir.path());
        let mut requested = set(&["A"]);
        close_downward(&blocks, &mut requested);
        assert_eq!(requested, set(&["A", "B", "C"]));
    }

    #[test]
    fn upward_closure_marks_existing_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = chain(dir.path());
        commit(&blocks["A"]);
        commit(&blocks["B"]);

        let mut requested = set(&["C"]);
        close_upward(&mut blocks, &mut requested);
        assert_eq!(requested, set(&["C"]));
        assert!(blocks["A"].complete);
        assert!(blocks["B"].complete);
        assert!(is_ready(&blocks, "C"));
    }

    #[test]
    fn upward_closure_adds_missing_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = chain(dir.path());
        commit(&blocks["A"]);
        // B has output but never committed
        blocks["B"].target.write(&Records::new().with("x", 1)).unwrap();

        let mut requested = set(&["C"]);
        close_upward(&mut blocks, &mut requested);
        assert_eq!(requested, set(&["C", "B"]));
        assert!(blocks["A"].complete);
        assert!(!is_ready(&blocks, "C"));
        assert!(is_ready(&blocks, "B"));
    }

    #[test]
    fn requested_prerequisites_are_not_marked_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = chain(dir.path());
        commit(&blocks["A"]);

        let mut requested = set(&["A", "B"]);
        close_upward(&mut blocks, &mut requested);
        assert!(!blocks["A"].complete);
        assert!(!is_ready(&blocks, "B"));
    }

    #[test]
    fn complete_excluded_block_satisfies_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = chain(dir.path());
        commit(&blocks["B"]);

        let mut requested = set(&["A", "B", "C"]);
        let dropped = apply_exclusions(&mut blocks, &mut requested, &set(&["B"]));
        assert!(dropped.is_empty());
        assert_eq!(requested, set(&["A", "C"]));
        assert!(blocks["B"].complete);
        assert!(is_ready(&blocks, "C"));
    }

    #[test]
    fn dependents_of_incomplete_exclusions_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = chain(dir.path());
        blocks.insert("D".to_string(), block(dir.path(), "D", &["C"]));
        normalize_edges(&mut blocks, &IndexMap::new()).unwrap();

        let mut requested = set(&["A", "B", "C", "D"]);
        let dropped = apply_exclusions(&mut blocks, &mut requested, &set(&["B"]));
        assert_eq!(dropped, vec!["C", "D"]);
        assert_eq!(requested, set(&["A"]));
        assert!(!blocks["B"].complete);
    }

    #[test]
    fn family_edges_expand_to_members() {
        let dir = tempfile::tempdir().unwrap();
        let mut family = Family::new(erase(|_: &mut BlockContext| Ok(())), None, Vec::new());
        family.members = vec!["sweep-0".into(), "sweep-1".into()];
        let mut families = IndexMap::new();
        families.insert("sweep".to_string(), family);

        let mut blocks = IndexMap::new();
        blocks.insert("sweep-0".to_string(), block(dir.path(), "sweep-0", &[]));
        blocks.insert("sweep-1".to_string(), block(dir.path(), "sweep-1", &[]));
        blocks.insert("summary".to_string(), block(dir.path(), "summary", &["sweep"]));
        normalize_edges(&mut blocks, &families).unwrap();

        assert_eq!(blocks["summary"].dependencies, vec!["sweep-0", "sweep-1"]);
        assert_eq!(blocks["sweep-1"].children, vec!["summary"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = IndexMap::new();
        blocks.insert("B".to_string(), block(dir.path(), "B", &["nope"]));
        let err = normalize_edges(&mut blocks, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidDependency { .. }));
    }

    #[test]
    fn readiness_needs_every_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = chain(dir.path());
        blocks.insert("D".to_string(), block(dir.path(), "D", &["A", "B"]));
        blocks["A"].complete = true;
        assert!(!is_ready(&blocks, "D"));
        blocks["B"].complete = true;
        assert!(is_ready(&blocks, "D"));
    }
}
