//! Dependency graph utilities for action nodes
//!
//! Graphs are expressed as `node id -> ids it depends on`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::{MarshalError, Result, Strategy};

/// Detects a cycle using DFS; returns the path that closes it
pub fn detect_cycle(dependencies: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    let mut roots: Vec<&String> = dependencies.keys().collect();
    roots.sort();

    for node in roots {
        if dfs_cycle(node, dependencies, &mut visited, &mut rec_stack, &mut path) {
            return Some(path);
        }
    }

    None
}

fn dfs_cycle(
    node: &str,
    graph: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if rec_stack.contains(node) {
        path.push(node.to_string());
        return true;
    }

    if visited.contains(node) {
        return false;
    }

    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if dfs_cycle(dep, graph, visited, rec_stack, path) {
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Kahn's algorithm; dependencies come before dependents, ties by id
pub fn topological_order(dependencies: &HashMap<String, Vec<String>>) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (node, deps) in dependencies {
        in_degree.entry(node.as_str()).or_insert(0);
        for dep in deps {
            if !dependencies.contains_key(dep) {
                return Err(MarshalError::InvalidStrategy(format!(
                    "node '{}' depends on unknown node '{}'",
                    node, dep
                )));
            }
            *in_degree.entry(node.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(node.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());
        if let Some(children) = dependents.get(node) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    if order.len() != in_degree.len() {
        let cycle = detect_cycle(dependencies).unwrap_or_default();
        return Err(MarshalError::InvalidStrategy(format!(
            "dependency cycle: {}",
            cycle.join(" -> ")
        )));
    }

    Ok(order)
}

/// Every node that (transitively) depends on `root`
pub fn transitive_dependents(
    dependencies: &HashMap<String, Vec<String>>,
    root: &str,
) -> BTreeSet<String> {
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for (node, deps) in dependencies {
        for dep in deps {
            reverse.entry(dep.as_str()).or_default().push(node.as_str());
        }
    }

    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(current) = queue.pop_front() {
        if let Some(children) = reverse.get(current) {
            for child in children {
                if found.insert(child.to_string()) {
                    queue.push_back(*child);
                }
            }
        }
    }

    found
}

/// Number of nodes on the longest dependency chain (0 for an empty graph)
pub fn longest_chain(dependencies: &HashMap<String, Vec<String>>) -> Result<usize> {
    let order = topological_order(dependencies)?;
    let mut depth: HashMap<&str, usize> = HashMap::new();

    for node in &order {
        let d = dependencies
            .get(node)
            .map(|deps| {
                deps.iter()
                    .filter_map(|dep| depth.get(dep.as_str()))
                    .max()
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
            + 1;
        depth.insert(node.as_str(), d);
    }

    Ok(depth.values().max().copied().unwrap_or(0))
}

/// Structural check of a strategy
///
/// - node ids are unique and every `depends_on` resolves
/// - the graph is acyclic
/// - dependencies live in strictly earlier stages
/// - no stage starts before the stages it depends on end
pub fn validate_strategy(strategy: &Strategy) -> Result<()> {
    let mut stage_of: HashMap<&str, usize> = HashMap::new();
    for (position, stage) in strategy.stages.iter().enumerate() {
        if stage.end < stage.start {
            return Err(MarshalError::InvalidStrategy(format!(
                "stage '{}' ends before it starts",
                stage.name
            )));
        }
        for node in &stage.nodes {
            if stage_of.insert(node.id.as_str(), position).is_some() {
                return Err(MarshalError::InvalidStrategy(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
    }

    let deps = strategy.dependency_map();
    // Also rejects dangling ids and cycles
    topological_order(&deps)?;

    for (position, stage) in strategy.stages.iter().enumerate() {
        for node in &stage.nodes {
            for dep in &node.depends_on {
                let dep_position = stage_of[dep.as_str()];
                if dep_position >= position {
                    return Err(MarshalError::InvalidStrategy(format!(
                        "node '{}' in stage '{}' depends on '{}' from a later or same stage",
                        node.id, stage.name, dep
                    )));
                }
                let dep_stage = &strategy.stages[dep_position];
                if stage.start < dep_stage.end {
                    return Err(MarshalError::InvalidStrategy(format!(
                        "stage '{}' starts before dependency stage '{}' ends",
                        stage.name, dep_stage.name
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn no_cycle() {
        let deps = graph(&[("A", &["B", "C"]), ("B", &["D"]), ("C", &["D"]), ("D", &[])]);
        assert!(detect_cycle(&deps).is_none());
    }

    #[test]
    fn simple_cycle() {
        let deps = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        assert!(detect_cycle(&deps).is_some());
        assert!(matches!(
            topological_order(&deps),
            Err(MarshalError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn self_cycle() {
        let deps = graph(&[("A", &["A"])]);
        assert!(detect_cycle(&deps).is_some());
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let deps = graph(&[("c", &["a", "b"]), ("b", &["a"]), ("a", &[]), ("d", &["c"])]);
        let order = topological_order(&deps).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn dangling_dependency_rejected() {
        let deps = graph(&[("a", &["ghost"])]);
        let err = topological_order(&deps).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn dependents_are_transitive() {
        let deps = graph(&[
            ("research", &[]),
            ("content", &["research"]),
            ("social", &["content"]),
            ("email", &["content"]),
            ("ads", &[]),
        ]);
        let found = transitive_dependents(&deps, "research");
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["content", "email", "social"]
        );
        assert!(transitive_dependents(&deps, "ads").is_empty());
    }

    #[test]
    fn longest_chain_counts_nodes() {
        let deps = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("x", &["a"])]);
        assert_eq!(longest_chain(&deps).unwrap(), 3);
        assert_eq!(longest_chain(&HashMap::new()).unwrap(), 0);
    }
}
