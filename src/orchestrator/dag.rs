//! Service dependency graph: cycle detection at registration time and Kahn
//! topological layering (spec §4.8).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{FogError, FogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Required,
    Optional,
}

#[derive(Debug, Clone)]
struct Edge {
    target: String,
    kind: DependencyKind,
}

/// Dependency graph over service names. Rejects any registration that would
/// introduce a cycle, so every successfully-built graph is sortable.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<Edge>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` depending on `dependencies`. Rejects the whole
    /// registration with `FogError::Protocol("CyclicDependency")` if adding
    /// it would create a cycle.
    pub fn register(
        &mut self,
        name: &str,
        dependencies: Vec<(String, DependencyKind)>,
    ) -> FogResult<()> {
        let edges: Vec<Edge> = dependencies
            .into_iter()
            .map(|(target, kind)| Edge { target, kind })
            .collect();

        let mut probe = self.edges.clone();
        probe.insert(name.to_string(), edges.clone());
        if has_cycle(&probe) {
            return Err(FogError::Protocol("CyclicDependency".to_string()));
        }

        self.edges.insert(name.to_string(), edges);
        Ok(())
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|edges| edges.iter().map(|e| e.target.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn required_dependencies_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| e.kind == DependencyKind::Required)
                    .map(|e| e.target.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `layer(x) = 1 + max(layer(y) for y in deps(x), default 0)`. Returns
    /// services grouped ascending by layer; services within a layer may
    /// start in parallel.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut layer_of: HashMap<String, usize> = HashMap::new();
        let names: Vec<&String> = self.edges.keys().collect();

        for name in &names {
            compute_layer(name, &self.edges, &mut layer_of, &mut HashSet::new());
        }

        let max_layer = layer_of.values().copied().max().unwrap_or(0);
        let mut layers = vec![Vec::new(); max_layer + 1];
        for (name, layer) in layer_of {
            layers[layer].push(name);
        }
        for layer in layers.iter_mut() {
            layer.sort();
        }
        layers
    }

    /// Startup order: ascending layer, flattened. Shutdown order is its
    /// reverse.
    pub fn startup_order(&self) -> Vec<String> {
        self.layers().into_iter().flatten().collect()
    }

    pub fn shutdown_order(&self) -> Vec<String> {
        let mut order = self.startup_order();
        order.reverse();
        order
    }
}

fn compute_layer(
    name: &str,
    edges: &HashMap<String, Vec<Edge>>,
    memo: &mut HashMap<String, usize>,
    visiting: &mut HashSet<String>,
) -> usize {
    if let Some(&layer) = memo.get(name) {
        return layer;
    }
    visiting.insert(name.to_string());

    let deps = edges.get(name).cloned().unwrap_or_default();
    let layer = 1 + deps
        .iter()
        .filter(|e| !visiting.contains(&e.target))
        .map(|e| compute_layer(&e.target, edges, memo, visiting))
        .max()
        .unwrap_or(0);

    visiting.remove(name);
    memo.insert(name.to_string(), layer);
    layer
}

fn has_cycle(edges: &HashMap<String, Vec<Edge>>) -> bool {
    let mut state: HashMap<&str, u8> = HashMap::new(); // 0=unvisited,1=visiting,2=done
    for name in edges.keys() {
        if visit(name, edges, &mut state) {
            return true;
        }
    }
    false
}

fn visit<'a>(name: &'a str, edges: &'a HashMap<String, Vec<Edge>>, state: &mut HashMap<&'a str, u8>) -> bool {
    match state.get(name) {
        Some(1) => return true,
        Some(2) => return false,
        _ => {}
    }
    state.insert(name, 1);
    if let Some(deps) = edges.get(name) {
        for edge in deps {
            if visit(edge.target.as_str(), edges, state) {
                return true;
            }
        }
    }
    state.insert(name, 2);
    false
}

/// Kahn-queue-based layering kept as an alternative entry point matching the
/// spec's own description verbatim; `layers()` above computes the same
/// result via memoized recursion, which reads more naturally against a
/// name-keyed adjacency map.
pub fn kahn_order(graph: &DependencyGraph) -> Vec<String> {
    // Reverse adjacency: who depends on whom, for a classic Kahn sweep.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut remaining_deps: HashMap<&str, usize> = HashMap::new();
    for (name, edges) in &graph.edges {
        remaining_deps.insert(name.as_str(), edges.len());
        for edge in edges {
            dependents.entry(edge.target.as_str()).or_default().push(name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = remaining_deps
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut order = Vec::new();
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        if let Some(deps) = dependents.get(name) {
            for &dependent in deps {
                if let Some(count) = remaining_deps.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_respect_dependency_depth() {
        let mut graph = DependencyGraph::new();
        graph.register("db", vec![]).unwrap();
        graph
            .register("api", vec![("db".into(), DependencyKind::Required)])
            .unwrap();
        graph
            .register("gateway", vec![("api".into(), DependencyKind::Required)])
            .unwrap();

        let layers = graph.layers();
        assert_eq!(layers[0], vec!["db".to_string()]);
        assert_eq!(layers[1], vec!["api".to_string()]);
        assert_eq!(layers[2], vec!["gateway".to_string()]);
    }

    #[test]
    fn cyclic_registration_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph
            .register("a", vec![("b".into(), DependencyKind::Required)])
            .unwrap();
        let result = graph.register("b", vec![("a".into(), DependencyKind::Required)]);
        assert!(result.is_err());
    }

    #[test]
    fn startup_and_shutdown_orders_are_reverses() {
        let mut graph = DependencyGraph::new();
        graph.register("db", vec![]).unwrap();
        graph
            .register("api", vec![("db".into(), DependencyKind::Required)])
            .unwrap();

        let startup = graph.startup_order();
        let shutdown = graph.shutdown_order();
        let mut expected_shutdown = startup.clone();
        expected_shutdown.reverse();
        assert_eq!(shutdown, expected_shutdown);
    }

    #[test]
    fn independent_services_share_a_layer() {
        let mut graph = DependencyGraph::new();
        graph.register("cache", vec![]).unwrap();
        graph.register("db", vec![]).unwrap();
        let layers = graph.layers();
        assert_eq!(layers[0].len(), 2);
    }
}
