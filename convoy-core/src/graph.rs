//! Dependency graph resolution using `petgraph`.
//!
//! Edges point from a dependency to its dependent, so every edge in a valid
//! order goes forward. Ready nodes are released by Kahn's algorithm with ties
//! broken by ascending priority, then ascending name.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GraphError;
use crate::registry::Registry;
use crate::types::{Priority, ProjectDescriptor, ProjectName};

/// An edge removed in non-strict mode because its target is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEdge {
    pub project: ProjectName,
    pub missing: ProjectName,
}

/// Read-only dependency view over the registry.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<ProjectName, ()>,
    index: BTreeMap<ProjectName, NodeIndex>,
    priorities: HashMap<NodeIndex, Priority>,
    dropped: Vec<DroppedEdge>,
}

impl DependencyGraph {
    /// Build the graph for `registry`.
    ///
    /// In strict mode the first unknown dependency (by project, then
    /// declaration order) aborts with `UnknownDependency`. Otherwise the edge
    /// is dropped and listed in [`dropped_edges`](Self::dropped_edges).
    pub fn build(registry: &Registry, strict: bool) -> Result<Self, GraphError> {
        Self::from_descriptors(registry.projects(), strict)
    }

    pub fn from_descriptors<'a, I>(descriptors: I, strict: bool) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = &'a ProjectDescriptor>,
    {
        let mut descriptors: Vec<&ProjectDescriptor> = descriptors.into_iter().collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        let mut priorities = HashMap::new();
        for d in &descriptors {
            let idx = graph.add_node(d.name.clone());
            index.insert(d.name.clone(), idx);
            priorities.insert(idx, d.priority);
        }

        let mut dropped = Vec::new();
        for d in &descriptors {
            let dependent = index[&d.name];
            for dep in &d.dependencies {
                match index.get(dep) {
                    Some(&dependency) => {
                        graph.update_edge(dependency, dependent, ());
                    }
                    None if strict => {
                        return Err(GraphError::UnknownDependency {
                            project: d.name.clone(),
                            missing: dep.clone(),
                        });
                    }
                    None => {
                        warn!(project = %d.name, missing = %dep, "dropping unknown dependency");
                        dropped.push(DroppedEdge {
                            project: d.name.clone(),
                            missing: dep.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { graph, index, priorities, dropped })
    }

    pub fn dropped_edges(&self) -> &[DroppedEdge] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Kahn's algorithm with a `(priority, name)` min-heap of ready nodes.
    pub fn deployment_order(&self) -> Result<DeploymentOrder, GraphError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut ready = BinaryHeap::new();
        for (&n, &deg) in &in_degree {
            if deg == 0 {
                ready.push(Reverse((self.priorities[&n], self.graph[n].clone(), n)));
            }
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, name, n))) = ready.pop() {
            order.push(name);
            for next in self.graph.neighbors_directed(n, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse((
                            self.priorities[&next],
                            self.graph[next].clone(),
                            next,
                        )));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            return Err(GraphError::CycleDetected { cycle: self.find_cycle() });
        }
        Ok(DeploymentOrder(order))
    }

    /// Members of the lexicographically smallest cyclic component, sorted.
    fn find_cycle(&self) -> Vec<ProjectName> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| {
                let mut names: Vec<ProjectName> =
                    scc.into_iter().map(|n| self.graph[n].clone()).collect();
                names.sort();
                names
            })
            .min()
            .unwrap_or_default()
    }

    /// Direct dependencies of `project` that exist in the graph, sorted.
    pub fn dependencies_of(&self, project: &ProjectName) -> Vec<ProjectName> {
        self.neighbors(project, Direction::Incoming)
    }

    /// Every project that transitively depends on `project`, sorted.
    pub fn dependents_of(&self, project: &ProjectName) -> Vec<ProjectName> {
        let Some(&start) = self.index.get(project) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.graph.node_count()];
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(n) = queue.pop_front() {
            for next in self.graph.neighbors_directed(n, Direction::Outgoing) {
                if !seen[next.index()] && next != start {
                    seen[next.index()] = true;
                    out.push(self.graph[next].clone());
                    queue.push_back(next);
                }
            }
        }
        out.sort();
        out
    }

    /// Group `order` into ready sets: a project's wave is one past the
    /// deepest wave among its dependencies. Each wave keeps `order`'s sequence.
    pub fn waves(&self, order: &DeploymentOrder) -> Vec<Vec<ProjectName>> {
        let mut level: HashMap<&ProjectName, usize> = HashMap::new();
        let mut waves: Vec<Vec<ProjectName>> = Vec::new();
        for name in order.iter() {
            let deps = self.dependencies_of(name);
            let wave = deps
                .iter()
                .filter_map(|d| level.get(d).map(|l| l + 1))
                .max()
                .unwrap_or(0);
            level.insert(name, wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(name.clone());
        }
        waves
    }

    fn neighbors(&self, project: &ProjectName, dir: Direction) -> Vec<ProjectName> {
        let Some(&n) = self.index.get(project) else {
            return Vec::new();
        };
        let mut out: Vec<ProjectName> = self
            .graph
            .neighbors_directed(n, dir)
            .map(|m| self.graph[m].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

// ---------------------------------------------------------------------------
// DeploymentOrder
// ---------------------------------------------------------------------------

/// Project names in deployment sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentOrder(pub Vec<ProjectName>);

impl DeploymentOrder {
    pub fn iter(&self) -> impl Iterator<Item = &ProjectName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, name: &ProjectName) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }

    /// Check that every dependency precedes its dependent and that the order
    /// covers the graph exactly.
    pub fn verify(&self, graph: &DependencyGraph) -> Result<(), GraphError> {
        let positions: HashMap<&ProjectName, usize> =
            self.0.iter().enumerate().map(|(i, n)| (n, i)).collect();
        for edge in graph.graph.edge_indices() {
            let Some((from, to)) = graph.graph.edge_endpoints(edge) else {
                continue;
            };
            let dependency = &graph.graph[from];
            let project = &graph.graph[to];
            match (positions.get(dependency), positions.get(project)) {
                (Some(d), Some(p)) if d < p => {}
                _ => {
                    return Err(GraphError::OrderViolation {
                        project: project.clone(),
                        dependency: dependency.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
