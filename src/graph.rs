// src/graph.rs

//! Directed graph with deterministic topological sorting
//!
//! The planner's remove and install sub-graphs are built on this structure.
//! Vertices keep insertion order, which makes repeated planning runs produce
//! identical serializations. The sort emits each vertex after everything it
//! has an edge to, so install graphs (edges point at dependencies) come out
//! dependencies-first and remove graphs (edges point at dependents) come out
//! dependents-first.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

/// Source of permutation decisions for equal-rank siblings
///
/// Supplying one lets tests shuffle traversal order with a deterministic
/// seed to check order-independence of plans.
pub trait Randomizer {
    /// An index in `0..exclusive_upper_bound`
    fn random(&mut self, exclusive_upper_bound: usize) -> usize;
}

fn shuffle(indices: &mut [usize], randomizer: &mut Option<&mut dyn Randomizer>) {
    if let Some(r) = randomizer.as_mut() {
        for i in (1..indices.len()).rev() {
            let j = r.random(i + 1);
            indices.swap(i, j);
        }
    }
}

/// A directed graph keyed by vertex value
#[derive(Debug)]
pub struct Digraph<K> {
    vertices: Vec<K>,
    index: HashMap<K, usize>,
    adjacency: Vec<Vec<usize>>,
}

impl<K: Clone + Eq + Hash + Display> Digraph<K> {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            index: HashMap::new(),
            adjacency: Vec::new(),
        }
    }

    /// Add a vertex if not already present, returning its index
    pub fn add_vertex(&mut self, vertex: K) -> usize {
        if let Some(&i) = self.index.get(&vertex) {
            return i;
        }
        let i = self.vertices.len();
        self.index.insert(vertex.clone(), i);
        self.vertices.push(vertex);
        self.adjacency.push(Vec::new());
        i
    }

    /// Add an edge `from -> to`, creating vertices as needed
    ///
    /// Edges from a vertex to itself are forbidden.
    pub fn add_edge(&mut self, from: &K, to: &K) {
        assert!(from != to, "self-edge on {} is forbidden in a plan graph", from);
        let f = self.add_vertex(from.clone());
        let t = self.add_vertex(to.clone());
        if !self.adjacency[f].contains(&t) {
            self.adjacency[f].push(t);
        }
    }

    pub fn contains(&self, vertex: &K) -> bool {
        self.index.contains_key(vertex)
    }

    /// All vertices in insertion order
    pub fn vertex_list(&self) -> Vec<K> {
        self.vertices.clone()
    }

    /// The targets of a vertex's outgoing edges, in insertion order
    pub fn adjacency_of(&self, vertex: &K) -> Vec<K> {
        match self.index.get(vertex) {
            Some(&i) => self.adjacency[i]
                .iter()
                .map(|&j| self.vertices[j].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Topologically sort the graph starting from `starting`
    ///
    /// Every vertex appears after all of its edge targets. Unreached
    /// vertices are omitted. Fails on a cycle.
    pub fn topological_sort(
        &self,
        starting: &[K],
        mut randomizer: Option<&mut dyn Randomizer>,
    ) -> Result<Vec<K>> {
        const UNVISITED: u8 = 0;
        const IN_PROGRESS: u8 = 1;
        const DONE: u8 = 2;

        let mut marks = vec![UNVISITED; self.vertices.len()];
        let mut order = Vec::new();
        // Explicit stack; plans over large installed sets can recurse deeply.
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();

        let mut roots: Vec<usize> = starting
            .iter()
            .filter_map(|k| self.index.get(k).copied())
            .collect();
        shuffle(&mut roots, &mut randomizer);

        for root in roots {
            if marks[root] != UNVISITED {
                continue;
            }
            marks[root] = IN_PROGRESS;
            let mut children = self.adjacency[root].clone();
            shuffle(&mut children, &mut randomizer);
            stack.push((root, children, 0));

            while let Some((vertex, children, cursor)) = stack.last_mut() {
                if *cursor < children.len() {
                    let child = children[*cursor];
                    *cursor += 1;
                    match marks[child] {
                        UNVISITED => {
                            marks[child] = IN_PROGRESS;
                            let mut grandchildren = self.adjacency[child].clone();
                            shuffle(&mut grandchildren, &mut randomizer);
                            stack.push((child, grandchildren, 0));
                        }
                        IN_PROGRESS => {
                            return Err(Error::GraphCycle(self.vertices[child].to_string()));
                        }
                        _ => {}
                    }
                } else {
                    marks[*vertex] = DONE;
                    order.push(self.vertices[*vertex].clone());
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}

impl<K: Clone + Eq + Hash + Display> Default for Digraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> Digraph<String> {
        let mut g = Digraph::new();
        for (from, to) in edges {
            g.add_edge(&from.to_string(), &to.to_string());
        }
        g
    }

    fn position(order: &[String], v: &str) -> usize {
        order.iter().position(|x| x == v).unwrap()
    }

    #[test]
    fn test_toposort_targets_come_first() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "c")]);
        let order = g.topological_sort(&g.vertex_list(), None).unwrap();
        assert_eq!(order.len(), 3);
        assert!(position(&order, "c") < position(&order, "b"));
        assert!(position(&order, "b") < position(&order, "a"));
    }

    #[test]
    fn test_toposort_is_deterministic() {
        let g = graph(&[("a", "b"), ("a", "c"), ("d", "c")]);
        let first = g.topological_sort(&g.vertex_list(), None).unwrap();
        let second = g.topological_sort(&g.vertex_list(), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_toposort_detects_cycle() {
        let g = graph(&[("a", "b"), ("b", "a")]);
        assert!(matches!(
            g.topological_sort(&g.vertex_list(), None),
            Err(Error::GraphCycle(_))
        ));
    }

    #[test]
    fn test_toposort_omits_unreached_vertices() {
        let g = graph(&[("a", "b"), ("c", "d")]);
        let order = g
            .topological_sort(&["a".to_string()], None)
            .unwrap();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    #[should_panic(expected = "self-edge")]
    fn test_self_edge_is_forbidden() {
        let mut g = Digraph::new();
        g.add_edge(&"a".to_string(), &"a".to_string());
    }

    struct CountingRandomizer(usize);

    impl Randomizer for CountingRandomizer {
        fn random(&mut self, exclusive_upper_bound: usize) -> usize {
            self.0 = (self.0 + 7) % exclusive_upper_bound.max(1);
            self.0
        }
    }

    #[test]
    fn test_toposort_with_randomizer_still_valid() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "d"), ("d", "c")]);
        let mut randomizer = CountingRandomizer(0);
        let order = g
            .topological_sort(&g.vertex_list(), Some(&mut randomizer))
            .unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "b") < position(&order, "a"));
        assert!(position(&order, "c") < position(&order, "b"));
        assert!(position(&order, "c") < position(&order, "d"));
        assert!(position(&order, "d") < position(&order, "a"));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge(&"a".to_string(), &"b".to_string());
        assert_eq!(g.adjacency_of(&"a".to_string()).len(), 1);
    }
}
