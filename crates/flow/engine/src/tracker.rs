//! Dependency tracker: upstream/downstream adjacency between nodes
//!
//! Every ordering the tracker produces is topological, with ties broken by
//! declaration order so evaluation is reproducible.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use flow_types::NodeId;

/// Directed dependency graph over node ids.
///
/// An edge `from -> to` means `to` reads an export of `from`.
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    /// Declaration order of every node
    order: HashMap<NodeId, usize>,
    next_order: usize,
    /// node -> nodes it reads from
    upstream: HashMap<NodeId, HashSet<NodeId>>,
    /// node -> nodes that read from it
    downstream: HashMap<NodeId, HashSet<NodeId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; nodes keep the position of their first insertion.
    pub fn add_node(&mut self, id: NodeId) {
        if !self.order.contains_key(&id) {
            self.order.insert(id.clone(), self.next_order);
            self.next_order += 1;
            self.upstream.entry(id.clone()).or_default();
            self.downstream.entry(id).or_default();
        }
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) {
        self.order.remove(id);
        if let Some(ups) = self.upstream.remove(id) {
            for up in ups {
                if let Some(set) = self.downstream.get_mut(&up) {
                    set.remove(id);
                }
            }
        }
        if let Some(downs) = self.downstream.remove(id) {
            for down in downs {
                if let Some(set) = self.upstream.get_mut(&down) {
                    set.remove(id);
                }
            }
        }
    }

    /// Record that `to` depends on `from`; unknown nodes are added.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.downstream.entry(from.clone()).or_default().insert(to.clone());
        self.upstream.entry(to).or_default().insert(from);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.order.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Direct upstream nodes, in declaration order.
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        self.sorted(self.upstream.get(id))
    }

    /// Direct downstream nodes, in declaration order.
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.sorted(self.downstream.get(id))
    }

    /// Every node in declaration order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.order.keys().cloned().collect();
        nodes.sort_by_key(|id| self.order[id]);
        nodes
    }

    /// Nodes to re-evaluate after `changed` published new exports.
    ///
    /// The transitive downstream closure of the whole batch, each node once,
    /// in topological order. The changed nodes themselves are included only
    /// when they are downstream of another changed node.
    pub fn affected_by(&self, changed: &[NodeId]) -> Vec<NodeId> {
        let mut affected = HashSet::new();
        let mut stack: Vec<&NodeId> = changed.iter().collect();

        while let Some(id) = stack.pop() {
            if let Some(downs) = self.downstream.get(id) {
                for down in downs {
                    if affected.insert(down.clone()) {
                        stack.push(down);
                    }
                }
            }
        }

        self.topo_order(&affected)
    }

    /// Topological order of `set`, considering only edges inside it.
    ///
    /// Kahn's algorithm with a min-heap keyed by declaration order.
    pub fn topo_order(&self, set: &HashSet<NodeId>) -> Vec<NodeId> {
        let mut indegree: HashMap<&NodeId, usize> = HashMap::with_capacity(set.len());
        for id in set {
            let count = self
                .upstream
                .get(id)
                .map(|ups| ups.iter().filter(|up| set.contains(*up)).count())
                .unwrap_or(0);
            indegree.insert(id, count);
        }

        let mut ready: BinaryHeap<Reverse<(usize, &NodeId)>> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| Reverse((self.position(id), *id)))
            .collect();

        let mut out = Vec::with_capacity(set.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            out.push(id.clone());
            if let Some(downs) = self.downstream.get(id) {
                for down in downs {
                    if let Some(deg) = indegree.get_mut(down) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push(Reverse((self.position(down), down)));
                        }
                    }
                }
            }
        }

        // Members of a cycle never reach indegree zero; keep them last.
        if out.len() < set.len() {
            let emitted: HashSet<NodeId> = out.iter().cloned().collect();
            let mut rest: Vec<NodeId> = set.difference(&emitted).cloned().collect();
            rest.sort_by_key(|id| self.position(id));
            out.extend(rest);
        }
        out
    }

    /// Topological order of every node.
    pub fn full_order(&self) -> Vec<NodeId> {
        let all: HashSet<NodeId> = self.order.keys().cloned().collect();
        self.topo_order(&all)
    }

    /// Every distinct cycle, members listed in discovery order.
    ///
    /// Depth-first search with white/gray/black colouring, visiting roots
    /// and neighbours in declaration order.
    pub fn find_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut colors: HashMap<&NodeId, Color> =
            self.order.keys().map(|id| (id, Color::White)).collect();
        let mut cycles: Vec<Vec<NodeId>> = Vec::new();
        let mut seen: HashSet<Vec<NodeId>> = HashSet::new();

        for root in self.nodes() {
            let Some((root, _)) = self.order.get_key_value(&root) else {
                continue;
            };
            if colors[root] != Color::White {
                continue;
            }

            // One frame per path entry: (sorted neighbours, next index)
            let mut path: Vec<&NodeId> = vec![root];
            let mut frames: Vec<(Vec<&NodeId>, usize)> = vec![(self.sorted_refs(root), 0)];
            colors.insert(root, Color::Gray);

            while let Some((neighbours, next)) = frames.last_mut() {
                if *next >= neighbours.len() {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        colors.insert(done, Color::Black);
                    }
                    continue;
                }
                let neighbour = neighbours[*next];
                *next += 1;

                match colors.get(neighbour).copied().unwrap_or(Color::Black) {
                    Color::White => {
                        colors.insert(neighbour, Color::Gray);
                        path.push(neighbour);
                        frames.push((self.sorted_refs(neighbour), 0));
                    }
                    Color::Gray => {
                        if let Some(start) = path.iter().position(|id| *id == neighbour) {
                            let members: Vec<NodeId> =
                                path[start..].iter().map(|id| (*id).clone()).collect();
                            let mut key = members.clone();
                            key.sort();
                            if seen.insert(key) {
                                cycles.push(members);
                            }
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        cycles
    }

    fn position(&self, id: &NodeId) -> usize {
        self.order.get(id).copied().unwrap_or(usize::MAX)
    }

    fn sorted(&self, set: Option<&HashSet<NodeId>>) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
        ids.sort_by_key(|id| self.position(id));
        ids
    }

    fn sorted_refs<'a>(&'a self, id: &NodeId) -> Vec<&'a NodeId> {
        let mut ids: Vec<&NodeId> = self
            .downstream
            .get(id)
            .map(|s| s.iter().collect())
            .unwrap_or_default();
        ids.sort_by_key(|id| self.position(id));
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn ids(v: &[NodeId]) -> Vec<&str> {
        v.iter().map(NodeId::as_str).collect()
    }

    /// a -> b -> d, a -> c -> d, e standalone
    fn diamond() -> DependencyTracker {
        let mut t = DependencyTracker::new();
        for n in ["a", "b", "c", "d", "e"] {
            t.add_node(id(n));
        }
        t.add_edge(id("a"), id("b"));
        t.add_edge(id("a"), id("c"));
        t.add_edge(id("b"), id("d"));
        t.add_edge(id("c"), id("d"));
        t
    }

    #[test]
    fn test_adjacency_both_directions() {
        let t = diamond();
        assert_eq!(ids(&t.dependents(&id("a"))), vec!["b", "c"]);
        assert_eq!(ids(&t.dependencies(&id("d"))), vec!["b", "c"]);
        assert!(t.dependencies(&id("e")).is_empty());
    }

    #[test]
    fn test_affected_by_single_change() {
        let t = diamond();
        assert_eq!(ids(&t.affected_by(&[id("a")])), vec!["b", "c", "d"]);
        assert_eq!(ids(&t.affected_by(&[id("c")])), vec!["d"]);
        assert!(t.affected_by(&[id("e")]).is_empty());
    }

    #[test]
    fn test_affected_by_batch_coalesces() {
        let t = diamond();
        let order = t.affected_by(&[id("b"), id("c")]);
        assert_eq!(ids(&order), vec!["d"]);

        let order = t.affected_by(&[id("a"), id("b")]);
        assert_eq!(ids(&order), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        let mut t = DependencyTracker::new();
        for n in ["z", "y", "x"] {
            t.add_node(id(n));
        }
        assert_eq!(ids(&t.full_order()), vec!["z", "y", "x"]);

        t.add_edge(id("x"), id("z"));
        assert_eq!(ids(&t.full_order()), vec!["y", "x", "z"]);
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut t = diamond();
        t.remove_node(&id("b"));
        assert!(!t.contains(&id("b")));
        assert_eq!(ids(&t.dependents(&id("a"))), vec!["c"]);
        assert_eq!(ids(&t.dependencies(&id("d"))), vec!["c"]);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_find_cycles_discovery_order() {
        let mut t = DependencyTracker::new();
        for n in ["a", "b", "c", "d"] {
            t.add_node(id(n));
        }
        t.add_edge(id("a"), id("b"));
        t.add_edge(id("b"), id("c"));
        t.add_edge(id("c"), id("a"));
        t.add_edge(id("d"), id("d"));

        let cycles = t.find_cycles();
        assert_eq!(cycles.len(), 2);
        assert_eq!(ids(&cycles[0]), vec!["a", "b", "c"]);
        assert_eq!(ids(&cycles[1]), vec!["d"]);
    }

    #[test]
    fn test_no_cycles_in_dag() {
        assert!(diamond().find_cycles().is_empty());
    }

    #[test]
    fn test_topo_order_with_cycle_keeps_every_node() {
        let mut t = DependencyTracker::new();
        t.add_edge(id("a"), id("b"));
        t.add_edge(id("b"), id("a"));
        t.add_node(id("c"));
        let order = t.full_order();
        assert_eq!(ids(&order), vec!["c", "a", "b"]);
    }
}
