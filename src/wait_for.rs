use std::collections::{HashMap, HashSet};

use crate::TransactionID;

/// Directed graph with an edge `waiter -> holder` for every transaction blocked on a lock
/// held by another transaction
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TransactionID, HashSet<TransactionID>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `waiter` with the current set of holders it waits on
    pub fn set_wait_edges(&mut self, waiter: TransactionID, holders: HashSet<TransactionID>) {
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders);
        }
    }

    /// Remove the outgoing edges of a transaction that is no longer waiting
    pub fn clear_wait_edges(&mut self, waiter: TransactionID) {
        self.edges.remove(&waiter);
    }

    /// Remove a transaction from the graph entirely, including edges pointing to it
    pub fn remove_transaction(&mut self, tx_id: TransactionID) {
        self.edges.remove(&tx_id);
        for holders in self.edges.values_mut() {
            holders.remove(&tx_id);
        }
        self.edges.retain(|_, holders| !holders.is_empty());
    }

    pub fn waits_on(&self, waiter: TransactionID) -> Option<&HashSet<TransactionID>> {
        self.edges.get(&waiter)
    }

    /// Whether a cycle is reachable from `start`
    pub fn has_cycle_from(&self, start: TransactionID) -> bool {
        fn visit(
            graph: &HashMap<TransactionID, HashSet<TransactionID>>,
            node: TransactionID,
            visited: &mut HashSet<TransactionID>,
            path: &mut HashSet<TransactionID>,
        ) -> bool {
            if path.contains(&node) {
                return true;
            }
            if !visited.insert(node) {
                return false;
            }
            path.insert(node);
            if let Some(neighbors) = graph.get(&node) {
                for &neighbor in neighbors {
                    if visit(graph, neighbor, visited, path) {
                        return true;
                    }
                }
            }
            path.remove(&node);
            false
        }

        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        visit(&self.edges, start, &mut visited, &mut path)
    }
}

#[cfg(test)]
mod wait_for_tests {
    use super::*;

    fn holders(ids: &[TransactionID]) -> HashSet<TransactionID> {
        ids.iter().copied().collect()
    }

    #[test]
    fn chain_without_cycle() {
        let mut graph = WaitForGraph::new();
        graph.set_wait_edges(1, holders(&[2]));
        graph.set_wait_edges(2, holders(&[3]));
        assert!(!graph.has_cycle_from(1));
        assert!(!graph.has_cycle_from(3));
    }

    #[test]
    fn two_and_three_party_cycles() {
        let mut graph = WaitForGraph::new();
        graph.set_wait_edges(1, holders(&[2]));
        graph.set_wait_edges(2, holders(&[1]));
        assert!(graph.has_cycle_from(1));
        assert!(graph.has_cycle_from(2));

        let mut graph = WaitForGraph::new();
        graph.set_wait_edges(1, holders(&[2]));
        graph.set_wait_edges(2, holders(&[3]));
        graph.set_wait_edges(3, holders(&[1, 4]));
        assert!(graph.has_cycle_from(3));
    }

    #[test]
    fn cycle_not_reachable_from_start() {
        let mut graph = WaitForGraph::new();
        graph.set_wait_edges(1, holders(&[2]));
        graph.set_wait_edges(2, holders(&[1]));
        graph.set_wait_edges(5, holders(&[6]));
        assert!(!graph.has_cycle_from(5));
    }

    #[test]
    fn removing_a_transaction_breaks_its_cycles() {
        let mut graph = WaitForGraph::new();
        graph.set_wait_edges(1, holders(&[2]));
        graph.set_wait_edges(2, holders(&[1]));
        graph.remove_transaction(2);
        assert!(!graph.has_cycle_from(1));
        assert!(graph.waits_on(1).is_none());
        assert!(graph.waits_on(2).is_none());
    }
}
