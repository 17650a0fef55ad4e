use crate::graph::{NetworkGraph, NetworkNode};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A per-node delta, keyed by entity ID.
pub type GraphDelta = BTreeMap<String, NodeDelta>;

/// What changed for a single node on one side of a comparison.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeDelta {
    /// Policy IDs present on this side only, sorted.
    pub policy_ids: Vec<String>,

    /// Out-edge targets (by entity ID) present on this side only. Targets are
    /// resolved from index to ID before comparison, since indices are not
    /// stable across graphs.
    pub out_edges: BTreeSet<String>,

    /// This side has non-isolated ingress/egress while the other does not.
    pub non_isolated_ingress: bool,
    pub non_isolated_egress: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// An out-edge references a node index the graph does not have. This is a
    /// corruption of the graph format on the caller's side, not a condition
    /// that arises from well-formed inputs.
    #[error("out-edge target index {index} out of bounds ({nodes} nodes in graph)")]
    EdgeIndexOutOfBounds { index: u32, nodes: usize },
}

/// Compares two graphs and returns the `(removed, added)` deltas: what only
/// `old` has, and what only `new` has. Nodes identical on both sides
/// contribute nothing.
pub fn compute_diff(
    old: &NetworkGraph,
    new: &NetworkGraph,
) -> Result<(GraphDelta, GraphDelta), DiffError> {
    let removed = one_sided_delta(old, new)?;
    let added = one_sided_delta(new, old)?;
    Ok((removed, added))
}

/// The delta of `a` relative to `b`: per node, what `a` has that `b` lacks.
/// A node absent from `b` entirely is always recorded, even when every delta
/// component happens to be empty; its presence is the change.
fn one_sided_delta(a: &NetworkGraph, b: &NetworkGraph) -> Result<GraphDelta, DiffError> {
    let b_by_id: AHashMap<&str, &NetworkNode> =
        b.nodes.iter().map(|n| (n.entity.id(), n)).collect();

    let mut delta = GraphDelta::new();
    for node in &a.nodes {
        let id = node.entity.id();
        let a_edges = out_edge_target_ids(a, node)?;

        let Some(other) = b_by_id.get(id) else {
            delta.insert(
                id.to_string(),
                NodeDelta {
                    policy_ids: node.policy_ids.clone(),
                    out_edges: a_edges,
                    non_isolated_ingress: node.non_isolated_ingress,
                    non_isolated_egress: node.non_isolated_egress,
                },
            );
            continue;
        };

        let b_edges = out_edge_target_ids(b, other)?;
        let node_delta = NodeDelta {
            policy_ids: sorted_difference(&node.policy_ids, &other.policy_ids),
            out_edges: a_edges.difference(&b_edges).cloned().collect(),
            non_isolated_ingress: node.non_isolated_ingress && !other.non_isolated_ingress,
            non_isolated_egress: node.non_isolated_egress && !other.non_isolated_egress,
        };
        if !node_delta.is_empty() {
            delta.insert(id.to_string(), node_delta);
        }
    }
    Ok(delta)
}

fn out_edge_target_ids(
    graph: &NetworkGraph,
    node: &NetworkNode,
) -> Result<BTreeSet<String>, DiffError> {
    node.out_edges
        .keys()
        .map(|&index| {
            graph
                .nodes
                .get(index as usize)
                .map(|tgt| tgt.entity.id().to_string())
                .ok_or(DiffError::EdgeIndexOutOfBounds {
                    index,
                    nodes: graph.nodes.len(),
                })
        })
        .collect()
}

/// Elements of sorted slice `a` not present in sorted slice `b`.
fn sorted_difference(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() {
        if j >= b.len() || a[i] < b[j] {
            out.push(a[i].clone());
            i += 1;
        } else if a[i] == b[j] {
            i += 1;
            j += 1;
        } else {
            j += 1;
        }
    }
    out
}

// === NodeDelta ===

impl NodeDelta {
    pub fn is_empty(&self) -> bool {
        self.policy_ids.is_empty()
            && self.out_edges.is_empty()
            && !self.non_isolated_ingress
            && !self.non_isolated_egress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeProperties;
    use netpol_graph_core::NetworkEntity;

    fn mk_node(id: &str, policies: &[&str]) -> NetworkNode {
        NetworkNode {
            entity: NetworkEntity::Deployment {
                id: id.to_string(),
                name: id.to_string(),
                namespace: "default".to_string(),
            },
            internet_access: true,
            non_isolated_ingress: true,
            non_isolated_egress: true,
            query_match: true,
            policy_ids: policies.iter().map(|p| p.to_string()).collect(),
            out_edges: BTreeMap::new(),
        }
    }

    fn mk_graph(nodes: Vec<NetworkNode>) -> NetworkGraph {
        NetworkGraph { epoch: 0, nodes }
    }

    fn edge(graph: &mut NetworkGraph, src: usize, tgt: u32) {
        graph.nodes[src]
            .out_edges
            .insert(tgt, EdgeProperties::default());
    }

    #[test]
    fn identical_graphs_have_empty_diff() {
        let mut graph = mk_graph(vec![mk_node("a", &["p1"]), mk_node("b", &[])]);
        edge(&mut graph, 0, 1);

        let (removed, added) = compute_diff(&graph, &graph).unwrap();
        assert!(removed.is_empty());
        assert!(added.is_empty());
    }

    #[test]
    fn node_addition_and_removal() {
        let old = mk_graph(vec![mk_node("a", &[]), mk_node("gone", &["p1"])]);
        let new = mk_graph(vec![mk_node("a", &[]), mk_node("fresh", &[])]);

        let (removed, added) = compute_diff(&old, &new).unwrap();
        assert_eq!(removed.keys().collect::<Vec<_>>(), vec!["gone"]);
        assert_eq!(removed["gone"].policy_ids, vec!["p1"]);
        assert_eq!(added.keys().collect::<Vec<_>>(), vec!["fresh"]);
        assert!(added["fresh"].non_isolated_ingress);
    }

    #[test]
    fn policy_and_edge_changes() {
        let mut old = mk_graph(vec![mk_node("a", &["p1", "p2"]), mk_node("b", &[])]);
        edge(&mut old, 0, 1);
        // Same topology, but "b" now sorts first: target indices shift while
        // the edge itself is unchanged.
        let mut new = mk_graph(vec![mk_node("b", &[]), mk_node("a", &["p2", "p3"])]);
        edge(&mut new, 1, 0);

        let (removed, added) = compute_diff(&old, &new).unwrap();
        assert_eq!(removed["a"].policy_ids, vec!["p1"]);
        assert!(removed["a"].out_edges.is_empty(), "edge is index-stable by ID");
        assert_eq!(added["a"].policy_ids, vec!["p3"]);
        assert!(!removed.contains_key("b"));
        assert!(!added.contains_key("b"));
    }

    #[test]
    fn edge_retarget_shows_on_both_sides() {
        let mut old = mk_graph(vec![mk_node("a", &[]), mk_node("b", &[]), mk_node("c", &[])]);
        edge(&mut old, 0, 1);
        let mut new = mk_graph(vec![mk_node("a", &[]), mk_node("b", &[]), mk_node("c", &[])]);
        edge(&mut new, 0, 2);

        let (removed, added) = compute_diff(&old, &new).unwrap();
        assert_eq!(
            removed["a"].out_edges.iter().collect::<Vec<_>>(),
            vec!["b"]
        );
        assert_eq!(added["a"].out_edges.iter().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn featureless_node_addition_is_still_reported() {
        // A node with no policies, no edges, and both directions isolated has
        // an all-empty delta record, but its appearance must be visible.
        let old = mk_graph(vec![]);
        let mut new = mk_graph(vec![mk_node("lonely", &[])]);
        new.nodes[0].non_isolated_ingress = false;
        new.nodes[0].non_isolated_egress = false;

        let (removed, added) = compute_diff(&old, &new).unwrap();
        assert!(removed.is_empty());
        let lonely = &added["lonely"];
        assert!(lonely.policy_ids.is_empty());
        assert!(lonely.out_edges.is_empty());
        assert!(!lonely.non_isolated_ingress && !lonely.non_isolated_egress);
    }

    #[test]
    fn isolation_flag_flip_reported_once() {
        let old = mk_graph(vec![mk_node("a", &[])]);
        let mut new = mk_graph(vec![mk_node("a", &[])]);
        new.nodes[0].non_isolated_ingress = false;

        let (removed, added) = compute_diff(&old, &new).unwrap();
        assert!(removed["a"].non_isolated_ingress);
        assert!(!removed["a"].non_isolated_egress);
        assert!(!added.contains_key("a"));
    }

    #[test]
    fn out_of_bounds_edge_index_is_an_error() {
        let mut old = mk_graph(vec![mk_node("a", &[])]);
        edge(&mut old, 0, 7);
        let new = mk_graph(vec![mk_node("a", &[])]);

        assert!(matches!(
            compute_diff(&old, &new),
            Err(DiffError::EdgeIndexOutOfBounds { index: 7, nodes: 1 })
        ));
    }

    #[test]
    fn diff_covers_all_identities() {
        // added ∪ unchanged ∪ removed must cover the union of both node sets.
        let old = mk_graph(vec![mk_node("a", &[]), mk_node("b", &["p"])]);
        let new = mk_graph(vec![mk_node("b", &[]), mk_node("c", &[])]);

        let (removed, added) = compute_diff(&old, &new).unwrap();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        seen.extend(removed.keys().map(String::as_str));
        seen.extend(added.keys().map(String::as_str));
        // "a" removed, "c" added, "b" changed (policy "p" removed).
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
