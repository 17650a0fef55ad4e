use netpol_graph_core::{NetworkEntity, PortSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The externally-visible, epoch-stamped connectivity graph produced by one
/// evaluation. Nodes are ordered (deployments by ID, then external sources by
/// ID) and adjacency is addressed by node index within this graph.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NetworkGraph {
    pub epoch: u32,
    pub nodes: Vec<NetworkNode>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNode {
    pub entity: NetworkEntity,

    /// Whether the node can reach the internet, either via an IPBlock egress
    /// rule or because its egress is not isolated at all.
    pub internet_access: bool,

    pub non_isolated_ingress: bool,
    pub non_isolated_egress: bool,

    /// Whether the node was part of the queried deployment set (always true
    /// for unscoped evaluations of deployment nodes).
    pub query_match: bool,

    /// IDs of the policies that select this node, sorted.
    pub policy_ids: Vec<String>,

    /// Explicit out-edges by target node index.
    ///
    /// Edges between a non-egress-isolated source and a non-ingress-isolated
    /// target are implied by the flags and not materialized here; use
    /// [`NetworkGraph::permits`] for the uniform answer.
    pub out_edges: BTreeMap<u32, EdgeProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EdgeProperties {
    /// The permitted port set, when the evaluation was asked to include ports.
    pub ports: Option<PortSet>,
}

// === NetworkGraph ===

impl NetworkGraph {
    /// Whether traffic from node `src` to node `tgt` (by index) is permitted
    /// on some port, combining explicit edges with implied non-isolated
    /// connectivity.
    pub fn permits(&self, src: usize, tgt: usize) -> bool {
        if src == tgt {
            return false;
        }
        let (Some(s), Some(t)) = (self.nodes.get(src), self.nodes.get(tgt)) else {
            return false;
        };
        if s.out_edges.contains_key(&(tgt as u32)) {
            return true;
        }
        s.non_isolated_egress && t.non_isolated_ingress
    }

    pub fn node_index(&self, entity_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.entity.id() == entity_id)
    }

    pub fn node(&self, entity_id: &str) -> Option<&NetworkNode> {
        self.node_index(entity_id).map(|i| &self.nodes[i])
    }
}
