use crate::{builder::GraphBuilder, graph::NetworkGraph};
use ahash::AHashMap;
use anyhow::Result;
use netpol_graph_core::{Deployment, ExternalSource, NamespaceMetadata, NetworkPolicy};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::error;

/// Supplies namespace metadata for the cluster under evaluation.
///
/// A lookup failure degrades to "no namespace information": namespace
/// selectors then resolve conservatively to no match, and the evaluation
/// proceeds rather than failing.
pub trait NamespaceSource {
    fn get_namespaces(&self) -> Result<Vec<NamespaceMetadata>>;
}

impl NamespaceSource for Vec<NamespaceMetadata> {
    fn get_namespaces(&self) -> Result<Vec<NamespaceMetadata>> {
        Ok(self.clone())
    }
}

/// Evaluates network policy snapshots into connectivity graphs.
///
/// Graph construction is a pure function of its inputs and may run
/// concurrently across clusters; the per-cluster epoch counter is the only
/// shared mutable state.
pub struct Evaluator<N> {
    namespaces: N,
    epochs: RwLock<AHashMap<String, u32>>,
}

// === Evaluator ===

impl<N: NamespaceSource> Evaluator<N> {
    pub fn new(namespaces: N) -> Self {
        Self {
            namespaces,
            epochs: RwLock::new(AHashMap::new()),
        }
    }

    /// Computes the epoch-stamped connectivity graph for one snapshot.
    ///
    /// When `query` is set, the graph is restricted to the nodes relevant to
    /// the queried deployment IDs. `include_ports` controls whether edges
    /// carry their resolved port sets.
    pub fn get_graph(
        &self,
        cluster_id: &str,
        query: Option<&HashSet<String>>,
        deployments: &[Deployment],
        ext_srcs: &[ExternalSource],
        policies: &[NetworkPolicy],
        include_ports: bool,
    ) -> NetworkGraph {
        let mut builder =
            GraphBuilder::new(query, deployments, ext_srcs, self.cluster_namespaces());
        builder.apply_policies(policies);
        builder.post_process();
        NetworkGraph {
            epoch: self.epoch(cluster_id),
            nodes: builder.build_nodes(include_ports),
        }
    }

    /// The subset of `policies` that select at least one of `deployments`,
    /// independent of full graph computation.
    pub fn get_applied_policies(
        &self,
        deployments: &[Deployment],
        policies: &[NetworkPolicy],
    ) -> Vec<NetworkPolicy> {
        let mut builder = GraphBuilder::new(None, deployments, &[], self.cluster_namespaces());
        builder.applying_policies(policies)
    }

    /// Maps each deployment ID to the policies that select it.
    pub fn get_applied_policies_per_deployment(
        &self,
        deployments: &[Deployment],
        policies: &[NetworkPolicy],
    ) -> HashMap<String, Vec<NetworkPolicy>> {
        let mut builder = GraphBuilder::new(None, deployments, &[], self.cluster_namespaces());
        builder
            .applying_policies_per_deployment(policies)
            .into_iter()
            .collect()
    }

    /// Bumps the change token for a cluster. Invoked when the underlying
    /// workload set changed; carries no meaning beyond "recompute may be
    /// needed".
    pub fn increment_epoch(&self, cluster_id: &str) {
        let mut epochs = self.epochs.write();
        let epoch = epochs.entry(cluster_id.to_string()).or_insert(0);
        *epoch = epoch.wrapping_add(1);
    }

    /// The current epoch for a cluster; the empty cluster ID returns the sum
    /// across all clusters.
    pub fn epoch(&self, cluster_id: &str) -> u32 {
        let epochs = self.epochs.read();
        if cluster_id.is_empty() {
            return epochs.values().fold(0u32, |acc, &e| acc.wrapping_add(e));
        }
        epochs.get(cluster_id).copied().unwrap_or(0)
    }

    fn cluster_namespaces(&self) -> Vec<NamespaceMetadata> {
        self.namespaces.get_namespaces().unwrap_or_else(|error| {
            error!(%error, "Failed to fetch namespaces, proceeding without namespace metadata");
            Vec::new()
        })
    }
}
