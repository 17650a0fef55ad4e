use crate::{
    extsrc::CidrIndex,
    graph::{EdgeProperties, NetworkNode},
    node::{Node, NodeIdx},
};
use ahash::{AHashMap, AHashSet};
use ipnet::IpNet;
use netpol_graph_core::{
    intersect_normalized, CompiledSelector, Deployment, ExternalSource, IpBlock, Labels,
    NamespaceMetadata, NetworkPolicy, NetworkPolicyPeer, PortSet,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Builds the connectivity graph for one input snapshot.
///
/// All vertices are allocated into a single arena up front; deployments occupy
/// the indices below `deployment_count`, the INTERNET node sits at
/// `deployment_count`, and external-source nodes follow.
pub(crate) struct GraphBuilder<'a> {
    namespaces_by_name: AHashMap<String, NamespaceMetadata>,
    nodes: Vec<Node>,
    deployment_count: usize,
    deployments_by_ns: AHashMap<String, Vec<NodeIdx>>,
    cidrs: CidrIndex,
    internet: NodeIdx,

    /// When set, restricts the serialized graph to nodes relevant to these
    /// deployment IDs.
    query: Option<&'a HashSet<String>>,
}

// === GraphBuilder ===

impl<'a> GraphBuilder<'a> {
    pub fn new(
        query: Option<&'a HashSet<String>>,
        deployments: &[Deployment],
        ext_srcs: &[ExternalSource],
        namespaces: Vec<NamespaceMetadata>,
    ) -> Self {
        let mut namespaces_by_name: AHashMap<String, NamespaceMetadata> = namespaces
            .into_iter()
            .map(|ns| (ns.name.clone(), ns))
            .collect();

        let mut nodes = Vec::with_capacity(deployments.len() + ext_srcs.len() + 1);
        let mut deployments_by_ns: AHashMap<String, Vec<NodeIdx>> = AHashMap::new();
        for d in deployments {
            let idx = nodes.len();
            nodes.push(Node::deployment(d));

            // A deployment in a namespace the namespace source does not know
            // about still gets label-less metadata, so policies in that
            // namespace can match it by name.
            namespaces_by_name
                .entry(d.namespace.clone())
                .or_insert_with(|| NamespaceMetadata {
                    id: d.namespace_id.clone(),
                    name: d.namespace.clone(),
                    labels: Labels::default(),
                });
            deployments_by_ns
                .entry(d.namespace.clone())
                .or_default()
                .push(idx);
        }

        let deployment_count = nodes.len();
        let internet = nodes.len();
        nodes.push(Node::internet());

        let mut cidrs = CidrIndex::default();
        let mut seen_ext_ids = AHashSet::new();
        for src in ext_srcs {
            if !seen_ext_ids.insert(src.id.as_str()) {
                warn!(id = %src.id, "Duplicate external source, ignoring");
                continue;
            }
            let idx = nodes.len();
            nodes.push(Node::external(src));
            cidrs.insert(src.cidr, idx);
        }

        Self {
            namespaces_by_name,
            nodes,
            deployment_count,
            deployments_by_ns,
            cidrs,
            internet,
            query,
        }
    }

    /// Applies every policy's isolation flags, peers, and ports to the arena.
    pub fn apply_policies(&mut self, policies: &[NetworkPolicy]) {
        self.for_each_policy(policies, |b, policy, ns, matched| {
            b.add_edges_for_policy(policy, &ns, &matched)
        });
    }

    /// The subset of `policies` that select at least one deployment.
    pub fn applying_policies(&mut self, policies: &[NetworkPolicy]) -> Vec<NetworkPolicy> {
        let mut applying = Vec::new();
        self.for_each_policy(policies, |_, policy, _, matched| {
            if !matched.is_empty() {
                applying.push(policy.clone());
            }
        });
        applying
    }

    /// Maps each deployment ID to the policies that select it.
    pub fn applying_policies_per_deployment(
        &mut self,
        policies: &[NetworkPolicy],
    ) -> AHashMap<String, Vec<NetworkPolicy>> {
        let mut by_deployment: AHashMap<String, Vec<NetworkPolicy>> = AHashMap::new();
        self.for_each_policy(policies, |b, policy, _, matched| {
            for &idx in &matched {
                if let Some(id) = b.nodes[idx].deployment_id() {
                    by_deployment
                        .entry(id.to_string())
                        .or_default()
                        .push(policy.clone());
                }
            }
        });
        by_deployment
    }

    /// Resolves the policy's namespace and pod selector and invokes `f` with
    /// the matched deployment nodes. Policies with an unknown namespace, an
    /// invalid selector, or an empty match set are logged and skipped; one
    /// malformed record never aborts the build.
    fn for_each_policy(
        &mut self,
        policies: &[NetworkPolicy],
        mut f: impl FnMut(&mut Self, &NetworkPolicy, NamespaceMetadata, Vec<NodeIdx>),
    ) {
        for policy in policies {
            let Some(ns) = self.namespaces_by_name.get(&policy.namespace).cloned() else {
                info!(
                    policy = %policy.name,
                    namespace = %policy.namespace,
                    "Policy references an unknown namespace, skipping",
                );
                continue;
            };

            let in_ns = match self.deployments_by_ns.get(&policy.namespace) {
                Some(idxs) if !idxs.is_empty() => idxs.clone(),
                _ => continue,
            };

            let selector = match policy.spec.pod_selector.compile() {
                Ok(selector) => selector,
                Err(error) => {
                    warn!(
                        policy = %policy.name,
                        namespace = %policy.namespace,
                        %error,
                        "Policy has an invalid pod selector, skipping",
                    );
                    continue;
                }
            };

            let matched = self.match_deployments(&in_ns, &selector);
            if matched.is_empty() {
                continue;
            }

            f(self, policy, ns, matched);
        }
    }

    fn match_deployments(&self, idxs: &[NodeIdx], selector: &CompiledSelector) -> Vec<NodeIdx> {
        if selector.matches_all() {
            return idxs.to_vec();
        }
        if selector.matches_none() {
            return Vec::new();
        }
        idxs.iter()
            .copied()
            .filter(|&idx| selector.matches(&self.nodes[idx].pod_labels))
            .collect()
    }

    fn add_edges_for_policy(
        &mut self,
        policy: &NetworkPolicy,
        ns: &NamespaceMetadata,
        matched: &[NodeIdx],
    ) {
        let isolates_ingress = policy.spec.isolates_ingress();
        let isolates_egress = policy.spec.isolates_egress();

        for &idx in matched {
            let node = &mut self.nodes[idx];
            if isolates_ingress {
                node.is_ingress_isolated = true;
            }
            if isolates_egress {
                node.is_egress_isolated = true;
            }
            node.applied_policy_ids.push(policy.id.clone());
        }

        for rule in &policy.spec.ingress {
            let (peers, _) = self.evaluate_peers(ns, &rule.peers);
            for &m in matched {
                let ports = self.nodes[m].resolve_ports(&rule.ports);
                if ports.is_empty() {
                    continue;
                }
                for &p in &peers {
                    if p == m {
                        continue;
                    }
                    self.nodes[p].adjacent.insert(m);
                    self.nodes[m]
                        .ingress_edges
                        .entry(p)
                        .or_default()
                        .extend(ports.iter());
                }
            }
        }

        for rule in &policy.spec.egress {
            let (peers, internet_access) = self.evaluate_peers(ns, &rule.peers);
            if internet_access {
                for &m in matched {
                    self.nodes[m].internet_access = true;
                }
            }

            for &p in &peers {
                // Ports resolve against the *target* vertex's named ports.
                let ports = self.nodes[p].resolve_ports(&rule.ports);
                if ports.is_empty() {
                    continue;
                }
                for &m in matched {
                    if m == p {
                        continue;
                    }
                    self.nodes[m].adjacent.insert(p);
                    self.nodes[m]
                        .egress_edges
                        .entry(p)
                        .or_default()
                        .extend(ports.iter());
                }
            }
        }
    }

    /// Resolves a rule's peer list to the union of matched vertices, plus
    /// whether any IPBlock peer raised the internet-access signal.
    fn evaluate_peers(
        &self,
        ns: &NamespaceMetadata,
        peers: &[NetworkPolicyPeer],
    ) -> (Vec<NodeIdx>, bool) {
        if peers.is_empty() {
            // An open rule: every deployment plus the INTERNET node, which
            // abstracts all external sources.
            let mut all: Vec<NodeIdx> = (0..self.deployment_count).collect();
            all.push(self.internet);
            return (all, false);
        }

        let mut matched = AHashSet::new();
        let mut internet_access = false;
        for peer in peers {
            if peer.ip_block.is_some() {
                internet_access = true;
            }

            // Once every matchable vertex is accumulated, remaining peers can
            // only still contribute the internet-access signal. The INTERNET
            // node is never matched by a non-empty peer entry.
            if matched.len() + 1 >= self.nodes.len() {
                continue;
            }

            matched.extend(self.evaluate_peer(ns, peer));
        }

        let mut matched: Vec<NodeIdx> = matched.into_iter().collect();
        matched.sort_unstable();
        (matched, internet_access)
    }

    fn evaluate_peer(&self, ns: &NamespaceMetadata, peer: &NetworkPolicyPeer) -> Vec<NodeIdx> {
        if let Some(ip_block) = &peer.ip_block {
            return self.evaluate_ip_block_peer(ip_block);
        }

        let in_namespaces: Vec<NodeIdx> = match &peer.namespace_selector {
            None => {
                if peer.pod_selector.is_none() {
                    // Neither selector set: matches nothing.
                    return Vec::new();
                }
                // A bare pod selector applies within the policy's own namespace.
                self.deployments_by_ns
                    .get(&ns.name)
                    .cloned()
                    .unwrap_or_default()
            }
            Some(ns_selector) => {
                let ns_selector = match ns_selector.compile() {
                    Ok(selector) => selector,
                    Err(error) => {
                        warn!(namespace = %ns.name, %error, "Invalid peer namespace selector");
                        return Vec::new();
                    }
                };
                if ns_selector.matches_all() {
                    (0..self.deployment_count).collect()
                } else if ns_selector.matches_none() {
                    Vec::new()
                } else {
                    self.deployments_by_ns
                        .iter()
                        .filter(|(name, _)| {
                            self.namespaces_by_name
                                .get(*name)
                                .is_some_and(|meta| ns_selector.matches(&meta.labels))
                        })
                        .flat_map(|(_, idxs)| idxs.iter().copied())
                        .collect()
                }
            }
        };

        if in_namespaces.is_empty() {
            return Vec::new();
        }

        let Some(pod_selector) = &peer.pod_selector else {
            // Namespace selector without a pod selector: all deployments in
            // the matched namespaces.
            return in_namespaces;
        };

        let pod_selector = match pod_selector.compile() {
            Ok(selector) => selector,
            Err(error) => {
                warn!(namespace = %ns.name, %error, "Invalid peer pod selector");
                return Vec::new();
            }
        };
        self.match_deployments(&in_namespaces, &pod_selector)
    }

    /// An IPBlock matches only the known external sources: the most specific
    /// network fully containing the block, or else every network the block
    /// fully contains, minus those covered by an `except` entry. It never
    /// matches deployments; reachability beyond the known sources is carried
    /// solely by the internet-access signal.
    fn evaluate_ip_block_peer(&self, ip_block: &IpBlock) -> Vec<NodeIdx> {
        let net: IpNet = match ip_block.cidr.parse() {
            Ok(net) => net,
            Err(error) => {
                if !ip_block.cidr.is_empty() {
                    warn!(cidr = %ip_block.cidr, %error, "Failed to parse IPBlock CIDR");
                }
                return Vec::new();
            }
        };

        if let Some(idx) = self.cidrs.supernet_of(&net) {
            return vec![idx];
        }

        let mut excluded = AHashSet::new();
        for except in &ip_block.except {
            match except.parse::<IpNet>() {
                Ok(except_net) => excluded.extend(self.cidrs.subnets_of(&except_net)),
                Err(error) => {
                    warn!(cidr = %except, %error, "Failed to parse IPBlock except CIDR")
                }
            }
        }

        self.cidrs
            .subnets_of(&net)
            .into_iter()
            .filter(|idx| !excluded.contains(idx))
            .collect()
    }

    /// Sorts applied-policy IDs and normalizes every edge's port set, so that
    /// serialization can intersect ingress and egress sides directly.
    pub fn post_process(&mut self) {
        for node in &mut self.nodes {
            node.applied_policy_ids.sort_unstable();
            node.applied_policy_ids.dedup();
            for ports in node.ingress_edges.values_mut() {
                ports.normalize();
            }
            for ports in node.egress_edges.values_mut() {
                ports.normalize();
            }
        }
    }

    /// Serializes the arena into the externally-visible node list.
    pub fn build_nodes(&self, include_ports: bool) -> Vec<NetworkNode> {
        let relevant = self.relevant_node_idxs();

        // Deterministic node order across builds: deployments sorted by ID,
        // then external sources (including INTERNET) sorted by ID.
        let mut deployment_idxs: Vec<NodeIdx> = (0..self.deployment_count)
            .filter(|idx| relevant.contains(idx))
            .collect();
        deployment_idxs.sort_by(|&a, &b| self.nodes[a].entity.id().cmp(self.nodes[b].entity.id()));
        let mut ext_idxs: Vec<NodeIdx> = (self.deployment_count..self.nodes.len())
            .filter(|idx| relevant.contains(idx))
            .collect();
        ext_idxs.sort_by(|&a, &b| self.nodes[a].entity.id().cmp(self.nodes[b].entity.id()));

        let ordered: Vec<NodeIdx> = deployment_idxs.into_iter().chain(ext_idxs).collect();
        let index_of: AHashMap<NodeIdx, usize> = ordered
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();

        let mut out: Vec<NetworkNode> = ordered
            .iter()
            .map(|&idx| {
                let node = &self.nodes[idx];
                if node.is_deployment() {
                    NetworkNode {
                        entity: node.entity.clone(),
                        internet_access: node.internet_access || !node.is_egress_isolated,
                        non_isolated_ingress: !node.is_ingress_isolated,
                        non_isolated_egress: !node.is_egress_isolated,
                        query_match: self.query_match(node),
                        policy_ids: node.applied_policy_ids.clone(),
                        out_edges: Default::default(),
                    }
                } else {
                    NetworkNode {
                        entity: node.entity.clone(),
                        internet_access: true,
                        non_isolated_ingress: true,
                        non_isolated_egress: true,
                        query_match: false,
                        policy_ids: Vec::new(),
                        out_edges: Default::default(),
                    }
                }
            })
            .collect();

        let empty = PortSet::default();
        for (pos, &src_idx) in ordered.iter().enumerate() {
            let src = &self.nodes[src_idx];
            let src_queried = self.queried(src);
            for &tgt_idx in &src.adjacent {
                let tgt = &self.nodes[tgt_idx];

                // An edge is emitted iff one endpoint was queried.
                if !src_queried && !self.queried(tgt) {
                    continue;
                }

                // Connectivity between a non-isolated pair is implied by the
                // node flags; only isolated directions carry explicit edges.
                if !src.is_egress_isolated && !tgt.is_ingress_isolated {
                    continue;
                }

                let egress = src.egress_edges.get(&tgt_idx).unwrap_or(&empty);
                let ingress = tgt.ingress_edges.get(&src_idx).unwrap_or(&empty);
                let ports = if src.is_egress_isolated && tgt.is_ingress_isolated {
                    intersect_normalized(egress, ingress)
                } else if src.is_egress_isolated {
                    egress.clone()
                } else {
                    ingress.clone()
                };
                if ports.is_empty() {
                    continue;
                }

                let Some(&tgt_pos) = index_of.get(&tgt_idx) else {
                    debug!(target = %tgt.entity.id(), "Edge target not in serialized graph");
                    continue;
                };
                out[pos].out_edges.insert(
                    tgt_pos as u32,
                    EdgeProperties {
                        ports: include_ports.then_some(ports),
                    },
                );
            }
        }

        out
    }

    /// Which arena nodes appear in the serialized graph.
    ///
    /// Unscoped evaluations keep every deployment; scoped ones keep a node if
    /// it was queried, has a surviving connection involving a queried node, or
    /// is mutually non-isolated with some queried deployment. External sources
    /// are kept only when a queried deployment can be reached from them, and
    /// INTERNET whenever any queried deployment is non-isolated.
    fn relevant_node_idxs(&self) -> AHashSet<NodeIdx> {
        let mut queried_non_isolated_ingress = false;
        let mut queried_non_isolated_egress = false;
        for idx in 0..self.deployment_count {
            let node = &self.nodes[idx];
            if self.queried(node) {
                if !node.is_ingress_isolated {
                    queried_non_isolated_ingress = true;
                }
                if !node.is_egress_isolated {
                    queried_non_isolated_egress = true;
                }
            }
        }

        let empty = PortSet::default();
        let mut relevant = AHashSet::new();
        for idx in 0..self.deployment_count {
            let node = &self.nodes[idx];
            let src_queried = self.queried(node);

            let mut any_valid_conns = false;
            for &adj_idx in &node.adjacent {
                let adj = &self.nodes[adj_idx];
                if !src_queried && !self.queried(adj) {
                    continue;
                }

                let num_edges = if node.is_egress_isolated && adj.is_ingress_isolated {
                    let egress = node.egress_edges.get(&adj_idx).unwrap_or(&empty);
                    let ingress = adj.ingress_edges.get(&idx).unwrap_or(&empty);
                    intersect_normalized(egress, ingress).len()
                } else if node.is_egress_isolated {
                    node.egress_edges.get(&adj_idx).map_or(0, PortSet::len)
                } else if adj.is_ingress_isolated {
                    adj.ingress_edges.get(&idx).map_or(0, PortSet::len)
                } else {
                    1
                };
                if num_edges == 0 {
                    continue;
                }

                any_valid_conns = true;
                relevant.insert(adj_idx);
            }

            if src_queried
                || any_valid_conns
                || (queried_non_isolated_ingress && !node.is_egress_isolated)
                || (queried_non_isolated_egress && !node.is_ingress_isolated)
            {
                relevant.insert(idx);
            }
        }

        for idx in self.deployment_count..self.nodes.len() {
            if self.nodes[idx]
                .adjacent
                .iter()
                .any(|&adj| self.queried(&self.nodes[adj]))
            {
                relevant.insert(idx);
            }
        }

        if queried_non_isolated_ingress || queried_non_isolated_egress {
            relevant.insert(self.internet);
        }

        relevant
    }

    fn queried(&self, node: &Node) -> bool {
        match self.query {
            None => true,
            Some(ids) => node.deployment_id().is_some_and(|id| ids.contains(id)),
        }
    }

    fn query_match(&self, node: &Node) -> bool {
        node.deployment_id().is_some_and(|id| match self.query {
            None => true,
            Some(ids) => ids.contains(id),
        })
    }
}
