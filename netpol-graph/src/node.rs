use ahash::{AHashMap, AHashSet};
use netpol_graph_core::{
    Deployment, ExternalSource, Labels, NetworkEntity, NetworkPolicyPort, PortDesc, PortSet,
    PortRef, Protocol,
};

/// Index of a node in the builder's arena.
///
/// Adjacency and edge maps are keyed by arena index rather than by reference;
/// the arena lives exactly as long as one build pass.
pub(crate) type NodeIdx = usize;

/// A vertex under construction: one deployment, one external source, or the
/// INTERNET sink.
///
/// Ingress edges are keyed by the peer (source) index, egress edges by the
/// target index; the two directions are merged only during serialization.
#[derive(Debug)]
pub(crate) struct Node {
    pub entity: NetworkEntity,
    pub pod_labels: Labels,

    /// Named container ports by protocol, for by-name port references.
    named_ports: AHashMap<Protocol, AHashMap<String, u16>>,

    pub is_ingress_isolated: bool,
    pub is_egress_isolated: bool,
    pub internet_access: bool,
    pub applied_policy_ids: Vec<String>,

    /// Every node this one has an edge towards, in either direction's map.
    pub adjacent: AHashSet<NodeIdx>,
    pub ingress_edges: AHashMap<NodeIdx, PortSet>,
    pub egress_edges: AHashMap<NodeIdx, PortSet>,
}

// === Node ===

impl Node {
    pub fn deployment(d: &Deployment) -> Self {
        let mut named_ports: AHashMap<Protocol, AHashMap<String, u16>> = AHashMap::new();
        for cp in &d.ports {
            if let Some(name) = &cp.name {
                named_ports
                    .entry(cp.protocol)
                    .or_default()
                    .entry(name.clone())
                    .or_insert(cp.port);
            }
        }

        Self::new(
            NetworkEntity::Deployment {
                id: d.id.clone(),
                name: d.name.clone(),
                namespace: d.namespace.clone(),
            },
            d.pod_labels.clone(),
            named_ports,
        )
    }

    pub fn external(src: &ExternalSource) -> Self {
        Self::new(
            NetworkEntity::ExternalSource {
                id: src.id.clone(),
                name: src.name.clone(),
                cidr: src.cidr,
            },
            Labels::default(),
            AHashMap::new(),
        )
    }

    pub fn internet() -> Self {
        Self::new(NetworkEntity::Internet, Labels::default(), AHashMap::new())
    }

    fn new(
        entity: NetworkEntity,
        pod_labels: Labels,
        named_ports: AHashMap<Protocol, AHashMap<String, u16>>,
    ) -> Self {
        Self {
            entity,
            pod_labels,
            named_ports,
            is_ingress_isolated: false,
            is_egress_isolated: false,
            internet_access: false,
            applied_policy_ids: Vec::new(),
            adjacent: AHashSet::new(),
            ingress_edges: AHashMap::new(),
            egress_edges: AHashMap::new(),
        }
    }

    pub fn is_deployment(&self) -> bool {
        self.entity.is_deployment()
    }

    pub fn deployment_id(&self) -> Option<&str> {
        match &self.entity {
            NetworkEntity::Deployment { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Resolves a rule's port specifications against this node's ports.
    ///
    /// An empty spec list allows all ports and protocols. A by-name reference
    /// that does not resolve against this node drops that spec: an invalid
    /// port reference matches nothing, never "all ports". The result is raw
    /// (unnormalized); edge sets are normalized in the post-processing pass.
    pub fn resolve_ports(&self, specs: &[NetworkPolicyPort]) -> PortSet {
        if specs.is_empty() {
            return PortSet::all();
        }

        let mut out = PortSet::default();
        for spec in specs {
            let protocol = spec.protocol.unwrap_or(Protocol::Tcp);
            match &spec.port {
                None => out.push(PortDesc::new(protocol, 0)),
                Some(PortRef::Number(port)) => out.push(PortDesc::new(protocol, *port)),
                Some(PortRef::Name(name)) => {
                    if let Some(&port) = self
                        .named_ports
                        .get(&protocol)
                        .and_then(|byname| byname.get(name))
                    {
                        out.push(PortDesc::new(protocol, port));
                    }
                }
            }
        }
        out
    }
}
