use crate::node::NodeIdx;
use ipnet::IpNet;

/// Index over the known external-source networks, answering the two
/// containment queries IPBlock resolution needs.
#[derive(Debug, Default)]
pub(crate) struct CidrIndex {
    entries: Vec<(IpNet, NodeIdx)>,
}

// === CidrIndex ===

impl CidrIndex {
    pub fn insert(&mut self, net: IpNet, node: NodeIdx) {
        self.entries.push((net, node));
    }

    /// The most specific known network that fully contains `net`, if any.
    pub fn supernet_of(&self, net: &IpNet) -> Option<NodeIdx> {
        self.entries
            .iter()
            .filter(|(known, _)| known.contains(net))
            .max_by_key(|(known, _)| known.prefix_len())
            .map(|&(_, idx)| idx)
    }

    /// All known networks fully contained by `net`.
    pub fn subnets_of(&self, net: &IpNet) -> Vec<NodeIdx> {
        self.entries
            .iter()
            .filter(|(known, _)| net.contains(known))
            .map(|&(_, idx)| idx)
            .collect()
    }
}
