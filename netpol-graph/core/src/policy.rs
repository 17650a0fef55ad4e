use crate::{labels::Selector, ports::Protocol};
use serde::{Deserialize, Serialize};

/// A network policy as observed in a cluster, identified by a stable ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkPolicy {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub spec: NetworkPolicySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicySpec {
    pub pod_selector: Selector,

    /// The directions this policy isolates. Empty means the policy did not
    /// declare its types explicitly; see `isolates_ingress`/`isolates_egress`.
    #[serde(default)]
    pub policy_types: Vec<PolicyType>,

    #[serde(default)]
    pub ingress: Vec<NetworkPolicyRule>,
    #[serde(default)]
    pub egress: Vec<NetworkPolicyRule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PolicyType {
    Ingress,
    Egress,
}

/// A single ingress or egress rule: the peers it allows and the ports it
/// allows them on. An empty port list allows all ports and protocols.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkPolicyRule {
    #[serde(default)]
    pub peers: Vec<NetworkPolicyPeer>,
    #[serde(default)]
    pub ports: Vec<NetworkPolicyPort>,
}

/// One entry of a rule's peer list.
///
/// A peer with neither selector nor IP block set matches nothing. A pod
/// selector without a namespace selector applies within the policy's own
/// namespace only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyPeer {
    pub pod_selector: Option<Selector>,
    pub namespace_selector: Option<Selector>,
    pub ip_block: Option<IpBlock>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IpBlock {
    pub cidr: String,
    #[serde(default)]
    pub except: Vec<String>,
}

/// A rule's port specification. An unset protocol defaults to TCP; an unset
/// port means all ports of the protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkPolicyPort {
    pub protocol: Option<Protocol>,
    pub port: Option<PortRef>,
}

/// A port referenced by number or by container-port name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

// === NetworkPolicySpec ===

impl NetworkPolicySpec {
    /// Whether this policy isolates the workloads it selects for ingress.
    ///
    /// A policy without explicit types always isolates ingress, mirroring the
    /// upstream Kubernetes default.
    pub fn isolates_ingress(&self) -> bool {
        if self.policy_types.is_empty() {
            return true;
        }
        self.policy_types.contains(&PolicyType::Ingress)
    }

    /// Whether this policy isolates the workloads it selects for egress.
    ///
    /// Without explicit types, a policy isolates egress only if it carries an
    /// egress rule list.
    pub fn isolates_egress(&self) -> bool {
        if self.policy_types.is_empty() {
            return !self.egress.is_empty();
        }
        self.policy_types.contains(&PolicyType::Egress)
    }
}
