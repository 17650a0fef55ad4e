use crate::{labels::Labels, ports::Protocol};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// The identity of the singleton vertex representing all traffic outside the
/// cluster that is not covered by a named external source.
pub const INTERNET_ID: &str = "internet";

/// A deployment observed in the cluster, reduced to what policy evaluation
/// needs: identity, namespace, pod labels, and the container ports it exposes.
#[derive(Clone, Debug, Default)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub namespace_id: String,
    pub pod_labels: Labels,
    pub ports: Vec<ContainerPort>,
}

/// A container port, optionally named so policies can reference it by name.
#[derive(Clone, Debug)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub protocol: Protocol,
    pub port: u16,
}

#[derive(Clone, Debug, Default)]
pub struct NamespaceMetadata {
    pub id: String,
    pub name: String,
    pub labels: Labels,
}

/// A named CIDR-backed entity representing a network outside the cluster.
#[derive(Clone, Debug)]
pub struct ExternalSource {
    pub id: String,
    pub name: String,
    pub cidr: IpNet,
}

/// The entity descriptor attached to a serialized graph node.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum NetworkEntity {
    Deployment {
        id: String,
        name: String,
        namespace: String,
    },
    ExternalSource {
        id: String,
        name: String,
        cidr: IpNet,
    },
    Internet,
}

// === NetworkEntity ===

impl NetworkEntity {
    pub fn id(&self) -> &str {
        match self {
            Self::Deployment { id, .. } => id,
            Self::ExternalSource { id, .. } => id,
            Self::Internet => INTERNET_ID,
        }
    }

    pub fn is_deployment(&self) -> bool {
        matches!(self, Self::Deployment { .. })
    }
}
