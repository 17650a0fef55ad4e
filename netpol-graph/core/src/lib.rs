//! Domain model for the network policy graph engine.
//!
//! This crate holds the plain-data types the engine consumes (deployments,
//! namespaces, network policies, external sources), the label selector
//! machinery, and the port algebra that edge computation is built on. It has
//! no knowledge of graph construction itself.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod policy;
pub mod ports;
pub mod workload;

pub use self::{
    labels::{CompiledSelector, Labels, Selector},
    policy::{
        IpBlock, NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicyRule,
        NetworkPolicySpec, PolicyType, PortRef,
    },
    ports::{intersect_normalized, PortDesc, PortSet, Protocol},
    workload::{
        ContainerPort, Deployment, ExternalSource, NamespaceMetadata, NetworkEntity, INTERNET_ID,
    },
};
pub use ipnet::IpNet;
