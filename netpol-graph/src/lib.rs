//! Network policy graph evaluation engine.
//!
//! Given the deployments, namespaces, and `NetworkPolicy` objects observed in
//! a cluster, this crate computes a directed connectivity graph: for every
//! ordered pair of workloads (and the special INTERNET sink), whether traffic
//! is permitted, on which ports and protocols, and whether each workload is
//! isolated for ingress or egress at all.
//!
//! The computation follows Kubernetes NetworkPolicy semantics:
//!
//! - A workload is open by default and becomes isolated in a direction once a
//!   policy of that direction type selects it.
//! - Each policy's pod selector applies within its own namespace; rule peers
//!   resolve via pod selectors, namespace selectors, or IPBlocks.
//! - Ports are unioned across the rules of a policy but intersected across
//!   the egress and ingress sides of a connection when both endpoints are
//!   isolated.
//!
//! ```text
//! (deployments, namespaces, policies) -> builder -> evaluator -> NetworkGraph
//!                              (NetworkGraph, NetworkGraph) -> compute_diff
//! ```
//!
//! Graph construction is a pure, CPU-bound pass over one input snapshot; it
//! performs no I/O and retains no state across calls beyond the per-cluster
//! epoch counter.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod builder;
mod extsrc;
mod node;

pub mod diff;
pub mod evaluator;
pub mod graph;


pub use self::{
    diff::{compute_diff, DiffError, GraphDelta, NodeDelta},
    evaluator::{Evaluator, NamespaceSource},
    graph::{EdgeProperties, NetworkGraph, NetworkNode},
};
pub use netpol_graph_core::{
    ContainerPort, Deployment, ExternalSource, IpBlock, IpNet, Labels, NamespaceMetadata,
    NetworkEntity, NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicyRule,
    NetworkPolicySpec, PolicyType, PortDesc, PortRef, PortSet, Protocol, Selector, INTERNET_ID,
};
