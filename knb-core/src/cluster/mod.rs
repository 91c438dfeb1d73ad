//! Cluster state queries.
//!
//! The coordination pipeline only needs a handful of facts about the cluster
//! (node addresses, where the monitor pods run, which nodes host a session)
//! plus the ability to tunnel into a pod. They are gathered behind the
//! `ClusterState` trait:
//! - `KubeCluster`: talks to the Kubernetes API server (kube-rs)
//! - test doubles: in-memory tables

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

pub mod kubernetes;

pub use kubernetes::KubeCluster;

/// Reference to a pod scheduled on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

/// A node together with the IP the cluster reports for it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub name: String,
    pub ip: Option<String>,
}

/// Cluster state trait.
///
/// Every method may suspend on the network. Errors are reported as
/// `KnbError::Cluster` (or `KnbError::Resolution` where a single node is
/// concerned) and never retried here.
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// IP address of a node, as reported by the cluster.
    async fn node_ip(&self, node: &str) -> Result<String>;

    /// A pod matching `selector` scheduled on `node`.
    async fn pod_for_node(&self, node: &str, selector: &str) -> Result<PodRef>;

    /// Open a tunnel from a local port to `remote_port` of `pod`.
    ///
    /// Returns the local port once the tunnel is established; a tunnel that
    /// cannot be opened is an error here, not on first use. The tunnel stays
    /// open until `token` is cancelled.
    async fn port_forward(
        &self,
        token: CancellationToken,
        pod: &PodRef,
        remote_port: u16,
    ) -> Result<u16>;

    /// Distinct names of the nodes hosting pods that match `selector`.
    async fn session_nodes(&self, selector: &str) -> Result<BTreeSet<String>>;

    /// Every node of the cluster with its address.
    ///
    /// A node without an address is still listed; reaching it is left to the
    /// per-node resolution.
    async fn nodes_and_ips(&self) -> Result<Vec<NodeAddr>>;
}
