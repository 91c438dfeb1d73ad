//! Resolution of a node name into the endpoint of its monitor.

use crate::cluster::ClusterState;
use crate::error::{KnbError, Result};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, instrument};

/// Local address tunnels listen on.
pub const TUNNEL_HOST: &str = "127.0.0.1";

/// How the controller reaches monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Connect to `nodeIP:port` (monitors use the host network).
    Direct,
    /// Tunnel through a port-forward to the node's monitor pod.
    PortForward,
}

/// Network endpoint of a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for MonitorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// An endpoint plus the tunnel kept open for it, if any.
///
/// Dropping the value closes the tunnel.
pub struct ResolvedEndpoint {
    pub endpoint: MonitorEndpoint,
    pub(crate) tunnel: Option<DropGuard>,
}

impl ResolvedEndpoint {
    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }
}

/// Resolves node names into monitor endpoints.
#[derive(Clone)]
pub struct AddressResolver {
    cluster: Arc<dyn ClusterState>,
    connectivity: Connectivity,
    monitor_port: u16,
    monitor_selector: String,
}

impl AddressResolver {
    pub fn new(
        cluster: Arc<dyn ClusterState>,
        connectivity: Connectivity,
        monitor_port: u16,
        monitor_selector: impl Into<String>,
    ) -> Self {
        Self { cluster, connectivity, monitor_port, monitor_selector: monitor_selector.into() }
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// Resolve the monitor endpoint of `node`.
    ///
    /// In port-forward mode the tunnel is bound to a child of `token`: it
    /// closes when `token` is cancelled or when the returned value is dropped,
    /// whichever happens first.
    #[instrument(skip(self, token))]
    pub async fn resolve(
        &self,
        node: &str,
        token: &CancellationToken,
    ) -> Result<ResolvedEndpoint> {
        match self.connectivity {
            Connectivity::Direct => {
                let ip = self.cluster.node_ip(node).await?;
                debug!("monitor of {} at {}:{}", node, ip, self.monitor_port);
                Ok(ResolvedEndpoint {
                    endpoint: MonitorEndpoint { host: ip, port: self.monitor_port },
                    tunnel: None,
                })
            }
            Connectivity::PortForward => {
                let pod = self.cluster.pod_for_node(node, &self.monitor_selector).await?;

                let tunnel = token.child_token();
                let guard = tunnel.clone().drop_guard();
                let local_port = self
                    .cluster
                    .port_forward(tunnel, &pod, self.monitor_port)
                    .await
                    .map_err(|e| match e {
                        KnbError::Resolution { .. } | KnbError::Cancelled => e,
                        other => KnbError::resolution(node, other),
                    })?;
                debug!("monitor of {} tunneled through {}:{}", node, TUNNEL_HOST, local_port);

                Ok(ResolvedEndpoint {
                    endpoint: MonitorEndpoint { host: TUNNEL_HOST.to_string(), port: local_port },
                    tunnel: Some(guard),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{NodeAddr, PodRef};
    use crate::error::KnbError;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StaticCluster {
        ips: HashMap<String, String>,
        pods: HashMap<String, String>,
        tunnels: Mutex<Vec<CancellationToken>>,
        refuse_tunnels: bool,
    }

    #[async_trait]
    impl ClusterState for StaticCluster {
        async fn node_ip(&self, node: &str) -> Result<String> {
            self.ips.get(node).cloned().ok_or_else(|| KnbError::resolution(node, "no such node"))
        }

        async fn pod_for_node(&self, node: &str, _selector: &str) -> Result<PodRef> {
            self.pods
                .get(node)
                .map(|name| PodRef { namespace: "default".to_string(), name: name.clone() })
                .ok_or_else(|| KnbError::resolution(node, "no monitor pod"))
        }

        async fn port_forward(
            &self,
            token: CancellationToken,
            _pod: &PodRef,
            _remote_port: u16,
        ) -> Result<u16> {
            if self.refuse_tunnels {
                return Err(KnbError::Cluster("pods/portforward is forbidden".to_string()));
            }
            let mut tunnels = self.tunnels.lock().unwrap();
            tunnels.push(token);
            Ok(40000 + tunnels.len() as u16)
        }

        async fn session_nodes(&self, _selector: &str) -> Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }

        async fn nodes_and_ips(&self) -> Result<Vec<NodeAddr>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_endpoint_display() {
        let v4 = MonitorEndpoint { host: "10.0.0.5".to_string(), port: 8451 };
        let v6 = MonitorEndpoint { host: "fd00::5".to_string(), port: 8451 };
        let name = MonitorEndpoint { host: "localhost".to_string(), port: 40001 };
        assert_eq!(v4.to_string(), "10.0.0.5:8451");
        assert_eq!(v6.to_string(), "[fd00::5]:8451");
        assert_eq!(name.to_string(), "localhost:40001");
    }

    #[tokio::test]
    async fn test_direct_pairs_node_ip_with_monitor_port() {
        let mut cluster = StaticCluster::default();
        cluster.ips.insert("node-a".to_string(), "10.0.0.5".to_string());
        let resolver =
            AddressResolver::new(Arc::new(cluster), Connectivity::Direct, 8451, "role=monitor");

        let resolved = resolver.resolve("node-a", &CancellationToken::new()).await.unwrap();
        assert_eq!(resolved.endpoint.to_string(), "10.0.0.5:8451");
        assert!(!resolved.is_tunneled());
    }

    #[tokio::test]
    async fn test_direct_unknown_node() {
        let resolver = AddressResolver::new(
            Arc::new(StaticCluster::default()),
            Connectivity::Direct,
            8451,
            "role=monitor",
        );

        let err = resolver.resolve("node-x", &CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, KnbError::Resolution { ref node, .. } if node == "node-x"));
    }

    #[tokio::test]
    async fn test_tunnel_without_monitor_pod() {
        let cluster = Arc::new(StaticCluster::default());
        let resolver =
            AddressResolver::new(cluster.clone(), Connectivity::PortForward, 8451, "role=monitor");

        let err = resolver.resolve("node-x", &CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, KnbError::Resolution { ref node, .. } if node == "node-x"));
        assert!(cluster.tunnels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_tunnel_is_a_resolution_failure() {
        let mut cluster = StaticCluster { refuse_tunnels: true, ..Default::default() };
        cluster.pods.insert("node-a".to_string(), "knb-monitor-abcde".to_string());
        let resolver = AddressResolver::new(
            Arc::new(cluster),
            Connectivity::PortForward,
            8451,
            "role=monitor",
        );

        let err = resolver.resolve("node-a", &CancellationToken::new()).await.err().unwrap();
        match err {
            KnbError::Resolution { node, reason } => {
                assert_eq!(node, "node-a");
                assert!(reason.contains("forbidden"), "unexpected reason: {}", reason);
            }
            other => panic!("expected Resolution error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tunnel_closes_on_drop() {
        let mut cluster = StaticCluster::default();
        cluster.pods.insert("node-a".to_string(), "knb-monitor-abcde".to_string());
        let cluster = Arc::new(cluster);
        let resolver =
            AddressResolver::new(cluster.clone(), Connectivity::PortForward, 8451, "role=monitor");
        let token = CancellationToken::new();

        let resolved = resolver.resolve("node-a", &token).await.unwrap();
        assert_eq!(resolved.endpoint.to_string(), "127.0.0.1:40001");
        assert!(resolved.is_tunneled());

        let tunnel = cluster.tunnels.lock().unwrap()[0].clone();
        assert!(!tunnel.is_cancelled());
        drop(resolved);
        assert!(tunnel.is_cancelled());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_tunnel_closes_with_parent() {
        let mut cluster = StaticCluster::default();
        cluster.pods.insert("node-a".to_string(), "knb-monitor-abcde".to_string());
        let cluster = Arc::new(cluster);
        let resolver =
            AddressResolver::new(cluster.clone(), Connectivity::PortForward, 8451, "role=monitor");
        let token = CancellationToken::new();

        let _resolved = resolver.resolve("node-a", &token).await.unwrap();
        token.cancel();
        assert!(cluster.tunnels.lock().unwrap()[0].is_cancelled());
    }
}
