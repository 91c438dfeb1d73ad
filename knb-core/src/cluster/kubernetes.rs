//! `ClusterState` backed by the Kubernetes API server.

use super::{ClusterState, NodeAddr, PodRef};
use crate::error::{KnbError, Result};
use crate::resolver::TUNNEL_HOST;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, Portforwarder};
use kube::Client;
use std::collections::BTreeSet;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Kubernetes implementation of [`ClusterState`].
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Connect using the ambient kubeconfig or in-cluster configuration.
    pub async fn connect(namespace: &str) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: Client, namespace: &str) -> Self {
        Self { client, namespace: namespace.to_string() }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Pick the address a monitor listening on the host network is reachable at.
fn node_internal_ip(node: &Node) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    addresses
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .or_else(|| addresses.iter().find(|a| a.type_ == "ExternalIP"))
        .map(|a| a.address.clone())
}

#[async_trait]
impl ClusterState for KubeCluster {
    #[instrument(skip(self))]
    async fn node_ip(&self, node: &str) -> Result<String> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let obj = nodes.get(node).await.map_err(|e| KnbError::resolution(node, e))?;
        node_internal_ip(&obj)
            .ok_or_else(|| KnbError::resolution(node, "node reports no IP address"))
    }

    #[instrument(skip(self))]
    async fn pod_for_node(&self, node: &str, selector: &str) -> Result<PodRef> {
        let lp = ListParams::default().labels(selector).fields(&format!("spec.nodeName={}", node));
        let pods = self.pods().list(&lp).await.map_err(|e| KnbError::resolution(node, e))?;

        pods.items
            .into_iter()
            .find_map(|pod| pod.metadata.name)
            .map(|name| PodRef { namespace: self.namespace.clone(), name })
            .ok_or_else(|| {
                KnbError::resolution(node, format!("no pod matching '{}' on node", selector))
            })
    }

    #[instrument(skip(self, token), fields(pod = %pod.name))]
    async fn port_forward(
        &self,
        token: CancellationToken,
        pod: &PodRef,
        remote_port: u16,
    ) -> Result<u16> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);

        // Established up front: a pod refusing port-forwarding fails here.
        let first = pods.portforward(&pod.name, &[remote_port]).await.map_err(|e| {
            KnbError::Cluster(format!("port-forward to pod {} failed: {}", pod.name, e))
        })?;

        let bind_err = |e: std::io::Error| {
            KnbError::Cluster(format!("failed to bind tunnel for pod {}: {}", pod.name, e))
        };
        let listener = TcpListener::bind((TUNNEL_HOST, 0)).await.map_err(bind_err)?;
        let local_port = listener.local_addr().map_err(bind_err)?.port();

        info!("Forwarding {}:{} -> {}:{}", TUNNEL_HOST, local_port, pod.name, remote_port);

        let pod_name = pod.name.clone();
        tokio::spawn(async move {
            let mut ready = Some(first);
            loop {
                let accepted = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((client, peer)) => {
                        debug!("tunnel to {}: accepted connection from {}", pod_name, peer);
                        tokio::spawn(forward_connection(
                            pods.clone(),
                            pod_name.clone(),
                            remote_port,
                            ready.take(),
                            client,
                            token.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("tunnel to {}: accept error: {}", pod_name, e);
                        break;
                    }
                }
            }
            debug!("tunnel {}:{} -> {} closed", TUNNEL_HOST, local_port, pod_name);
        });

        Ok(local_port)
    }

    #[instrument(skip(self))]
    async fn session_nodes(&self, selector: &str) -> Result<BTreeSet<String>> {
        let pods = self.pods().list(&ListParams::default().labels(selector)).await?;

        let mut nodes = BTreeSet::new();
        for pod in pods.items {
            let name = pod.metadata.name.unwrap_or_default();
            let phase = pod.status.and_then(|s| s.phase).unwrap_or_default();
            match pod.spec.and_then(|s| s.node_name) {
                Some(node) => {
                    debug!(" pod {} on {} ({})", name, node, phase);
                    nodes.insert(node);
                }
                None => debug!(" pod {} not scheduled yet ({})", name, phase),
            }
        }
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn nodes_and_ips(&self) -> Result<Vec<NodeAddr>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        Ok(list
            .items
            .iter()
            .map(|node| {
                let name = node.metadata.name.clone().unwrap_or_default();
                let ip = node_internal_ip(node);
                if ip.is_none() {
                    warn!("node {} reports no IP address", name);
                }
                NodeAddr { name, ip }
            })
            .collect())
    }
}

/// Relay one local connection through a pod port-forward.
///
/// `ready` is a forwarder opened beforehand; without one a new port-forward
/// is requested.
async fn forward_connection(
    pods: Api<Pod>,
    pod_name: String,
    remote_port: u16,
    ready: Option<Portforwarder>,
    mut client: TcpStream,
    token: CancellationToken,
) {
    let mut forwarder = match ready {
        Some(f) => f,
        None => match pods.portforward(&pod_name, &[remote_port]).await {
            Ok(f) => f,
            Err(e) => {
                warn!("tunnel to {}: port-forward failed: {}", pod_name, e);
                return;
            }
        },
    };
    let Some(mut upstream) = forwarder.take_stream(remote_port) else {
        warn!("tunnel to {}: no stream for port {}", pod_name, remote_port);
        return;
    };

    tokio::select! {
        _ = token.cancelled() => {}
        relayed = tokio::io::copy_bidirectional(&mut client, &mut upstream) => {
            if let Err(e) = relayed {
                debug!("tunnel to {}: relay ended: {}", pod_name, e);
            }
        }
    }

    drop(upstream);
    if let Err(e) = forwarder.join().await {
        debug!("tunnel to {}: port-forward teardown: {}", pod_name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn node_with(addresses: &[(&str, &str)]) -> Node {
        Node {
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(t, a)| NodeAddress { type_: t.to_string(), address: a.to_string() })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_internal_ip() {
        let node = node_with(&[
            ("Hostname", "n1"),
            ("ExternalIP", "1.2.3.4"),
            ("InternalIP", "10.0.0.5"),
        ]);
        assert_eq!(node_internal_ip(&node).as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_falls_back_to_external_ip() {
        let node = node_with(&[("Hostname", "n1"), ("ExternalIP", "1.2.3.4")]);
        assert_eq!(node_internal_ip(&node).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_no_addresses() {
        assert_eq!(node_internal_ip(&Node::default()), None);
        assert_eq!(node_internal_ip(&node_with(&[("Hostname", "n1")])), None);
    }

    const NODE_LIST: &str = r#"{
        "apiVersion": "v1",
        "kind": "NodeList",
        "metadata": {},
        "items": [
            {"apiVersion": "v1", "kind": "Node", "metadata": {"name": "node-a"},
             "status": {"addresses": [{"type": "InternalIP", "address": "10.0.0.1"}]}},
            {"apiVersion": "v1", "kind": "Node", "metadata": {"name": "node-b"},
             "status": {}},
            {"apiVersion": "v1", "kind": "Node", "metadata": {"name": "node-c"},
             "status": {"addresses": [{"type": "ExternalIP", "address": "1.2.3.4"}]}}
        ]
    }"#;

    const FORBIDDEN: &str = r#"{
        "apiVersion": "v1",
        "kind": "Status",
        "metadata": {},
        "status": "Failure",
        "message": "pods/portforward is forbidden",
        "reason": "Forbidden",
        "code": 403
    }"#;

    /// Minimal API server: serves the node list and answers everything else,
    /// port-forward upgrades included, with 403 Forbidden.
    async fn fake_api_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&request);
                    let path = head.split_whitespace().nth(1).unwrap_or("");
                    let (status, body) = if path.starts_with("/api/v1/nodes") {
                        ("200 OK", NODE_LIST)
                    } else {
                        ("403 Forbidden", FORBIDDEN)
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        addr
    }

    fn cluster_at(addr: SocketAddr) -> KubeCluster {
        let config = kube::Config::new(format!("http://{}", addr).parse().unwrap());
        KubeCluster::new(Client::try_from(config).unwrap(), "default")
    }

    #[tokio::test]
    async fn test_port_forward_refused_by_api_server() {
        let cluster = cluster_at(fake_api_server().await);
        let pod = PodRef { namespace: "default".to_string(), name: "knb-monitor-x1".to_string() };

        let err = cluster.port_forward(CancellationToken::new(), &pod, 8451).await.unwrap_err();
        match err {
            KnbError::Cluster(reason) => {
                assert!(reason.contains("knb-monitor-x1"), "unexpected reason: {}", reason)
            }
            other => panic!("expected Cluster error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nodes_without_address_are_still_listed() {
        let cluster = cluster_at(fake_api_server().await);

        let nodes = cluster.nodes_and_ips().await.unwrap();
        let listed: Vec<(&str, Option<&str>)> =
            nodes.iter().map(|n| (n.name.as_str(), n.ip.as_deref())).collect();
        assert_eq!(
            listed,
            vec![
                ("node-a", Some("10.0.0.1")),
                ("node-b", None),
                ("node-c", Some("1.2.3.4")),
            ]
        );
    }
}
