//! System information retrieval from every node of the cluster.

use crate::cluster::ClusterState;
use crate::connector::Monitors;
use crate::error::Result;
use crate::fanout::fan_out;
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::transfer::copy_stream_to_file;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Collects `<node>.sysinfo` files into the session directory.
#[derive(Clone)]
pub struct SysInfoCollector {
    session: Arc<Session>,
    cluster: Arc<dyn ClusterState>,
    monitors: Monitors,
    retry: RetryPolicy,
}

impl SysInfoCollector {
    pub fn new(session: Arc<Session>, cluster: Arc<dyn ClusterState>, monitors: Monitors) -> Self {
        let retry = session.config().sysinfo_retry.policy();
        Self { session, cluster, monitors, retry }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retrieve the system information of one node (single attempt).
    #[instrument(skip(self, token))]
    pub async fn get_sysinfo_node(&self, node: &str, token: &CancellationToken) -> Result<u64> {
        fetch(&self.monitors, &self.session, node, token).await
    }

    /// Retrieve the system information of every node.
    ///
    /// Each node is retried according to the retry policy. All nodes are
    /// attempted; the permanent failures are returned as one aggregated error.
    #[instrument(skip(self, token))]
    pub async fn get_sysinfo_all(&self, token: &CancellationToken) -> Result<()> {
        let nodes = self.cluster.nodes_and_ips().await?;
        info!("Retrieving system information from {} node(s)", nodes.len());

        let names = nodes.into_iter().map(|n| {
            info!(" node {} ({})", n.name, n.ip.as_deref().unwrap_or("no address"));
            n.name
        });
        let report = fan_out("GetSysInfo", names.collect::<Vec<_>>(), token, |node| {
            let monitors = self.monitors.clone();
            let session = self.session.clone();
            let retry = self.retry;
            let token = token.clone();
            async move {
                retry
                    .run("GetSysInfo", &node, &token, || fetch(&monitors, &session, &node, &token))
                    .await?;
                Ok(())
            }
        })
        .await;
        report.log_summary();
        report.into_result().map(|_| ())
    }
}

async fn fetch(
    monitors: &Monitors,
    session: &Session,
    node: &str,
    token: &CancellationToken,
) -> Result<u64> {
    let mut conn = monitors.dial(node, token).await?;
    let stream = conn.get_sys_info().await?;
    let path = session.sysinfo_path(node);
    let written = copy_stream_to_file(&path, stream).await?;
    conn.close();
    info!("sysinfo for {} ({} bytes) written to {:?}", node, written, path);
    Ok(written)
}
