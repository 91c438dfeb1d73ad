//! gRPC connections to node monitors.

use crate::error::{KnbError, Result};
use crate::observability::metrics;
use crate::resolver::{AddressResolver, ResolvedEndpoint};
use knb_api::monitor::kubebench_monitor_client::KubebenchMonitorClient;
use knb_api::monitor::{CollectionConf, CollectionResultsConf, Empty, File as FileChunk};
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;
use tracing::{debug, instrument};

/// A live channel to one node's monitor.
///
/// Owned by the operation that dialed it. Dropping it (or calling
/// [`close`](Self::close)) tears down the channel and then the tunnel it was
/// reached through.
pub struct MonitorConnection {
    node: String,
    client: KubebenchMonitorClient<Channel>,
    // Declared after `client` so the channel goes away before the tunnel.
    _tunnel: Option<DropGuard>,
}

impl MonitorConnection {
    /// Ask the monitor to stream its system information.
    pub async fn get_sys_info(&mut self) -> Result<Streaming<FileChunk>> {
        let result = self.client.get_sys_info(Empty {}).await;
        self.finish("GetSysInfo", result).map(|r| r.into_inner())
    }

    /// Ask the monitor to start collecting for `collection_id`.
    pub async fn start_collection(&mut self, duration: &str, collection_id: &str) -> Result<()> {
        let request = tonic::Request::new(CollectionConf {
            duration: duration.to_string(),
            collection_id: collection_id.to_string(),
        });
        let result = self.client.start_collection(request).await;
        self.finish("StartCollection", result).map(|_| ())
    }

    /// Stop `collection_id` and stream back its results.
    pub async fn get_collection_results(
        &mut self,
        collection_id: &str,
    ) -> Result<Streaming<FileChunk>> {
        let request =
            tonic::Request::new(CollectionResultsConf { collection_id: collection_id.to_string() });
        let result = self.client.get_collection_results(request).await;
        self.finish("GetCollectionResults", result).map(|r| r.into_inner())
    }

    /// Release the connection.
    pub fn close(self) {
        debug!("closing connection to monitor {}", self.node);
    }

    fn finish<T>(
        &self,
        call: &'static str,
        result: std::result::Result<tonic::Response<T>, tonic::Status>,
    ) -> Result<tonic::Response<T>> {
        metrics::record_monitor_call(call, result.is_ok());
        result.map_err(|status| KnbError::RemoteCall {
            node: self.node.clone(),
            call,
            source: status,
        })
    }
}

/// Dial the monitor behind an already resolved endpoint.
///
/// The connection takes over the endpoint's tunnel. Cancelling `token` while
/// the dial is in flight aborts it and releases the tunnel.
pub async fn connect(
    node: &str,
    resolved: ResolvedEndpoint,
    token: &CancellationToken,
) -> Result<MonitorConnection> {
    let ResolvedEndpoint { endpoint, tunnel } = resolved;
    let address = endpoint.to_string();

    let channel = Endpoint::from_shared(format!("http://{}", address))
        .map_err(|e| KnbError::Connect { endpoint: address.clone(), source: e })?;
    let channel = tokio::select! {
        _ = token.cancelled() => return Err(KnbError::Cancelled),
        channel = channel.connect() => {
            channel.map_err(|e| KnbError::Connect { endpoint: address.clone(), source: e })?
        }
    };

    debug!("connected to monitor {} at {}", node, address);
    Ok(MonitorConnection {
        node: node.to_string(),
        client: KubebenchMonitorClient::new(channel),
        _tunnel: tunnel,
    })
}

/// Resolver and connector combined: node name in, monitor connection out.
#[derive(Clone)]
pub struct Monitors {
    resolver: AddressResolver,
}

impl Monitors {
    pub fn new(resolver: AddressResolver) -> Self {
        Self { resolver }
    }

    /// Resolve and connect to the monitor of `node`.
    #[instrument(skip(self, token))]
    pub async fn dial(&self, node: &str, token: &CancellationToken) -> Result<MonitorConnection> {
        let resolved = tokio::select! {
            _ = token.cancelled() => return Err(KnbError::Cancelled),
            resolved = self.resolver.resolve(node, token) => match resolved {
                Ok(resolved) => resolved,
                Err(e @ (KnbError::Resolution { .. } | KnbError::Cancelled)) => return Err(e),
                Err(e) => return Err(KnbError::resolution(node, e)),
            },
        };
        connect(node, resolved, token).await
    }
}
