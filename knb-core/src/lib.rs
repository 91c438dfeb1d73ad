//! kubenetbench core library
//!
//! Coordination of the per-node monitor agents during a benchmark session:
//! address resolution, connections, fan-out of monitor calls, retries and
//! streamed retrieval of the collected files.

pub mod cluster;
pub mod collection;
pub mod config;
pub mod connector;
pub mod error;
pub mod fanout;
pub mod observability;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod sysinfo;
pub mod transfer;

// Re-export commonly used items
pub use cluster::{ClusterState, KubeCluster, NodeAddr, PodRef};
pub use collection::{CollectionRun, Collector};
pub use config::Config;
pub use connector::{MonitorConnection, Monitors};
pub use error::{KnbError, Result};
pub use fanout::FanOutReport;
pub use observability::{init as init_observability, LogDestination};
pub use resolver::{AddressResolver, Connectivity, MonitorEndpoint};
pub use retry::RetryPolicy;
pub use session::Session;
pub use sysinfo::SysInfoCollector;
pub use transfer::copy_stream_to_file;

use std::sync::Arc;

/// Build the monitor connector for a session on top of `cluster`.
pub fn monitors_for(session: &Session, cluster: Arc<dyn ClusterState>) -> Monitors {
    let config = session.config();
    Monitors::new(AddressResolver::new(
        cluster,
        session.connectivity(),
        config.monitor_port,
        config.monitor_selector.clone(),
    ))
}
