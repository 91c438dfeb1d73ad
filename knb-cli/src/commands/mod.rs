//! CLI command implementations

pub mod collect;
pub mod init;
pub mod monitor;
pub mod nodes;
pub mod sysinfo;

pub use collect::collect;
pub use init::init;
pub use monitor::monitor;
pub use nodes::nodes;
pub use sysinfo::sysinfo;

use crate::GlobalArgs;
use anyhow::{Context, Result};
use knb_core::{ClusterState, KubeCluster, LogDestination, Session};
use std::sync::Arc;
use tracing::info;

/// Open the session named on the command line and start its log.
pub(crate) fn open_session(global: &GlobalArgs) -> Result<Session> {
    let id = global
        .session_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .context("a session id is required (--session-id)")?;
    let session = Session::open(id, &global.session_base_dir)
        .with_context(|| format!("Failed to open session {}", id))?
        .with_connectivity(global.connectivity());
    start_logging(&session, global.quiet)?;
    Ok(session)
}

/// Route logs to the session log (and stdout unless quiet); the command line
/// is the first record.
pub(crate) fn start_logging(session: &Session, quiet: bool) -> Result<()> {
    let log_file = session.open_log()?;
    knb_core::init_observability(LogDestination::from_quiet(quiet), log_file)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let argv: Vec<String> = std::env::args().collect();
    info!("****** {}", argv.join(" "));
    Ok(())
}

pub(crate) async fn connect_cluster(session: &Session) -> Result<Arc<dyn ClusterState>> {
    let namespace = &session.config().namespace;
    let cluster = KubeCluster::connect(namespace)
        .await
        .with_context(|| "Failed to connect to the Kubernetes cluster")?;
    Ok(Arc::new(cluster))
}
