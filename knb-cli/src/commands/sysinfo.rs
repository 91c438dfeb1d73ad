//! `kubenetbench sysinfo` command

use super::{connect_cluster, open_session};
use crate::signal::cancel_on_signal;
use crate::GlobalArgs;
use anyhow::{Context, Result};
use knb_core::{monitors_for, SysInfoCollector};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Retrieve `<node>.sysinfo` from every node's monitor.
///
/// Fails if any node could not be served after its retries.
pub async fn sysinfo(global: &GlobalArgs) -> Result<()> {
    let session = Arc::new(open_session(global)?);
    let cluster = connect_cluster(&session).await?;
    let monitors = monitors_for(&session, cluster.clone());
    let collector = SysInfoCollector::new(session.clone(), cluster, monitors);

    let token = CancellationToken::new();
    let _signal = cancel_on_signal(token.clone());
    collector
        .get_sysinfo_all(&token)
        .await
        .with_context(|| "System information retrieval failed")?;

    println!("System information written to {}", session.dir().display());
    Ok(())
}
