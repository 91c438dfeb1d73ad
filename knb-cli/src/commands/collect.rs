//! `kubenetbench collect` command

use super::{connect_cluster, open_session};
use crate::signal::cancel_on_signal;
use crate::GlobalArgs;
use anyhow::{bail, Result};
use colored::Colorize;
use knb_core::{monitors_for, Collector};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Start a collection on the session's nodes, wait, then retrieve the results.
///
/// Ctrl+C while waiting ends the wait early; Ctrl+C while starting or
/// retrieving cancels the nodes still in flight.
pub async fn collect(
    global: &GlobalArgs,
    run_id: &str,
    duration: Option<u32>,
    wait: Option<u64>,
) -> Result<()> {
    let session = Arc::new(open_session(global)?);
    let cluster = connect_cluster(&session).await?;
    let monitors = monitors_for(&session, cluster.clone());

    let mut collector = Collector::new(session.clone(), cluster, monitors);
    if let Some(secs) = duration {
        collector = collector.with_duration(secs);
    }
    let duration = duration.unwrap_or(session.config().collection_duration_secs);
    let wait = Duration::from_secs(wait.unwrap_or(u64::from(duration)));

    let start_token = CancellationToken::new();
    let start_signal = cancel_on_signal(start_token.clone());
    let run = collector.start_collection(run_id, &start_token).await?;

    if run.participants().is_empty() {
        bail!("No monitor acknowledged collection {}", run_id);
    }
    println!(
        "Collecting on {} node(s), results in {}",
        run.participants().len(),
        run.run_dir().display()
    );

    info!("Waiting {:?} before retrieving results", wait);
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = start_token.cancelled() => {
            info!("Interrupted, retrieving results now");
        }
    }
    drop(start_signal);

    let end_token = CancellationToken::new();
    let _end_signal = cancel_on_signal(end_token.clone());
    let report = collector.end_collection(run, &end_token).await;

    if end_token.is_cancelled() {
        bail!("Collection {} interrupted during retrieval", run_id);
    }
    if !report.is_success() {
        warn!("Some results of collection {} are missing", run_id);
        for (node, error) in report.failures() {
            eprintln!("{} {}: {}", "warning:".yellow(), node, error);
        }
    }
    println!("Retrieved results from {} node(s)", report.succeeded().len());

    Ok(())
}
