//! Two-phase performance data collection across the session's nodes.
//!
//! ```text
//!   Idle --start_collection()--> Collecting --end_collection()--> Idle
//! ```
//!
//! The Collecting state is the [`CollectionRun`] value itself: it only comes
//! out of [`Collector::start_collection`] and is consumed by
//! [`Collector::end_collection`].

use crate::cluster::ClusterState;
use crate::connector::Monitors;
use crate::error::Result;
use crate::fanout::{fan_out, FanOutReport};
use crate::session::{perf_archive_path, Session};
use crate::transfer::copy_stream_to_file;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// A collection run in progress.
#[derive(Debug)]
pub struct CollectionRun {
    run_id: String,
    run_dir: PathBuf,
    participants: BTreeSet<String>,
    start_report: FanOutReport,
}

impl CollectionRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Nodes whose monitor acknowledged the start request.
    pub fn participants(&self) -> &BTreeSet<String> {
        &self.participants
    }

    /// Per-node outcome of the start phase.
    pub fn start_report(&self) -> &FanOutReport {
        &self.start_report
    }
}

/// Drives collection runs for a session.
#[derive(Clone)]
pub struct Collector {
    session: Arc<Session>,
    cluster: Arc<dyn ClusterState>,
    monitors: Monitors,
    duration_secs: u32,
}

impl Collector {
    pub fn new(session: Arc<Session>, cluster: Arc<dyn ClusterState>, monitors: Monitors) -> Self {
        let duration_secs = session.config().collection_duration_secs;
        Self { session, cluster, monitors, duration_secs }
    }

    /// Override the collection duration sent to the monitors.
    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Ask the monitor of every node hosting session pods to start collecting.
    ///
    /// Fails only if the session's nodes cannot be listed; per-node failures
    /// leave the node out of the run and are kept in its start report.
    #[instrument(skip(self, token))]
    pub async fn start_collection(
        &self,
        run_id: &str,
        token: &CancellationToken,
    ) -> Result<CollectionRun> {
        let run_dir = self.session.run_dir(run_id)?;
        let nodes = self.cluster.session_nodes(&self.session.workload_selector()).await?;
        info!("Starting collection {} on {} node(s)", run_id, nodes.len());

        let duration = self.duration_secs.to_string();
        let start_report = fan_out("StartCollection", nodes, token, |node| {
            let monitors = self.monitors.clone();
            let token = token.clone();
            let duration = duration.clone();
            let run_id = run_id.to_string();
            async move {
                let mut conn = monitors.dial(&node, &token).await?;
                conn.start_collection(&duration, &run_id).await?;
                conn.close();
                info!("started collection on monitor {}", node);
                Ok(())
            }
        })
        .await;
        start_report.log_summary();

        Ok(CollectionRun {
            run_id: run_id.to_string(),
            run_dir,
            participants: start_report.succeeded().clone(),
            start_report,
        })
    }

    /// Stop the run on every participating node and retrieve its archives.
    ///
    /// Each archive is appended to `<run_dir>/perf-<node>.tar.bz2`.
    #[instrument(skip(self, run, token), fields(run_id = %run.run_id))]
    pub async fn end_collection(
        &self,
        run: CollectionRun,
        token: &CancellationToken,
    ) -> FanOutReport {
        let CollectionRun { run_id, run_dir, participants, .. } = run;

        let report = fan_out("GetCollectionResults", participants, token, |node| {
            let monitors = self.monitors.clone();
            let token = token.clone();
            let run_id = run_id.clone();
            let path = perf_archive_path(&run_dir, &node);
            async move {
                let mut conn = monitors.dial(&node, &token).await?;
                let stream = conn.get_collection_results(&run_id).await?;
                let written = copy_stream_to_file(&path, stream).await?;
                conn.close();
                info!("perf data for {} ({} bytes) can be found in: {:?}", node, written, path);
                Ok(())
            }
        })
        .await;
        report.log_summary();
        report
    }
}
