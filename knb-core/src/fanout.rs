//! Concurrent per-node operations with failure aggregation.
//!
//! One task per node, all joined before the fan-out returns. A failing node
//! never stops the others; its error is logged with the node name and kept in
//! the [`FanOutReport`].

use crate::error::{KnbError, NodeFailure, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a fan-out, keyed by node name.
#[derive(Debug)]
pub struct FanOutReport {
    operation: String,
    succeeded: BTreeSet<String>,
    failures: BTreeMap<String, KnbError>,
}

impl FanOutReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), succeeded: BTreeSet::new(), failures: BTreeMap::new() }
    }

    pub fn record(&mut self, node: String, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                self.failures.remove(&node);
                self.succeeded.insert(node);
            }
            Err(error) => {
                warn!("{} on {} failed: {}", self.operation, node, error);
                self.succeeded.remove(&node);
                self.failures.insert(node, error);
            }
        }
    }

    pub fn succeeded(&self) -> &BTreeSet<String> {
        &self.succeeded
    }

    pub fn failures(&self) -> &BTreeMap<String, KnbError> {
        &self.failures
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Log a one-line summary: info when every node succeeded, warn otherwise.
    pub fn log_summary(&self) {
        if self.is_success() {
            info!("{}: {} node(s) succeeded", self.operation, self.succeeded.len());
        } else {
            warn!(
                "{}: {} of {} node(s) failed: {}",
                self.operation,
                self.failures.len(),
                self.attempted(),
                self.failures.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }

    /// Turn the report into an error if any node failed.
    pub fn into_result(self) -> Result<BTreeSet<String>> {
        if self.failures.is_empty() {
            return Ok(self.succeeded);
        }
        let failures =
            self.failures.into_iter().map(|(node, error)| NodeFailure { node, error }).collect();
        Err(KnbError::NodesFailed { operation: self.operation, failures })
    }
}

/// Run `op` for every node concurrently and collect the outcomes.
///
/// Each task races `op` against `token`; a cancelled node is recorded as
/// [`KnbError::Cancelled`] and its future (with every connection and tunnel
/// it holds) is dropped.
pub async fn fan_out<I, F, Fut>(
    operation: &str,
    nodes: I,
    token: &CancellationToken,
    op: F,
) -> FanOutReport
where
    I: IntoIterator<Item = String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();

    for node in nodes {
        let fut = op(node.clone());
        let token = token.clone();
        let handle = tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Err(KnbError::Cancelled),
                outcome = fut => outcome,
            }
        });
        names.insert(handle.id(), node);
    }

    let mut report = FanOutReport::new(operation);
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                if let Some(node) = names.remove(&id) {
                    report.record(node, outcome);
                }
            }
            Err(e) => {
                if let Some(node) = names.remove(&e.id()) {
                    report.record(node, Err(anyhow::anyhow!("task failed: {}", e).into()));
                }
            }
        }
    }
    report
}
