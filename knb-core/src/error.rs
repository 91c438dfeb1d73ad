//! Error types for kubenetbench.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kubenetbench operations.
pub type Result<T> = std::result::Result<T, KnbError>;

/// Main error type for kubenetbench.
#[derive(Error, Debug)]
pub enum KnbError {
    // Monitor errors
    #[error("Failed to obtain monitor address of node {node}: {reason}")]
    Resolution { node: String, reason: String },

    #[error("Failed to connect to monitor {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("{call} on monitor {node} failed: {source}")]
    RemoteCall {
        node: String,
        call: &'static str,
        #[source]
        source: tonic::Status,
    },

    #[error("Writing data to {path:?} failed: {source}")]
    Transfer {
        path: PathBuf,
        #[source]
        source: TransferCause,
    },

    #[error("{operation} on {node} failed after {attempts} attempts (last error: {source})")]
    RetryExhausted {
        operation: String,
        node: String,
        attempts: u32,
        #[source]
        source: Box<KnbError>,
    },

    #[error("{operation} failed on {} node(s):{}", .failures.len(), NodeFailure::list(.failures))]
    NodesFailed { operation: String, failures: Vec<NodeFailure> },

    #[error("Operation cancelled")]
    Cancelled,

    // Cluster errors
    #[error("Cluster query failed: {0}")]
    Cluster(String),

    // Session errors
    #[error("Session error: {reason}")]
    Session { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to render manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KnbError {
    /// Create a resolution error for a node.
    pub fn resolution(node: &str, reason: impl fmt::Display) -> Self {
        Self::Resolution { node: node.to_string(), reason: reason.to_string() }
    }
}

impl From<kube::Error> for KnbError {
    fn from(err: kube::Error) -> Self {
        Self::Cluster(err.to_string())
    }
}

/// Underlying cause of a failed stream transfer.
#[derive(Error, Debug)]
pub enum TransferCause {
    #[error("io error: {0}")]
    Receive(#[from] tonic::Status),

    #[error("{0}")]
    Write(#[from] std::io::Error),
}

/// A failure recorded for a single node during a fan-out.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub error: KnbError,
}

impl NodeFailure {
    fn list(failures: &[NodeFailure]) -> String {
        failures.iter().map(|f| format!("\n  {}: {}", f.node, f.error)).collect()
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}
