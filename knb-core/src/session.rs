//! Benchmark sessions.
//!
//! A session is a directory holding everything produced for one benchmark
//! campaign: the session log, generated manifests, per-node system
//! information and one sub-directory per collection run.
//!
//! ```text
//! <base>/<id>/
//!   config.json           optional overrides
//!   session.log
//!   monitor.yaml
//!   <node>.sysinfo
//!   <run-id>/perf-<node>.tar.bz2
//! ```

use crate::config::Config;
use crate::error::{KnbError, Result};
use crate::resolver::Connectivity;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, HostPathVolumeSource, PodSpec, PodTemplateSpec,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

const MONITOR_NAME: &str = "knb-monitor";
const MONITOR_IMAGE: &str = "docker.io/cilium/kubenetbench-monitor";

/// Process-wide context of a benchmark session. Read-only once created.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    dir: PathBuf,
    connectivity: Connectivity,
    config: Config,
}

impl Session {
    /// Create a new session directory under `base_dir`.
    ///
    /// An empty `id` gets a generated one. The id must be usable as a
    /// Kubernetes label value. Fails if the directory exists.
    pub fn init(id: &str, base_dir: &Path) -> Result<Self> {
        let id = if id.is_empty() { generate_id() } else { id.to_string() };
        validate_id(&id)?;
        let dir = base_dir.join(&id);
        if dir.exists() {
            return Err(KnbError::Session {
                reason: format!("session directory {:?} already exists", dir),
            });
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| KnbError::IoError { path: dir.clone(), source: e })?;
        info!("Initialized session {} at {:?}", id, dir);

        Ok(Self { id, dir, connectivity: Connectivity::Direct, config: Config::default() })
    }

    /// Open an existing session directory and load its configuration.
    pub fn open(id: &str, base_dir: &Path) -> Result<Self> {
        if id.is_empty() {
            return Err(KnbError::Session { reason: "session id is required".to_string() });
        }
        validate_id(id)?;
        let dir = base_dir.join(id);
        if !dir.is_dir() {
            return Err(KnbError::Session {
                reason: format!("session directory {:?} does not exist (run `init` first)", dir),
            });
        }
        let config = Config::load(&dir)?;

        Ok(Self { id: id.to_string(), dir, connectivity: Connectivity::Direct, config })
    }

    /// Reach monitors through the given connectivity mode.
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The label tagging the session's pods, joined with `sep`.
    pub fn label(&self, sep: &str) -> String {
        format!("{}{}{}", self.config.session_label_key, sep, self.id)
    }

    /// Label selector matching every pod of the session, monitors included.
    pub fn selector(&self) -> String {
        self.label("=")
    }

    /// Label selector matching the session's workload pods.
    ///
    /// The monitor DaemonSet carries the session label too; its pods are
    /// excluded so that only nodes running benchmark pods are selected.
    pub fn workload_selector(&self) -> String {
        match self.config.monitor_label() {
            Some((key, value)) => format!("{},{}!={}", self.selector(), key, value),
            None => self.selector(),
        }
    }

    /// Open the session log for appending.
    pub fn open_log(&self) -> Result<File> {
        let path = self.dir.join("session.log");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| KnbError::IoError { path, source: e })
    }

    /// Directory of a collection run, created if needed.
    ///
    /// The run id must be a single, non-empty path component.
    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty()
            || run_id == "."
            || run_id == ".."
            || run_id.contains(['/', '\\'])
        {
            return Err(KnbError::Session { reason: format!("invalid run id '{}'", run_id) });
        }
        let dir = self.dir.join(run_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| KnbError::IoError { path: dir.clone(), source: e })?;
        Ok(dir)
    }

    /// Where the system information of `node` is written.
    pub fn sysinfo_path(&self, node: &str) -> PathBuf {
        self.dir.join(format!("{}.sysinfo", node))
    }

    /// The monitor DaemonSet: one privileged, host-networked monitor per node,
    /// labelled with the session label and the monitor label.
    pub fn monitor_daemonset(&self) -> Result<DaemonSet> {
        let (role_key, role_value) =
            self.config.monitor_label().ok_or_else(|| KnbError::InvalidConfig {
                reason: format!("invalid monitor_selector '{}'", self.config.monitor_selector),
            })?;
        let labels = BTreeMap::from([
            (self.config.session_label_key.clone(), self.id.clone()),
            (role_key.to_string(), role_value.to_string()),
        ]);
        let port = i32::from(self.config.monitor_port);

        let container = Container {
            name: "kubenetbench-monitor".to_string(),
            image: Some(MONITOR_IMAGE.to_string()),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                capabilities: Some(Capabilities {
                    add: Some(vec!["SYS_ADMIN".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ports: Some(vec![ContainerPort {
                container_port: port,
                host_port: Some(port),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![VolumeMount {
                name: "host".to_string(),
                mount_path: "/host".to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let pod_spec = PodSpec {
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".to_string()),
                ..Default::default()
            }]),
            host_network: Some(true),
            host_pid: Some(true),
            host_ipc: Some(true),
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: "host".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Ok(DaemonSet {
            metadata: ObjectMeta {
                name: Some(MONITOR_NAME.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                    spec: Some(pod_spec),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Write the monitor DaemonSet manifest into the session directory.
    pub fn gen_monitor_yaml(&self) -> Result<PathBuf> {
        let path = self.dir.join("monitor.yaml");
        info!("Generating {:?}", path);

        let yaml = serde_yaml::to_string(&self.monitor_daemonset()?)?;
        std::fs::write(&path, yaml)
            .map_err(|e| KnbError::IoError { path: path.clone(), source: e })?;
        Ok(path)
    }
}

/// Where the collection archive of `node` is written inside a run directory.
pub fn perf_archive_path(run_dir: &Path, node: &str) -> PathBuf {
    run_dir.join(format!("perf-{}.tar.bz2", node))
}

fn generate_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    uuid[..8].to_string()
}

/// Session ids end up as label values: at most 63 characters, alphanumeric
/// at both ends, `-`, `_` and `.` allowed in between.
fn validate_id(id: &str) -> Result<()> {
    let bytes = id.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= 63
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(KnbError::Session {
            reason: format!("session id '{}' is not a valid Kubernetes label value", id),
        })
    }
}
