//! Reconstruction submitted as a Kubernetes Job
//!
//! ```text
//! render manifest → <session>/cluster_job.yaml → kubectl apply -f
//!   every poll interval: get job -o json, then new log lines
//!   Complete → Ok | Failed → JobFailed | deadline → delete job, Timeout
//! ```
//!
//! The shared storage claim is mounted at the same path inside the pod, so
//! the delegate arguments (photo paths, output directory, project file) are
//! passed through unchanged.

use async_trait::async_trait;
use photomesh_storage::SharedStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ClusterJobSettings, PhotomeshConfig};
use crate::delegate::{Delegate, DelegateError, DelegateOutcome, DelegateRequest};
use crate::log::LogSink;
use crate::probe::{ClusterControl, KubectlControl};

pub const MANIFEST_FILE_NAME: &str = "cluster_job.yaml";

const MAX_NAME_LEN: usize = 63;
const CONTAINER_NAME: &str = "reconstruction";
const VOLUME_NAME: &str = "shared-storage";

// ═══════════════════════════════════════════════════════════════════════════
// Manifest
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub backoff_limit: u32,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodTemplate {
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub restart_policy: String,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub persistent_volume_claim: ClaimRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    pub claim_name: String,
}

impl JobManifest {
    pub fn new(
        name: &str,
        namespace: &str,
        settings: &ClusterJobSettings,
        request: &DelegateRequest,
    ) -> Self {
        let labels = BTreeMap::from([
            ("app".to_string(), "photomesh".to_string()),
            ("photomesh/job".to_string(), name.to_string()),
        ]);
        Self {
            api_version: "batch/v1".to_string(),
            kind: "Job".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                labels,
            },
            spec: JobSpec {
                backoff_limit: settings.backoff_limit,
                template: PodTemplate {
                    spec: PodSpec {
                        restart_policy: "Never".to_string(),
                        containers: vec![Container {
                            name: CONTAINER_NAME.to_string(),
                            image: settings.image.clone(),
                            command: settings.command.clone(),
                            args: request.args(),
                            volume_mounts: vec![VolumeMount {
                                name: VOLUME_NAME.to_string(),
                                mount_path: settings.mount_path.display().to_string(),
                            }],
                        }],
                        volumes: vec![Volume {
                            name: VOLUME_NAME.to_string(),
                            persistent_volume_claim: ClaimRef {
                                claim_name: settings.volume_claim.clone(),
                            },
                        }],
                    },
                },
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// DNS-1123 label: `<prefix>-<session>` lowercased, other characters folded to '-'
pub fn job_name(prefix: &str, session_dir: &Path) -> String {
    let session = session_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let raw = if session.is_empty() {
        prefix.to_string()
    } else {
        format!("{}-{}", prefix, session)
    };

    let mut name: String = raw
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => c,
            _ => '-',
        })
        .collect();
    name.truncate(MAX_NAME_LEN);
    name.trim_matches('-').to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// Job status
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
struct JobObject {
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatus {
    #[serde(default)]
    conditions: Vec<JobCondition>,
}

#[derive(Debug, Deserialize)]
struct JobCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Complete,
    Failed(String),
}

impl JobPhase {
    /// Phase from `kubectl get job -o json`
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let job: JobObject = serde_json::from_str(json)?;
        let active = |kind: &str| {
            job.status
                .conditions
                .iter()
                .find(|c| c.kind == kind && c.status == "True")
        };

        if let Some(failed) = active("Failed") {
            return Ok(JobPhase::Failed(
                failed
                    .message
                    .clone()
                    .unwrap_or_else(|| "job reported Failed".to_string()),
            ));
        }
        if active("Complete").is_some() {
            return Ok(JobPhase::Complete);
        }
        Ok(JobPhase::Pending)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Delegate
// ═══════════════════════════════════════════════════════════════════════════

pub struct ClusterJobDelegate {
    control: Arc<dyn ClusterControl>,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    namespace: String,
    settings: ClusterJobSettings,
    timeout: Duration,
}

impl ClusterJobDelegate {
    pub fn new(
        control: Arc<dyn ClusterControl>,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
        settings: ClusterJobSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            control,
            store,
            clock,
            namespace: namespace.into(),
            settings,
            timeout,
        }
    }

    /// `kubectl`-backed delegate; `None` unless both the delegate and cluster jobs are enabled
    pub fn from_config(
        config: &PhotomeshConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Option<Self> {
        if !config.delegate.enabled || !config.delegate.cluster_job.enabled {
            return None;
        }
        let control = Arc::new(KubectlControl::new(
            config.cluster.kubectl.clone(),
            config.cluster.probe_timeout(),
        ));
        Some(Self::new(
            control,
            store,
            clock,
            config.cluster.namespace.clone(),
            config.delegate.cluster_job.clone(),
            config.delegate.timeout(),
        ))
    }

    fn args(&self, parts: &[&str]) -> Vec<String> {
        parts
            .iter()
            .copied()
            .chain(["-n", self.namespace.as_str()])
            .map(String::from)
            .collect()
    }

    async fn submit(&self, job: &str, request: &DelegateRequest) -> Result<(), DelegateError> {
        let manifest = JobManifest::new(job, &self.namespace, &self.settings, request)
            .to_yaml()
            .map_err(|e| DelegateError::Submit(e.to_string()))?;
        let path = request.project_file.with_file_name(MANIFEST_FILE_NAME);
        self.store
            .write_atomic(&path, manifest.as_bytes())
            .await
            .map_err(|e| DelegateError::Submit(e.to_string()))?;

        let path = path.display().to_string();
        self.control
            .query(&self.args(&["apply", "-f", path.as_str()]))
            .await
            .map_err(|e| DelegateError::Submit(e.to_string()))?;
        Ok(())
    }

    async fn phase(&self, job: &str) -> Option<JobPhase> {
        let json = match self
            .control
            .query(&self.args(&["get", "job", job, "-o", "json"]))
            .await
        {
            Ok(json) => json,
            Err(e) => {
                debug!("Status of job {} unavailable: {}", job, e);
                return None;
            }
        };
        match JobPhase::from_json(&json) {
            Ok(phase) => Some(phase),
            Err(e) => {
                warn!("Unparseable status for job {}: {}", job, e);
                None
            }
        }
    }

    /// Forward log lines not yet seen; `seen` survives across polls
    async fn stream_logs(&self, job: &str, seen: &mut usize, log: &dyn LogSink) {
        let target = format!("job/{}", job);
        match self
            .control
            .query(&self.args(&["logs", target.as_str()]))
            .await
        {
            Ok(text) => {
                let mut total = 0;
                for (i, line) in text.lines().enumerate() {
                    total = i + 1;
                    if i >= *seen {
                        log.info(line);
                    }
                }
                *seen = (*seen).max(total);
            }
            Err(e) => debug!("Logs of job {} not available yet: {}", job, e),
        }
    }

    async fn delete(&self, job: &str) {
        let args = self.args(&["delete", "job", job, "--ignore-not-found"]);
        if let Err(e) = self.control.query(&args).await {
            warn!("Could not delete job {}: {}", job, e);
        }
    }

    fn elapsed_since(&self, started: chrono::DateTime<chrono::Utc>) -> Duration {
        (self.clock.now() - started).to_std().unwrap_or_default()
    }
}

#[async_trait]
impl Delegate for ClusterJobDelegate {
    fn name(&self) -> String {
        format!("cluster job ({})", self.namespace)
    }

    async fn run(
        &self,
        request: &DelegateRequest,
        log: &dyn LogSink,
    ) -> std::result::Result<DelegateOutcome, DelegateError> {
        let started = self.clock.now();
        let session_dir = request.project_file.parent().unwrap_or(Path::new(""));
        let job = job_name(&self.settings.job_prefix, session_dir);

        self.submit(&job, request).await?;
        log.info(&format!("Submitted job {} to namespace {}", job, self.namespace));
        info!(job = %job, namespace = %self.namespace, "Cluster job submitted");

        let mut seen = 0;
        loop {
            let phase = self.phase(&job).await;
            self.stream_logs(&job, &mut seen, log).await;

            match phase {
                Some(JobPhase::Complete) => break,
                Some(JobPhase::Failed(reason)) => {
                    return Err(DelegateError::JobFailed { job, reason });
                }
                Some(JobPhase::Pending) | None => {}
            }

            let elapsed = self.elapsed_since(started);
            if elapsed >= self.timeout {
                warn!("Job {} still running after {:?}, deleting", job, self.timeout);
                self.delete(&job).await;
                return Err(DelegateError::Timeout(self.timeout));
            }
            let step = self.settings.poll_interval().min(self.timeout - elapsed);
            self.clock.sleep(step).await;
        }

        Ok(DelegateOutcome {
            output_dir: request.output_dir.clone(),
            duration: self.elapsed_since(started),
        })
    }
}
