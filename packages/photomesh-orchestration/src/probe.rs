//! Cluster readiness probe
//!
//! # Architecture
//!
//! - `ClusterControl`: issue a query to the cluster CLI, get text back
//! - `ClusterStatus`: typed port returning a ready-node count
//!   - `StructuredPodStatus`: JSON pod list, phase + Ready condition
//!   - `TextPodStatus`: substring count over the plain listing
//!   - `FallbackStatus`: structured first, text on failure
//! - `ReadinessProbe`: timeout + classification, never fails a run

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    Distributed,
    SingleNode,
    Unknown,
}

impl ClusterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMode::Distributed => "distributed",
            ClusterMode::SingleNode => "single_node",
            ClusterMode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived fresh on every probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub ready_node_count: usize,
    pub mode: ClusterMode,
}

impl ClusterState {
    pub fn unknown() -> Self {
        Self {
            ready_node_count: 0,
            mode: ClusterMode::Unknown,
        }
    }

    pub fn describe(&self) -> String {
        match self.mode {
            ClusterMode::Distributed => {
                format!("Distributed ({} ready workers)", self.ready_node_count)
            }
            ClusterMode::SingleNode => format!("Single node ({} ready)", self.ready_node_count),
            ClusterMode::Unknown => "Unknown (no ready workers)".to_string(),
        }
    }
}

/// Node-count thresholds for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub distributed_min_nodes: usize,
    pub single_node_min_nodes: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            distributed_min_nodes: 2,
            single_node_min_nodes: 1,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, ready: usize) -> ClusterState {
        let mode = if ready >= self.distributed_min_nodes {
            ClusterMode::Distributed
        } else if ready >= self.single_node_min_nodes && ready > 0 {
            ClusterMode::SingleNode
        } else {
            ClusterMode::Unknown
        };
        ClusterState {
            ready_node_count: ready,
            mode,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Traits
// ═══════════════════════════════════════════════════════════════════════════

/// Cluster control CLI
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Run a query and return its stdout
    async fn query(&self, args: &[String]) -> Result<String>;
}

/// Ready-node count source
#[async_trait]
pub trait ClusterStatus: Send + Sync {
    async fn ready_nodes(&self) -> Result<usize>;

    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════
// kubectl
// ═══════════════════════════════════════════════════════════════════════════

pub struct KubectlControl {
    program: PathBuf,
    timeout: Duration,
}

impl KubectlControl {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ClusterControl for KubectlControl {
    async fn query(&self, args: &[String]) -> Result<String> {
        debug!("{} {}", self.program.display(), args.join(" "));

        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                OrchestratorError::Timeout(format!(
                    "{} did not answer within {:?}",
                    self.program.display(),
                    self.timeout
                ))
            })??;

        if !output.status.success() {
            return Err(OrchestratorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Status adapters
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl Pod {
    fn is_ready(&self) -> bool {
        self.status.phase.as_deref() == Some("Running")
            && self
                .status
                .conditions
                .iter()
                .any(|c| c.kind == "Ready" && c.status == "True")
    }
}

/// Count running pods with `Ready=True` from the JSON listing
pub struct StructuredPodStatus {
    control: Arc<dyn ClusterControl>,
    namespace: String,
}

impl StructuredPodStatus {
    pub fn new(control: Arc<dyn ClusterControl>, namespace: impl Into<String>) -> Self {
        Self {
            control,
            namespace: namespace.into(),
        }
    }

    pub fn count_ready(json: &str) -> Result<usize> {
        let pods: PodList = serde_json::from_str(json)?;
        Ok(pods.items.iter().filter(|p| p.is_ready()).count())
    }
}

#[async_trait]
impl ClusterStatus for StructuredPodStatus {
    async fn ready_nodes(&self) -> Result<usize> {
        let args = ["get", "pods", "-n", self.namespace.as_str(), "-o", "json"].map(String::from);
        let json = self.control.query(&args).await?;
        Self::count_ready(&json)
    }

    fn name(&self) -> &'static str {
        "structured"
    }
}

/// Count occurrences of a marker in the plain listing.
///
/// Kept for control planes that cannot emit JSON; a pod named after the
/// marker is counted too.
pub struct TextPodStatus {
    control: Arc<dyn ClusterControl>,
    namespace: String,
    marker: String,
}

impl TextPodStatus {
    pub fn new(
        control: Arc<dyn ClusterControl>,
        namespace: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            control,
            namespace: namespace.into(),
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl ClusterStatus for TextPodStatus {
    async fn ready_nodes(&self) -> Result<usize> {
        if self.marker.is_empty() {
            return Ok(0);
        }
        let args = ["get", "pods", "-n", self.namespace.as_str()].map(String::from);
        let text = self.control.query(&args).await?;
        Ok(text.matches(self.marker.as_str()).count())
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

/// Try `primary`, then `secondary`, each within its own share of the probe budget
pub struct FallbackStatus {
    primary: Arc<dyn ClusterStatus>,
    secondary: Arc<dyn ClusterStatus>,
    attempt_timeout: Option<Duration>,
}

impl FallbackStatus {
    pub fn new(primary: Arc<dyn ClusterStatus>, secondary: Arc<dyn ClusterStatus>) -> Self {
        Self {
            primary,
            secondary,
            attempt_timeout: None,
        }
    }

    /// Bound each adapter separately so a hanging primary leaves time for the secondary
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    async fn attempt(&self, status: &dyn ClusterStatus) -> Result<usize> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, status.ready_nodes())
                .await
                .map_err(|_| {
                    OrchestratorError::Timeout(format!(
                        "{} status did not answer within {:?}",
                        status.name(),
                        limit
                    ))
                })?,
            None => status.ready_nodes().await,
        }
    }
}

#[async_trait]
impl ClusterStatus for FallbackStatus {
    async fn ready_nodes(&self) -> Result<usize> {
        match self.attempt(self.primary.as_ref()).await {
            Ok(n) => Ok(n),
            Err(e) => {
                debug!(
                    "{} status failed ({}), trying {}",
                    self.primary.name(),
                    e,
                    self.secondary.name()
                );
                self.attempt(self.secondary.as_ref()).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

/// Fixed answer, for runs without a cluster and for tests
pub struct StaticStatus {
    ready: Option<usize>,
}

impl StaticStatus {
    pub fn ready(nodes: usize) -> Self {
        Self { ready: Some(nodes) }
    }

    pub fn unavailable() -> Self {
        Self { ready: None }
    }
}

#[async_trait]
impl ClusterStatus for StaticStatus {
    async fn ready_nodes(&self) -> Result<usize> {
        self.ready
            .ok_or_else(|| OrchestratorError::config("cluster status unavailable"))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Probe
// ═══════════════════════════════════════════════════════════════════════════

pub struct ReadinessProbe {
    status: Arc<dyn ClusterStatus>,
    thresholds: Thresholds,
    timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(status: Arc<dyn ClusterStatus>, thresholds: Thresholds, timeout: Duration) -> Self {
        Self {
            status,
            thresholds,
            timeout,
        }
    }

    /// Classify readiness; any error or timeout yields `Unknown`
    pub async fn probe(&self) -> ClusterState {
        match tokio::time::timeout(self.timeout, self.status.ready_nodes()).await {
            Ok(Ok(ready)) => self.thresholds.classify(ready),
            Ok(Err(e)) => {
                warn!("Cluster probe ({}) failed: {}", self.status.name(), e);
                ClusterState::unknown()
            }
            Err(_) => {
                warn!("Cluster probe timed out after {:?}", self.timeout);
                ClusterState::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Replays canned answers and records the queries it saw
    struct ScriptedControl {
        json: Option<String>,
        text: String,
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ClusterControl for ScriptedControl {
        async fn query(&self, args: &[String]) -> Result<String> {
            self.seen.lock().push(args.to_vec());
            if args.iter().any(|a| a == "json") {
                self.json
                    .clone()
                    .ok_or_else(|| OrchestratorError::config("json output unsupported"))
            } else {
                Ok(self.text.clone())
            }
        }
    }

    const PODS: &str = r#"{"items":[
        {"status":{"phase":"Running","conditions":[{"type":"Ready","status":"True"}]}},
        {"status":{"phase":"Running","conditions":[{"type":"Ready","status":"False"}]}},
        {"status":{"phase":"Pending","conditions":[]}},
        {"status":{"phase":"Running","conditions":[{"type":"Ready","status":"True"}]}}
    ]}"#;

    const LISTING: &str = "NAME READY STATUS\nworker-a 1/1 Running\nworker-b 0/1 Pending\n";

    #[test]
    fn test_classify() {
        let t = Thresholds::default();
        assert_eq!(t.classify(0).mode, ClusterMode::Unknown);
        assert_eq!(t.classify(1).mode, ClusterMode::SingleNode);
        assert_eq!(t.classify(2).mode, ClusterMode::Distributed);
        assert_eq!(t.classify(7).ready_node_count, 7);
    }

    #[test]
    fn test_structured_counts_ready_running_pods() {
        assert_eq!(StructuredPodStatus::count_ready(PODS).unwrap(), 2);
        assert_eq!(StructuredPodStatus::count_ready(r#"{"items":[]}"#).unwrap(), 0);
        assert!(StructuredPodStatus::count_ready("not json").is_err());
    }

    #[tokio::test]
    async fn test_text_counts_marker() {
        let control = Arc::new(ScriptedControl {
            json: None,
            text: LISTING.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let status = TextPodStatus::new(control.clone(), "photomesh", "Running");
        assert_eq!(status.ready_nodes().await.unwrap(), 1);
        assert_eq!(
            control.seen.lock()[0],
            vec!["get", "pods", "-n", "photomesh"]
        );
    }

    #[tokio::test]
    async fn test_fallback_uses_text_when_json_fails() {
        let control = Arc::new(ScriptedControl {
            json: None,
            text: LISTING.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let status = FallbackStatus::new(
            Arc::new(StructuredPodStatus::new(control.clone(), "ns")),
            Arc::new(TextPodStatus::new(control.clone(), "ns", "Running")),
        );
        assert_eq!(status.ready_nodes().await.unwrap(), 1);
        assert_eq!(control.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_prefers_structured() {
        let control = Arc::new(ScriptedControl {
            json: Some(PODS.to_string()),
            text: LISTING.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let status = FallbackStatus::new(
            Arc::new(StructuredPodStatus::new(control.clone(), "ns")),
            Arc::new(TextPodStatus::new(control.clone(), "ns", "Running")),
        );
        assert_eq!(status.ready_nodes().await.unwrap(), 2);
        assert_eq!(control.seen.lock().len(), 1);
    }

    /// Never answers
    struct HangingStatus;

    #[async_trait]
    impl ClusterStatus for HangingStatus {
        async fn ready_nodes(&self) -> Result<usize> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_hanging_primary_leaves_budget_for_secondary() {
        let status = FallbackStatus::new(Arc::new(HangingStatus), Arc::new(StaticStatus::ready(1)))
            .with_attempt_timeout(Duration::from_millis(100));
        let probe = ReadinessProbe::new(
            Arc::new(status),
            Thresholds::default(),
            Duration::from_millis(300),
        );

        let state = probe.probe().await;
        assert_eq!(state.mode, ClusterMode::SingleNode);
        assert_eq!(state.ready_node_count, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_reported_when_both_hang() {
        let status = FallbackStatus::new(Arc::new(HangingStatus), Arc::new(HangingStatus))
            .with_attempt_timeout(Duration::from_millis(50));
        let err = status.ready_nodes().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_probe_error_is_unknown() {
        let probe = ReadinessProbe::new(
            Arc::new(StaticStatus::unavailable()),
            Thresholds::default(),
            Duration::from_secs(10),
        );
        assert_eq!(probe.probe().await, ClusterState::unknown());
    }

    #[tokio::test]
    async fn test_kubectl_missing_binary_errors() {
        let control = KubectlControl::new(
            "/definitely/not/a/kubectl-binary",
            Duration::from_secs(10),
        );
        assert!(control.query(&["version".to_string()]).await.is_err());
    }
}
