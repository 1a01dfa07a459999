//! Run configuration
//!
//! One [`PhotomeshConfig`] value is built per process (preset + YAML
//! overrides), validated, and shared by `Arc` with every component.
//!
//! # YAML schema (v1)
//!
//! ```yaml
//! version: 1
//! preset: quick
//! storage:
//!   input_dir: /mnt/photomesh/input
//!   output_dir: /mnt/photomesh/output
//! delegate:
//!   enabled: true
//!   cluster_job:
//!     enabled: true
//!     poll_interval_secs: 5
//! artifacts:
//!   seed: 42
//!   mesh:
//!     style: uv_sphere
//!     latitude_bands: 16
//!     longitude_segments: 32
//! ```

pub mod error;
pub mod preset;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use preset::Preset;
pub use validation::Validatable;

use photomesh_artifacts::{ArtifactSettings, MeshStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::IngestPolicy;
use crate::probe::{
    ClusterControl, ClusterStatus, FallbackStatus, KubectlControl, StructuredPodStatus,
    TextPodStatus, Thresholds,
};
use crate::session::DEFAULT_SESSION_PREFIX;
use validation::check_range;

const SUPPORTED_VERSIONS: [u32; 1] = [1];

// ═══════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Shared location holding the input photos
    pub input_dir: PathBuf,
    /// Shared location where session directories are created
    pub output_dir: PathBuf,
    pub session_prefix: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/mnt/photomesh/input"),
            output_dir: PathBuf::from("/mnt/photomesh/output"),
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
        }
    }
}

impl Validatable for StorageSettings {
    fn validate(&self) -> ConfigResult<()> {
        if self.session_prefix.trim().is_empty() {
            return Err(ConfigError::invalid(
                "storage.session_prefix",
                "must not be empty, session listing filters on it",
            ));
        }
        if self.session_prefix.contains(['/', '\\']) {
            return Err(ConfigError::invalid(
                "storage.session_prefix",
                "must be a plain directory name prefix",
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "storage"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSettings {
    pub policy: IngestPolicy,
}

/// Which cluster status adapter to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStrategy {
    Structured,
    Text,
    #[default]
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    pub kubectl: PathBuf,
    pub namespace: String,
    pub strategy: ProbeStrategy,
    /// Substring counted by the text adapter
    pub ready_marker: String,
    pub distributed_min_nodes: usize,
    pub single_node_min_nodes: usize,
    pub probe_timeout_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl: PathBuf::from("kubectl"),
            namespace: "photomesh".to_string(),
            strategy: ProbeStrategy::Fallback,
            ready_marker: "Running".to_string(),
            distributed_min_nodes: 2,
            single_node_min_nodes: 1,
            probe_timeout_secs: 10,
        }
    }
}

impl ClusterSettings {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            distributed_min_nodes: self.distributed_min_nodes,
            single_node_min_nodes: self.single_node_min_nodes,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Budget of a single status query; the fallback strategy splits the
    /// probe timeout between its two attempts
    pub fn query_timeout(&self) -> Duration {
        match self.strategy {
            ProbeStrategy::Fallback => self.probe_timeout() / 2,
            ProbeStrategy::Structured | ProbeStrategy::Text => self.probe_timeout(),
        }
    }

    /// Status adapter for the configured strategy, over `control`
    pub fn status_adapter(&self, control: Arc<dyn ClusterControl>) -> Arc<dyn ClusterStatus> {
        let structured = || -> Arc<dyn ClusterStatus> {
            Arc::new(StructuredPodStatus::new(control.clone(), self.namespace.clone()))
        };
        let text = || -> Arc<dyn ClusterStatus> {
            Arc::new(TextPodStatus::new(
                control.clone(),
                self.namespace.clone(),
                self.ready_marker.clone(),
            ))
        };
        match self.strategy {
            ProbeStrategy::Structured => structured(),
            ProbeStrategy::Text => text(),
            ProbeStrategy::Fallback => Arc::new(
                FallbackStatus::new(structured(), text())
                    .with_attempt_timeout(self.query_timeout()),
            ),
        }
    }

    /// `kubectl`-backed adapter for the configured strategy
    pub fn kubectl_status(&self) -> Arc<dyn ClusterStatus> {
        self.status_adapter(Arc::new(KubectlControl::new(
            self.kubectl.clone(),
            self.query_timeout(),
        )))
    }
}

impl Validatable for ClusterSettings {
    fn validate(&self) -> ConfigResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::invalid("cluster.namespace", "must not be empty"));
        }
        check_range(
            "cluster.single_node_min_nodes",
            self.single_node_min_nodes,
            1,
            self.distributed_min_nodes.max(1),
            "Single-node threshold must not exceed the distributed threshold",
        )?;
        check_range(
            "cluster.distributed_min_nodes",
            self.distributed_min_nodes,
            2,
            10_000,
            "Distributed mode needs at least two ready workers",
        )?;
        check_range(
            "cluster.probe_timeout_secs",
            self.probe_timeout_secs,
            1,
            300,
            "The probe is advisory; keep the timeout short",
        )
    }

    fn config_name(&self) -> &'static str {
        "cluster"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Multiplier on every synthetic stage duration (0 = instant)
    pub time_scale: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            time_scale: Preset::Realistic.time_scale(),
        }
    }
}

impl Validatable for PipelineSettings {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            "pipeline.time_scale",
            self.time_scale,
            0.0,
            10.0,
            "Use 0 for instant runs, 1 for modelled durations",
        )
    }

    fn config_name(&self) -> &'static str {
        "pipeline"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DelegateSettings {
    pub enabled: bool,
    /// Executable locations, first existing one wins
    pub candidates: Vec<PathBuf>,
    pub timeout_minutes: u64,
    /// Delegate output directory name inside the session
    pub output_subdir: String,
    /// Submit the reconstruction as a cluster Job instead of a local executable
    pub cluster_job: ClusterJobSettings,
}

impl Default for DelegateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            candidates: vec![
                PathBuf::from("/opt/Meshroom/meshroom_batch"),
                PathBuf::from("/usr/local/bin/meshroom_batch"),
                PathBuf::from("/usr/bin/meshroom_batch"),
            ],
            timeout_minutes: 120,
            output_subdir: "delegate_output".to_string(),
            cluster_job: ClusterJobSettings::default(),
        }
    }
}

impl DelegateSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

impl Validatable for DelegateSettings {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            "delegate.timeout_minutes",
            self.timeout_minutes,
            1,
            24 * 60,
            "Real reconstructions take minutes to hours",
        )?;
        if self.output_subdir.trim().is_empty() || self.output_subdir.contains(['/', '\\']) {
            return Err(ConfigError::invalid(
                "delegate.output_subdir",
                "must be a single directory name",
            ));
        }
        self.cluster_job.validate()
    }

    fn config_name(&self) -> &'static str {
        "delegate"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterJobSettings {
    pub enabled: bool,
    /// Job names are `<job_prefix>-<session id>`
    pub job_prefix: String,
    pub image: String,
    /// Container entrypoint; the delegate arguments are appended
    pub command: Vec<String>,
    /// Claim holding the shared storage, mounted at `mount_path`
    pub volume_claim: String,
    pub mount_path: PathBuf,
    pub backoff_limit: u32,
    pub poll_interval_secs: u64,
}

impl Default for ClusterJobSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            job_prefix: "photomesh-reconstruction".to_string(),
            image: "alicevision/meshroom:2023.3.0-av3.2.0-centos7-cuda11.3.1".to_string(),
            command: vec!["meshroom_batch".to_string()],
            volume_claim: "photomesh-storage-pvc".to_string(),
            mount_path: PathBuf::from("/mnt/photomesh"),
            backoff_limit: 1,
            poll_interval_secs: 5,
        }
    }
}

impl ClusterJobSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Validatable for ClusterJobSettings {
    fn validate(&self) -> ConfigResult<()> {
        let prefix_ok = !self.job_prefix.is_empty()
            && self.job_prefix.len() <= 40
            && self
                .job_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.job_prefix.starts_with('-');
        if !prefix_ok {
            return Err(ConfigError::invalid(
                "delegate.cluster_job.job_prefix",
                "must be 1-40 lowercase letters, digits or '-', not starting with '-'",
            ));
        }
        if self.image.trim().is_empty() {
            return Err(ConfigError::invalid("delegate.cluster_job.image", "must not be empty"));
        }
        if self.command.is_empty() {
            return Err(ConfigError::invalid(
                "delegate.cluster_job.command",
                "needs at least the program name",
            ));
        }
        if self.volume_claim.trim().is_empty() {
            return Err(ConfigError::invalid(
                "delegate.cluster_job.volume_claim",
                "must not be empty",
            ));
        }
        check_range(
            "delegate.cluster_job.backoff_limit",
            self.backoff_limit,
            0,
            10,
            "Retries of a failed reconstruction pod",
        )?;
        check_range(
            "delegate.cluster_job.poll_interval_secs",
            self.poll_interval_secs,
            1,
            300,
            "How often job status and logs are fetched",
        )
    }

    fn config_name(&self) -> &'static str {
        "delegate.cluster_job"
    }
}

impl Validatable for ArtifactSettings {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            "artifacts.points_per_photo",
            self.points_per_photo,
            1,
            100_000,
            "Point count is points_per_photo x photos, capped by max_points",
        )?;
        check_range(
            "artifacts.max_points",
            self.max_points,
            1,
            10_000_000,
            "ASCII PLY grows ~50 bytes per point",
        )?;
        check_range(
            "artifacts.cloud_radius",
            self.cloud_radius,
            1e-3,
            1e6,
            "Radius of the sampled volume",
        )?;
        check_range("artifacts.mesh_scale", self.mesh_scale, 1e-3, 1e6, "Mesh size")?;
        check_range(
            "artifacts.solid_radius",
            self.solid_radius,
            1e-3,
            1e6,
            "Printable solid radius in model units",
        )?;
        check_range(
            "artifacts.solid_min_segments",
            self.solid_min_segments,
            3,
            self.solid_max_segments.max(3),
            "Minimum must be >= 3 and <= solid_max_segments",
        )?;
        check_range(
            "artifacts.solid_max_segments",
            self.solid_max_segments,
            3,
            4096,
            "Facet count grows linearly with segments",
        )?;
        if let MeshStyle::UvSphere {
            latitude_bands,
            longitude_segments,
        } = self.mesh
        {
            check_range(
                "artifacts.mesh.latitude_bands",
                latitude_bands,
                2,
                1024,
                "A UV sphere needs at least two bands",
            )?;
            check_range(
                "artifacts.mesh.longitude_segments",
                longitude_segments,
                3,
                4096,
                "A UV sphere needs at least three segments",
            )?;
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "artifacts"
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Root
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhotomeshConfig {
    pub preset: Preset,
    pub storage: StorageSettings,
    pub ingest: IngestSettings,
    pub cluster: ClusterSettings,
    pub pipeline: PipelineSettings,
    pub delegate: DelegateSettings,
    pub artifacts: ArtifactSettings,
}

impl Default for PhotomeshConfig {
    fn default() -> Self {
        Self::preset(Preset::default())
    }
}

/// On-disk form: version + preset + optional section overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileV1 {
    /// Schema version (always 1 for v1)
    pub version: Option<u32>,

    /// Base preset
    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<DelegateSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactSettings>,
}

impl PhotomeshConfig {
    /// Complete configuration for a preset
    pub fn preset(preset: Preset) -> Self {
        Self {
            preset,
            storage: StorageSettings::default(),
            ingest: IngestSettings::default(),
            cluster: ClusterSettings::default(),
            pipeline: PipelineSettings {
                time_scale: preset.time_scale(),
            },
            delegate: DelegateSettings::default(),
            artifacts: ArtifactSettings::default(),
        }
    }

    /// Parse, apply onto the named preset and validate
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        match file.version {
            None => return Err(ConfigError::MissingVersion),
            Some(v) if !SUPPORTED_VERSIONS.contains(&v) => {
                return Err(ConfigError::UnsupportedVersion {
                    found: v,
                    supported: SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }

        let preset = match file.preset.as_deref() {
            Some(name) => Preset::from_str(name)?,
            None => Preset::default(),
        };

        let mut config = Self::preset(preset);
        if let Some(storage) = file.storage {
            config.storage = storage;
        }
        if let Some(ingest) = file.ingest {
            config.ingest = ingest;
        }
        if let Some(cluster) = file.cluster {
            config.cluster = cluster;
        }
        if let Some(pipeline) = file.pipeline {
            config.pipeline = pipeline;
        }
        if let Some(delegate) = file.delegate {
            config.delegate = delegate;
        }
        if let Some(artifacts) = file.artifacts {
            config.artifacts = artifacts;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Effective configuration as v1 YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            preset: Some(self.preset.to_string()),
            storage: Some(self.storage.clone()),
            ingest: Some(self.ingest.clone()),
            cluster: Some(self.cluster.clone()),
            pipeline: Some(self.pipeline.clone()),
            delegate: Some(self.delegate.clone()),
            artifacts: Some(self.artifacts.clone()),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

impl Validatable for PhotomeshConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.storage.validate()?;
        self.cluster.validate()?;
        self.pipeline.validate()?;
        self.delegate.validate()?;
        self.artifacts.validate()
    }

    fn config_name(&self) -> &'static str {
        "photomesh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_presets_validate() {
        for preset in [Preset::Quick, Preset::Realistic] {
            let config = PhotomeshConfig::preset(preset);
            config.validate().unwrap();
            assert_eq!(config.pipeline.time_scale, preset.time_scale());
        }
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = PhotomeshConfig::preset(Preset::Quick);
        config.artifacts.seed = Some(42);
        config.ingest.policy = IngestPolicy::RequireConversion;

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("preset: quick"));
        assert!(yaml.contains("policy: require_conversion"));

        let back = PhotomeshConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_yaml_overrides_apply_onto_preset() {
        let yaml = r#"
version: 1
preset: quick
delegate:
  enabled: false
artifacts:
  max_points: 800
  mesh:
    style: uv_sphere
    latitude_bands: 6
    longitude_segments: 12
"#;
        let config = PhotomeshConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.pipeline.time_scale, 0.0);
        assert!(!config.delegate.enabled);
        assert_eq!(config.delegate.timeout_minutes, 120);
        assert_eq!(config.artifacts.max_points, 800);
        assert_eq!(config.artifacts.points_per_photo, 100);
        assert_eq!(
            config.artifacts.mesh,
            MeshStyle::UvSphere {
                latitude_bands: 6,
                longitude_segments: 12
            }
        );
    }

    #[test]
    fn test_yaml_missing_version() {
        let err = PhotomeshConfig::from_yaml_str("preset: quick\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingVersion));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let err = PhotomeshConfig::from_yaml_str("version: 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion { found: 2, .. }));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let err = PhotomeshConfig::from_yaml_str("version: 1\npipeline:\n  speed: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_range_validation() {
        let err = PhotomeshConfig::from_yaml_str("version: 1\npipeline:\n  time_scale: -1\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Range { ref field, .. } if field == "pipeline.time_scale"));

        let mut config = PhotomeshConfig::default();
        config.artifacts.mesh = MeshStyle::UvSphere {
            latitude_bands: 1,
            longitude_segments: 8,
        };
        assert!(config.validate().is_err());

        let mut config = PhotomeshConfig::default();
        config.storage.session_prefix = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_status_adapter_follows_strategy() {
        let mut cluster = ClusterSettings::default();
        assert_eq!(cluster.kubectl_status().name(), "fallback");

        cluster.strategy = ProbeStrategy::Text;
        assert_eq!(cluster.kubectl_status().name(), "text");

        cluster.strategy = ProbeStrategy::Structured;
        assert_eq!(cluster.kubectl_status().name(), "structured");
    }

    #[test]
    fn test_cluster_job_section() {
        let yaml = r#"
version: 1
delegate:
  cluster_job:
    enabled: true
    job_prefix: lab-recon
    poll_interval_secs: 2
"#;
        let config = PhotomeshConfig::from_yaml_str(yaml).unwrap();
        let job = &config.delegate.cluster_job;
        assert!(job.enabled);
        assert_eq!(job.job_prefix, "lab-recon");
        assert_eq!(job.poll_interval(), Duration::from_secs(2));
        assert_eq!(job.command, vec!["meshroom_batch"]);

        let err = PhotomeshConfig::from_yaml_str(
            "version: 1\ndelegate:\n  cluster_job:\n    job_prefix: Lab_Recon\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "delegate.cluster_job.job_prefix"));
    }

    #[test]
    fn test_fallback_splits_probe_timeout() {
        let mut cluster = ClusterSettings {
            probe_timeout_secs: 10,
            ..ClusterSettings::default()
        };
        assert_eq!(cluster.query_timeout(), Duration::from_secs(5));

        cluster.strategy = ProbeStrategy::Structured;
        assert_eq!(cluster.query_timeout(), Duration::from_secs(10));
    }

    /// JSON listing never returns; the plain listing answers at once
    struct StalledJsonControl;

    #[async_trait::async_trait]
    impl ClusterControl for StalledJsonControl {
        async fn query(&self, args: &[String]) -> crate::error::Result<String> {
            if args.iter().any(|a| a == "json") {
                std::future::pending().await
            } else {
                Ok("worker-a 1/1 Running\nworker-b 1/1 Running\n".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_adapter_reaches_text_within_probe_timeout() {
        let cluster = ClusterSettings {
            probe_timeout_secs: 1,
            ..ClusterSettings::default()
        };
        let probe = crate::probe::ReadinessProbe::new(
            cluster.status_adapter(Arc::new(StalledJsonControl)),
            cluster.thresholds(),
            cluster.probe_timeout(),
        );

        let state = probe.probe().await;
        assert_eq!(state.ready_node_count, 2);
        assert_eq!(state.mode, crate::probe::ClusterMode::Distributed);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"version: 1\npreset: realistic\ncluster:\n  namespace: lab\n")
            .unwrap();

        let config = PhotomeshConfig::from_yaml(file.path()).unwrap();
        assert_eq!(config.cluster.namespace, "lab");
        assert_eq!(config.cluster.ready_marker, "Running");
    }
}
