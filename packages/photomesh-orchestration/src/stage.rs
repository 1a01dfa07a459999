//! Fixed catalog of the six reconstruction stages
//!
//! Each stage carries its synthetic timing model (floor, per-photo cost,
//! progress cadence) and the metric reported while it runs.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Stage identifier, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    CameraInit,
    FeatureExtraction,
    ImageMatching,
    StructureFromMotion,
    DenseReconstruction,
    MeshingAndTexturing,
}

/// How the progress metric grows with photo count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricModel {
    /// N
    Photos,
    /// N × k
    PerPhoto(u64),
    /// N(N-1)/2
    Pairs,
}

impl MetricModel {
    pub fn total(&self, photos: u64) -> u64 {
        match *self {
            MetricModel::Photos => photos,
            MetricModel::PerPhoto(k) => photos.saturating_mul(k),
            MetricModel::Pairs => photos.saturating_mul(photos.saturating_sub(1)) / 2,
        }
    }
}

/// Timing and metric model of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub floor_secs: u64,
    pub per_photo_secs: u64,
    pub cadence_secs: u64,
    pub metric: MetricModel,
    pub unit: &'static str,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        StageId::CameraInit,
        StageId::FeatureExtraction,
        StageId::ImageMatching,
        StageId::StructureFromMotion,
        StageId::DenseReconstruction,
        StageId::MeshingAndTexturing,
    ];

    pub const COUNT: usize = 6;

    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    pub fn is_last(&self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::CameraInit => "camera_init",
            StageId::FeatureExtraction => "feature_extraction",
            StageId::ImageMatching => "image_matching",
            StageId::StructureFromMotion => "structure_from_motion",
            StageId::DenseReconstruction => "dense_reconstruction",
            StageId::MeshingAndTexturing => "meshing_and_texturing",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| OrchestratorError::config(format!("Invalid stage: {}", s)))
    }

    pub fn title(&self) -> &'static str {
        match self {
            StageId::CameraInit => "Camera Initialization",
            StageId::FeatureExtraction => "Feature Extraction",
            StageId::ImageMatching => "Image Matching",
            StageId::StructureFromMotion => "Structure from Motion",
            StageId::DenseReconstruction => "Dense Reconstruction",
            StageId::MeshingAndTexturing => "Meshing & Texturing",
        }
    }

    pub fn spec(&self) -> StageSpec {
        match self {
            StageId::CameraInit => StageSpec {
                floor_secs: 120,
                per_photo_secs: 3,
                cadence_secs: 10,
                metric: MetricModel::Photos,
                unit: "photos analyzed",
            },
            StageId::FeatureExtraction => StageSpec {
                floor_secs: 480,
                per_photo_secs: 15,
                cadence_secs: 30,
                metric: MetricModel::PerPhoto(2000),
                unit: "features extracted",
            },
            StageId::ImageMatching => StageSpec {
                floor_secs: 300,
                per_photo_secs: 8,
                cadence_secs: 30,
                metric: MetricModel::Pairs,
                unit: "pairs matched",
            },
            StageId::StructureFromMotion => StageSpec {
                floor_secs: 300,
                per_photo_secs: 10,
                cadence_secs: 45,
                metric: MetricModel::PerPhoto(500),
                unit: "sparse points",
            },
            StageId::DenseReconstruction => StageSpec {
                floor_secs: 600,
                per_photo_secs: 20,
                cadence_secs: 60,
                metric: MetricModel::Photos,
                unit: "depth maps",
            },
            StageId::MeshingAndTexturing => StageSpec {
                floor_secs: 180,
                per_photo_secs: 5,
                cadence_secs: 30,
                metric: MetricModel::PerPhoto(1000),
                unit: "mesh faces",
            },
        }
    }

    /// Unscaled synthetic duration: `max(floor, N × perPhoto)` seconds
    pub fn duration_secs(&self, photos: usize) -> u64 {
        let spec = self.spec();
        spec.floor_secs
            .max((photos as u64).saturating_mul(spec.per_photo_secs))
    }

    /// Metric value after `fraction` of the stage, floored and monotone in `fraction`
    pub fn metric_at(&self, fraction: f64, photos: usize) -> u64 {
        let total = self.spec().metric.total(photos as u64);
        (total as f64 * fraction.clamp(0.0, 1.0)).floor() as u64
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Estimated synthetic wall time for all stages, in seconds
pub fn estimated_total_secs(photos: usize, time_scale: f64) -> f64 {
    StageId::ALL
        .iter()
        .map(|stage| stage.duration_secs(photos) as f64)
        .sum::<f64>()
        * time_scale
}
