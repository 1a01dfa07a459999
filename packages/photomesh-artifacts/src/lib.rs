//! PhotoMesh artifact synthesis
//!
//! Pure, deterministic-count generation of the three downstream artifacts of
//! a reconstruction run:
//!
//! - **PointCloud**: ASCII PLY, points uniform inside a sphere
//! - **Mesh**: ASCII OBJ, icosahedron or UV sphere
//! - **PrintableSolid**: ASCII STL, UV sphere with computed facet normals
//!
//! Element counts come from [`ArtifactPlan`] and depend only on the photo
//! count and [`ArtifactSettings`]; coordinates vary per run unless a seed is
//! configured. Nothing here touches the filesystem.
//!
//! ```rust,ignore
//! use photomesh_artifacts::{synthesize, ArtifactKind, ArtifactMeta, ArtifactPlan, ArtifactSettings};
//!
//! let settings = ArtifactSettings::default();
//! let plan = ArtifactPlan::for_photo_count(3, &settings);
//! let meta = ArtifactMeta { session_id: "photomesh_session_20240101_120000".into() };
//! let cloud = synthesize(ArtifactKind::PointCloud, &plan, &settings, &meta)?;
//! assert_eq!(cloud.actual_count, 300);
//! ```

pub mod error;
pub mod geometry;
pub mod inspect;
pub mod obj;
pub mod plan;
pub mod ply;
pub mod stl;

pub use error::{ArtifactError, Result};
pub use inspect::{inspect, ElementCounts};
pub use plan::{ArtifactKind, ArtifactPlan, ArtifactSettings, MeshStyle};

use tracing::debug;

/// Provenance written into artifact headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub session_id: String,
}

/// A synthesized artifact, not yet written anywhere
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub contents: String,
    pub declared_count: usize,
    pub actual_count: usize,
}

impl GeneratedArtifact {
    pub fn byte_size(&self) -> u64 {
        self.contents.len() as u64
    }
}

/// Synthesize one artifact.
///
/// # Errors
///
/// `ArtifactError::CountMismatch` if the written element count differs from
/// the planned one; the artifact is never returned in that case.
pub fn synthesize(
    kind: ArtifactKind,
    plan: &ArtifactPlan,
    settings: &ArtifactSettings,
    meta: &ArtifactMeta,
) -> Result<GeneratedArtifact> {
    let (contents, actual_count) = match kind {
        ArtifactKind::PointCloud => {
            let seed = settings.seed.unwrap_or_else(rand::random);
            ply::render(plan, settings, meta, seed)
        }
        ArtifactKind::Mesh => obj::render(plan, settings, meta),
        ArtifactKind::PrintableSolid => stl::render(plan, settings),
    };

    let declared_count = plan.declared_count(kind);
    if declared_count != actual_count {
        return Err(ArtifactError::CountMismatch {
            kind: kind.as_str(),
            declared: declared_count,
            actual: actual_count,
        });
    }

    debug!(
        kind = kind.as_str(),
        elements = actual_count,
        bytes = contents.len(),
        "Synthesized artifact"
    );

    Ok(GeneratedArtifact {
        kind,
        file_name: kind.file_name(plan.photo_count),
        contents,
        declared_count,
        actual_count,
    })
}

/// Synthesize all three artifacts in `ArtifactKind::ALL` order
pub fn synthesize_all(
    plan: &ArtifactPlan,
    settings: &ArtifactSettings,
    meta: &ArtifactMeta,
) -> Result<Vec<GeneratedArtifact>> {
    ArtifactKind::ALL
        .iter()
        .map(|&kind| synthesize(kind, plan, settings, meta))
        .collect()
}
