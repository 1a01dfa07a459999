//! Artifact settings and the pure element-count plan

use serde::{Deserialize, Serialize};

use crate::geometry::{uv_sphere_face_count, uv_sphere_vertex_count};

/// Latitude bands of the printable solid
pub const SOLID_LATITUDE_BANDS: usize = 8;

/// Kind of a generated artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PointCloud,
    Mesh,
    PrintableSolid,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::PointCloud,
        ArtifactKind::Mesh,
        ArtifactKind::PrintableSolid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::PointCloud => "point_cloud",
            ArtifactKind::Mesh => "mesh",
            ArtifactKind::PrintableSolid => "printable_solid",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::PointCloud => "ply",
            ArtifactKind::Mesh => "obj",
            ArtifactKind::PrintableSolid => "stl",
        }
    }

    /// `pointcloud_3photos.ply`, `mesh_3photos.obj`, `printable_3photos.stl`
    pub fn file_name(&self, photo_count: usize) -> String {
        let stem = match self {
            ArtifactKind::PointCloud => "pointcloud",
            ArtifactKind::Mesh => "mesh",
            ArtifactKind::PrintableSolid => "printable",
        };
        format!("{}_{}photos.{}", stem, photo_count, self.extension())
    }

    /// Kind for a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ply" => Some(ArtifactKind::PointCloud),
            "obj" => Some(ArtifactKind::Mesh),
            "stl" => Some(ArtifactKind::PrintableSolid),
            _ => None,
        }
    }

    /// Name of the counted element
    pub fn element_label(&self) -> &'static str {
        match self {
            ArtifactKind::PointCloud => "vertices",
            ArtifactKind::Mesh => "faces",
            ArtifactKind::PrintableSolid => "facets",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mesh tessellation style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum MeshStyle {
    /// 12 vertices, 20 faces, per-vertex normals
    #[default]
    Icosahedron,
    /// Latitude/longitude sphere with texture coordinates
    UvSphere {
        latitude_bands: usize,
        longitude_segments: usize,
    },
}

impl MeshStyle {
    pub fn vertex_count(&self) -> usize {
        match *self {
            MeshStyle::Icosahedron => 12,
            MeshStyle::UvSphere {
                latitude_bands,
                longitude_segments,
            } => uv_sphere_vertex_count(latitude_bands, longitude_segments),
        }
    }

    pub fn face_count(&self) -> usize {
        match *self {
            MeshStyle::Icosahedron => 20,
            MeshStyle::UvSphere {
                latitude_bands,
                longitude_segments,
            } => uv_sphere_face_count(latitude_bands, longitude_segments),
        }
    }
}

/// Synthesis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactSettings {
    pub points_per_photo: usize,
    pub max_points: usize,
    /// Radius of the sampled point cloud volume
    pub cloud_radius: f64,
    pub include_confidence: bool,
    pub mesh: MeshStyle,
    /// Scale applied to the icosahedron / radius of the UV sphere mesh
    pub mesh_scale: f64,
    pub solid_radius: f64,
    pub solid_segments_per_photo: usize,
    pub solid_min_segments: usize,
    pub solid_max_segments: usize,
    /// Base seed for point sampling; `None` draws a fresh one per run
    pub seed: Option<u64>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            points_per_photo: 100,
            max_points: 5000,
            cloud_radius: 2.0,
            include_confidence: true,
            mesh: MeshStyle::Icosahedron,
            mesh_scale: 2.0,
            solid_radius: 20.0,
            solid_segments_per_photo: 2,
            solid_min_segments: 8,
            solid_max_segments: 128,
            seed: None,
        }
    }
}

/// Element counts for every artifact of a run, a pure function of N
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPlan {
    pub photo_count: usize,
    pub point_count: usize,
    pub mesh_vertex_count: usize,
    pub mesh_face_count: usize,
    pub solid_latitude_bands: usize,
    pub solid_longitude_segments: usize,
    pub solid_facet_count: usize,
}

impl ArtifactPlan {
    pub fn for_photo_count(photo_count: usize, settings: &ArtifactSettings) -> Self {
        let point_count = photo_count
            .saturating_mul(settings.points_per_photo)
            .min(settings.max_points);

        let min_segments = settings.solid_min_segments.max(3);
        let max_segments = settings.solid_max_segments.max(min_segments);
        let solid_longitude_segments = photo_count
            .saturating_mul(settings.solid_segments_per_photo)
            .clamp(min_segments, max_segments);

        Self {
            photo_count,
            point_count,
            mesh_vertex_count: settings.mesh.vertex_count(),
            mesh_face_count: settings.mesh.face_count(),
            solid_latitude_bands: SOLID_LATITUDE_BANDS,
            solid_longitude_segments,
            solid_facet_count: uv_sphere_face_count(
                SOLID_LATITUDE_BANDS,
                solid_longitude_segments,
            ),
        }
    }

    /// Planned element count for an artifact kind
    pub fn declared_count(&self, kind: ArtifactKind) -> usize {
        match kind {
            ArtifactKind::PointCloud => self.point_count,
            ArtifactKind::Mesh => self.mesh_face_count,
            ArtifactKind::PrintableSolid => self.solid_facet_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_count_scales_then_caps() {
        let settings = ArtifactSettings::default();
        assert_eq!(ArtifactPlan::for_photo_count(1, &settings).point_count, 100);
        assert_eq!(ArtifactPlan::for_photo_count(3, &settings).point_count, 300);
        assert_eq!(ArtifactPlan::for_photo_count(50, &settings).point_count, 5000);
        assert_eq!(ArtifactPlan::for_photo_count(51, &settings).point_count, 5000);
    }

    #[test]
    fn test_solid_segments_clamped() {
        let settings = ArtifactSettings::default();
        let small = ArtifactPlan::for_photo_count(3, &settings);
        assert_eq!(small.solid_longitude_segments, 8);
        assert_eq!(small.solid_facet_count, 8 * 14);

        let mid = ArtifactPlan::for_photo_count(20, &settings);
        assert_eq!(mid.solid_longitude_segments, 40);

        let huge = ArtifactPlan::for_photo_count(10_000, &settings);
        assert_eq!(huge.solid_longitude_segments, 128);
    }

    #[test]
    fn test_mesh_counts_follow_style() {
        let mut settings = ArtifactSettings::default();
        let plan = ArtifactPlan::for_photo_count(5, &settings);
        assert_eq!((plan.mesh_vertex_count, plan.mesh_face_count), (12, 20));

        settings.mesh = MeshStyle::UvSphere {
            latitude_bands: 4,
            longitude_segments: 6,
        };
        let plan = ArtifactPlan::for_photo_count(5, &settings);
        assert_eq!(plan.mesh_vertex_count, 5 * 7);
        assert_eq!(plan.mesh_face_count, 6 * 6);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(ArtifactKind::PointCloud.file_name(3), "pointcloud_3photos.ply");
        assert_eq!(ArtifactKind::Mesh.file_name(3), "mesh_3photos.obj");
        assert_eq!(ArtifactKind::PrintableSolid.file_name(3), "printable_3photos.stl");
        assert_eq!(ArtifactKind::from_extension("PLY"), Some(ArtifactKind::PointCloud));
        assert_eq!(ArtifactKind::from_extension("abc"), None);
    }

    #[test]
    fn test_mesh_style_serde() {
        let style: MeshStyle = serde_json::from_str(
            r#"{"style":"uv_sphere","latitude_bands":8,"longitude_segments":16}"#,
        )
        .unwrap();
        assert_eq!(
            style,
            MeshStyle::UvSphere {
                latitude_bands: 8,
                longitude_segments: 16
            }
        );
        let ico: MeshStyle = serde_json::from_str(r#"{"style":"icosahedron"}"#).unwrap();
        assert_eq!(ico, MeshStyle::Icosahedron);
    }
}
