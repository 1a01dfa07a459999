//! Wavefront OBJ mesh synthesis

use crate::geometry::{icosahedron, uv_sphere, TriMesh};
use crate::plan::{ArtifactPlan, ArtifactSettings, MeshStyle};
use crate::ArtifactMeta;

pub fn build_mesh(settings: &ArtifactSettings) -> TriMesh {
    match settings.mesh {
        MeshStyle::Icosahedron => icosahedron(settings.mesh_scale),
        MeshStyle::UvSphere {
            latitude_bands,
            longitude_segments,
        } => uv_sphere(latitude_bands, longitude_segments, settings.mesh_scale),
    }
}

/// Render the mesh; returns the file text and the faces written.
///
/// All `v`/`vt`/`vn` records precede the first `f`, indices are 1-based.
pub fn render(
    plan: &ArtifactPlan,
    settings: &ArtifactSettings,
    meta: &ArtifactMeta,
) -> (String, usize) {
    let mesh = build_mesh(settings);
    let textured = !mesh.uvs.is_empty();

    let mut text = String::new();
    text.push_str(&format!("# PhotoMesh mesh from {} photos\n", plan.photo_count));
    text.push_str(&format!("# session {}\n", meta.session_id));
    text.push_str(&format!("# vertices: {}\n", plan.mesh_vertex_count));
    text.push_str(&format!("# faces: {}\n", plan.mesh_face_count));
    text.push_str("o photomesh_mesh\n");

    for p in &mesh.positions {
        text.push_str(&format!("v {:.6} {:.6} {:.6}\n", p.x, p.y, p.z));
    }
    for uv in &mesh.uvs {
        text.push_str(&format!("vt {:.6} {:.6}\n", uv[0], uv[1]));
    }
    for n in &mesh.normals {
        text.push_str(&format!("vn {:.6} {:.6} {:.6}\n", n.x, n.y, n.z));
    }

    let mut written = 0;
    for tri in &mesh.triangles {
        let [a, b, c] = tri.map(|i| i + 1);
        if textured {
            text.push_str(&format!("f {a}/{a}/{a} {b}/{b}/{b} {c}/{c}/{c}\n"));
        } else {
            text.push_str(&format!("f {a}//{a} {b}//{b} {c}//{c}\n"));
        }
        written += 1;
    }

    (text, written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ArtifactMeta {
        ArtifactMeta {
            session_id: "s".to_string(),
        }
    }

    #[test]
    fn test_icosahedron_obj() {
        let settings = ArtifactSettings::default();
        let plan = ArtifactPlan::for_photo_count(3, &settings);
        let (text, faces) = render(&plan, &settings, &meta());

        assert_eq!(faces, 20);
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 12);
        assert_eq!(text.lines().filter(|l| l.starts_with("vn ")).count(), 12);
        assert_eq!(text.lines().filter(|l| l.starts_with("vt ")).count(), 0);
        assert!(text.contains("\nf 1//1 12//12 6//6\n"));
    }

    #[test]
    fn test_uv_sphere_obj_uses_full_triplets() {
        let settings = ArtifactSettings {
            mesh: MeshStyle::UvSphere {
                latitude_bands: 4,
                longitude_segments: 8,
            },
            ..ArtifactSettings::default()
        };
        let plan = ArtifactPlan::for_photo_count(3, &settings);
        let (text, faces) = render(&plan, &settings, &meta());

        assert_eq!(faces, plan.mesh_face_count);
        assert_eq!(
            text.lines().filter(|l| l.starts_with("vt ")).count(),
            plan.mesh_vertex_count
        );
        let first_face = text.lines().find(|l| l.starts_with("f ")).unwrap();
        assert_eq!(first_face.split(' ').nth(1).unwrap().split('/').count(), 3);
        assert!(!first_face.contains("//"));
    }

    #[test]
    fn test_vertices_precede_faces() {
        let settings = ArtifactSettings::default();
        let plan = ArtifactPlan::for_photo_count(1, &settings);
        let (text, _) = render(&plan, &settings, &meta());

        let last_vertex = text.lines().collect::<Vec<_>>().iter().rposition(|l| l.starts_with('v')).unwrap();
        let first_face = text.lines().position(|l| l.starts_with("f ")).unwrap();
        assert!(last_vertex < first_face);
    }
}
