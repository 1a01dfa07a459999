//! ASCII STL printable solid synthesis

use crate::geometry::{uv_sphere, Vec3};
use crate::plan::{ArtifactPlan, ArtifactSettings};

/// Solid name for a run, no whitespace
pub fn solid_name(photo_count: usize) -> String {
    format!("photomesh_{}photos", photo_count)
}

fn push_vertex(text: &mut String, v: Vec3) {
    text.push_str(&format!("      vertex {:.6e} {:.6e} {:.6e}\n", v.x, v.y, v.z));
}

/// Render the solid; returns the file text and the facets written
pub fn render(plan: &ArtifactPlan, settings: &ArtifactSettings) -> (String, usize) {
    let mesh = uv_sphere(
        plan.solid_latitude_bands,
        plan.solid_longitude_segments,
        settings.solid_radius,
    );
    let name = solid_name(plan.photo_count);

    let mut text = format!("solid {}\n", name);
    let mut written = 0;
    for tri in &mesh.triangles {
        let n = mesh.facet_normal(*tri);
        text.push_str(&format!(
            "  facet normal {:.6e} {:.6e} {:.6e}\n    outer loop\n",
            n.x, n.y, n.z
        ));
        for &i in tri {
            push_vertex(&mut text, mesh.positions[i]);
        }
        text.push_str("    endloop\n  endfacet\n");
        written += 1;
    }
    text.push_str(&format!("endsolid {}\n", name));

    (text, written)
}
