//! Tessellation primitives shared by the OBJ and STL writers

use std::f64::consts::PI;

/// Below this length a facet normal is treated as degenerate
const DEGENERATE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector, or `None` when the length is (near) zero
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len < DEGENERATE_EPSILON || !len.is_finite() {
            None
        } else {
            Some(self.scale(1.0 / len))
        }
    }
}

/// Indexed triangle mesh with 0-based indices
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Empty when the mesh carries no texture coordinates
    pub uvs: Vec<[f64; 2]>,
    pub triangles: Vec<[usize; 3]>,
}

impl TriMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    /// Outward facet normal from the winding, `Vec3::UP` if degenerate
    pub fn facet_normal(&self, triangle: [usize; 3]) -> Vec3 {
        let [a, b, c] = triangle.map(|i| self.positions[i]);
        b.sub(a).cross(c.sub(a)).normalized().unwrap_or(Vec3::UP)
    }
}

/// Vertex count of a UV sphere with the given band/segment counts
pub fn uv_sphere_vertex_count(latitude_bands: usize, longitude_segments: usize) -> usize {
    (latitude_bands + 1) * (longitude_segments + 1)
}

/// Triangle count of a UV sphere; pole rows contribute one triangle per segment
pub fn uv_sphere_face_count(latitude_bands: usize, longitude_segments: usize) -> usize {
    longitude_segments * (2 * latitude_bands).saturating_sub(2)
}

/// Latitude/longitude sphere centred at the origin.
///
/// Callers pass `latitude_bands >= 2` and `longitude_segments >= 3`; the pole
/// rows emit a single triangle per segment so no facet is degenerate.
pub fn uv_sphere(latitude_bands: usize, longitude_segments: usize, radius: f64) -> TriMesh {
    let lat = latitude_bands;
    let lon = longitude_segments;
    let mut mesh = TriMesh::default();

    for i in 0..=lat {
        let theta = PI * i as f64 / lat as f64;
        let (sin_t, cos_t) = theta.sin_cos();
        for j in 0..=lon {
            let phi = 2.0 * PI * j as f64 / lon as f64;
            let (sin_p, cos_p) = phi.sin_cos();
            let normal = Vec3::new(sin_t * cos_p, cos_t, sin_t * sin_p);
            mesh.positions.push(normal.scale(radius));
            mesh.normals.push(normal);
            mesh.uvs
                .push([j as f64 / lon as f64, 1.0 - i as f64 / lat as f64]);
        }
    }

    let stride = lon + 1;
    for i in 0..lat {
        for j in 0..lon {
            let a = i * stride + j;
            let b = a + 1;
            let c = a + stride;
            let d = c + 1;
            if i != 0 {
                mesh.triangles.push([a, b, c]);
            }
            if i != lat - 1 {
                mesh.triangles.push([b, d, c]);
            }
        }
    }

    mesh
}

/// 1-based faces of the regular icosahedron
const ICOSAHEDRON_FACES: [[usize; 3]; 20] = [
    [1, 12, 6],
    [1, 6, 2],
    [1, 2, 8],
    [1, 8, 11],
    [1, 11, 12],
    [2, 6, 10],
    [6, 12, 5],
    [12, 11, 3],
    [11, 8, 7],
    [8, 2, 9],
    [4, 10, 5],
    [4, 5, 3],
    [4, 3, 7],
    [4, 7, 9],
    [4, 9, 10],
    [5, 10, 6],
    [3, 5, 12],
    [7, 3, 11],
    [9, 7, 8],
    [10, 9, 2],
];

/// Regular icosahedron (12 vertices, 20 faces) with per-vertex normals
pub fn icosahedron(scale: f64) -> TriMesh {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let raw = [
        (-1.0, phi, 0.0),
        (1.0, phi, 0.0),
        (-1.0, -phi, 0.0),
        (1.0, -phi, 0.0),
        (0.0, -1.0, phi),
        (0.0, 1.0, phi),
        (0.0, -1.0, -phi),
        (0.0, 1.0, -phi),
        (phi, 0.0, -1.0),
        (phi, 0.0, 1.0),
        (-phi, 0.0, -1.0),
        (-phi, 0.0, 1.0),
    ];

    let mut mesh = TriMesh::default();
    for (x, y, z) in raw {
        let v = Vec3::new(x, y, z);
        mesh.positions.push(v.scale(scale));
        mesh.normals.push(v.normalized().unwrap_or(Vec3::UP));
    }
    mesh.triangles = ICOSAHEDRON_FACES
        .iter()
        .map(|f| [f[0] - 1, f[1] - 1, f[2] - 1])
        .collect();
    mesh
}
