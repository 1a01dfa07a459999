//! ASCII PLY point cloud synthesis
//!
//! Points are sampled uniformly inside a sphere and generated in fixed-size
//! chunks on the rayon pool. Each chunk owns an RNG seeded from the run seed
//! and the chunk index, so a seeded run is reproducible regardless of how the
//! pool schedules the chunks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::f64::consts::TAU;

use crate::plan::{ArtifactPlan, ArtifactSettings};
use crate::ArtifactMeta;

/// Points per generation chunk
pub const CHUNK_SIZE: usize = 1024;

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq)]
struct CloudPoint {
    x: f64,
    y: f64,
    z: f64,
    rgb: [u8; 3],
    confidence: f64,
}

fn sample_point(rng: &mut StdRng, radius: f64) -> CloudPoint {
    let phi = rng.gen_range(0.0..TAU);
    let cos_theta: f64 = rng.gen_range(-1.0..=1.0);
    let u: f64 = rng.gen();

    let theta = cos_theta.acos();
    let r = radius * u.cbrt();
    let (sin_t, cos_t) = theta.sin_cos();

    let channel = |v: f64| (128.0 + 127.0 * v).round().clamp(0.0, 255.0) as u8;

    CloudPoint {
        x: r * sin_t * phi.cos(),
        y: r * sin_t * phi.sin(),
        z: r * cos_t,
        rgb: [channel(phi.sin()), channel(phi.cos()), channel(theta.sin())],
        confidence: rng.gen_range(0.7..=1.0),
    }
}

fn chunk_body(
    seed: u64,
    chunk: usize,
    count: usize,
    settings: &ArtifactSettings,
) -> (String, usize) {
    let mut rng = StdRng::seed_from_u64(seed ^ (chunk as u64).wrapping_mul(SEED_STRIDE));
    let mut body = String::with_capacity(count * 48);
    for _ in 0..count {
        let p = sample_point(&mut rng, settings.cloud_radius);
        body.push_str(&format!(
            "{:.6} {:.6} {:.6} {} {} {}",
            p.x, p.y, p.z, p.rgb[0], p.rgb[1], p.rgb[2]
        ));
        if settings.include_confidence {
            body.push_str(&format!(" {:.4}", p.confidence));
        }
        body.push('\n');
    }
    (body, count)
}

fn header(plan: &ArtifactPlan, settings: &ArtifactSettings, meta: &ArtifactMeta) -> String {
    let mut header = String::from("ply\nformat ascii 1.0\n");
    header.push_str(&format!(
        "comment PhotoMesh point cloud from {} photos\n",
        plan.photo_count
    ));
    header.push_str(&format!("comment session {}\n", meta.session_id));
    header.push_str(&format!("element vertex {}\n", plan.point_count));
    for axis in ["x", "y", "z"] {
        header.push_str(&format!("property float {}\n", axis));
    }
    for channel in ["red", "green", "blue"] {
        header.push_str(&format!("property uchar {}\n", channel));
    }
    if settings.include_confidence {
        header.push_str("property float confidence\n");
    }
    header.push_str("end_header\n");
    header
}

/// Render the point cloud; returns the file text and the vertices written
pub fn render(
    plan: &ArtifactPlan,
    settings: &ArtifactSettings,
    meta: &ArtifactMeta,
    seed: u64,
) -> (String, usize) {
    let total = plan.point_count;
    let chunks = total.div_ceil(CHUNK_SIZE);

    let bodies: Vec<(String, usize)> = (0..chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * CHUNK_SIZE;
            let count = CHUNK_SIZE.min(total - start);
            chunk_body(seed, chunk, count, settings)
        })
        .collect();

    let mut text = header(plan, settings, meta);
    let mut written = 0;
    for (body, count) in bodies {
        text.push_str(&body);
        written += count;
    }
    (text, written)
}
