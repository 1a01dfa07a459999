//! ASCII PLY / OBJ / STL inspectors
//!
//! Used to verify synthesized output and to register files produced by an
//! external reconstruction program. Only ASCII encodings are understood;
//! binary variants are reported as `Unsupported`.

use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, Result};
use crate::plan::ArtifactKind;

/// Declared vs. actually present element counts of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounts {
    /// `None` when the format carries no declaration (STL)
    pub declared: Option<usize>,
    pub actual: usize,
}

impl ElementCounts {
    /// True when nothing is declared or the declaration matches
    pub fn is_consistent(&self) -> bool {
        self.declared.map_or(true, |d| d == self.actual)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PLY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyReport {
    pub declared_vertices: usize,
    pub vertex_properties: usize,
    /// Sum of all declared element counts (vertex, face, ...)
    pub declared_records: usize,
    pub data_lines: usize,
    pub vertex_lines: usize,
}

pub fn inspect_ply(text: &str) -> Result<PlyReport> {
    let mut lines = text.lines().enumerate();

    match lines.next() {
        Some((_, "ply")) => {}
        _ => return Err(ArtifactError::MissingHeader("ply")),
    }

    let mut declared_vertices = None;
    let mut vertex_properties = 0;
    let mut declared_records = 0usize;
    let mut current_element = String::new();
    let mut saw_end = false;

    for (idx, raw) in lines.by_ref() {
        let line = raw.trim();
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("format") => {
                let format = parts.next().unwrap_or_default();
                if format != "ascii" {
                    return Err(ArtifactError::Unsupported(format!("PLY {}", format)));
                }
            }
            Some("element") => {
                let name = parts.next().unwrap_or_default().to_string();
                let count: usize = parts
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| ArtifactError::malformed(idx + 1, "element count"))?;
                if name == "vertex" {
                    declared_vertices = Some(count);
                }
                declared_records = declared_records
                    .checked_add(count)
                    .ok_or_else(|| ArtifactError::malformed(idx + 1, "element counts overflow"))?;
                current_element = name;
            }
            Some("property") if current_element == "vertex" => vertex_properties += 1,
            Some("end_header") => {
                saw_end = true;
                break;
            }
            _ => {}
        }
    }

    if !saw_end {
        return Err(ArtifactError::MissingHeader("end_header"));
    }
    let declared_vertices =
        declared_vertices.ok_or(ArtifactError::MissingHeader("element vertex"))?;

    let mut data_lines = 0;
    let mut vertex_lines = 0;
    for (idx, raw) in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if data_lines < declared_vertices {
            let fields = line.split_whitespace().count();
            if fields != vertex_properties {
                return Err(ArtifactError::malformed(
                    idx + 1,
                    format!("expected {} vertex fields, found {}", vertex_properties, fields),
                ));
            }
            vertex_lines += 1;
        }
        data_lines += 1;
    }

    Ok(PlyReport {
        declared_vertices,
        vertex_properties,
        declared_records,
        data_lines,
        vertex_lines,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// OBJ
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjReport {
    /// From a `# faces: N` comment, when present
    pub declared_faces: Option<usize>,
    pub vertices: usize,
    pub texcoords: usize,
    pub normals: usize,
    pub faces: usize,
    pub max_index: usize,
}

fn face_vertex_index(token: &str, line: usize, vertices_so_far: usize) -> Result<usize> {
    let head = token.split('/').next().unwrap_or_default();
    let index: i64 = head
        .parse()
        .map_err(|_| ArtifactError::malformed(line, format!("bad face index '{}'", token)))?;
    // negative indices are relative to the vertices seen so far
    let resolved = if index < 0 {
        vertices_so_far as i64 + 1 + index
    } else {
        index
    };
    if resolved < 1 || resolved as usize > vertices_so_far {
        return Err(ArtifactError::malformed(
            line,
            format!(
                "face index {} outside 1..={} declared so far",
                index, vertices_so_far
            ),
        ));
    }
    Ok(resolved as usize)
}

pub fn inspect_obj(text: &str) -> Result<ObjReport> {
    let mut report = ObjReport {
        declared_faces: None,
        vertices: 0,
        texcoords: 0,
        normals: 0,
        faces: 0,
        max_index: 0,
    };

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(count) = comment.trim().strip_prefix("faces:") {
                report.declared_faces = count.trim().parse().ok();
            }
            continue;
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => report.vertices += 1,
            Some("vt") => report.texcoords += 1,
            Some("vn") => report.normals += 1,
            Some("f") => {
                let mut corners = 0;
                for token in parts {
                    let index = face_vertex_index(token, idx + 1, report.vertices)?;
                    report.max_index = report.max_index.max(index);
                    corners += 1;
                }
                if corners < 3 {
                    return Err(ArtifactError::malformed(idx + 1, "face with < 3 corners"));
                }
                report.faces += 1;
            }
            _ => {}
        }
    }

    Ok(report)
}

// ═══════════════════════════════════════════════════════════════════════════
// STL
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StlReport {
    pub name: String,
    pub facets: usize,
}

pub fn inspect_stl(text: &str) -> Result<StlReport> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let name = match lines.next() {
        Some((_, first)) => match first.trim().strip_prefix("solid") {
            Some(rest) => rest.trim().to_string(),
            None => return Err(ArtifactError::MissingHeader("solid")),
        },
        None => return Err(ArtifactError::MissingHeader("solid")),
    };

    let mut facets = 0;
    let mut vertices_in_loop = 0;
    let mut in_facet = false;
    let mut closed = false;

    for (idx, raw) in lines {
        if closed {
            return Err(ArtifactError::malformed(idx + 1, "content after endsolid"));
        }
        let line = raw.trim();
        if line.starts_with("facet normal") {
            if in_facet {
                return Err(ArtifactError::malformed(idx + 1, "nested facet"));
            }
            in_facet = true;
            vertices_in_loop = 0;
        } else if line.starts_with("vertex") {
            vertices_in_loop += 1;
        } else if line == "endfacet" {
            if !in_facet || vertices_in_loop != 3 {
                return Err(ArtifactError::malformed(idx + 1, "facet without 3 vertices"));
            }
            in_facet = false;
            facets += 1;
        } else if let Some(rest) = line.strip_prefix("endsolid") {
            if rest.trim() != name {
                return Err(ArtifactError::malformed(
                    idx + 1,
                    format!("endsolid '{}' does not match solid '{}'", rest.trim(), name),
                ));
            }
            closed = true;
        }
    }

    if !closed {
        return Err(ArtifactError::MissingHeader("endsolid"));
    }
    Ok(StlReport { name, facets })
}

/// Inspect a file of the given kind and return its element counts
pub fn inspect(kind: ArtifactKind, text: &str) -> Result<ElementCounts> {
    match kind {
        ArtifactKind::PointCloud => {
            let report = inspect_ply(text)?;
            Ok(ElementCounts {
                declared: Some(report.declared_vertices),
                actual: report.vertex_lines,
            })
        }
        ArtifactKind::Mesh => {
            let report = inspect_obj(text)?;
            Ok(ElementCounts {
                declared: report.declared_faces,
                actual: report.faces,
            })
        }
        ArtifactKind::PrintableSolid => {
            let report = inspect_stl(text)?;
            Ok(ElementCounts {
                declared: None,
                actual: report.facets,
            })
        }
    }
}
