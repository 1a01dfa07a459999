//! Run manifest and delegate project descriptor

use chrono::{DateTime, Utc};
use photomesh_storage::SharedStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::artifacts::Artifact;
use crate::discovery::{FormatTag, PhotoSet};
use crate::error::{OrchestratorError, Result};
use crate::run::{PipelineRun, ProcessingMode};
use crate::session::Session;
use crate::stage::StageId;

pub const SUMMARY_FILE_NAME: &str = "processing_summary.txt";
pub const PROJECT_FILE_NAME: &str = "reconstruction_project.json";

fn megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

// ═══════════════════════════════════════════════════════════════════════════
// processing_summary.txt
// ═══════════════════════════════════════════════════════════════════════════

/// Everything the manifest reports about one finished run
pub struct RunSummary<'a> {
    pub run: &'a PipelineRun,
    pub mode: ProcessingMode,
    pub artifacts: &'a [Artifact],
    pub time_scale: f64,
    pub generated_at: DateTime<Utc>,
}

impl RunSummary<'_> {
    pub fn render(&self) -> String {
        let run = self.run;
        let photos = &run.photos;
        let stats = photos.stats(self.time_scale);
        let mut out = String::new();

        out.push_str("PhotoMesh Reconstruction Summary\n");
        out.push_str("================================\n");
        out.push_str(&format!("Session: {}\n", run.session.id));
        out.push_str(&format!(
            "Created: {}\n",
            run.session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str(&format!(
            "Generated: {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str(&format!("Run: {}\n", run.id));

        out.push_str("\nDataset:\n");
        out.push_str(&format!("  Photos: {}\n", stats.count));
        for (format, count) in &stats.per_format {
            out.push_str(&format!("    {}: {}\n", format.as_str().to_uppercase(), count));
        }
        out.push_str(&format!("  Total size: {}\n", megabytes(stats.total_bytes)));
        out.push_str(&format!("  Average size: {}\n", megabytes(stats.average_bytes)));
        out.push_str(&format!(
            "  Estimated synthetic duration: {:.1} min\n",
            stats.estimated_synthetic_secs / 60.0
        ));

        out.push_str("\nProcessing:\n");
        out.push_str(&format!("  Mode: {}\n", self.mode));
        if let Some(reason) = &run.fallback_reason {
            out.push_str(&format!("  Fallback reason: {}\n", reason));
        }
        let cluster = run
            .cluster
            .map(|c| c.describe())
            .unwrap_or_else(|| "not probed".to_string());
        out.push_str(&format!("  Cluster: {}\n", cluster));

        out.push_str("\nStages:\n");
        for stage in StageId::ALL {
            let mark = if run.stages_traversed.contains(&stage) {
                "done"
            } else {
                "skipped"
            };
            out.push_str(&format!(
                "  {}. {:<24} {:>7}  {:.1} min  {} {}\n",
                stage.ordinal() + 1,
                stage.title(),
                mark,
                stage.duration_secs(photos.len()) as f64 * self.time_scale / 60.0,
                stage.metric_at(1.0, photos.len()),
                stage.spec().unit
            ));
        }

        out.push_str(&format!("\nArtifacts: {}\n", self.artifacts.len()));
        for artifact in self.artifacts {
            out.push_str(&format!(
                "  - {} ({} {}, {})\n",
                artifact.file_name(),
                artifact.actual_count,
                artifact.kind.element_label(),
                megabytes(artifact.byte_size)
            ));
        }

        out.push_str(&format!("\nPhotos: {}\n", photos.len()));
        for (i, photo) in photos.iter().enumerate() {
            out.push_str(&format!(
                "  {:3}. {} ({})\n",
                i + 1,
                photo.file_name(),
                megabytes(photo.byte_size)
            ));
        }
        out
    }
}

pub struct SummaryReporter {
    store: Arc<dyn SharedStore>,
}

impl SummaryReporter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Write `processing_summary.txt` into the run's session
    pub async fn write(&self, summary: &RunSummary<'_>) -> Result<PathBuf> {
        let path = summary.run.session.file(SUMMARY_FILE_NAME);
        self.store
            .write_atomic(&path, summary.render().as_bytes())
            .await
            .map_err(|e| OrchestratorError::artifact_write(&path, e))?;
        info!("Summary written to {}", path.display());
        Ok(path)
    }

    /// Write the project descriptor handed to the delegate
    pub async fn write_project(&self, session: &Session, photos: &PhotoSet) -> Result<PathBuf> {
        let descriptor = ProjectDescriptor::new(session, photos);
        let json = serde_json::to_vec_pretty(&descriptor)?;
        let path = session.file(PROJECT_FILE_NAME);
        self.store
            .write_atomic(&path, &json)
            .await
            .map_err(|e| OrchestratorError::artifact_write(&path, e))?;
        Ok(path)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// reconstruction_project.json
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub header: ProjectHeader,
    pub viewpoints: Vec<Viewpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectHeader {
    pub generator: String,
    pub generator_version: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub stages: Vec<StageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewpoint {
    pub view_id: usize,
    pub pose_id: usize,
    pub path: String,
    pub byte_size: u64,
    pub format: FormatTag,
}

impl ProjectDescriptor {
    pub fn new(session: &Session, photos: &PhotoSet) -> Self {
        Self {
            header: ProjectHeader {
                generator: "photomesh".to_string(),
                generator_version: env!("CARGO_PKG_VERSION").to_string(),
                session_id: session.id.clone(),
                created_at: session.created_at,
                stages: StageId::ALL.to_vec(),
            },
            viewpoints: photos
                .iter()
                .enumerate()
                .map(|(i, photo)| Viewpoint {
                    view_id: i,
                    pose_id: i,
                    path: photo.path.to_string_lossy().replace('\\', "/"),
                    byte_size: photo.byte_size,
                    format: photo.format,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Artifact;
    use crate::discovery::PhotoRecord;
    use chrono::TimeZone;
    use photomesh_artifacts::ArtifactKind;
    use photomesh_storage::MemoryStore;

    fn run() -> PipelineRun {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let session = Session {
            id: "photomesh_session_20240501_093000".to_string(),
            path: PathBuf::from("/out/photomesh_session_20240501_093000"),
            created_at: at,
        };
        let photos = PhotoSet::new(vec![
            PhotoRecord {
                path: PathBuf::from("/in/b.heic"),
                byte_size: 3 * 1024 * 1024,
                format: FormatTag::Heic,
            },
            PhotoRecord {
                path: PathBuf::from("/in/a.jpg"),
                byte_size: 1024 * 1024,
                format: FormatTag::Jpeg,
            },
        ])
        .unwrap();
        let mut run = PipelineRun::new(session, photos, at);
        run.stages_traversed = StageId::ALL.to_vec();
        run.fallback_reason = Some("Delegate failure: exited with status 1".to_string());
        run
    }

    #[test]
    fn test_render_sections() {
        let run = run();
        let artifacts = vec![Artifact {
            kind: ArtifactKind::PointCloud,
            path: run.session.file("pointcloud_2photos.ply"),
            declared_count: 200,
            actual_count: 200,
            byte_size: 4096,
        }];
        let text = RunSummary {
            run: &run,
            mode: ProcessingMode::Synthetic,
            artifacts: &artifacts,
            time_scale: 1.0,
            generated_at: run.created_at,
        }
        .render();

        assert!(text.contains("Session: photomesh_session_20240501_093000"));
        assert!(text.contains("Photos: 2"));
        assert!(text.contains("JPEG: 1"));
        assert!(text.contains("HEIC: 1"));
        assert!(text.contains("Total size: 4.0 MB"));
        assert!(text.contains("Mode: synthetic"));
        assert!(text.contains("Fallback reason: Delegate failure"));
        assert!(text.contains("Cluster: not probed"));
        assert!(text.contains("Artifacts: 1"));
        assert!(text.contains("pointcloud_2photos.ply (200 vertices"));
        assert!(text.contains("  1. a.jpg (1.0 MB)"));
        assert!(text.contains("  2. b.heic (3.0 MB)"));
        assert_eq!(text.matches(" done ").count(), 6);
    }

    #[test]
    fn test_render_line_layout() {
        let run = run();
        let text = RunSummary {
            run: &run,
            mode: ProcessingMode::Delegated,
            artifacts: &[],
            time_scale: 0.0,
            generated_at: run.created_at,
        }
        .render();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "PhotoMesh Reconstruction Summary");
        assert_eq!(lines[2], "Session: photomesh_session_20240501_093000");
        assert_eq!(lines[3], "Created: 2024-05-01 09:30:00 UTC");
        assert!(text.ends_with('\n'));

        let section = |name: &str| lines.iter().position(|l| *l == name).unwrap();
        assert!(section("Dataset:") < section("Processing:"));
        assert!(section("Processing:") < section("Stages:"));
        assert!(section("Stages:") < section("Artifacts: 0"));
        assert!(section("Artifacts: 0") < section("Photos: 2"));
        assert_eq!(lines[section("Dataset:") - 1], "");
        assert!(text.contains("  Estimated synthetic duration: 0.0 min\n"));
    }

    #[tokio::test]
    async fn test_project_descriptor_written_camel_case() {
        let run = run();
        let store = Arc::new(MemoryStore::new());
        store.seed_dir(&run.session.path);
        let reporter = SummaryReporter::new(store.clone());

        let path = reporter.write_project(&run.session, &run.photos).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&store.contents(&path).unwrap()).unwrap();

        assert_eq!(json["header"]["sessionId"], "photomesh_session_20240501_093000");
        assert_eq!(json["header"]["stages"][0], "camera_init");
        assert_eq!(json["viewpoints"][0]["viewId"], 0);
        assert_eq!(json["viewpoints"][0]["path"], "/in/a.jpg");
        assert_eq!(json["viewpoints"][1]["format"], "heic");
        assert_eq!(json["viewpoints"][1]["byteSize"], 3 * 1024 * 1024);
    }
}
