//! Artifact generation and registration for a session
//!
//! Synthesis itself lives in `photomesh-artifacts`; this module plans it for
//! a run, writes the results atomically into the session directory and
//! registers delegate-produced files after checking them with the inspectors.

use photomesh_artifacts::{
    inspect, synthesize, ArtifactKind, ArtifactMeta, ArtifactPlan, ArtifactSettings,
};
use photomesh_storage::SharedStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::log::{LogSink, RunEvent, Severity};
use crate::session::Session;

/// A file registered as an output of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub declared_count: usize,
    pub actual_count: usize,
    pub byte_size: u64,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct ArtifactGenerator {
    store: Arc<dyn SharedStore>,
    settings: ArtifactSettings,
}

impl ArtifactGenerator {
    pub fn new(store: Arc<dyn SharedStore>, settings: ArtifactSettings) -> Self {
        Self { store, settings }
    }

    pub fn plan(&self, photo_count: usize) -> ArtifactPlan {
        ArtifactPlan::for_photo_count(photo_count, &self.settings)
    }

    /// Synthesize and write all three artifacts into the session
    pub async fn generate(
        &self,
        session: &Session,
        photo_count: usize,
        log: &dyn LogSink,
    ) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL {
            artifacts.push(self.generate_one(kind, session, photo_count, log).await?);
        }
        Ok(artifacts)
    }

    async fn generate_one(
        &self,
        kind: ArtifactKind,
        session: &Session,
        photo_count: usize,
        log: &dyn LogSink,
    ) -> Result<Artifact> {
        let plan = self.plan(photo_count);
        let settings = self.settings.clone();
        let meta = ArtifactMeta {
            session_id: session.id.clone(),
        };

        // CPU-bound (rayon inside), keep it off the async workers
        let generated =
            tokio::task::spawn_blocking(move || synthesize(kind, &plan, &settings, &meta))
                .await
                .map_err(|e| {
                    OrchestratorError::artifact_write(&session.file(&kind.file_name(photo_count)), e)
                })??;

        let path = session.file(&generated.file_name);
        self.store
            .write_atomic(&path, generated.contents.as_bytes())
            .await
            .map_err(|e| OrchestratorError::artifact_write(&path, e))?;

        let artifact = Artifact {
            kind,
            path,
            declared_count: generated.declared_count,
            actual_count: generated.actual_count,
            byte_size: generated.byte_size(),
        };
        emit_written(log, &artifact);
        Ok(artifact)
    }

    /// Register delegate outputs found under `dir`; synthesize missing kinds.
    ///
    /// Files that fail inspection or whose declared and actual counts differ
    /// are skipped with a warning.
    pub async fn collect_delegate_outputs(
        &self,
        session: &Session,
        dir: &Path,
        photo_count: usize,
        log: &dyn LogSink,
    ) -> Result<Vec<Artifact>> {
        let patterns: Vec<String> = ArtifactKind::ALL
            .iter()
            .map(|k| format!("*.{}", k.extension()))
            .collect();
        let found = match self.store.glob(dir, &patterns, true).await {
            Ok(found) => found,
            Err(e) => {
                log.warning(&format!(
                    "Delegate output directory {} not readable: {}",
                    dir.display(),
                    e
                ));
                Vec::new()
            }
        };

        let mut artifacts = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL {
            let mut registered = None;
            for path in found.iter().filter(|p| kind_of(p) == Some(kind)) {
                if let Some(artifact) = self.register(kind, path, log).await {
                    registered = Some(artifact);
                    break;
                }
            }

            match registered {
                Some(artifact) => {
                    emit_written(log, &artifact);
                    artifacts.push(artifact);
                }
                None => {
                    log.warning(&format!(
                        "Delegate produced no usable {} file, synthesizing one",
                        kind.extension()
                    ));
                    artifacts.push(self.generate_one(kind, session, photo_count, log).await?);
                }
            }
        }
        Ok(artifacts)
    }

    async fn register(&self, kind: ArtifactKind, path: &Path, log: &dyn LogSink) -> Option<Artifact> {
        let bytes = match self.store.read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log.warning(&format!("Skipping unreadable {}: {}", path.display(), e));
                return None;
            }
        };
        let Ok(text) = std::str::from_utf8(&bytes) else {
            log.warning(&format!("Skipping binary {} (ASCII only)", path.display()));
            return None;
        };

        match inspect(kind, text) {
            Ok(counts) if counts.is_consistent() => {
                debug!("Registered delegate output {}", path.display());
                Some(Artifact {
                    kind,
                    path: path.to_path_buf(),
                    declared_count: counts.declared.unwrap_or(counts.actual),
                    actual_count: counts.actual,
                    byte_size: bytes.len() as u64,
                })
            }
            Ok(counts) => {
                log.warning(&format!(
                    "Skipping {}: declares {:?} {} but contains {}",
                    path.display(),
                    counts.declared,
                    kind.element_label(),
                    counts.actual
                ));
                None
            }
            Err(e) => {
                log.warning(&format!("Skipping {}: {}", path.display(), e));
                None
            }
        }
    }
}

fn kind_of(path: &Path) -> Option<ArtifactKind> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ArtifactKind::from_extension)
}

fn emit_written(log: &dyn LogSink, artifact: &Artifact) {
    info!(
        kind = artifact.kind.as_str(),
        path = %artifact.path.display(),
        "Artifact ready"
    );
    log.emit(
        Severity::Success,
        RunEvent::ArtifactWritten {
            kind: artifact.kind,
            file_name: artifact.file_name(),
            elements: artifact.actual_count,
            bytes: artifact.byte_size,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::log::RunLog;
    use chrono::{TimeZone, Utc};
    use photomesh_storage::MemoryStore;

    fn session() -> Session {
        Session {
            id: "photomesh_session_20240101_120000".to_string(),
            path: PathBuf::from("/out/photomesh_session_20240101_120000"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    fn setup() -> (Arc<MemoryStore>, ArtifactGenerator, RunLog) {
        let store = Arc::new(MemoryStore::new());
        store.seed_dir("/out/photomesh_session_20240101_120000");
        let settings = ArtifactSettings {
            seed: Some(11),
            ..ArtifactSettings::default()
        };
        let generator = ArtifactGenerator::new(store.clone(), settings);
        let log = RunLog::new(Arc::new(ManualClock::new(Utc::now())));
        (store, generator, log)
    }

    #[tokio::test]
    async fn test_generate_writes_three_files() {
        let (store, generator, log) = setup();
        let session = session();

        let artifacts = generator.generate(&session, 3, &log).await.unwrap();
        assert_eq!(artifacts.len(), 3);
        for artifact in &artifacts {
            assert_eq!(artifact.declared_count, artifact.actual_count);
            let written = store.contents(&artifact.path).unwrap();
            assert_eq!(written.len() as u64, artifact.byte_size);
        }
        assert_eq!(artifacts[0].actual_count, 300);
        assert_eq!(artifacts[1].actual_count, 20);

        let written = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::ArtifactWritten { .. }))
            .count();
        assert_eq!(written, 3);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_artifact_write() {
        let (store, generator, log) = setup();
        let session = session();
        store.fail_writes_under(&session.path);

        let err = generator.generate(&session, 2, &log).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ArtifactWrite { .. }));
        assert!(store.files_under(&session.path).is_empty());
    }

    #[tokio::test]
    async fn test_collect_registers_valid_and_fills_gaps() {
        let (store, generator, log) = setup();
        let session = session();
        let dir = session.file("delegate_output");
        store.seed_dir(&dir);
        store.seed_file(
            dir.join("dense.ply"),
            "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 1 1\n",
        );
        // declares 5 faces, has 1
        store.seed_file(
            dir.join("textured.obj"),
            "# faces: 5\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
        );

        let artifacts = generator
            .collect_delegate_outputs(&session, &dir, 4, &log)
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 3);

        assert_eq!(artifacts[0].path, dir.join("dense.ply"));
        assert_eq!(artifacts[0].actual_count, 2);

        assert_eq!(artifacts[1].path, session.file("mesh_4photos.obj"));
        assert_eq!(artifacts[2].path, session.file("printable_4photos.stl"));

        assert!(log
            .records()
            .iter()
            .any(|r| r.severity == Severity::Warning && r.event.describe().contains("textured.obj")));
    }
}
