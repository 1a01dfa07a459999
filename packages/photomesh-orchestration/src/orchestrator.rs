//! Pipeline orchestrator
//!
//! Drives one run end to end:
//!
//! ```text
//! discover → create session → probe (advisory) → choose mode
//!   Delegated: project descriptor → delegate → collect outputs
//!              (any delegate failure falls back to Synthetic)
//!   Synthetic: six clock-driven stages with progress notifications
//! → artifacts → summary → Completed
//! ```
//!
//! Cancellation is cooperative and honoured only at stage boundaries.

use chrono::{DateTime, Utc};
use photomesh_storage::SharedStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::{Artifact, ArtifactGenerator};
use crate::clock::Clock;
use crate::config::PhotomeshConfig;
use crate::delegate::{Delegate, DelegateRequest};
use crate::discovery::{PhotoDiscoverer, PhotoSet};
use crate::error::{OrchestratorError, Result};
use crate::log::{LogRecord, LogSink, RunEvent, RunLog, Severity};
use crate::probe::{ClusterMode, ClusterState, ClusterStatus, ReadinessProbe};
use crate::run::{PipelineRun, ProcessingMode, RunState, RunStateMachine};
use crate::session::{Session, SessionManager};
use crate::stage::StageId;
use crate::summary::{RunSummary, SummaryReporter};

// ═══════════════════════════════════════════════════════════════════════════
// Report
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of a run that reached `Completed` or `Cancelled`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub session: Session,
    pub photo_count: usize,
    pub final_state: RunState,
    pub mode: ProcessingMode,
    pub fallback_reason: Option<String>,
    pub cluster: ClusterState,
    pub stages_traversed: Vec<StageId>,
    pub artifacts: Vec<Artifact>,
    pub summary_path: Option<PathBuf>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.final_state, RunState::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.final_state, RunState::Cancelled { .. })
    }

    /// Final one-line status
    pub fn status_line(&self) -> String {
        match &self.final_state {
            RunState::Completed { duration_ms, .. } => format!(
                "Completed {} ({} photos, {} mode, {} artifacts) in {:.1} min",
                self.session.id,
                self.photo_count,
                self.mode,
                self.artifacts.len(),
                *duration_ms as f64 / 60_000.0
            ),
            RunState::Cancelled {
                reason,
                last_completed,
                ..
            } => format!(
                "Cancelled {} after {}: {}",
                self.session.id,
                last_completed.map(|s| s.title()).unwrap_or("no stages"),
                reason
            ),
            other => format!("{} {}", other.state_name(), self.session.id),
        }
    }
}

/// What the run produced before it reached a terminal state
struct Outcome {
    mode: ProcessingMode,
    artifacts: Vec<Artifact>,
    summary_path: Option<PathBuf>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════

pub struct PipelineOrchestrator {
    config: Arc<PhotomeshConfig>,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    status: Arc<dyn ClusterStatus>,
    delegate: Option<Arc<dyn Delegate>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Arc<PhotomeshConfig>,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        status: Arc<dyn ClusterStatus>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            status,
            delegate: None,
        }
    }

    /// Prefer this delegate over synthetic processing
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn config(&self) -> &PhotomeshConfig {
        &self.config
    }

    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.storage.session_prefix.clone(),
        )
    }

    fn readiness_probe(&self) -> ReadinessProbe {
        ReadinessProbe::new(
            self.status.clone(),
            self.config.cluster.thresholds(),
            self.config.cluster.probe_timeout(),
        )
    }

    /// Run the pipeline once.
    ///
    /// Returns the report for `Completed` and `Cancelled` runs. Any failure
    /// leaves the run `Failed`, is reported through `log` and returned.
    pub async fn run(&self, log: &dyn LogSink, cancel: &CancellationToken) -> Result<RunReport> {
        match self.execute(log, cancel).await {
            Ok(report) => {
                let severity = if report.is_completed() {
                    Severity::Success
                } else {
                    Severity::Warning
                };
                info!("{}", report.status_line());
                log.emit(
                    severity,
                    RunEvent::Terminal {
                        state: report.final_state.state_name().to_string(),
                        status: report.status_line(),
                    },
                );
                Ok(report)
            }
            Err(e) => {
                log.emit(
                    Severity::Error,
                    RunEvent::Terminal {
                        state: "failed".to_string(),
                        status: format!("Failed: {}", e),
                    },
                );
                Err(e)
            }
        }
    }

    async fn execute(&self, log: &dyn LogSink, cancel: &CancellationToken) -> Result<RunReport> {
        let photos = self.discover(log).await?;
        let session = self
            .sessions()
            .create_session(&self.config.storage.output_dir)
            .await?;
        log.info(&format!(
            "Session {} created at {}",
            session.id,
            session.path.display()
        ));

        let mut sm = RunStateMachine::new(PipelineRun::new(session, photos, self.clock.now()));
        match self.drive(&mut sm, log, cancel).await {
            Ok(outcome) => Ok(report(sm.into_run(), outcome)),
            Err(e) => {
                if let Err(transition) = sm.fail(e.to_string(), self.clock.now()) {
                    warn!("Could not mark run failed: {}", transition);
                }
                if let RunState::Failed {
                    failed_stage: Some(stage),
                    ..
                } = sm.run().state
                {
                    log.error(&format!("{} failed: {}", stage.title(), e));
                } else {
                    log.error(&e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn discover(&self, log: &dyn LogSink) -> Result<PhotoSet> {
        let input = &self.config.storage.input_dir;
        let discoverer = PhotoDiscoverer::new(self.store.clone(), self.config.ingest.policy);
        let outcome = discoverer.scan(input).await?;

        if !outcome.pending_conversion.is_empty() {
            log.warning(&format!(
                "{} photo(s) need conversion before processing and were skipped",
                outcome.pending_conversion.len()
            ));
        }

        let photos = PhotoSet::new(outcome.photos)
            .ok_or_else(|| OrchestratorError::NoPhotosFound(input.display().to_string()))?;
        let stats = photos.stats(self.config.pipeline.time_scale);
        log.info(&format!(
            "Found {} photos ({:.1} MB), estimated {:.1} min of processing",
            stats.count,
            stats.total_bytes as f64 / (1024.0 * 1024.0),
            stats.estimated_synthetic_secs / 60.0
        ));
        Ok(photos)
    }

    async fn drive(
        &self,
        sm: &mut RunStateMachine,
        log: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        sm.begin_probe(self.clock.now())?;
        let cluster = self.readiness_probe().probe().await;
        match cluster.mode {
            ClusterMode::Distributed => log.success(&format!("Cluster: {}", cluster.describe())),
            _ => log.warning(&format!(
                "Cluster: {}; continuing without distributed processing",
                cluster.describe()
            )),
        }

        let mut mode = match self.delegate {
            Some(_) => ProcessingMode::Delegated,
            None => ProcessingMode::Synthetic,
        };
        sm.start(mode, cluster, self.clock.now())?;
        info!(run_id = %sm.run().id, mode = mode.as_str(), "Run started");

        // first stage boundary: nothing has been written or handed off yet
        if cancel.is_cancelled() {
            return self.cancel(sm, log, mode);
        }

        if let Some(delegate) = &self.delegate {
            match self.delegate_stages(delegate.as_ref(), sm, log).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() && cancel.is_cancelled() => {
                    log.warning(&format!("{}; not falling back, run was cancelled", e));
                    return self.cancel(sm, log, mode);
                }
                Err(e) if e.is_recoverable() => {
                    log.warning(&format!("{}; falling back to synthetic processing", e));
                    sm.fall_back(e.to_string(), self.clock.now())?;
                    mode = ProcessingMode::Synthetic;
                }
                Err(e) => return Err(e),
            }
        }

        if mode == ProcessingMode::Synthetic {
            self.synthetic_stages(sm, log, cancel).await?;
        }

        if cancel.is_cancelled() && sm.run().stages_traversed.len() == StageId::COUNT {
            // cancelled while the delegate ran or after the last boundary: no artifacts
            return self.cancel(sm, log, mode);
        }
        if sm.run().state.is_terminal() {
            return Ok(Outcome {
                mode,
                artifacts: Vec::new(),
                summary_path: None,
            });
        }

        let generator = ArtifactGenerator::new(self.store.clone(), self.config.artifacts.clone());
        let session = sm.run().session.clone();
        let photo_count = sm.run().photos.len();
        let artifacts = match mode {
            ProcessingMode::Delegated => {
                let dir = session.file(&self.config.delegate.output_subdir);
                generator
                    .collect_delegate_outputs(&session, &dir, photo_count, log)
                    .await?
            }
            ProcessingMode::Synthetic => generator.generate(&session, photo_count, log).await?,
        };

        let now = self.clock.now();
        let summary_path = SummaryReporter::new(self.store.clone())
            .write(&RunSummary {
                run: sm.run(),
                mode,
                artifacts: &artifacts,
                time_scale: self.config.pipeline.time_scale,
                generated_at: now,
            })
            .await?;

        sm.complete(now)?;
        Ok(Outcome {
            mode,
            artifacts,
            summary_path: Some(summary_path),
        })
    }

    fn cancel(
        &self,
        sm: &mut RunStateMachine,
        log: &dyn LogSink,
        mode: ProcessingMode,
    ) -> Result<Outcome> {
        let reason = "cancellation requested".to_string();
        sm.cancel(reason, self.clock.now())?;
        log.warning(&format!(
            "Run cancelled after {}",
            sm.run()
                .last_completed()
                .map(|s| s.title())
                .unwrap_or("no stages")
        ));
        Ok(Outcome {
            mode,
            artifacts: Vec::new(),
            summary_path: None,
        })
    }

    /// Hand the whole pipeline to the delegate; all stages count as traversed on success
    async fn delegate_stages(
        &self,
        delegate: &dyn Delegate,
        sm: &mut RunStateMachine,
        log: &dyn LogSink,
    ) -> Result<()> {
        let session = sm.run().session.clone();
        let reporter = SummaryReporter::new(self.store.clone());
        let project_file = reporter.write_project(&session, &sm.run().photos).await?;

        let output_dir = session.file(&self.config.delegate.output_subdir);
        self.store.create_dir_all(&output_dir).await?;

        let request = DelegateRequest {
            photos: sm.run().photos.paths(),
            output_dir,
            project_file,
        };
        log.info(&format!(
            "Delegating {} photos to {}",
            request.photos.len(),
            delegate.name()
        ));

        let outcome = delegate.run(&request, log).await?;
        log.success(&format!(
            "{} finished in {:.1} min",
            delegate.name(),
            outcome.duration.as_secs_f64() / 60.0
        ));

        for stage in StageId::ALL {
            if stage != StageId::CameraInit {
                sm.advance(self.clock.now())?;
            }
            sm.complete_stage(self.clock.now())?;
            log.emit(Severity::Success, RunEvent::StageCompleted { stage });
        }
        Ok(())
    }

    async fn synthetic_stages(
        &self,
        sm: &mut RunStateMachine,
        log: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = self.clock.now();
        let photo_count = sm.run().photos.len();

        for stage in StageId::ALL {
            if cancel.is_cancelled() {
                self.cancel(sm, log, ProcessingMode::Synthetic)?;
                return Ok(());
            }
            if stage != StageId::CameraInit {
                sm.advance(self.clock.now())?;
            }
            self.simulate_stage(stage, photo_count, started, log, cancel)
                .await;
            sm.complete_stage(self.clock.now())?;
            log.emit(Severity::Success, RunEvent::StageCompleted { stage });
        }
        Ok(())
    }

    /// Sleep through one stage on the injected clock, emitting progress every cadence
    async fn simulate_stage(
        &self,
        stage: StageId,
        photo_count: usize,
        run_started: DateTime<Utc>,
        log: &dyn LogSink,
        cancel: &CancellationToken,
    ) {
        let spec = stage.spec();
        let scale = self.config.pipeline.time_scale;
        let planned_secs = stage.duration_secs(photo_count) as f64 * scale;
        let duration_ms = (planned_secs * 1000.0).round() as u64;
        let cadence_ms = ((spec.cadence_secs as f64 * scale * 1000.0).round() as u64).max(1);

        log.emit(
            Severity::Info,
            RunEvent::StageStarted {
                stage,
                planned_secs,
            },
        );

        let mut elapsed_ms = 0u64;
        let mut cancel_noted = false;
        while elapsed_ms < duration_ms {
            let step = cadence_ms.min(duration_ms - elapsed_ms);
            self.clock.sleep(Duration::from_millis(step)).await;
            elapsed_ms += step;

            if cancel.is_cancelled() && !cancel_noted {
                log.warning(&format!(
                    "Cancellation requested; finishing {} first",
                    stage.title()
                ));
                cancel_noted = true;
            }
            if elapsed_ms < duration_ms {
                let fraction = elapsed_ms as f64 / duration_ms as f64;
                self.progress(stage, fraction, photo_count, run_started, log);
            }
        }
        self.progress(stage, 1.0, photo_count, run_started, log);
        debug!(stage = stage.as_str(), duration_ms, "Stage simulated");
    }

    fn progress(
        &self,
        stage: StageId,
        fraction: f64,
        photo_count: usize,
        run_started: DateTime<Utc>,
        log: &dyn LogSink,
    ) {
        let elapsed = self.clock.now() - run_started;
        log.emit(
            Severity::Info,
            RunEvent::Progress {
                stage,
                percent: (fraction * 100.0).min(100.0),
                elapsed_secs: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
                metric: stage.metric_at(fraction, photo_count),
                unit: stage.spec().unit.to_string(),
            },
        );
    }

    /// Run in a background task with a fresh cancellation token
    pub fn spawn(self: Arc<Self>, log: Arc<RunLog>) -> RunHandle {
        let cancel = CancellationToken::new();
        let events = log.subscribe();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(log.as_ref(), &token).await });
        RunHandle {
            cancel,
            events,
            join,
        }
    }
}

fn report(run: PipelineRun, outcome: Outcome) -> RunReport {
    RunReport {
        run_id: run.id,
        photo_count: run.photos.len(),
        session: run.session,
        final_state: run.state,
        mode: outcome.mode,
        fallback_reason: run.fallback_reason,
        cluster: run.cluster.unwrap_or_else(ClusterState::unknown),
        stages_traversed: run.stages_traversed,
        artifacts: outcome.artifacts,
        summary_path: outcome.summary_path,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Background handle
// ═══════════════════════════════════════════════════════════════════════════

pub struct RunHandle {
    cancel: CancellationToken,
    events: broadcast::Receiver<LogRecord>,
    join: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    /// Request cancellation; takes effect at the next stage boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Log records appended since the run was spawned
    pub fn events(&mut self) -> &mut broadcast::Receiver<LogRecord> {
        &mut self.events
    }

    pub async fn wait(self) -> Result<RunReport> {
        self.join.await.map_err(|e| {
            OrchestratorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("run task aborted: {}", e),
            ))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Preset;
    use crate::probe::StaticStatus;
    use chrono::TimeZone;
    use photomesh_storage::MemoryStore;

    fn orchestrator(store: Arc<MemoryStore>, preset: Preset) -> (PipelineOrchestrator, Arc<ManualClock>) {
        let mut config = PhotomeshConfig::preset(preset);
        config.storage.input_dir = PathBuf::from("/nas/input");
        config.storage.output_dir = PathBuf::from("/nas/output");
        config.artifacts.seed = Some(3);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        (
            PipelineOrchestrator::new(
                Arc::new(config),
                store,
                clock.clone(),
                Arc::new(StaticStatus::ready(1)),
            ),
            clock,
        )
    }

    fn seeded_store(photos: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_dir("/nas/input");
        for name in photos {
            store.seed_file(format!("/nas/input/{}", name), vec![7u8; 2048]);
        }
        store
    }

    #[tokio::test]
    async fn test_quick_preset_runs_without_sleeping() {
        let store = seeded_store(&["a.jpg", "b.png"]);
        let (orchestrator, clock) = orchestrator(store, Preset::Quick);
        let log = RunLog::new(clock.clone());

        let report = orchestrator
            .run(&log, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_completed());
        assert_eq!(clock.sleep_calls(), 0);
        assert_eq!(report.stages_traversed, StageId::ALL.to_vec());

        let progress: Vec<f64> = log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![100.0; 6]);
    }

    #[tokio::test]
    async fn test_progress_is_monotone_within_stage() {
        let store = seeded_store(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
        let (orchestrator, clock) = orchestrator(store, Preset::Realistic);
        let log = RunLog::new(clock);

        orchestrator
            .run(&log, &CancellationToken::new())
            .await
            .unwrap();

        for stage in StageId::ALL {
            let points: Vec<(f64, u64)> = log
                .events()
                .into_iter()
                .filter_map(|e| match e {
                    RunEvent::Progress {
                        stage: s,
                        percent,
                        metric,
                        ..
                    } if s == stage => Some((percent, metric)),
                    _ => None,
                })
                .collect();
            assert!(!points.is_empty());
            assert!(points.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1));
            assert_eq!(points.last().unwrap().0, 100.0);
            assert_eq!(points.last().unwrap().1, stage.metric_at(1.0, 4));
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_no_stage() {
        let store = seeded_store(&["a.jpg"]);
        let (orchestrator, clock) = orchestrator(store.clone(), Preset::Quick);
        let log = RunLog::new(clock);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orchestrator.run(&log, &cancel).await.unwrap();
        assert!(report.is_cancelled());
        assert!(report.stages_traversed.is_empty());
        assert!(report.artifacts.is_empty());
        assert!(report.summary_path.is_none());
        assert!(store.files_under(&report.session.path).is_empty());
    }

    #[tokio::test]
    async fn test_status_line_mentions_session() {
        let store = seeded_store(&["a.jpg"]);
        let (orchestrator, clock) = orchestrator(store, Preset::Quick);
        let log = RunLog::new(clock);

        let report = orchestrator
            .run(&log, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.status_line().starts_with("Completed photomesh_session_20240601_080000"));
        match log.records().last().map(|r| r.event.clone()) {
            Some(RunEvent::Terminal { state, .. }) => assert_eq!(state, "completed"),
            other => panic!("expected terminal event, got {:?}", other),
        }
    }
}
