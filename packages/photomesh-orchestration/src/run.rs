//! Pipeline run model and its state machine
//!
//! `Created → Probing → Running(stage 0..5) → Completed | Failed | Cancelled`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discovery::PhotoSet;
use crate::error::{OrchestratorError, Result};
use crate::probe::ClusterState;
use crate::session::Session;
use crate::stage::StageId;

/// How the stages are carried out, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// An external reconstruction program does the work
    Delegated,
    /// Clock-driven simulation with progress notifications
    Synthetic,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Delegated => "delegated",
            ProcessingMode::Synthetic => "synthetic",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunState {
    Created {
        created_at: DateTime<Utc>,
    },
    Probing {
        started_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        stage: StageId,
        mode: ProcessingMode,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        failed_at: DateTime<Utc>,
        error: String,
        failed_stage: Option<StageId>,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
        last_completed: Option<StageId>,
    },
}

impl RunState {
    pub fn state_name(&self) -> &'static str {
        match self {
            RunState::Created { .. } => "created",
            RunState::Probing { .. } => "probing",
            RunState::Running { .. } => "running",
            RunState::Completed { .. } => "completed",
            RunState::Failed { .. } => "failed",
            RunState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed { .. } | RunState::Failed { .. } | RunState::Cancelled { .. }
        )
    }
}

/// One execution of the pipeline over a photo set
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub session: Session,
    pub photos: PhotoSet,
    pub state: RunState,
    pub stages_traversed: Vec<StageId>,
    pub cluster: Option<ClusterState>,
    /// Why Delegated mode was abandoned, if it was
    pub fallback_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(session: Session, photos: PhotoSet, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            photos,
            state: RunState::Created { created_at: now },
            stages_traversed: Vec::new(),
            cluster: None,
            fallback_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_stage(&self) -> Option<StageId> {
        match self.state {
            RunState::Running { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<ProcessingMode> {
        match self.state {
            RunState::Running { mode, .. } => Some(mode),
            _ => None,
        }
    }

    pub fn last_completed(&self) -> Option<StageId> {
        self.stages_traversed.last().copied()
    }
}

/// Guards every transition of a [`PipelineRun`]
pub struct RunStateMachine {
    run: PipelineRun,
}

impl RunStateMachine {
    pub fn new(run: PipelineRun) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub fn run_mut(&mut self) -> &mut PipelineRun {
        &mut self.run
    }

    pub fn into_run(self) -> PipelineRun {
        self.run
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.run.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    fn set(&mut self, state: RunState, now: DateTime<Utc>) {
        self.run.state = state;
        self.run.updated_at = now;
    }

    /// Transition: CREATED → PROBING
    pub fn begin_probe(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.run.state {
            RunState::Created { .. } => {
                self.set(RunState::Probing { started_at: now }, now);
                Ok(())
            }
            _ => Err(self.invalid("probing")),
        }
    }

    /// Transition: PROBING → RUNNING(first stage)
    pub fn start(
        &mut self,
        mode: ProcessingMode,
        cluster: ClusterState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.run.state {
            RunState::Probing { started_at } => {
                self.run.cluster = Some(cluster);
                self.set(
                    RunState::Running {
                        started_at,
                        stage: StageId::CameraInit,
                        mode,
                    },
                    now,
                );
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Delegated → Synthetic, only before any stage has completed
    pub fn fall_back(&mut self, reason: String, now: DateTime<Utc>) -> Result<()> {
        match self.run.state {
            RunState::Running {
                started_at,
                stage,
                mode: ProcessingMode::Delegated,
            } if self.run.stages_traversed.is_empty() => {
                self.run.fallback_reason = Some(reason);
                self.set(
                    RunState::Running {
                        started_at,
                        stage,
                        mode: ProcessingMode::Synthetic,
                    },
                    now,
                );
                Ok(())
            }
            _ => Err(self.invalid("running (synthetic fallback)")),
        }
    }

    /// Record that the current stage finished
    pub fn complete_stage(&mut self, now: DateTime<Utc>) -> Result<StageId> {
        match self.run.state {
            RunState::Running { stage, .. } if self.run.last_completed() != Some(stage) => {
                self.run.stages_traversed.push(stage);
                self.run.updated_at = now;
                Ok(stage)
            }
            _ => Err(self.invalid("stage completed")),
        }
    }

    /// Transition: RUNNING(k, completed) → RUNNING(k+1)
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<StageId> {
        match self.run.state {
            RunState::Running {
                started_at,
                stage,
                mode,
            } if self.run.last_completed() == Some(stage) => {
                let next = stage
                    .next()
                    .ok_or_else(|| self.invalid("running (past last stage)"))?;
                self.set(
                    RunState::Running {
                        started_at,
                        stage: next,
                        mode,
                    },
                    now,
                );
                Ok(next)
            }
            _ => Err(self.invalid("running (next stage)")),
        }
    }

    /// Transition: RUNNING(last, completed) → COMPLETED
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.run.state {
            RunState::Running { started_at, .. }
                if self.run.stages_traversed.as_slice() == StageId::ALL.as_slice() =>
            {
                let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;
                self.set(
                    RunState::Completed {
                        started_at,
                        completed_at: now,
                        duration_ms,
                    },
                    now,
                );
                Ok(())
            }
            _ => Err(self.invalid("completed")),
        }
    }

    /// Transition: * → FAILED
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        if self.run.state.is_terminal() {
            return Err(self.invalid("failed"));
        }
        let failed_stage = self.run.current_stage();
        self.set(
            RunState::Failed {
                failed_at: now,
                error,
                failed_stage,
            },
            now,
        );
        Ok(())
    }

    /// Transition: * → CANCELLED
    pub fn cancel(&mut self, reason: String, now: DateTime<Utc>) -> Result<()> {
        if self.run.state.is_terminal() {
            return Err(self.invalid("cancelled"));
        }
        let last_completed = self.run.last_completed();
        self.set(
            RunState::Cancelled {
                cancelled_at: now,
                reason,
                last_completed,
            },
            now,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{FormatTag, PhotoRecord};
    use std::path::PathBuf;

    fn new_machine() -> RunStateMachine {
        let now = Utc::now();
        let session = Session {
            id: "photomesh_session_20240101_120000".to_string(),
            path: PathBuf::from("/out/photomesh_session_20240101_120000"),
            created_at: now,
        };
        let photos = PhotoSet::new(vec![PhotoRecord {
            path: PathBuf::from("/in/a.jpg"),
            byte_size: 1,
            format: FormatTag::Jpeg,
        }])
        .unwrap();
        RunStateMachine::new(PipelineRun::new(session, photos, now))
    }

    fn running(mode: ProcessingMode) -> RunStateMachine {
        let mut sm = new_machine();
        sm.begin_probe(Utc::now()).unwrap();
        sm.start(mode, ClusterState::unknown(), Utc::now()).unwrap();
        sm
    }

    #[test]
    fn test_full_traversal_in_order() {
        let mut sm = running(ProcessingMode::Synthetic);
        for (i, stage) in StageId::ALL.iter().enumerate() {
            assert_eq!(sm.run().current_stage(), Some(*stage));
            sm.complete_stage(Utc::now()).unwrap();
            if i + 1 < StageId::COUNT {
                assert_eq!(sm.advance(Utc::now()).unwrap(), StageId::ALL[i + 1]);
            }
        }
        sm.complete(Utc::now()).unwrap();
        assert!(matches!(sm.run().state, RunState::Completed { .. }));
        assert_eq!(sm.run().stages_traversed, StageId::ALL.to_vec());
    }

    #[test]
    fn test_cannot_skip_or_repeat_stages() {
        let mut sm = running(ProcessingMode::Synthetic);
        // advancing before completing the current stage
        assert!(sm.advance(Utc::now()).is_err());
        sm.complete_stage(Utc::now()).unwrap();
        // completing twice
        assert!(sm.complete_stage(Utc::now()).is_err());
        // completing the run early
        assert!(sm.complete(Utc::now()).is_err());
    }

    #[test]
    fn test_cannot_start_without_probe() {
        let mut sm = new_machine();
        let err = sm
            .start(ProcessingMode::Synthetic, ClusterState::unknown(), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition { ref from, .. } if from == "created"
        ));
    }

    #[test]
    fn test_fallback_only_before_first_stage() {
        let mut sm = running(ProcessingMode::Delegated);
        sm.fall_back("exit code 1".to_string(), Utc::now()).unwrap();
        assert_eq!(sm.run().mode(), Some(ProcessingMode::Synthetic));
        assert_eq!(sm.run().fallback_reason.as_deref(), Some("exit code 1"));

        // already synthetic
        assert!(sm.fall_back("again".to_string(), Utc::now()).is_err());
    }

    #[test]
    fn test_cancel_records_last_completed_stage() {
        let mut sm = running(ProcessingMode::Synthetic);
        sm.complete_stage(Utc::now()).unwrap();
        sm.cancel("user requested".to_string(), Utc::now()).unwrap();

        match &sm.run().state {
            RunState::Cancelled {
                reason,
                last_completed,
                ..
            } => {
                assert_eq!(reason, "user requested");
                assert_eq!(*last_completed, Some(StageId::CameraInit));
            }
            _ => panic!("Expected Cancelled state"),
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut sm = running(ProcessingMode::Synthetic);
        sm.fail("disk full".to_string(), Utc::now()).unwrap();
        assert!(matches!(
            sm.run().state,
            RunState::Failed {
                failed_stage: Some(StageId::CameraInit),
                ..
            }
        ));
        assert!(sm.cancel("too late".to_string(), Utc::now()).is_err());
        assert!(sm.fail("again".to_string(), Utc::now()).is_err());
    }
}
