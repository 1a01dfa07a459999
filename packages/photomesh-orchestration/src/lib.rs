//! PhotoMesh pipeline orchestration
//!
//! Coordinates a photogrammetry-style reconstruction run over shared storage:
//! photo discovery, timestamped sessions, an advisory cluster readiness
//! probe, the six-stage pipeline (delegated to an external program or
//! simulated on an injected clock), artifact output and the run summary.
//!
//! # Architecture
//!
//! ```text
//! PhotoDiscoverer → SessionManager → ReadinessProbe → PipelineOrchestrator
//!                                                      ├─ Delegate (local or cluster Job) / synthetic stages
//!                                                      ├─ ArtifactGenerator
//!                                                      └─ SummaryReporter
//! ```
//!
//! Ports are traits ([`photomesh_storage::SharedStore`], [`ClusterStatus`],
//! [`Clock`], [`Delegate`], [`LogSink`]) so every component runs against
//! in-memory doubles in tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use photomesh_orchestration::{
//!     PhotomeshConfig, PipelineOrchestrator, Preset, RunLog, SystemClock,
//! };
//! use photomesh_storage::LocalFsStore;
//! use std::sync::Arc;
//!
//! let config = Arc::new(PhotomeshConfig::preset(Preset::Quick));
//! let status = config.cluster.kubectl_status();
//! let clock = Arc::new(SystemClock);
//! let orchestrator = Arc::new(PipelineOrchestrator::new(
//!     config,
//!     Arc::new(LocalFsStore::new()),
//!     clock.clone(),
//!     status,
//! ));
//! let handle = orchestrator.spawn(Arc::new(RunLog::new(clock)));
//! let report = handle.wait().await?;
//! println!("{}", report.status_line());
//! ```

pub mod artifacts;
pub mod clock;
pub mod cluster_job;
pub mod config;
pub mod delegate;
pub mod discovery;
pub mod error;
pub mod log;
pub mod orchestrator;
pub mod probe;
pub mod run;
pub mod session;
pub mod stage;
pub mod summary;

pub use artifacts::{Artifact, ArtifactGenerator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster_job::ClusterJobDelegate;
pub use config::{ConfigError, PhotomeshConfig, Preset, Validatable};
pub use delegate::{Delegate, DelegateError, DelegateLocator, DelegateRequest, ExternalDelegate};
pub use discovery::{FormatTag, IngestPolicy, PhotoDiscoverer, PhotoRecord, PhotoSet};
pub use error::{OrchestratorError, Result};
pub use log::{LogRecord, LogSink, RunEvent, RunLog, Severity};
pub use orchestrator::{PipelineOrchestrator, RunHandle, RunReport};
pub use probe::{ClusterMode, ClusterState, ClusterStatus, ReadinessProbe, StaticStatus};
pub use run::{PipelineRun, ProcessingMode, RunState, RunStateMachine};
pub use session::{Session, SessionListing, SessionManager};
pub use stage::StageId;
