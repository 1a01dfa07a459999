//! PhotoMesh CLI
//!
//! # Usage
//!
//! ```bash
//! # Instant synthetic run over a local folder
//! photomesh --preset quick run --input ./photos --output ./sessions --no-delegate
//!
//! # Full run with a config file
//! photomesh --config photomesh.yaml run
//!
//! # Previous sessions, newest first
//! photomesh sessions
//!
//! # Element counts and stage timings for 12 photos
//! photomesh plan --photos 12
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use photomesh_artifacts::{ArtifactKind, ArtifactPlan};
use photomesh_orchestration::stage::estimated_total_secs;
use photomesh_orchestration::{
    Clock, ClusterJobDelegate, ExternalDelegate, PhotomeshConfig, PipelineOrchestrator, Preset,
    ReadinessProbe, RunLog, SessionManager, StageId, SystemClock, Validatable,
};
use photomesh_storage::{LocalFsStore, SharedStore};

#[derive(Parser)]
#[command(name = "photomesh")]
#[command(about = "Photogrammetry pipeline orchestrator and artifact generator", long_about = None)]
struct Cli {
    /// YAML configuration file (version: 1)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Preset used when no configuration file is given
    #[arg(long, global = true, default_value = "realistic")]
    preset: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// Input photo directory
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory receiving session folders
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Never hand off to a delegate executable
        #[arg(long)]
        no_delegate: bool,

        /// Seed for point cloud coordinates
        #[arg(long)]
        seed: Option<u64>,

        /// Multiplier on synthetic stage durations
        #[arg(long)]
        time_scale: Option<f64>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List previous sessions, newest first
    Sessions,

    /// Probe cluster readiness
    Probe,

    /// Show artifact element counts and stage timings for a photo count
    Plan {
        #[arg(short, long)]
        photos: usize,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            input,
            output,
            no_delegate,
            seed,
            time_scale,
            json,
        } => {
            let mut config = config;
            if let Some(input) = input {
                config.storage.input_dir = input;
            }
            if let Some(output) = output {
                config.storage.output_dir = output;
            }
            if no_delegate {
                config.delegate.enabled = false;
            }
            if seed.is_some() {
                config.artifacts.seed = seed;
            }
            if let Some(scale) = time_scale {
                config.pipeline.time_scale = scale;
            }
            config.validate()?;
            run_command(config, json).await
        }
        Commands::Sessions => sessions_command(config).await,
        Commands::Probe => probe_command(config).await,
        Commands::Plan { photos } => plan_command(&config, photos),
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<PhotomeshConfig> {
    match &cli.config {
        Some(path) => PhotomeshConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(PhotomeshConfig::preset(Preset::from_str(&cli.preset)?)),
    }
}

async fn run_command(config: PhotomeshConfig, json: bool) -> Result<()> {
    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let status = config.cluster.kubectl_status();

    let store: Arc<dyn SharedStore> = Arc::new(LocalFsStore::new());

    let mut orchestrator =
        PipelineOrchestrator::new(config.clone(), store.clone(), clock.clone(), status);
    if let Some(delegate) = ClusterJobDelegate::from_config(&config, store, clock.clone()) {
        orchestrator = orchestrator.with_delegate(Arc::new(delegate));
    } else if let Some(delegate) = ExternalDelegate::from_settings(&config.delegate).await {
        orchestrator = orchestrator.with_delegate(Arc::new(delegate));
    }

    let handle = Arc::new(orchestrator).spawn(Arc::new(RunLog::new(clock)));
    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next stage boundary");
            token.cancel();
        }
    });

    let report = handle.wait().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.status_line());
        for artifact in &report.artifacts {
            println!("  {}", artifact.path.display());
        }
        if let Some(summary) = &report.summary_path {
            println!("  {}", summary.display());
        }
    }
    Ok(())
}

async fn sessions_command(config: PhotomeshConfig) -> Result<()> {
    let manager = SessionManager::new(
        Arc::new(LocalFsStore::new()),
        Arc::new(SystemClock),
        config.storage.session_prefix.clone(),
    );
    let sessions = manager.list_sessions(&config.storage.output_dir).await?;

    if sessions.is_empty() {
        println!("No sessions under {}", config.storage.output_dir.display());
    }
    for (i, session) in sessions.iter().enumerate() {
        println!(
            "{:3}. {} ({}) - {} files",
            i + 1,
            session.id,
            session.modified_at.format("%Y-%m-%d %H:%M:%S"),
            session.file_count
        );
    }
    Ok(())
}

async fn probe_command(config: PhotomeshConfig) -> Result<()> {
    let probe = ReadinessProbe::new(
        config.cluster.kubectl_status(),
        config.cluster.thresholds(),
        config.cluster.probe_timeout(),
    );
    println!("{}", probe.probe().await.describe());
    Ok(())
}

fn plan_command(config: &PhotomeshConfig, photos: usize) -> Result<()> {
    anyhow::ensure!(photos > 0, "--photos must be at least 1");
    let plan = ArtifactPlan::for_photo_count(photos, &config.artifacts);
    let scale = config.pipeline.time_scale;

    println!("Artifacts for {} photos:", photos);
    for kind in ArtifactKind::ALL {
        println!(
            "  {:<24} {} {}",
            kind.file_name(photos),
            plan.declared_count(kind),
            kind.element_label()
        );
    }

    println!("\nStages (time scale {}):", scale);
    for stage in StageId::ALL {
        println!(
            "  {}. {:<24} {:>7.1} min  {} {}",
            stage.ordinal() + 1,
            stage.title(),
            stage.duration_secs(photos) as f64 * scale / 60.0,
            stage.metric_at(1.0, photos),
            stage.spec().unit
        );
    }
    println!(
        "  Total: {:.1} min",
        estimated_total_secs(photos, scale) / 60.0
    );
    Ok(())
}
