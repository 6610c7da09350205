use anyhow::Context;
use clap::{Parser, Subcommand};
use orbit_common::envelope::Envelope;
use orbit_common::snapshot::StateSnapshot;
use orbit_engine::api::{CaptureRequest, ExecuteRequest, RecordRequest, ReplayRequest};
use orbit_engine::config::loader::ConfigLoader;
use orbit_engine::config::schema::OrbitConfig;
use orbit_engine::Orchestrator;
use orbit_h::ChromiumLauncher;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orbit", version, about = "Automation modality orchestration")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to ./orbit.yaml, then ~/.orbit/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show the browser window for automated runs
    #[arg(long, global = true)]
    visible: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Record network traffic for a task and choose an execution modality
    CaptureAndAnalyze {
        task_description: String,
        /// Defaults to recording.capture_duration_ms
        #[arg(long)]
        timeout_seconds: Option<u64>,
        /// 1 = metadata and headers, 2 = +bodies, 3 = +timing, 4 = +websocket messages
        #[arg(long)]
        capture_level: Option<u8>,
        #[arg(long)]
        no_screenshots: bool,
    },
    /// Pick the cheapest reliable modality and run the task
    ExecuteOptimally {
        task_description: String,
        /// Replay this recorded session first
        #[arg(long)]
        session_id: Option<String>,
        /// Capture file path or capture id
        #[arg(long)]
        capture_reference: Option<String>,
        /// direct | protocol | manual
        #[arg(long)]
        force_modality: Option<String>,
        /// JSON state snapshot to apply before running
        #[arg(long)]
        state_snapshot: Option<PathBuf>,
    },
    /// Record a session in a visible browser
    RecordSession {
        task_description: String,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        capture_level: Option<u8>,
        /// Keep recording through inactivity
        #[arg(long)]
        no_auto_stop: bool,
        /// Defaults to recording.max_duration_ms
        #[arg(long)]
        timeout_minutes: Option<u64>,
    },
    /// Replay a recorded session
    ReplayAutomation {
        session_id: String,
        #[arg(long)]
        action_index: Option<usize>,
        #[arg(long, default_value_t = 1.0)]
        speed_multiplier: f64,
        #[arg(long)]
        skip_screenshots: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// List recorded sessions
    Sessions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON envelope.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref()).await?;
    if args.visible {
        config.execution.headless = false;
    }

    let launcher = Arc::new(ChromiumLauncher::from_config(&config));
    let orchestrator = Orchestrator::builder(config, launcher).build();

    match args.command {
        Command::CaptureAndAnalyze {
            task_description,
            timeout_seconds,
            capture_level,
            no_screenshots,
        } => {
            let request = CaptureRequest {
                timeout_seconds,
                capture_level,
                include_screenshots: !no_screenshots,
                ..CaptureRequest::new(task_description)
            };
            print_envelope(&orchestrator.capture_and_analyze(request).await)
        }
        Command::ExecuteOptimally {
            task_description,
            session_id,
            capture_reference,
            force_modality,
            state_snapshot,
        } => {
            let state_snapshot = match state_snapshot {
                Some(path) => match read_snapshot(&path).await {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        let env: Envelope<()> = Envelope::fail(format!("{:#}", e), session_id).with_kind("InvalidRequest");
                        return print_envelope(&env);
                    }
                },
                None => None,
            };
            let request = ExecuteRequest {
                task_description,
                session_id,
                capture_reference,
                force_modality,
                state_snapshot,
            };
            print_envelope(&orchestrator.execute_optimally(request).await)
        }
        Command::RecordSession {
            task_description,
            session_id,
            capture_level,
            no_auto_stop,
            timeout_minutes,
        } => {
            let recordings = orchestrator.recordings().clone();
            let stopper = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, stopping recordings");
                    for id in recordings.ids().await {
                        recordings.stop(&id).await;
                    }
                }
            });
            let request = RecordRequest {
                session_id,
                capture_level,
                auto_stop: !no_auto_stop,
                timeout_minutes,
                ..RecordRequest::new(task_description)
            };
            let envelope = orchestrator.record_session(request).await;
            stopper.abort();
            print_envelope(&envelope)
        }
        Command::ReplayAutomation {
            session_id,
            action_index,
            speed_multiplier,
            skip_screenshots,
            dry_run,
        } => {
            let request = ReplayRequest {
                action_index,
                speed_multiplier,
                skip_screenshots,
                dry_run,
                ..ReplayRequest::new(session_id)
            };
            print_envelope(&orchestrator.replay_automation(request).await)
        }
        Command::Sessions => {
            let envelope = match orchestrator.store().list() {
                Ok(ids) => Envelope::ok(ids),
                Err(e) => Envelope::fail(e.to_string(), None),
            };
            print_envelope(&envelope)
        }
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<OrbitConfig> {
    match path {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading config {}", path.display())),
        None => ConfigLoader::load_default().await.context("loading config"),
    }
}

async fn read_snapshot(path: &Path) -> anyhow::Result<StateSnapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading state snapshot {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing state snapshot {}", path.display()))
}

fn print_envelope<T: Serialize>(envelope: &Envelope<T>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    if !envelope.success {
        std::process::exit(1);
    }
    Ok(())
}
