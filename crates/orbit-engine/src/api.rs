//! The four tool operations.
//!
//! Every operation returns an [`Envelope`]. Errors never cross this
//! boundary; they become `{success: false, error}` with the session id when
//! one is known.

use crate::analyzer::{self, TrafficAnalyzer};
use crate::config::schema::OrbitConfig;
use crate::events::{EngineEvent, EventBus};
use crate::executor::{
    CompletionSignal, ExecutionContext, ExecutionEngine, NavigatePerformer, StdinSignal, TaskPerformer,
};
use crate::executor::performer::first_url;
use crate::optimizer::{ModalityOptimizer, TaskContext};
use crate::recorder::{
    ActiveRecordings, CaptureLevel, RecorderError, RecordingOptions, RecordingOutcome, SessionRecorder,
};
use crate::replay::{ReplayEngine, ReplayError, ReplayOptions};
use crate::store::{SessionStore, StoreError, new_session_id};
use crate::target::{LaunchOptions, TargetGuard, TargetLauncher};
use orbit_common::capture::TrafficCapture;
use orbit_common::envelope::Envelope;
use orbit_common::modality::{Modality, ModalityChoice};
use orbit_common::result::{CaptureAnalysis, ExecutionResult, RecordingSummary, ReplayResult};
use orbit_common::snapshot::StateSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub task_description: String,
    /// Defaults to `recording.capture_duration_ms`.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub capture_level: Option<u8>,
    #[serde(default = "default_true")]
    pub include_screenshots: bool,
}

impl CaptureRequest {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            timeout_seconds: None,
            capture_level: None,
            include_screenshots: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub task_description: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub capture_reference: Option<String>,
    #[serde(default)]
    pub force_modality: Option<String>,
    #[serde(default)]
    pub state_snapshot: Option<StateSnapshot>,
}

impl ExecuteRequest {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    pub task_description: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub capture_level: Option<u8>,
    #[serde(default = "default_true")]
    pub auto_stop: bool,
    /// Defaults to `recording.max_duration_ms`.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

impl RecordRequest {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            session_id: None,
            capture_level: None,
            auto_stop: true,
            timeout_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    pub session_id: String,
    #[serde(default)]
    pub action_index: Option<usize>,
    #[serde(default = "default_speed")]
    pub speed_multiplier: f64,
    #[serde(default)]
    pub skip_screenshots: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl ReplayRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            action_index: None,
            speed_multiplier: default_speed(),
            skip_screenshots: false,
            dry_run: false,
        }
    }
}

pub struct OrchestratorBuilder {
    config: OrbitConfig,
    launcher: Arc<dyn TargetLauncher>,
    analyzer: Option<Arc<dyn TrafficAnalyzer>>,
    performer: Arc<dyn TaskPerformer>,
    signal: Arc<dyn CompletionSignal>,
    store: Option<SessionStore>,
    bus: EventBus,
}

impl OrchestratorBuilder {
    /// Replace the analyzer built from `analyzer` config.
    pub fn analyzer(mut self, analyzer: Option<Arc<dyn TrafficAnalyzer>>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn performer(mut self, performer: Arc<dyn TaskPerformer>) -> Self {
        self.performer = performer;
        self
    }

    pub fn completion_signal(mut self, signal: Arc<dyn CompletionSignal>) -> Self {
        self.signal = signal;
        self
    }

    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn build(self) -> Orchestrator {
        let store = self.store.unwrap_or_else(|| {
            SessionStore::new(
                self.config.storage.sessions_dir.clone(),
                self.config.storage.captures_dir.clone(),
            )
        });
        let executor = ExecutionEngine::from_config(
            &self.config,
            self.launcher.clone(),
            store.clone(),
            self.performer,
            self.signal,
            self.bus.clone(),
        );
        let replay = ReplayEngine::new(
            store.clone(),
            self.launcher.clone(),
            self.config.replay.clone(),
            self.config.execution.headless,
            self.bus.clone(),
        );
        Orchestrator {
            optimizer: ModalityOptimizer::from_config(&self.config),
            recorder: SessionRecorder::new(store.clone(), self.bus.clone()),
            recordings: ActiveRecordings::new(),
            launcher: self.launcher,
            analyzer: self.analyzer,
            config: self.config,
            store,
            executor,
            replay,
            bus: self.bus,
        }
    }
}

pub struct Orchestrator {
    config: OrbitConfig,
    store: SessionStore,
    launcher: Arc<dyn TargetLauncher>,
    analyzer: Option<Arc<dyn TrafficAnalyzer>>,
    optimizer: ModalityOptimizer,
    executor: ExecutionEngine,
    recorder: SessionRecorder,
    replay: ReplayEngine,
    recordings: ActiveRecordings,
    bus: EventBus,
}

impl Orchestrator {
    pub fn builder(config: OrbitConfig, launcher: Arc<dyn TargetLauncher>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            analyzer: analyzer::from_config(&config.analyzer).map(Arc::from),
            performer: Arc::new(NavigatePerformer),
            signal: Arc::new(StdinSignal),
            store: None,
            bus: EventBus::new(),
            launcher,
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Registry of recordings in flight; clone it to stop them from elsewhere.
    pub fn recordings(&self) -> &ActiveRecordings {
        &self.recordings
    }

    /// Record the task for `timeout_seconds`, summarize its network traffic,
    /// and ask the optimizer which modality fits.
    pub async fn capture_and_analyze(&self, request: CaptureRequest) -> Envelope<CaptureAnalysis> {
        let mut options = RecordingOptions::new(&request.task_description, &self.config.recording);
        if let Some(level) = request.capture_level {
            match CaptureLevel::try_from(level) {
                Ok(level) => options.capture_level = level,
                Err(e) => return Envelope::fail(e.to_string(), None).with_kind("InvalidRequest"),
            }
        }
        options.auto_stop = false;
        options.max_duration = match request.timeout_seconds {
            Some(seconds) => Duration::from_secs(seconds.max(1)),
            None => Duration::from_millis(self.config.recording.capture_duration_ms),
        };
        options.include_screenshots = request.include_screenshots;
        options.start_url = first_url(&request.task_description).map(String::from);

        let launch = LaunchOptions {
            headless: self.config.execution.headless,
            persistent: true,
        };
        let outcome = match self.record(options, launch).await {
            Ok(outcome) => outcome,
            Err((e, session_id)) => return Envelope::fail(e.to_string(), session_id).with_kind(recorder_kind(&e)),
        };
        let session_id = outcome.recording.session_id.clone();

        let capture = TrafficCapture::from_recording(&outcome.recording);
        let capture_reference = match self.store.save_capture(&session_id, &capture).await {
            Ok(path) => path.display().to_string(),
            Err(e) => {
                return Envelope::fail(format!("Failed to store capture: {}", e), Some(session_id))
                    .with_kind(store_kind(&e));
            }
        };

        let mut ctx = TaskContext::new(&request.task_description);
        ctx.capture = Some(capture.clone());
        let choice = self.choose(&ctx).await;

        let analysis = CaptureAnalysis {
            session_id: session_id.clone(),
            capture_reference,
            network: capture.summary(),
            analyzer_confidence: choice.analysis.as_ref().map(|a| a.confidence),
            choice,
            screenshot_count: outcome.recording.screenshots.len(),
        };
        if outcome.recording.failed {
            let message = outcome
                .recording
                .error
                .clone()
                .unwrap_or_else(|| "capture failed".to_string());
            return Envelope::fail_with_data(analysis, message, Some(session_id)).with_kind("CaptureFailed");
        }
        Envelope::ok(analysis)
    }

    /// Choose a modality from whatever evidence is available and run it.
    pub async fn execute_optimally(&self, request: ExecuteRequest) -> Envelope<ExecutionResult> {
        let session_id = request.session_id.clone();
        let forced = match request.force_modality.as_deref().map(str::parse::<Modality>) {
            None => None,
            Some(Ok(m)) => Some(m),
            Some(Err(e)) => return Envelope::fail(e.to_string(), session_id).with_kind("InvalidRequest"),
        };

        let prior_session = match &request.session_id {
            Some(id) => match self.store.load(id).await {
                Ok(recording) => Some(recording),
                Err(e) => return Envelope::fail(e.to_string(), session_id).with_kind(store_kind(&e)),
            },
            None => None,
        };
        let mut capture_error = None;
        let capture = match &request.capture_reference {
            Some(reference) => match self.store.load_capture(reference).await {
                Ok(capture) => Some(capture),
                Err(e) => {
                    warn!("Capture {} could not be loaded: {}", reference, e);
                    capture_error = Some(e.to_string());
                    None
                }
            },
            None => None,
        };

        let ctx = TaskContext {
            task_description: request.task_description.clone(),
            capture,
            prior_session: prior_session.clone(),
            forced,
            capture_error,
        };
        let choice = self.choose(&ctx).await;

        let exec_ctx = ExecutionContext {
            prior_session,
            state_snapshot: request.state_snapshot,
            record_as: Some(new_session_id()),
        };
        let result = self
            .executor
            .execute(&request.task_description, &choice, &exec_ctx)
            .await;

        if result.success {
            Envelope::ok(result)
        } else {
            let message = format!(
                "Execution {} failed: {}",
                result.execution_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
            Envelope::fail_with_data(result, message, session_id).with_kind("ModalityExecutionError")
        }
    }

    /// Record a session on a visible target until it stops on its own.
    pub async fn record_session(&self, request: RecordRequest) -> Envelope<RecordingSummary> {
        let mut options = RecordingOptions::new(&request.task_description, &self.config.recording);
        options.session_id = request.session_id.clone();
        if let Some(level) = request.capture_level {
            match CaptureLevel::try_from(level) {
                Ok(level) => options.capture_level = level,
                Err(e) => {
                    return Envelope::fail(e.to_string(), request.session_id).with_kind("InvalidRequest");
                }
            }
        }
        options.auto_stop = request.auto_stop;
        if let Some(minutes) = request.timeout_minutes {
            match minutes.max(1).checked_mul(60) {
                Some(seconds) => options.max_duration = Duration::from_secs(seconds),
                None => {
                    return Envelope::fail(
                        format!("timeoutMinutes {} is out of range", minutes),
                        request.session_id,
                    )
                    .with_kind("InvalidRequest");
                }
            }
        }
        options.start_url = first_url(&request.task_description).map(String::from);

        let outcome = match self.record(options, LaunchOptions::visible()).await {
            Ok(outcome) => outcome,
            Err((e, session_id)) => {
                return Envelope::fail(e.to_string(), session_id.or(request.session_id))
                    .with_kind(recorder_kind(&e));
            }
        };

        let recording = &outcome.recording;
        let summary = RecordingSummary {
            session_id: recording.session_id.clone(),
            action_count: recording.actions.len(),
            screenshot_count: recording.screenshots.len(),
            duration_ms: recording.duration_ms().unwrap_or_default(),
            stop_reason: outcome.stop_reason.to_string(),
            auto_stopped: outcome.auto_stopped,
            failed: recording.failed,
            error: recording.error.clone(),
        };
        if !outcome.persisted {
            let id = summary.session_id.clone();
            return Envelope::fail_with_data(summary, "Recording could not be persisted", Some(id))
                .with_kind("StoreError");
        }
        if recording.failed {
            let id = summary.session_id.clone();
            let message = summary.error.clone().unwrap_or_else(|| "recording failed".into());
            return Envelope::fail_with_data(summary, message, Some(id)).with_kind("RecordingFailed");
        }
        Envelope::ok(summary)
    }

    pub async fn replay_automation(&self, request: ReplayRequest) -> Envelope<ReplayResult> {
        let options = ReplayOptions {
            action_index: request.action_index,
            speed_multiplier: request.speed_multiplier,
            skip_screenshots: request.skip_screenshots,
            dry_run: request.dry_run,
        };
        match self.replay.replay(&request.session_id, options).await {
            Ok(result) if result.success => Envelope::ok(result),
            Ok(result) => {
                let message = format!(
                    "{} of {} action(s) failed during replay",
                    result.errors.len(),
                    result.total_actions
                );
                Envelope::fail_with_data(result, message, Some(request.session_id)).with_kind("ReplayActionErrors")
            }
            Err(e) => Envelope::fail(e.to_string(), Some(request.session_id)).with_kind(replay_kind(&e)),
        }
    }

    /// Ask an in-flight recording to stop. `false` if it is not running.
    pub async fn stop_recording(&self, session_id: &str) -> bool {
        self.recordings.stop(session_id).await
    }

    async fn choose(&self, ctx: &TaskContext) -> ModalityChoice {
        let choice = self.optimizer.choose(ctx, self.analyzer.as_deref()).await;
        self.bus.publish(EngineEvent::ModalityChosen {
            choice: choice.clone(),
        });
        choice
    }

    async fn record(
        &self,
        options: RecordingOptions,
        launch: LaunchOptions,
    ) -> Result<RecordingOutcome, (RecorderError, Option<String>)> {
        let requested_id = options.session_id.clone();
        let guard = TargetGuard::acquire(self.launcher.as_ref(), launch)
            .await
            .map_err(|e| (RecorderError::Launch(e), requested_id.clone()))?;
        let handle = self
            .recorder
            .start(guard, options)
            .await
            .map_err(|e| (e, requested_id))?;
        let session_id = handle.session_id().to_string();
        self.recordings.insert(handle.control()).await;
        info!("Recording {} registered", session_id);

        let outcome = handle.wait().await;
        self.recordings.remove(&session_id).await;
        outcome.map_err(|e| {
            warn!("Recording {} ended abnormally: {}", session_id, e);
            (e, Some(session_id))
        })
    }
}

fn store_kind(e: &StoreError) -> &'static str {
    match e {
        StoreError::SessionNotFound(_) => "SessionNotFoundError",
        StoreError::InvalidRecording { .. } => "InvalidRecordingError",
        StoreError::CaptureNotFound(_) | StoreError::MalformedCapture { .. } => "CaptureError",
        _ => "StoreError",
    }
}

fn replay_kind(e: &ReplayError) -> &'static str {
    match e {
        ReplayError::SessionNotFound(_) => "SessionNotFoundError",
        ReplayError::InvalidRecording { .. } => "InvalidRecordingError",
        ReplayError::InvalidActionIndex { .. } => "InvalidActionIndex",
        ReplayError::InvalidOptions(_) => "InvalidRequest",
        ReplayError::Launch(_) => "ProtocolError",
        ReplayError::Store(_) => "StoreError",
    }
}

fn recorder_kind(e: &RecorderError) -> &'static str {
    match e {
        RecorderError::InvalidCaptureLevel(_) | RecorderError::DurationOutOfRange(_) => "InvalidRequest",
        RecorderError::SessionExists(_) => "SessionExists",
        RecorderError::Launch(_) => "ProtocolError",
        RecorderError::Store(e) => store_kind(e),
        RecorderError::Task(_) => "RecorderError",
    }
}
