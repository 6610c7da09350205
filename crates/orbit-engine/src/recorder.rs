//! Session Recorder.
//!
//! Each recording runs in its own task that exclusively owns one target.
//! State machine: `Idle -> Recording -> Stopped(reason) -> Finalized`.
//! Two independent stop conditions race: the hard maximum duration and,
//! when auto-stop is enabled, the inactivity window since the last
//! recorded action. Whatever stops the recording, the log is persisted.
//!
//! Navigations, console output, page errors and network exchanges are
//! recorded at every [`CaptureLevel`]; the level only decides how much
//! detail each exchange carries.

use crate::config::schema::RecordingConfig;
use crate::events::{EngineEvent, EventBus};
use crate::snapshot::SnapshotService;
use crate::store::{SessionStore, StoreError, new_session_id, validate_session_id};
use crate::target::{Target, TargetEvent, TargetGuard};
use base64::Engine;
use orbit_common::action::{Action, ActionKind, BodyPreview, WEBSOCKET_MESSAGE_CHARS, truncate_chars};
use orbit_common::error::ProtocolError;
use orbit_common::recording::SessionRecording;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep_until};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Capture level must be between 1 and 4, got {0}")]
    InvalidCaptureLevel(u8),
    #[error("Session {0} already exists")]
    SessionExists(String),
    #[error("Maximum recording duration {0:?} is out of range")]
    DurationOutOfRange(Duration),
    #[error("Failed to acquire target: {0}")]
    Launch(#[source] ProtocolError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Recorder task failed: {0}")]
    Task(String),
}

/// Response bodies that take longer than this are left out.
const BODY_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// How much detail network traffic is recorded with. Each level adds to
/// the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CaptureLevel {
    /// Request and response metadata with headers.
    Metadata = 1,
    /// Request and response body previews.
    Bodies = 2,
    /// Per-exchange timing.
    Timing = 3,
    /// WebSocket messages.
    WebSocket = 4,
}

impl TryFrom<u8> for CaptureLevel {
    type Error = RecorderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CaptureLevel::Metadata),
            2 => Ok(CaptureLevel::Bodies),
            3 => Ok(CaptureLevel::Timing),
            4 => Ok(CaptureLevel::WebSocket),
            other => Err(RecorderError::InvalidCaptureLevel(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Maximum duration elapsed.
    Timeout,
    /// No action within the inactivity window.
    Inactivity,
    /// A protocol failure ended the recording.
    Error,
    /// The caller asked to stop.
    Requested,
    /// The target went away (e.g. the browser window was closed).
    TargetClosed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Timeout => "timeout",
            StopReason::Inactivity => "inactivity",
            StopReason::Error => "error",
            StopReason::Requested => "requested",
            StopReason::TargetClosed => "target_closed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped(StopReason),
    Finalized,
}

#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub session_id: Option<String>,
    pub task_description: String,
    pub capture_level: CaptureLevel,
    pub auto_stop: bool,
    pub max_duration: Duration,
    pub inactivity: Duration,
    /// Periodic screenshots every `screenshot_interval`.
    pub include_screenshots: bool,
    pub screenshot_interval: Duration,
    pub wait_threshold: Duration,
    /// Navigate here once recording has started.
    pub start_url: Option<String>,
    /// Capture initial and final state snapshots.
    pub capture_state: bool,
}

impl RecordingOptions {
    pub fn new(task_description: impl Into<String>, config: &RecordingConfig) -> Self {
        Self {
            session_id: None,
            task_description: task_description.into(),
            capture_level: CaptureLevel::try_from(config.default_capture_level)
                .unwrap_or(CaptureLevel::Timing),
            auto_stop: true,
            max_duration: Duration::from_millis(config.max_duration_ms),
            inactivity: Duration::from_millis(config.inactivity_ms),
            include_screenshots: true,
            screenshot_interval: Duration::from_millis(config.screenshot_interval_ms),
            wait_threshold: Duration::from_millis(config.wait_threshold_ms),
            start_url: None,
            capture_state: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingOutcome {
    pub recording: SessionRecording,
    pub stop_reason: StopReason,
    /// `true` when the inactivity window, not the maximum duration, ended it.
    pub auto_stopped: bool,
    pub persisted: bool,
}

/// Clonable control surface of a running recording.
#[derive(Debug, Clone)]
pub struct RecordingControl {
    session_id: String,
    stop: Arc<Notify>,
    state: watch::Receiver<RecorderState>,
}

impl RecordingControl {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

pub struct RecordingHandle {
    control: RecordingControl,
    task: JoinHandle<Result<RecordingOutcome, RecorderError>>,
}

impl RecordingHandle {
    pub fn session_id(&self) -> &str {
        self.control.session_id()
    }

    pub fn control(&self) -> RecordingControl {
        self.control.clone()
    }

    pub fn state(&self) -> RecorderState {
        self.control.state()
    }

    pub fn stop(&self) {
        self.control.stop()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<RecordingOutcome, RecorderError> {
        self.task
            .await
            .map_err(|e| RecorderError::Task(e.to_string()))?
    }
}

/// Registry of in-flight recordings, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct ActiveRecordings {
    inner: Arc<Mutex<HashMap<String, RecordingControl>>>,
}

impl ActiveRecordings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, control: RecordingControl) {
        self.inner
            .lock()
            .await
            .insert(control.session_id().to_string(), control);
    }

    pub async fn remove(&self, session_id: &str) -> Option<RecordingControl> {
        self.inner.lock().await.remove(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<RecordingControl> {
        self.inner.lock().await.get(session_id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Asks a running recording to stop. Returns `false` if none is active.
    pub async fn stop(&self, session_id: &str) -> bool {
        match self.get(session_id).await {
            Some(control) => {
                control.stop();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecorder {
    store: SessionStore,
    bus: EventBus,
}

impl SessionRecorder {
    pub fn new(store: SessionStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Start recording on `target`. The recorder task takes ownership of it.
    pub async fn start(
        &self,
        target: TargetGuard,
        options: RecordingOptions,
    ) -> Result<RecordingHandle, RecorderError> {
        let session_id = match &options.session_id {
            Some(id) => {
                validate_session_id(id)?;
                id.clone()
            }
            None => new_session_id(),
        };
        if self.store.exists(&session_id).await {
            return Err(RecorderError::SessionExists(session_id));
        }
        if Instant::now().checked_add(options.max_duration).is_none() {
            return Err(RecorderError::DurationOutOfRange(options.max_duration));
        }

        let (state_tx, state_rx) = watch::channel(RecorderState::Idle);
        let stop = Arc::new(Notify::new());
        let control = RecordingControl {
            session_id: session_id.clone(),
            stop: stop.clone(),
            state: state_rx,
        };

        let task = RecorderTask {
            session_id,
            options,
            store: self.store.clone(),
            bus: self.bus.clone(),
            state: state_tx,
            stop,
        };
        let task = tokio::spawn(task.run(target));

        Ok(RecordingHandle { control, task })
    }
}

struct RecorderTask {
    session_id: String,
    options: RecordingOptions,
    store: SessionStore,
    bus: EventBus,
    state: watch::Sender<RecorderState>,
    stop: Arc<Notify>,
}

impl RecorderTask {
    async fn run(self, mut guard: TargetGuard) -> Result<RecordingOutcome, RecorderError> {
        let opts = &self.options;
        let snapshots = SnapshotService::new(self.bus.clone());
        let mut events = guard.target().subscribe();
        let mut network = NetworkLog::new(opts.capture_level);

        let mut recording =
            SessionRecording::new(&self.session_id, &opts.task_description, orbit_common::now_millis());
        recording.capture_level = opts.capture_level as u8;
        self.state.send_replace(RecorderState::Recording);
        self.bus.publish(EngineEvent::RecordingStarted {
            session_id: self.session_id.clone(),
        });
        info!(
            "Recording session {} (level {:?}, auto_stop={}, max {:?}, inactivity {:?})",
            self.session_id, opts.capture_level, opts.auto_stop, opts.max_duration, opts.inactivity
        );

        if opts.capture_state {
            match snapshots.capture(guard.target()).await {
                Ok(snapshot) => recording.initial_state = Some(snapshot),
                Err(e) => warn!("Initial snapshot for {} failed: {}", self.session_id, e),
            }
        }

        let started = Instant::now();
        let deadline = started.checked_add(opts.max_duration);
        let mut last_activity = started;
        let mut last_replayable = started;
        let screenshots_enabled = opts.include_screenshots;
        let period = opts.screenshot_interval.max(Duration::from_millis(100));
        let mut screenshot_timer = interval_at(started + period, period);

        let mut reason = None;
        if let Some(url) = &opts.start_url
            && let Err(e) = guard.target().navigate(url).await
        {
            warn!("Recording {} could not open {}: {}", self.session_id, url, e);
            recording.mark_failed(format!("navigation to {} failed: {}", url, e));
            reason = Some(StopReason::Error);
        }

        let reason = match reason {
            Some(r) => r,
            None => loop {
                let inactivity_deadline = last_activity.checked_add(opts.inactivity);
                tokio::select! {
                    _ = until(deadline) => break StopReason::Timeout,
                    _ = until(inactivity_deadline), if opts.auto_stop => break StopReason::Inactivity,
                    _ = self.stop.notified() => break StopReason::Requested,
                    _ = screenshot_timer.tick(), if screenshots_enabled => {
                        // A slow screenshot must not hold off the stop conditions.
                        let shot = tokio::select! {
                            shot = guard.target().screenshot() => shot,
                            _ = until(deadline) => break StopReason::Timeout,
                            _ = until(inactivity_deadline), if opts.auto_stop => break StopReason::Inactivity,
                            _ = self.stop.notified() => break StopReason::Requested,
                        };
                        match shot {
                            Ok(bytes) => recording.push_screenshot(
                                orbit_common::now_millis(),
                                base64::engine::general_purpose::STANDARD.encode(bytes),
                            ),
                            Err(e) => warn!("Periodic screenshot for {} failed: {}", self.session_id, e),
                        }
                    }
                    event = events.recv() => match event {
                        Ok(TargetEvent::Closed) | Err(RecvError::Closed) => break StopReason::TargetClosed,
                        Ok(event) => {
                            let now = Instant::now();
                            let body = match &event {
                                TargetEvent::Response { id, .. } if network.level() >= CaptureLevel::Bodies => {
                                    response_body(guard.target(), id).await
                                }
                                _ => None,
                            };
                            let Some(action) = network.observe(event, body, now) else {
                                continue;
                            };
                            if action.is_replayable() {
                                let gap = now.duration_since(last_replayable);
                                if gap >= opts.wait_threshold && !recording.actions.is_empty() {
                                    self.append(&mut recording, Action::wait(gap.as_millis() as u64));
                                }
                                last_replayable = now;
                            }
                            self.append(&mut recording, action);
                            last_activity = now;
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("Recording {} dropped {} events (receiver lagged)", self.session_id, n);
                        }
                    },
                }
            },
        };

        self.state.send_replace(RecorderState::Stopped(reason));
        info!(
            "Recording {} stopped ({}), {} actions",
            self.session_id,
            reason,
            recording.actions.len()
        );

        if opts.capture_state && reason != StopReason::TargetClosed {
            match snapshots.capture(guard.target()).await {
                Ok(snapshot) => recording.final_state = Some(snapshot),
                Err(e) => warn!("Final snapshot for {} failed: {}", self.session_id, e),
            }
        }

        if let Err(e) = guard.release().await {
            debug!("Releasing target of {} failed: {}", self.session_id, e);
        }

        recording.finalize(orbit_common::now_millis());
        let persisted = match self.store.save(&recording).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to persist recording {}: {}", self.session_id, e);
                false
            }
        };

        self.state.send_replace(RecorderState::Finalized);
        self.bus.publish(EngineEvent::RecordingStopped {
            session_id: self.session_id.clone(),
            reason: reason.to_string(),
            action_count: recording.actions.len(),
        });

        Ok(RecordingOutcome {
            recording,
            stop_reason: reason,
            auto_stopped: reason == StopReason::Inactivity,
            persisted,
        })
    }

    fn append(&self, recording: &mut SessionRecording, action: Action) {
        let index = recording.actions.len();
        recording.push(action.clone());
        self.bus.publish(EngineEvent::ActionRecorded {
            session_id: self.session_id.clone(),
            index,
            action,
        });
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Fetch a response body for its preview. Failures only lose the preview.
async fn response_body(target: &mut dyn Target, request_id: &str) -> Option<BodyPreview> {
    let fetch = target.send("Network.getResponseBody", json!({ "requestId": request_id }));
    let response = match tokio::time::timeout(BODY_FETCH_TIMEOUT, fetch).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            debug!("No body for request {}: {}", request_id, e);
            return None;
        }
        Err(_) => {
            debug!("Body of request {} not available within {:?}", request_id, BODY_FETCH_TIMEOUT);
            return None;
        }
    };
    let body = response.get("body").and_then(Value::as_str).filter(|b| !b.is_empty())?;
    if response.get("base64Encoded").and_then(Value::as_bool).unwrap_or(false) {
        let size = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map(|bytes| bytes.len())
            .unwrap_or(body.len());
        Some(BodyPreview::binary(size))
    } else {
        Some(BodyPreview::text(body))
    }
}

/// Turns page events into actions for one recording. Tracks when each
/// request was seen and which URL each WebSocket belongs to.
#[derive(Debug)]
pub struct NetworkLog {
    level: CaptureLevel,
    pending: HashMap<String, Instant>,
    sockets: HashMap<String, String>,
}

impl NetworkLog {
    pub fn new(level: CaptureLevel) -> Self {
        Self {
            level,
            pending: HashMap::new(),
            sockets: HashMap::new(),
        }
    }

    pub fn level(&self) -> CaptureLevel {
        self.level
    }

    /// `response_body` is only kept for responses at [`CaptureLevel::Bodies`] and above.
    pub fn observe(&mut self, event: TargetEvent, response_body: Option<BodyPreview>, now: Instant) -> Option<Action> {
        let kind = match event {
            TargetEvent::Navigated { url } => ActionKind::Navigation { url },
            TargetEvent::Console { level, text } => ActionKind::ConsoleLog { level, text },
            TargetEvent::PageError { message } => ActionKind::PageError { message },
            TargetEvent::Request {
                id,
                method,
                url,
                resource_type,
                headers,
                post_data,
            } => {
                self.pending.insert(id.clone(), now);
                let body = post_data
                    .filter(|data| !data.is_empty() && self.level >= CaptureLevel::Bodies)
                    .map(|data| BodyPreview::text(&data));
                ActionKind::Request {
                    request_id: id,
                    method,
                    url,
                    resource_type,
                    headers,
                    body,
                }
            }
            TargetEvent::Response {
                id,
                url,
                status,
                mime_type,
                headers,
            } => {
                let duration_ms = self
                    .pending
                    .remove(&id)
                    .filter(|_| self.level >= CaptureLevel::Timing)
                    .map(|sent| now.saturating_duration_since(sent).as_millis() as u64);
                ActionKind::Response {
                    request_id: id,
                    url,
                    status,
                    mime_type,
                    headers,
                    body: response_body.filter(|_| self.level >= CaptureLevel::Bodies),
                    duration_ms,
                }
            }
            TargetEvent::WebSocketCreated { id, url } => {
                self.sockets.insert(id, url);
                return None;
            }
            TargetEvent::WebSocketFrame {
                id,
                direction,
                payload,
            } if self.level >= CaptureLevel::WebSocket => ActionKind::WebsocketMessage {
                url: self.sockets.get(&id).cloned(),
                request_id: id,
                direction,
                message: truncate_chars(&payload, WEBSOCKET_MESSAGE_CHARS),
            },
            TargetEvent::WebSocketFrame { .. } | TargetEvent::Closed => return None,
        };
        Some(Action::now(kind))
    }
}
