//! Replay Engine: re-issues a persisted action log against a fresh target.
//!
//! Actions run strictly in recorded order. One failing action is recorded in
//! the result's `errors` and replay moves on; only structural problems
//! (missing recording, empty log, bad index, bad options) abort early.

use crate::config::schema::ReplayConfig;
use crate::events::{EngineEvent, EventBus};
use crate::protocol::{DomainTracker, is_enable_command};
use crate::snapshot::SnapshotService;
use crate::store::{SessionStore, StoreError};
use crate::target::{LaunchOptions, Target, TargetGuard, TargetLauncher};
use base64::Engine;
use orbit_common::action::{Action, ActionKind};
use orbit_common::error::ProtocolError;
use orbit_common::recording::SessionRecording;
use orbit_common::result::{ReplayActionError, ReplayResult};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Invalid recording {session_id}: {reason}")]
    InvalidRecording { session_id: String, reason: String },
    #[error("Action index {index} out of range (recording has {total} actions)")]
    InvalidActionIndex { index: usize, total: usize },
    #[error("Invalid replay options: {0}")]
    InvalidOptions(String),
    #[error("Failed to acquire target: {0}")]
    Launch(#[source] ProtocolError),
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ReplayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionNotFound(id) => ReplayError::SessionNotFound(id),
            StoreError::InvalidRecording { session_id, reason } => {
                ReplayError::InvalidRecording { session_id, reason }
            }
            other => ReplayError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOptions {
    /// Replay exactly this action instead of the whole log.
    pub action_index: Option<usize>,
    /// WAIT durations are divided by this. Must be positive.
    pub speed_multiplier: f64,
    pub skip_screenshots: bool,
    /// Use a throwaway, non-persistent target.
    pub dry_run: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            action_index: None,
            speed_multiplier: 1.0,
            skip_screenshots: false,
            dry_run: false,
        }
    }
}

impl ReplayOptions {
    pub fn validate(&self) -> Result<(), ReplayError> {
        if !self.speed_multiplier.is_finite() || self.speed_multiplier <= 0.0 {
            return Err(ReplayError::InvalidOptions(format!(
                "speed multiplier must be a positive number, got {}",
                self.speed_multiplier
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayTiming {
    pub inter_action_delay: Duration,
    pub min_wait: Duration,
    pub command_timeout: Duration,
}

impl From<&ReplayConfig> for ReplayTiming {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            inter_action_delay: Duration::from_millis(config.inter_action_delay_ms),
            min_wait: Duration::from_millis(config.min_wait_ms),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        }
    }
}

/// Scale a WAIT by `1 / speed`, never below `min_wait_ms`.
pub fn scale_wait(duration_ms: u64, speed_multiplier: f64, min_wait_ms: u64) -> u64 {
    let scaled = (duration_ms as f64 / speed_multiplier).round();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        scaled as u64
    } else {
        0
    };
    scaled.max(min_wait_ms)
}

/// An action scheduled for replay, keeping its index in the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub index: usize,
    pub action: Action,
}

pub fn validate_recording(recording: &SessionRecording) -> Result<(), ReplayError> {
    if recording.start_time.is_none() {
        return Err(ReplayError::InvalidRecording {
            session_id: recording.session_id.clone(),
            reason: "missing start time".into(),
        });
    }
    if recording.actions.is_empty() {
        return Err(ReplayError::InvalidRecording {
            session_id: recording.session_id.clone(),
            reason: "recording has no actions".into(),
        });
    }
    Ok(())
}

/// Select the actions to replay and scale their WAIT durations.
pub fn plan(
    recording: &SessionRecording,
    options: &ReplayOptions,
    min_wait: Duration,
) -> Result<Vec<PlannedAction>, ReplayError> {
    options.validate()?;
    validate_recording(recording)?;

    let total = recording.actions.len();
    let selected: Vec<(usize, &Action)> = match options.action_index {
        Some(index) if index >= total => {
            return Err(ReplayError::InvalidActionIndex { index, total });
        }
        Some(index) => vec![(index, &recording.actions[index])],
        None => recording.actions.iter().enumerate().collect(),
    };

    let min_wait_ms = min_wait.as_millis() as u64;
    Ok(selected
        .into_iter()
        .map(|(index, action)| {
            let mut action = action.clone();
            if let ActionKind::Wait { duration } = &mut action.kind {
                *duration = scale_wait(*duration, options.speed_multiplier, min_wait_ms);
            }
            PlannedAction { index, action }
        })
        .collect())
}

/// Accumulates replay progress. Survives cancellation of the replay future.
#[derive(Debug, Clone, Default)]
pub struct ReplayRun {
    pub executed: usize,
    pub skipped: usize,
    pub errors: Vec<ReplayActionError>,
    pub screenshots: Vec<String>,
}

enum ActionOutcome {
    Executed,
    Skipped,
}

/// Executes planned actions one by one against a target.
pub struct ActionRunner<'a> {
    target: &'a mut dyn Target,
    timing: ReplayTiming,
    capture_screenshots: bool,
    domains: DomainTracker,
    bus: Option<(EventBus, String)>,
}

impl<'a> ActionRunner<'a> {
    pub fn new(target: &'a mut dyn Target, timing: ReplayTiming) -> Self {
        Self {
            target,
            timing,
            capture_screenshots: false,
            domains: DomainTracker::new(),
            bus: None,
        }
    }

    pub fn with_screenshots(mut self, enabled: bool) -> Self {
        self.capture_screenshots = enabled;
        self
    }

    pub fn with_events(mut self, bus: EventBus, session_id: impl Into<String>) -> Self {
        self.bus = Some((bus, session_id.into()));
        self
    }

    /// Run every action in order, then take a final screenshot if enabled.
    pub async fn run_all(&mut self, actions: &[PlannedAction], run: &mut ReplayRun) {
        for (pos, planned) in actions.iter().enumerate() {
            let ok = match self.run_one(&planned.action, run).await {
                Ok(ActionOutcome::Executed) => true,
                Ok(ActionOutcome::Skipped) => {
                    run.skipped += 1;
                    true
                }
                Err(e) => {
                    warn!(
                        "Action {} ({}) failed: {}",
                        planned.index,
                        planned.action.action_type(),
                        e
                    );
                    run.errors.push(ReplayActionError {
                        index: planned.index,
                        action_type: planned.action.action_type(),
                        message: e.to_string(),
                    });
                    false
                }
            };
            run.executed += 1;

            if let Some((bus, session_id)) = &self.bus {
                bus.publish(EngineEvent::ReplayActionCompleted {
                    session_id: session_id.clone(),
                    index: planned.index,
                    ok,
                });
            }

            if pos + 1 < actions.len() {
                tokio::time::sleep(self.timing.inter_action_delay).await;
            }
        }

        if self.capture_screenshots {
            self.capture_screenshot(run).await;
        }
    }

    async fn run_one(&mut self, action: &Action, run: &mut ReplayRun) -> Result<ActionOutcome, ProtocolError> {
        match &action.kind {
            ActionKind::ProtocolCommand { method, params } => {
                let params = if params.is_null() { json!({}) } else { params.clone() };
                self.issue(method, params).await?;
                Ok(ActionOutcome::Executed)
            }
            ActionKind::Navigation { url } => {
                let timeout = self.timing.command_timeout;
                match tokio::time::timeout(timeout, self.target.navigate(url)).await {
                    Ok(result) => {
                        result?;
                    }
                    Err(_) => return Err(ProtocolError::Timeout(timeout.as_millis() as u64)),
                }
                if self.capture_screenshots {
                    self.capture_screenshot(run).await;
                }
                Ok(ActionOutcome::Executed)
            }
            ActionKind::Wait { duration } => {
                tokio::time::sleep(Duration::from_millis(*duration)).await;
                Ok(ActionOutcome::Executed)
            }
            _ => {
                debug!("Skipping inert {} action", action.action_type());
                Ok(ActionOutcome::Skipped)
            }
        }
    }

    async fn issue(&mut self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let timeout = self.timing.command_timeout;
        if is_enable_command(method) {
            let result = match tokio::time::timeout(timeout, self.target.send(method, params)).await {
                Ok(Ok(v)) => v,
                Ok(Err(e)) if e.is_already_enabled() => Value::Null,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ProtocolError::Timeout(timeout.as_millis() as u64)),
            };
            self.domains.mark_enabled(method);
            return Ok(result);
        }

        self.domains.ensure_for_method(self.target, method).await?;
        match tokio::time::timeout(timeout, self.target.send(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn capture_screenshot(&mut self, run: &mut ReplayRun) {
        match self.target.screenshot().await {
            Ok(bytes) => run
                .screenshots
                .push(base64::engine::general_purpose::STANDARD.encode(bytes)),
            Err(e) => warn!("Screenshot during replay failed: {}", e),
        }
    }
}

pub struct ReplayEngine {
    store: SessionStore,
    launcher: Arc<dyn TargetLauncher>,
    config: ReplayConfig,
    headless: bool,
    bus: EventBus,
}

impl ReplayEngine {
    pub fn new(
        store: SessionStore,
        launcher: Arc<dyn TargetLauncher>,
        config: ReplayConfig,
        headless: bool,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            launcher,
            config,
            headless,
            bus,
        }
    }

    pub async fn replay(&self, session_id: &str, options: ReplayOptions) -> Result<ReplayResult, ReplayError> {
        options.validate()?;
        let recording = self.store.load(session_id).await?;
        let timing = ReplayTiming::from(&self.config);
        let planned = plan(&recording, &options, timing.min_wait)?;

        info!(
            "Replaying session {} ({} of {} actions, speed x{}, dry_run={})",
            session_id,
            planned.len(),
            recording.actions.len(),
            options.speed_multiplier,
            options.dry_run
        );

        let mut launch = LaunchOptions {
            headless: self.headless,
            persistent: true,
        };
        if options.dry_run {
            launch = launch.ephemeral();
        }
        let mut guard = TargetGuard::acquire(self.launcher.as_ref(), launch)
            .await
            .map_err(ReplayError::Launch)?;

        let started = Instant::now();
        let mut run = ReplayRun::default();

        if let Some(initial) = &recording.initial_state
            && let Err(e) = SnapshotService::new(self.bus.clone()).inject(guard.target(), initial).await
        {
            warn!("Could not restore initial state for {}: {}", session_id, e);
        }

        {
            let mut runner = ActionRunner::new(guard.target(), timing)
                .with_screenshots(!options.skip_screenshots)
                .with_events(self.bus.clone(), session_id);
            runner.run_all(&planned, &mut run).await;
        }

        if let Err(e) = guard.release().await {
            warn!("Failed to release replay target: {}", e);
        }

        let result = ReplayResult {
            session_id: session_id.to_string(),
            success: run.errors.is_empty(),
            actions_executed: run.executed,
            actions_skipped: run.skipped,
            total_actions: planned.len(),
            errors: run.errors,
            screenshots: run.screenshots,
            duration_ms: started.elapsed().as_millis() as u64,
            dry_run: options.dry_run,
        };

        self.bus.publish(EngineEvent::ReplayFinished {
            session_id: session_id.to_string(),
            success: result.success,
            errors: result.errors.len(),
        });
        info!(
            "Replay of {} finished: {}/{} actions, {} errors",
            session_id,
            result.actions_executed,
            result.total_actions,
            result.errors.len()
        );
        Ok(result)
    }
}
