use super::performer::TaskPerformer;
use super::{ExecutionContext, ExecutionError, ExecutionStrategy, Progress};
use crate::config::schema::ReplayConfig;
use crate::events::EventBus;
use crate::replay::{ActionRunner, ReplayOptions, ReplayRun, ReplayTiming, plan};
use crate::snapshot::SnapshotService;
use crate::store::SessionStore;
use crate::target::{LaunchOptions, RecordingTarget, Target, TargetGuard, TargetLauncher};
use async_trait::async_trait;
use base64::Engine;
use orbit_common::error::ProtocolError;
use orbit_common::modality::{Modality, ModalityChoice};
use orbit_common::recording::SessionRecording;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Drives a fresh target over the debugging protocol.
///
/// Order: apply snapshot, replay the prior session, perform the task, take
/// a screenshot, report the final URL. Commands issued along the way can be
/// persisted as a new session for later replay.
pub struct ProtocolStrategy {
    launcher: Arc<dyn TargetLauncher>,
    store: SessionStore,
    performer: Arc<dyn TaskPerformer>,
    replay: ReplayConfig,
    headless: bool,
    timeout: Duration,
    snapshots: SnapshotService,
}

impl ProtocolStrategy {
    pub fn new(
        launcher: Arc<dyn TargetLauncher>,
        store: SessionStore,
        performer: Arc<dyn TaskPerformer>,
        replay: ReplayConfig,
        headless: bool,
        timeout: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            launcher,
            store,
            performer,
            replay,
            headless,
            timeout,
            snapshots: SnapshotService::new(bus),
        }
    }

    async fn drive(
        &self,
        target: &mut dyn Target,
        task_description: &str,
        ctx: &ExecutionContext,
        progress: &mut Progress,
    ) -> Result<String, ExecutionError> {
        let started_ms = orbit_common::now_millis();

        if let Some(snapshot) = &ctx.state_snapshot {
            let report = self.snapshots.inject(target, snapshot).await?;
            progress.note(
                "injection",
                serde_json::to_value(&report).unwrap_or_default(),
            );
        }

        let mut recorder = RecordingTarget::new(target);
        let mut replayed = 0;

        if let Some(prior) = &ctx.prior_session {
            let timing = ReplayTiming::from(&self.replay);
            let options = ReplayOptions {
                skip_screenshots: true,
                ..Default::default()
            };
            match plan(prior, &options, timing.min_wait) {
                Ok(planned) => {
                    let mut run = ReplayRun::default();
                    ActionRunner::new(&mut recorder, timing)
                        .run_all(&planned, &mut run)
                        .await;
                    replayed = run.executed - run.skipped;
                    progress.note("priorSessionId", prior.session_id.clone());
                    progress.note("priorSessionActions", run.executed);
                    progress.note("priorSessionErrors", run.errors.len());
                    if !run.errors.is_empty() {
                        warn!(
                            "{} action(s) of prior session {} failed",
                            run.errors.len(),
                            prior.session_id
                        );
                    }
                }
                Err(e) => {
                    warn!("Prior session {} not replayed: {}", prior.session_id, e);
                    progress.note("priorSessionError", e.to_string());
                }
            }
        }

        let performed = self.performer.perform(&mut recorder, task_description).await?;
        if performed.is_none() && replayed == 0 {
            return Err(ProtocolError::NotSupported(
                "task description names no URL to open and no prior session was replayed".into(),
            )
            .into());
        }

        match recorder.screenshot().await {
            Ok(bytes) => progress
                .screenshots
                .push(base64::engine::general_purpose::STANDARD.encode(bytes)),
            Err(e) => warn!("Final screenshot failed: {}", e),
        }
        let final_url = recorder.current_url().await?;
        progress.note("final_url", final_url.clone());

        let actions = recorder.into_actions();
        if let Some(session_id) = &ctx.record_as
            && !actions.is_empty()
        {
            let mut recording = SessionRecording::new(session_id, task_description, started_ms);
            recording.initial_state = ctx.state_snapshot.clone();
            for action in actions {
                recording.push(action);
            }
            recording.finalize(orbit_common::now_millis());
            match self.store.save(&recording).await {
                Ok(_) => progress.note("recordedSessionId", session_id.clone()),
                Err(e) => warn!("Could not persist executed commands as {}: {}", session_id, e),
            }
        }

        Ok(performed.unwrap_or_else(|| format!("Replayed prior session; final URL {}", final_url)))
    }
}

#[async_trait]
impl ExecutionStrategy for ProtocolStrategy {
    fn modality(&self) -> Modality {
        Modality::ProtocolAutomation
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        task_description: &str,
        _choice: &ModalityChoice,
        ctx: &ExecutionContext,
        progress: &mut Progress,
    ) -> Result<String, ExecutionError> {
        let options = LaunchOptions {
            headless: self.headless,
            persistent: true,
        };
        let mut guard = TargetGuard::acquire(self.launcher.as_ref(), options)
            .await
            .map_err(ExecutionError::Launch)?;
        info!("Protocol automation on target {}", guard.target().id());

        let outcome = self.drive(guard.target(), task_description, ctx, progress).await;
        if let Err(e) = guard.release().await {
            warn!("Failed to release target: {}", e);
        }
        outcome
    }
}
