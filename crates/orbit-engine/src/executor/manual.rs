use super::performer::first_url;
use super::{ExecutionContext, ExecutionError, ExecutionStrategy, Progress};
use crate::events::EventBus;
use crate::snapshot::SnapshotService;
use crate::target::{LaunchOptions, Target, TargetEvent, TargetGuard, TargetLauncher};
use async_trait::async_trait;
use base64::Engine;
use orbit_common::modality::{Modality, ModalityChoice};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, broadcast};
use tracing::{info, warn};

/// External "the human is done" signal.
#[async_trait]
pub trait CompletionSignal: Send + Sync {
    async fn wait(&self);
}

/// Completes when [`NotifySignal::complete`] is called, even if that
/// happened before anyone waited.
#[derive(Debug, Clone, Default)]
pub struct NotifySignal {
    notify: Arc<Notify>,
}

impl NotifySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.notify.notify_one();
    }
}

#[async_trait]
impl CompletionSignal for NotifySignal {
    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Completes when a line is entered on stdin. Never completes on EOF.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinSignal;

#[async_trait]
impl CompletionSignal for StdinSignal {
    async fn wait(&self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => std::future::pending::<()>().await,
        }
    }
}

enum Completion {
    Signalled,
    TargetClosed,
}

/// Opens a visible target and waits, time-boxed, for a human to finish.
pub struct ManualStrategy {
    launcher: Arc<dyn TargetLauncher>,
    signal: Arc<dyn CompletionSignal>,
    wait_timeout: Duration,
    setup_timeout: Duration,
    snapshots: SnapshotService,
}

impl ManualStrategy {
    pub fn new(
        launcher: Arc<dyn TargetLauncher>,
        signal: Arc<dyn CompletionSignal>,
        wait_timeout: Duration,
        setup_timeout: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            launcher,
            signal,
            wait_timeout,
            setup_timeout,
            snapshots: SnapshotService::new(bus),
        }
    }

    async fn attend(
        &self,
        target: &mut dyn Target,
        mut events: broadcast::Receiver<TargetEvent>,
        task_description: &str,
        ctx: &ExecutionContext,
        progress: &mut Progress,
    ) -> Result<String, ExecutionError> {
        if let Some(snapshot) = &ctx.state_snapshot {
            let report = self.snapshots.inject(target, snapshot).await?;
            progress.note(
                "injection",
                serde_json::to_value(&report).unwrap_or_default(),
            );
        }
        if let Some(url) = first_url(task_description)
            && let Err(e) = target.navigate(url.as_str()).await
        {
            warn!("Could not open {} for manual completion: {}", url, e);
        }

        info!(
            "Waiting up to {:?} for manual completion of: {}",
            self.wait_timeout, task_description
        );
        let completion = tokio::select! {
            _ = self.signal.wait() => Completion::Signalled,
            _ = wait_closed(&mut events) => Completion::TargetClosed,
            _ = tokio::time::sleep(self.wait_timeout) => {
                return Err(ExecutionError::Timeout(self.wait_timeout.as_millis() as u64));
            }
        };

        match completion {
            Completion::Signalled => {
                progress.note("completedBy", "signal");
                match target.screenshot().await {
                    Ok(bytes) => progress
                        .screenshots
                        .push(base64::engine::general_purpose::STANDARD.encode(bytes)),
                    Err(e) => warn!("Screenshot after manual completion failed: {}", e),
                }
                if let Ok(url) = target.current_url().await {
                    progress.note("final_url", url);
                }
                Ok("Manual completion signalled".to_string())
            }
            Completion::TargetClosed => {
                progress.note("completedBy", "target_closed");
                Ok("Target closed by operator".to_string())
            }
        }
    }
}

async fn wait_closed(events: &mut broadcast::Receiver<TargetEvent>) {
    loop {
        match events.recv().await {
            Ok(TargetEvent::Closed) | Err(broadcast::error::RecvError::Closed) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
}

#[async_trait]
impl ExecutionStrategy for ManualStrategy {
    fn modality(&self) -> Modality {
        Modality::ManualFallback
    }

    fn timeout(&self) -> Duration {
        self.wait_timeout + self.setup_timeout
    }

    async fn run(
        &self,
        task_description: &str,
        _choice: &ModalityChoice,
        ctx: &ExecutionContext,
        progress: &mut Progress,
    ) -> Result<String, ExecutionError> {
        let mut guard = TargetGuard::acquire(self.launcher.as_ref(), LaunchOptions::visible())
            .await
            .map_err(ExecutionError::Launch)?;
        let events = guard.target().subscribe();

        let outcome = self
            .attend(guard.target(), events, task_description, ctx, progress)
            .await;
        if let Err(e) = guard.release().await {
            warn!("Failed to release target: {}", e);
        }
        outcome
    }
}
