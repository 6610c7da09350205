//! Execution Engine.
//!
//! One strategy per [`Modality`]. Dispatch is an exhaustive match, every
//! strategy runs under a timeout, and every outcome (including failures and
//! timeouts) becomes exactly one [`ExecutionResult`].

pub mod direct;
pub mod manual;
pub mod performer;
pub mod protocol;

use crate::config::schema::OrbitConfig;
use crate::events::{EngineEvent, EventBus};
use crate::snapshot::SnapshotError;
use crate::store::{SessionStore, StoreError};
use crate::target::TargetLauncher;
use async_trait::async_trait;
use orbit_common::error::ProtocolError;
use orbit_common::modality::{Modality, ModalityChoice};
use orbit_common::recording::SessionRecording;
use orbit_common::result::ExecutionResult;
use orbit_common::snapshot::StateSnapshot;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

pub use direct::DirectCallStrategy;
pub use manual::{CompletionSignal, ManualStrategy, NotifySignal, StdinSignal};
pub use performer::{NavigatePerformer, TaskPerformer};
pub use protocol::ProtocolStrategy;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("No generated call code available for direct-call replication")]
    NoGeneratedCode,
    #[error("Failed to acquire target: {0}")]
    Launch(#[source] ProtocolError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Timed out after {0} ms")]
    Timeout(u64),
    #[error("Process failed: {0}")]
    Process(String),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs beyond the task description and the chosen modality.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Actions of this session are replayed before the task is performed.
    pub prior_session: Option<SessionRecording>,
    pub state_snapshot: Option<StateSnapshot>,
    /// Persist the commands issued by protocol automation under this id.
    pub record_as: Option<String>,
}

/// Partial results. Owned outside the timed future so nothing collected
/// before a timeout is lost.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub screenshots: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl Progress {
    pub fn note(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn modality(&self) -> Modality;

    /// Upper bound for one run, enforced by the engine.
    fn timeout(&self) -> Duration;

    /// Perform the task and return its textual output.
    async fn run(
        &self,
        task_description: &str,
        choice: &ModalityChoice,
        ctx: &ExecutionContext,
        progress: &mut Progress,
    ) -> Result<String, ExecutionError>;
}

pub struct ExecutionEngine {
    direct: DirectCallStrategy,
    protocol: ProtocolStrategy,
    manual: ManualStrategy,
    bus: EventBus,
}

impl ExecutionEngine {
    pub fn new(direct: DirectCallStrategy, protocol: ProtocolStrategy, manual: ManualStrategy, bus: EventBus) -> Self {
        Self {
            direct,
            protocol,
            manual,
            bus,
        }
    }

    pub fn from_config(
        config: &OrbitConfig,
        launcher: Arc<dyn TargetLauncher>,
        store: SessionStore,
        performer: Arc<dyn TaskPerformer>,
        signal: Arc<dyn CompletionSignal>,
        bus: EventBus,
    ) -> Self {
        let timeout = Duration::from_millis(config.execution.timeout_ms);
        Self::new(
            DirectCallStrategy::new(config.direct_call.clone(), timeout),
            ProtocolStrategy::new(
                launcher.clone(),
                store,
                performer,
                config.replay.clone(),
                config.execution.headless,
                timeout,
                bus.clone(),
            ),
            ManualStrategy::new(
                launcher,
                signal,
                Duration::from_millis(config.execution.manual_timeout_ms),
                timeout,
                bus.clone(),
            ),
            bus,
        )
    }

    fn strategy(&self, modality: Modality) -> &dyn ExecutionStrategy {
        match modality {
            Modality::DirectCallReplication => &self.direct,
            Modality::ProtocolAutomation => &self.protocol,
            Modality::ManualFallback => &self.manual,
        }
    }

    pub async fn execute(
        &self,
        task_description: &str,
        choice: &ModalityChoice,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let execution_id = crate::store::new_session_id();
        let strategy = self.strategy(choice.modality);
        let limit = strategy.timeout();
        info!(
            "Execution {} starting with {} (timeout {:?})",
            execution_id,
            strategy.modality(),
            limit
        );

        let started = Instant::now();
        let mut progress = Progress::default();
        let outcome = match tokio::time::timeout(
            limit,
            strategy.run(task_description, choice, ctx, &mut progress),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::Timeout(limit.as_millis() as u64)),
        };

        let mut metadata = progress.metadata;
        metadata.insert("confidence".into(), json!(choice.confidence));
        metadata.insert("reasoning".into(), json!(choice.reasoning));

        let result = match outcome {
            Ok(output) => ExecutionResult {
                execution_id,
                success: true,
                modality: choice.modality,
                execution_time_seconds: started.elapsed().as_secs_f64(),
                output,
                error: None,
                screenshots: progress.screenshots,
                metadata,
            },
            Err(e) => {
                warn!("Execution {} failed: {}", execution_id, e);
                ExecutionResult {
                    execution_id,
                    success: false,
                    modality: choice.modality,
                    execution_time_seconds: started.elapsed().as_secs_f64(),
                    output: String::new(),
                    error: Some(e.to_string()),
                    screenshots: progress.screenshots,
                    metadata,
                }
            }
        };

        self.bus.publish(EngineEvent::ExecutionFinished {
            execution_id: result.execution_id.clone(),
            success: result.success,
        });
        result
    }
}
