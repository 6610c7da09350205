//! Typed publish/subscribe channel for engine lifecycle events.

use orbit_common::action::Action;
use orbit_common::modality::ModalityChoice;
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ModalityChosen {
        choice: ModalityChoice,
    },
    ExecutionFinished {
        execution_id: String,
        success: bool,
    },
    RecordingStarted {
        session_id: String,
    },
    ActionRecorded {
        session_id: String,
        index: usize,
        action: Action,
    },
    RecordingStopped {
        session_id: String,
        reason: String,
        action_count: usize,
    },
    ReplayActionCompleted {
        session_id: String,
        index: usize,
        ok: bool,
    },
    ReplayFinished {
        session_id: String,
        success: bool,
        errors: usize,
    },
    StorageWritten {
        area: String,
        key: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publishing without subscribers is a no-op.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}
