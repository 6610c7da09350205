use crate::action::Action;
use crate::snapshot::StateSnapshot;
use serde::{Deserialize, Serialize};

/// One task attempt: the append-only action log plus state captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecording {
    pub session_id: String,
    pub task_description: String,
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub capture_level: u8,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub initial_state: Option<StateSnapshot>,
    #[serde(default)]
    pub final_state: Option<StateSnapshot>,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotEntry>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotEntry {
    pub timestamp: u64,
    /// Base64-encoded PNG.
    pub image: String,
    /// Number of actions recorded when the screenshot was taken.
    pub action_index: usize,
}

impl SessionRecording {
    pub fn new(session_id: impl Into<String>, task_description: impl Into<String>, start_time: u64) -> Self {
        Self {
            session_id: session_id.into(),
            task_description: task_description.into(),
            start_time: Some(start_time),
            end_time: None,
            capture_level: 0,
            actions: Vec::new(),
            initial_state: None,
            final_state: None,
            screenshots: Vec::new(),
            failed: false,
            error: None,
        }
    }

    /// Appends an action. The log is never reordered.
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn push_screenshot(&mut self, timestamp: u64, image: String) {
        let action_index = self.actions.len();
        self.screenshots.push(ScreenshotEntry {
            timestamp,
            image,
            action_index,
        });
    }

    /// Sets the end time, clamped so that `end_time >= start_time`.
    pub fn finalize(&mut self, end_time: u64) {
        let end = match self.start_time {
            Some(start) => end_time.max(start),
            None => end_time,
        };
        self.end_time = Some(end);
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.failed = true;
        self.error = Some(error.into());
    }
}
