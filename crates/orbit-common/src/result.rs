use crate::action::ActionType;
use crate::modality::{Modality, ModalityChoice};
use crate::capture::CaptureSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Uniform output of every execution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    pub modality: Modality,
    pub execution_time_seconds: f64,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded PNG captures, in the order they were taken.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// One action that failed during replay. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayActionError {
    /// Index into the original recording.
    pub index: usize,
    pub action_type: ActionType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub session_id: String,
    /// `true` iff no action failed.
    pub success: bool,
    pub actions_executed: usize,
    pub actions_skipped: usize,
    pub total_actions: usize,
    pub errors: Vec<ReplayActionError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<String>,
    pub duration_ms: u64,
    pub dry_run: bool,
}

/// Returned by `record-session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub session_id: String,
    pub action_count: usize,
    pub screenshot_count: usize,
    pub duration_ms: u64,
    pub stop_reason: String,
    pub auto_stopped: bool,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Returned by `capture-and-analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureAnalysis {
    pub session_id: String,
    pub capture_reference: String,
    pub network: CaptureSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_confidence: Option<f64>,
    pub choice: ModalityChoice,
    pub screenshot_count: usize,
}
