use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bodies are previewed up to this many characters.
pub const BODY_PREVIEW_CHARS: usize = 500;
/// WebSocket payloads are kept up to this many characters.
pub const WEBSOCKET_MESSAGE_CHARS: usize = 1000;

/// Size and leading text of a request or response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPreview {
    /// Bytes.
    pub size: usize,
    pub preview: String,
}

impl BodyPreview {
    pub fn text(body: &str) -> Self {
        Self {
            size: body.len(),
            preview: truncate_chars(body, BODY_PREVIEW_CHARS),
        }
    }

    pub fn binary(size: usize) -> Self {
        Self {
            size,
            preview: "[binary data]".to_string(),
        }
    }
}

/// The first `max` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameDirection {
    ClientToServer,
    ServerToClient,
}

/// One observed or synthesized event in a session recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    ProtocolCommand {
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Navigation {
        url: String,
    },
    Wait {
        /// Milliseconds.
        duration: u64,
    },
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_type: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<BodyPreview>,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        url: String,
        status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<BodyPreview>,
        /// Time since the matching request was observed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    WebsocketMessage {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        direction: FrameDirection,
        message: String,
    },
    ConsoleLog {
        level: String,
        text: String,
    },
    PageError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    ScreenshotAnalysis {
        screenshot_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
}

/// Fieldless mirror of [`ActionKind`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    ProtocolCommand,
    Navigation,
    Wait,
    Request,
    Response,
    ConsoleLog,
    PageError,
    ScreenshotAnalysis,
    WebsocketMessage,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::ProtocolCommand => "PROTOCOL_COMMAND",
            ActionType::Navigation => "NAVIGATION",
            ActionType::Wait => "WAIT",
            ActionType::Request => "REQUEST",
            ActionType::Response => "RESPONSE",
            ActionType::ConsoleLog => "CONSOLE_LOG",
            ActionType::PageError => "PAGE_ERROR",
            ActionType::ScreenshotAnalysis => "SCREENSHOT_ANALYSIS",
            ActionType::WebsocketMessage => "WEBSOCKET_MESSAGE",
        };
        f.write_str(name)
    }
}

impl Action {
    pub fn new(timestamp: u64, kind: ActionKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn now(kind: ActionKind) -> Self {
        Self::new(crate::now_millis(), kind)
    }

    pub fn protocol_command(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self::now(ActionKind::ProtocolCommand {
            method: method.into(),
            params,
        })
    }

    pub fn navigation(url: impl Into<String>) -> Self {
        Self::now(ActionKind::Navigation { url: url.into() })
    }

    pub fn wait(duration_ms: u64) -> Self {
        Self::now(ActionKind::Wait {
            duration: duration_ms,
        })
    }

    pub fn action_type(&self) -> ActionType {
        match &self.kind {
            ActionKind::ProtocolCommand { .. } => ActionType::ProtocolCommand,
            ActionKind::Navigation { .. } => ActionType::Navigation,
            ActionKind::Wait { .. } => ActionType::Wait,
            ActionKind::Request { .. } => ActionType::Request,
            ActionKind::Response { .. } => ActionType::Response,
            ActionKind::ConsoleLog { .. } => ActionType::ConsoleLog,
            ActionKind::PageError { .. } => ActionType::PageError,
            ActionKind::ScreenshotAnalysis { .. } => ActionType::ScreenshotAnalysis,
            ActionKind::WebsocketMessage { .. } => ActionType::WebsocketMessage,
        }
    }

    /// Whether replay re-issues this action. Diagnostics-only variants are inert.
    pub fn is_replayable(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::ProtocolCommand { .. } | ActionKind::Navigation { .. } | ActionKind::Wait { .. }
        )
    }
}
