use crate::action::{Action, ActionKind, BodyPreview, FrameDirection};
use crate::recording::SessionRecording;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Network exchanges observed while a task was performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficCapture {
    pub task_description: String,
    pub captured_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub exchanges: Vec<CapturedExchange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub websocket_messages: Vec<CapturedMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
    pub request_id: String,
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<BodyPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<BodyPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedMessage {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub direction: FrameDirection,
    pub message: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub total_requests: usize,
    pub api_requests: usize,
    pub api_endpoints: usize,
    pub hosts: Vec<String>,
    /// Mean over exchanges with timing data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<u64>,
    #[serde(default)]
    pub websocket_messages: usize,
}

impl CapturedExchange {
    /// XHR/Fetch traffic, or anything answered with JSON.
    pub fn is_api_call(&self) -> bool {
        let by_type = self
            .resource_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("xhr") || t.eq_ignore_ascii_case("fetch"))
            .unwrap_or(false);
        let by_mime = self
            .mime_type
            .as_deref()
            .map(|m| m.contains("json"))
            .unwrap_or(false);
        by_type || by_mime
    }

    /// `METHOD host/path` with the query string removed.
    pub fn endpoint_key(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(u) => format!(
                "{} {}{}",
                self.method.to_ascii_uppercase(),
                u.host_str().unwrap_or_default(),
                u.path()
            ),
            Err(_) => format!("{} {}", self.method.to_ascii_uppercase(), self.url),
        }
    }
}

impl TrafficCapture {
    pub fn new(task_description: impl Into<String>, captured_at: u64) -> Self {
        Self {
            task_description: task_description.into(),
            captured_at,
            session_id: None,
            exchanges: Vec::new(),
            websocket_messages: Vec::new(),
        }
    }

    /// Pairs REQUEST and RESPONSE actions by request id, keeping request order.
    pub fn from_actions(task_description: impl Into<String>, captured_at: u64, actions: &[Action]) -> Self {
        let mut capture = Self::new(task_description, captured_at);
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for action in actions {
            match &action.kind {
                ActionKind::Request {
                    request_id,
                    method,
                    url,
                    resource_type,
                    headers,
                    body,
                } => {
                    by_id.insert(request_id.clone(), capture.exchanges.len());
                    capture.exchanges.push(CapturedExchange {
                        request_id: request_id.clone(),
                        method: method.clone(),
                        url: url.clone(),
                        resource_type: resource_type.clone(),
                        status: None,
                        mime_type: None,
                        timestamp: action.timestamp,
                        request_headers: headers.clone(),
                        response_headers: BTreeMap::new(),
                        request_body: body.clone(),
                        response_body: None,
                        duration_ms: None,
                    });
                }
                ActionKind::Response {
                    request_id,
                    status,
                    mime_type,
                    headers,
                    body,
                    duration_ms,
                    ..
                } => {
                    if let Some(&idx) = by_id.get(request_id) {
                        let exchange = &mut capture.exchanges[idx];
                        exchange.status = Some(*status);
                        exchange.mime_type = mime_type.clone();
                        exchange.response_headers = headers.clone();
                        exchange.response_body = body.clone();
                        exchange.duration_ms = *duration_ms;
                    }
                }
                ActionKind::WebsocketMessage {
                    request_id,
                    url,
                    direction,
                    message,
                } => capture.websocket_messages.push(CapturedMessage {
                    request_id: request_id.clone(),
                    url: url.clone(),
                    direction: *direction,
                    message: message.clone(),
                    timestamp: action.timestamp,
                }),
                _ => {}
            }
        }
        capture
    }

    pub fn from_recording(recording: &SessionRecording) -> Self {
        let mut capture = Self::from_actions(
            recording.task_description.clone(),
            recording.end_time.or(recording.start_time).unwrap_or_default(),
            &recording.actions,
        );
        capture.session_id = Some(recording.session_id.clone());
        capture
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.websocket_messages.is_empty()
    }

    pub fn summary(&self) -> CaptureSummary {
        let hosts: BTreeSet<String> = self
            .exchanges
            .iter()
            .filter_map(|e| url::Url::parse(&e.url).ok())
            .filter_map(|u| u.host_str().map(str::to_string))
            .collect();
        let api: Vec<&CapturedExchange> = self.exchanges.iter().filter(|e| e.is_api_call()).collect();
        let endpoints: BTreeSet<String> = api.iter().map(|e| e.endpoint_key()).collect();
        let timed: Vec<u64> = self.exchanges.iter().filter_map(|e| e.duration_ms).collect();
        let average_duration_ms = match timed.len() {
            0 => None,
            n => Some(timed.iter().sum::<u64>() / n as u64),
        };

        CaptureSummary {
            total_requests: self.exchanges.len(),
            api_requests: api.len(),
            api_endpoints: endpoints.len(),
            hosts: hosts.into_iter().collect(),
            average_duration_ms,
            websocket_messages: self.websocket_messages.len(),
        }
    }
}
