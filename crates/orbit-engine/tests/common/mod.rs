#![allow(dead_code)]

use async_trait::async_trait;
use orbit_common::error::ProtocolError;
use orbit_engine::config::schema::OrbitConfig;
use orbit_engine::store::SessionStore;
use orbit_engine::target::{LaunchOptions, NavigationResult, Target, TargetEvent, TargetLauncher};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Base64 of the 8-byte PNG signature.
pub const PNG_B64: &str = "iVBORw0KGgo=";

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub url: String,
    pub calls: Vec<Call>,
    pub local: BTreeMap<String, String>,
    pub session: BTreeMap<String, String>,
    pub cookies: Vec<Value>,
    pub indexed: Vec<Value>,
    pub fail_methods: HashSet<String>,
    /// Methods answered with the target's "already enabled" error.
    pub already_enabled: HashSet<String>,
    /// `Network.getResponseBody` results keyed by request id.
    pub response_bodies: HashMap<String, Value>,
    pub screenshot_delay: Option<Duration>,
    pub reject_cookies: HashSet<String>,
    pub fail_navigation: bool,
    /// Emitted after every successful navigation.
    pub on_navigate: Vec<TargetEvent>,
    pub closed: bool,
    pub aborted: bool,
    pub launch_options: Option<LaunchOptions>,
}

impl MockState {
    /// Protocol methods issued, `.enable` calls excluded.
    pub fn methods(&self) -> Vec<String> {
        self.calls
            .iter()
            .map(|c| c.method.clone())
            .filter(|m| !m.ends_with(".enable"))
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.iter().filter(|c| c.method == method).count()
    }
}

/// Cloneable view of one mock target, usable after the target was moved.
#[derive(Clone)]
pub struct MockHandle {
    pub state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<TargetEvent>,
}

impl MockHandle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(MockState {
                url: "about:blank".into(),
                ..Default::default()
            })),
            events,
        }
    }

    pub fn emit(&self, event: TargetEvent) {
        let _ = self.events.send(event);
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn target(&self) -> MockTarget {
        MockTarget {
            handle: self.clone(),
        }
    }
}

pub struct MockTarget {
    pub handle: MockHandle,
}

fn storage_area<'a>(state: &'a mut MockState, expression: &str) -> &'a mut BTreeMap<String, String> {
    if expression.contains("sessionStorage") {
        &mut state.session
    } else {
        &mut state.local
    }
}

/// Arguments of `window.x.setItem(a, b)` parsed as a JSON array.
fn call_args(expression: &str, call: &str) -> Vec<String> {
    let start = expression.find(call).map(|i| i + call.len()).unwrap_or(0);
    let inner = expression[start..].trim_end().trim_end_matches(')');
    serde_json::from_str::<Vec<String>>(&format!("[{}]", inner)).unwrap_or_default()
}

impl MockTarget {
    fn evaluate_expression(state: &mut MockState, expression: &str) -> Value {
        if expression.contains("location.href") {
            return json!(state.url);
        }
        if expression.contains("indexedDB") {
            return Value::Array(state.indexed.clone());
        }
        if expression.contains(".setItem(") {
            let args = call_args(expression, ".setItem(");
            if let [key, value] = args.as_slice() {
                storage_area(state, expression).insert(key.clone(), value.clone());
            }
            return Value::Null;
        }
        if expression.contains("s.key(i)") {
            let map = storage_area(state, expression).clone();
            return serde_json::to_value(map).unwrap();
        }
        Value::Null
    }

    fn respond(state: &mut MockState, method: &str, params: &Value) -> Value {
        match method {
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or_default().to_string();
                json!({"result": {"type": "object", "value": Self::evaluate_expression(state, &expression)}})
            }
            "Network.getAllCookies" => json!({"cookies": state.cookies}),
            "Network.setCookie" => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                if state.reject_cookies.contains(&name) {
                    json!({"success": false})
                } else {
                    state.cookies.push(params.clone());
                    json!({"success": true})
                }
            }
            "Page.captureScreenshot" => json!({"data": PNG_B64}),
            "Page.navigate" => {
                state.url = params["url"].as_str().unwrap_or_default().to_string();
                json!({"frameId": "main"})
            }
            "Network.getResponseBody" => {
                let id = params["requestId"].as_str().unwrap_or_default();
                state.response_bodies.get(id).cloned().unwrap_or_else(|| json!({}))
            }
            _ => json!({}),
        }
    }
}

#[async_trait]
impl Target for MockTarget {
    fn id(&self) -> &str {
        "mock"
    }

    async fn send(&mut self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let (result, delay) = {
            let mut state = self.handle.state.lock().unwrap();
            if state.closed {
                return Err(ProtocolError::Closed);
            }
            state.calls.push(Call {
                method: method.to_string(),
                params: params.clone(),
            });
            if state.fail_methods.contains(method) {
                return Err(ProtocolError::command(method, "mock failure"));
            }
            if state.already_enabled.contains(method) {
                return Err(ProtocolError::command(method, "Domain is already enabled"));
            }
            let delay = match method {
                "Page.captureScreenshot" => state.screenshot_delay,
                _ => None,
            };
            (Self::respond(&mut state, method, &params), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(result)
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, ProtocolError> {
        let events = {
            let mut state = self.handle.state.lock().unwrap();
            state.calls.push(Call {
                method: "navigate".into(),
                params: json!({"url": url}),
            });
            if state.fail_navigation {
                return Err(ProtocolError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED {}", url)));
            }
            state.url = url.to_string();
            state.on_navigate.clone()
        };
        self.handle.emit(TargetEvent::Navigated { url: url.to_string() });
        for event in events {
            self.handle.emit(event);
        }
        Ok(NavigationResult {
            url: url.to_string(),
            title: "Mock Page".into(),
            status: 200,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.handle.events.subscribe()
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.handle.with(|s| s.closed = true);
        Ok(())
    }

    fn abort(&mut self) {
        self.handle.with(|s| {
            s.closed = true;
            s.aborted = true;
        });
    }
}

/// Hands out prepared mock targets in order, then fresh ones.
#[derive(Clone, Default)]
pub struct MockLauncher {
    pub prepared: Arc<Mutex<Vec<MockHandle>>>,
    pub launched: Arc<Mutex<Vec<MockHandle>>>,
    pub fail: bool,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn prepare(&self, handle: MockHandle) {
        self.prepared.lock().unwrap().push(handle);
    }

    pub fn launched(&self) -> Vec<MockHandle> {
        self.launched.lock().unwrap().clone()
    }

    pub fn last(&self) -> MockHandle {
        self.launched().last().cloned().expect("no target launched")
    }
}

#[async_trait]
impl TargetLauncher for MockLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn Target>, ProtocolError> {
        if self.fail {
            return Err(ProtocolError::Launch("no browser in test".into()));
        }
        let handle = {
            let mut prepared = self.prepared.lock().unwrap();
            if prepared.is_empty() {
                MockHandle::new()
            } else {
                prepared.remove(0)
            }
        };
        handle.with(|s| s.launch_options = Some(options));
        self.launched.lock().unwrap().push(handle.clone());
        Ok(Box::new(handle.target()))
    }
}

/// A store rooted in a fresh temporary directory.
pub fn temp_store() -> (TempDir, SessionStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"), dir.path().join("captures"));
    (dir, store)
}

/// Fast timings for tests.
pub fn test_config(dir: &TempDir) -> OrbitConfig {
    let mut config = OrbitConfig::default();
    config.replay.inter_action_delay_ms = 1;
    config.replay.min_wait_ms = 1;
    config.replay.command_timeout_ms = 1_000;
    config.storage.sessions_dir = dir.path().join("sessions");
    config.storage.captures_dir = dir.path().join("captures");
    config
}

pub mod analyzers {
    use async_trait::async_trait;
    use orbit_common::capture::TrafficCapture;
    use orbit_common::error::AnalyzerError;
    use orbit_common::modality::AnalysisReport;
    use orbit_engine::analyzer::TrafficAnalyzer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Always answers with the same report.
    pub struct FixedAnalyzer {
        pub report: AnalysisReport,
        pub calls: AtomicUsize,
    }

    impl FixedAnalyzer {
        pub fn new(report: AnalysisReport) -> Self {
            Self {
                report,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn confidence(confidence: f64) -> Self {
            Self::new(AnalysisReport::new(confidence))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrafficAnalyzer for FixedAnalyzer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn analyze(&self, _capture: &TrafficCapture, _task: &str) -> Result<AnalysisReport, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.report.clone())
        }
    }

    pub struct FailingAnalyzer;

    #[async_trait]
    impl TrafficAnalyzer for FailingAnalyzer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn analyze(&self, _capture: &TrafficCapture, _task: &str) -> Result<AnalysisReport, AnalyzerError> {
            Err(AnalyzerError::Process("analyzer crashed".into()))
        }
    }

    /// Never answers within any sane timeout.
    pub struct SlowAnalyzer;

    #[async_trait]
    impl TrafficAnalyzer for SlowAnalyzer {
        fn name(&self) -> &str {
            "slow"
        }

        async fn analyze(&self, _capture: &TrafficCapture, _task: &str) -> Result<AnalysisReport, AnalyzerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(AnalysisReport::new(0.99))
        }
    }
}

pub mod fixtures {
    use orbit_common::action::{Action, ActionKind};
    use orbit_common::capture::TrafficCapture;
    use orbit_common::recording::SessionRecording;
    use orbit_engine::target::TargetEvent;
    use std::collections::BTreeMap;

    pub fn request_action(id: &str, url: &str) -> Action {
        Action::new(
            1_000,
            ActionKind::Request {
                request_id: id.into(),
                method: "POST".into(),
                url: url.into(),
                resource_type: Some("XHR".into()),
                headers: BTreeMap::new(),
                body: None,
            },
        )
    }

    pub fn response_action(id: &str, url: &str) -> Action {
        Action::new(
            1_010,
            ActionKind::Response {
                request_id: id.into(),
                url: url.into(),
                status: 200,
                mime_type: Some("application/json".into()),
                headers: BTreeMap::new(),
                body: None,
                duration_ms: None,
            },
        )
    }

    /// One JSON API exchange against `https://app.test/api/login`.
    pub fn api_capture(task: &str) -> TrafficCapture {
        let url = "https://app.test/api/login";
        TrafficCapture::from_actions(task, 2_000, &[request_action("r1", url), response_action("r1", url)])
    }

    pub fn network_events(url: &str) -> Vec<TargetEvent> {
        vec![
            TargetEvent::Request {
                id: "n1".into(),
                method: "GET".into(),
                url: url.into(),
                resource_type: Some("Fetch".into()),
                headers: BTreeMap::new(),
                post_data: None,
            },
            TargetEvent::Response {
                id: "n1".into(),
                url: url.into(),
                status: 200,
                mime_type: Some("application/json".into()),
                headers: BTreeMap::new(),
            },
        ]
    }

    pub fn recording(session_id: &str, actions: Vec<Action>) -> SessionRecording {
        let mut rec = SessionRecording::new(session_id, "log into a form", 1_000);
        for action in actions {
            rec.push(action);
        }
        rec.finalize(9_000);
        rec
    }
}
