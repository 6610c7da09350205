use crate::command::RawCommand;
use crate::reattach::ReattachPolicy;
use crate::target::ChromiumTarget;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, EventWebSocketCreated, EventWebSocketFrameReceived,
    EventWebSocketFrameSent,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventFrameNavigated, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use orbit_common::action::FrameDirection;
use orbit_common::error::ProtocolError;
use orbit_engine::config::schema::{BrowserConfig as BrowserSettings, OrbitConfig};
use orbit_engine::target::{LaunchOptions, Target, TargetEvent, TargetLauncher};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 1024;

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

/// Launches one Chromium process per target.
///
/// `CHROME_BIN` and `ORBIT_USER_DATA_DIR` override the configured binary
/// and persistent profile directory.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    settings: BrowserSettings,
    reattach: ReattachPolicy,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings, reattach: ReattachPolicy) -> Self {
        Self { settings, reattach }
    }

    pub fn from_config(config: &OrbitConfig) -> Self {
        Self::new(config.browser.clone(), ReattachPolicy::from(&config.reattach))
    }

    fn chrome_bin(&self) -> Option<PathBuf> {
        std::env::var("CHROME_BIN")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.settings.chrome_bin.clone())
    }

    fn persistent_profile(&self) -> Option<PathBuf> {
        std::env::var("ORBIT_USER_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.settings.user_data_dir.clone())
    }
}

fn launch_error(context: &str) -> impl Fn(String) -> ProtocolError + '_ {
    move |e| ProtocolError::Launch(format!("{}: {}", context, e))
}

#[async_trait]
impl TargetLauncher for ChromiumLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn Target>, ProtocolError> {
        let mut builder = BrowserConfig::builder().no_sandbox();

        let mut profile = None;
        match self.persistent_profile().filter(|_| options.persistent) {
            Some(dir) => {
                std::fs::create_dir_all(&dir)
                    .map_err(|e| launch_error("Failed to create user data dir")(e.to_string()))?;
                tracing::info!("Using user data dir: {}", dir.display());
                builder = builder.user_data_dir(dir);
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("orbit-chromium-profile-")
                    .tempdir()
                    .map_err(|e| launch_error("Failed to create profile dir")(e.to_string()))?;
                tracing::info!("Using isolated user data dir: {}", dir.path().display());
                builder = builder.user_data_dir(dir.path());
                profile = Some(dir);
            }
        }

        if options.headless {
            tracing::info!("Launching browser in headless mode");
        } else {
            tracing::info!("Launching browser in visible mode");
            builder = builder.with_head();
        }
        if let Some(bin) = self.chrome_bin() {
            tracing::info!("Using custom Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .build()
            .map_err(launch_error("Failed to build browser config"))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| launch_error("Failed to launch browser")(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let closed_tx = events.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    tracing::error!("Browser handler error (ignoring): {}", e);
                }
            }
            tracing::info!("Browser handler task ended");
            let _ = closed_tx.send(TargetEvent::Closed);
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(ProtocolError::Launch(format!("Failed to create page: {}", e)));
            }
        };

        // Request/response events are only emitted once the domain is on.
        if let Err(e) = page
            .execute(RawCommand::new("Network.enable", Value::Null))
            .await
        {
            tracing::warn!("Failed to enable network events: {}", e);
        }

        let forwarders = match spawn_forwarders(&page, &events).await {
            Ok(f) => f,
            Err(e) => {
                handler_task.abort();
                return Err(e);
            }
        };

        let id = format!("chromium-{}", NEXT_TARGET.fetch_add(1, Ordering::Relaxed));
        tracing::info!("Target {} ready", id);
        Ok(Box::new(ChromiumTarget::new(
            id,
            browser,
            page,
            handler_task,
            forwarders,
            events,
            self.reattach,
            profile,
        )))
    }
}

fn listen_error(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Launch(format!("Failed to subscribe to page events: {}", e))
}

/// Flatten a CDP `Headers` object into name/value strings.
fn header_map(headers: &impl Serialize) -> BTreeMap<String, String> {
    match serde_json::to_value(headers) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => (name, s),
                other => (name, other.to_string()),
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Translate CDP page events into [`TargetEvent`]s.
async fn spawn_forwarders(
    page: &Page,
    events: &broadcast::Sender<TargetEvent>,
) -> Result<Vec<JoinHandle<()>>, ProtocolError> {
    let mut tasks = Vec::new();

    let mut navigations = page
        .event_listener::<EventFrameNavigated>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = navigations.next().await {
            // Subframe navigations are not page navigations.
            if event.frame.parent_id.is_none() {
                let _ = tx.send(TargetEvent::Navigated {
                    url: event.frame.url.clone(),
                });
            }
        }
    }));

    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = console.next().await {
            let text: Vec<String> = event
                .args
                .iter()
                .map(|arg| match &arg.value {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => arg.description.clone().unwrap_or_default(),
                })
                .collect();
            let _ = tx.send(TargetEvent::Console {
                level: event.r#type.as_ref().to_string(),
                text: text.join(" "),
            });
        }
    }));

    let mut exceptions = page
        .event_listener::<EventExceptionThrown>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = exceptions.next().await {
            let details = &event.exception_details;
            let message = details
                .exception
                .as_ref()
                .and_then(|e| e.description.clone())
                .unwrap_or_else(|| details.text.clone());
            let _ = tx.send(TargetEvent::PageError { message });
        }
    }));

    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            let _ = tx.send(TargetEvent::Request {
                id: event.request_id.inner().clone(),
                method: event.request.method.clone(),
                url: event.request.url.clone(),
                resource_type: event.r#type.as_ref().map(|t| t.as_ref().to_string()),
                headers: header_map(&event.request.headers),
                post_data: event.request.post_data.clone(),
            });
        }
    }));

    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let _ = tx.send(TargetEvent::Response {
                id: event.request_id.inner().clone(),
                url: event.response.url.clone(),
                status: u16::try_from(event.response.status).unwrap_or_default(),
                mime_type: Some(event.response.mime_type.clone()).filter(|m| !m.is_empty()),
                headers: header_map(&event.response.headers),
            });
        }
    }));

    let mut sockets = page
        .event_listener::<EventWebSocketCreated>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = sockets.next().await {
            let _ = tx.send(TargetEvent::WebSocketCreated {
                id: event.request_id.inner().clone(),
                url: event.url.clone(),
            });
        }
    }));

    let mut sent = page
        .event_listener::<EventWebSocketFrameSent>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = sent.next().await {
            let _ = tx.send(TargetEvent::WebSocketFrame {
                id: event.request_id.inner().clone(),
                direction: FrameDirection::ClientToServer,
                payload: event.response.payload_data.clone(),
            });
        }
    }));

    let mut received = page
        .event_listener::<EventWebSocketFrameReceived>()
        .await
        .map_err(listen_error)?;
    let tx = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = received.next().await {
            let _ = tx.send(TargetEvent::WebSocketFrame {
                id: event.request_id.inner().clone(),
                direction: FrameDirection::ServerToClient,
                payload: event.response.payload_data.clone(),
            });
        }
    }));

    // Dialogs block the page's JS thread; accept them.
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(listen_error)?;
    let dialog_page = page.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            tracing::info!("Accepting JavaScript dialog: {}", event.message);
            if let Err(e) = dialog_page
                .execute(HandleJavaScriptDialogParams::new(true))
                .await
            {
                tracing::error!("Failed to accept dialog: {}", e);
            }
        }
    }));

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_map_stringifies_values() {
        let headers = header_map(&json!({"Content-Type": "text/html", "Content-Length": 12}));
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("text/html"));
        assert_eq!(headers.get("Content-Length").map(String::as_str), Some("12"));
        assert!(header_map(&json!(null)).is_empty());
    }
}
