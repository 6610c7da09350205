//! The protocol-controlled target seam.
//!
//! The engine never speaks the debugging protocol's wire format itself. A
//! [`Target`] executes `Domain.method` commands and reports page events; a
//! [`TargetLauncher`] produces fresh targets. Each target is owned by exactly
//! one session or execution and passed explicitly, never shared.

use async_trait::async_trait;
use base64::Engine;
use orbit_common::action::{Action, FrameDirection};
use orbit_common::error::ProtocolError;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: u16,
}

/// Observable page events forwarded from the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetEvent {
    Navigated {
        url: String,
    },
    Console {
        level: String,
        text: String,
    },
    PageError {
        message: String,
    },
    Request {
        id: String,
        method: String,
        url: String,
        resource_type: Option<String>,
        headers: BTreeMap<String, String>,
        post_data: Option<String>,
    },
    Response {
        id: String,
        url: String,
        status: u16,
        mime_type: Option<String>,
        headers: BTreeMap<String, String>,
    },
    WebSocketCreated {
        id: String,
        url: String,
    },
    WebSocketFrame {
        id: String,
        direction: FrameDirection,
        payload: String,
    },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    /// `false` selects an isolated throwaway profile.
    pub persistent: bool,
}

impl LaunchOptions {
    pub fn headless() -> Self {
        Self {
            headless: true,
            persistent: true,
        }
    }

    pub fn visible() -> Self {
        Self {
            headless: false,
            persistent: true,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.persistent = false;
        self
    }
}

#[async_trait]
pub trait Target: Send {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Execute a raw `Domain.method` command and return its result object.
    async fn send(&mut self, method: &str, params: Value) -> Result<Value, ProtocolError>;

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, ProtocolError>;

    /// Evaluate an expression in the page, awaiting promises, returning by value.
    async fn evaluate(&mut self, expression: &str) -> Result<Value, ProtocolError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        evaluation_value(response)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let response = self
            .send("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Other("Screenshot response without data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ProtocolError::Other(format!("Base64 decode failed: {}", e)))
    }

    async fn current_url(&mut self) -> Result<String, ProtocolError> {
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Subscribe to page events. Each call returns an independent receiver.
    fn subscribe(&self) -> broadcast::Receiver<TargetEvent>;

    async fn close(&mut self) -> Result<(), ProtocolError>;

    /// Synchronous best-effort teardown for drop paths. Must not block.
    fn abort(&mut self) {}
}

/// Extracts `result.value` from a `Runtime.evaluate` response, surfacing
/// page exceptions as [`ProtocolError::Evaluation`].
pub fn evaluation_value(response: Value) -> Result<Value, ProtocolError> {
    if let Some(details) = response.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("uncaught exception");
        return Err(ProtocolError::Evaluation(text.to_string()));
    }
    Ok(response
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

#[async_trait]
pub trait TargetLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn Target>, ProtocolError>;
}

/// Scoped ownership of a launched target.
///
/// Call [`TargetGuard::release`] on every normal exit path. If the guard is
/// dropped unreleased (panic, cancelled future) the target is aborted.
pub struct TargetGuard {
    target: Box<dyn Target>,
    released: bool,
}

impl TargetGuard {
    pub fn new(target: Box<dyn Target>) -> Self {
        Self {
            target,
            released: false,
        }
    }

    pub async fn acquire(
        launcher: &dyn TargetLauncher,
        options: LaunchOptions,
    ) -> Result<Self, ProtocolError> {
        let target = launcher.launch(options).await?;
        tracing::info!(
            "Acquired target {} (headless={}, persistent={})",
            target.id(),
            options.headless,
            options.persistent
        );
        Ok(Self::new(target))
    }

    pub fn target(&mut self) -> &mut dyn Target {
        self.target.as_mut()
    }

    pub async fn release(mut self) -> Result<(), ProtocolError> {
        self.released = true;
        tracing::info!("Releasing target {}", self.target.id());
        self.target.close().await
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Target {} dropped without release; aborting", self.target.id());
            self.target.abort();
        }
    }
}

/// Decorates a target and logs every command and navigation it issues as
/// PROTOCOL_COMMAND / NAVIGATION actions, in issue order.
pub struct RecordingTarget<'a> {
    inner: &'a mut dyn Target,
    actions: Vec<Action>,
}

impl<'a> RecordingTarget<'a> {
    pub fn new(inner: &'a mut dyn Target) -> Self {
        Self {
            inner,
            actions: Vec::new(),
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

#[async_trait]
impl Target for RecordingTarget<'_> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn send(&mut self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let result = self.inner.send(method, params.clone()).await?;
        self.actions.push(Action::protocol_command(method, params));
        Ok(result)
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, ProtocolError> {
        let result = self.inner.navigate(url).await?;
        self.actions.push(Action::navigation(url));
        Ok(result)
    }

    async fn evaluate(&mut self, expression: &str) -> Result<Value, ProtocolError> {
        let value = self.inner.evaluate(expression).await?;
        self.actions.push(Action::protocol_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        ));
        Ok(value)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.inner.screenshot().await
    }

    async fn current_url(&mut self) -> Result<String, ProtocolError> {
        self.inner.current_url().await
    }

    fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.inner.subscribe()
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.inner.close().await
    }

    fn abort(&mut self) {
        self.inner.abort()
    }
}
