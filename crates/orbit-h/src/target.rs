use crate::command::RawCommand;
use crate::reattach::ReattachPolicy;
use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use orbit_common::error::ProtocolError;
use orbit_engine::target::{NavigationResult, Target, TargetEvent};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const HANDLER_SHUTDOWN: Duration = Duration::from_secs(5);

/// One Chromium process with one page, driven over CDP.
pub struct ChromiumTarget {
    id: String,
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    forwarders: Vec<JoinHandle<()>>,
    events: broadcast::Sender<TargetEvent>,
    reattach: ReattachPolicy,
    /// Throwaway profile, removed when dropped.
    profile: Option<TempDir>,
    closed: bool,
}

impl ChromiumTarget {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        browser: Browser,
        page: Page,
        handler_task: JoinHandle<()>,
        forwarders: Vec<JoinHandle<()>>,
        events: broadcast::Sender<TargetEvent>,
        reattach: ReattachPolicy,
        profile: Option<TempDir>,
    ) -> Self {
        Self {
            id,
            browser,
            page,
            handler_task,
            forwarders,
            events,
            reattach,
            profile,
            closed: false,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.closed || self.handler_task.is_finished() {
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }

    fn stop_tasks(&mut self) {
        for task in self.forwarders.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl Target for ChromiumTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&mut self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        self.ensure_open()?;
        let page = &self.page;
        self.reattach
            .run(
                method,
                || {
                    let cmd = RawCommand::new(method, params.clone());
                    async move { page.execute(cmd).await.map(|resp| resp.result) }
                },
                |message| ProtocolError::command(method, message),
            )
            .await
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, ProtocolError> {
        self.ensure_open()?;
        info!("Navigating to: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| ProtocolError::Navigation(e.to_string()))?;

        let title = self
            .page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = self
            .page
            .url()
            .await
            .map_err(|e| ProtocolError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult {
            url,
            title,
            status: 200,
        })
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.ensure_open()?;
        self.page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| ProtocolError::Other(format!("Screenshot failed: {}", e)))
    }

    async fn current_url(&mut self) -> Result<String, ProtocolError> {
        self.ensure_open()?;
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| ProtocolError::Other(e.to_string()))?
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.events.subscribe()
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stop_tasks();

        let closed = self.browser.close().await;
        match tokio::time::timeout(HANDLER_SHUTDOWN, &mut self.handler_task).await {
            Ok(Err(e)) => debug!("Handler task of {} ended with {}", self.id, e),
            Err(_) => self.handler_task.abort(),
            Ok(Ok(())) => {}
        }
        if let Some(profile) = self.profile.take()
            && let Err(e) = profile.close()
        {
            debug!("Failed to clean up profile of {}: {}", self.id, e);
        }
        closed
            .map(|_| ())
            .map_err(|e| ProtocolError::Other(format!("Error closing browser: {}", e)))
    }

    fn abort(&mut self) {
        self.closed = true;
        self.stop_tasks();
        self.handler_task.abort();
    }
}
