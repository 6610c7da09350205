//! What "performing the task" means once a target is in hand.

use crate::target::Target;
use async_trait::async_trait;
use orbit_common::error::ProtocolError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

#[async_trait]
pub trait TaskPerformer: Send + Sync {
    /// Drive `target` toward the task. `Ok(None)` means there was nothing
    /// this performer knows how to do.
    async fn perform(
        &self,
        target: &mut dyn Target,
        task_description: &str,
    ) -> Result<Option<String>, ProtocolError>;
}

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("valid url regex"));

/// First http(s) URL mentioned in the text, without trailing punctuation.
pub fn first_url(text: &str) -> Option<Url> {
    URL_RE.find_iter(text).find_map(|m| {
        let candidate = m.as_str().trim_end_matches(['.', ',', ';', ':', ')', '!', '?']);
        Url::parse(candidate).ok()
    })
}

/// Navigates to the first URL in the task description.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigatePerformer;

#[async_trait]
impl TaskPerformer for NavigatePerformer {
    async fn perform(
        &self,
        target: &mut dyn Target,
        task_description: &str,
    ) -> Result<Option<String>, ProtocolError> {
        let Some(url) = first_url(task_description) else {
            return Ok(None);
        };
        let nav = target.navigate(url.as_str()).await?;
        Ok(Some(format!(
            "Navigated to {} ({}, status {})",
            nav.url, nav.title, nav.status
        )))
    }
}
