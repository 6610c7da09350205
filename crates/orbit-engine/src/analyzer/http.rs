use super::{TrafficAnalyzer, parse_report};
use async_trait::async_trait;
use orbit_common::capture::TrafficCapture;
use orbit_common::error::AnalyzerError;
use orbit_common::modality::AnalysisReport;
use serde_json::json;

/// POSTs `{task, capture}` to an analyzer service and reads a JSON report back.
pub struct HttpAnalyzer {
    url: String,
    client: reqwest::Client,
}

impl HttpAnalyzer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TrafficAnalyzer for HttpAnalyzer {
    fn name(&self) -> &str {
        "http"
    }

    async fn analyze(
        &self,
        capture: &TrafficCapture,
        task_description: &str,
    ) -> Result<AnalysisReport, AnalyzerError> {
        tracing::info!("Posting capture ({} exchanges) to {}", capture.exchanges.len(), self.url);
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "task": task_description, "capture": capture }))
            .send()
            .await
            .map_err(|e| AnalyzerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Request(format!("HTTP {}: {}", status, body.trim())));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;
        parse_report(value)
    }
}
