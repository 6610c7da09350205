//! Traffic Analyzer Adapter.
//!
//! The analyzer itself is an external collaborator. Adapters hand it a
//! [`TrafficCapture`] plus the task description and normalize its answer
//! into an [`AnalysisReport`].

pub mod command;
pub mod http;

use crate::config::schema::AnalyzerConfig;
use async_trait::async_trait;
use orbit_common::capture::TrafficCapture;
use orbit_common::error::AnalyzerError;
use orbit_common::modality::AnalysisReport;
use serde_json::Value;

pub use command::CommandAnalyzer;
pub use http::HttpAnalyzer;

#[async_trait]
pub trait TrafficAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        capture: &TrafficCapture,
        task_description: &str,
    ) -> Result<AnalysisReport, AnalyzerError>;
}

/// Builds the configured analyzer, if any. `command` wins over `url`.
pub fn from_config(config: &AnalyzerConfig) -> Option<Box<dyn TrafficAnalyzer>> {
    if let Some(program) = &config.command {
        return Some(Box::new(CommandAnalyzer::new(program.clone(), config.args.clone())));
    }
    config
        .url
        .as_ref()
        .map(|url| Box::new(HttpAnalyzer::new(url.clone())) as Box<dyn TrafficAnalyzer>)
}

/// Normalizes an analyzer's JSON answer.
///
/// Accepts camelCase or snake_case keys; confidence is clamped to `[0, 1]`.
pub fn parse_report(value: Value) -> Result<AnalysisReport, AnalyzerError> {
    let Value::Object(mut obj) = value else {
        return Err(AnalyzerError::InvalidResponse("expected a JSON object".into()));
    };

    let confidence = obj
        .remove("confidence")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| AnalyzerError::InvalidResponse("missing numeric confidence".into()))?;
    if !confidence.is_finite() {
        return Err(AnalyzerError::InvalidResponse(format!(
            "confidence is not finite: {}",
            confidence
        )));
    }

    let mut take = |camel: &str, snake: &str| match obj.remove(camel) {
        Some(v) => Some(v),
        None => obj.remove(snake),
    };

    let generated_code = take("generatedCode", "generated_code")
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.trim().is_empty());
    let api_endpoint_count = take("apiEndpointCount", "api_endpoint_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let estimated_time_seconds =
        take("estimatedTimeSeconds", "estimated_time_seconds").and_then(|v| v.as_f64());
    let metadata = match take("metadata", "metadata") {
        Some(Value::Object(m)) => m,
        _ => serde_json::Map::new(),
    };

    Ok(AnalysisReport {
        confidence: confidence.clamp(0.0, 1.0),
        generated_code,
        api_endpoint_count,
        estimated_time_seconds,
        metadata,
    })
}
