//! Modality Optimizer: picks the cheapest strategy that is likely to work.
//!
//! Analyzer failures never propagate out of [`ModalityOptimizer::choose`];
//! they downgrade to protocol automation with reduced confidence. So does
//! a capture reference that could not be loaded.

use crate::analyzer::TrafficAnalyzer;
use crate::config::schema::{OptimizerConfig, OrbitConfig};
use orbit_common::capture::TrafficCapture;
use orbit_common::error::AnalyzerError;
use orbit_common::modality::{AnalysisReport, Modality, ModalityChoice};
use orbit_common::recording::SessionRecording;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Confidence of the decision when nothing could be analyzed.
pub const NO_ANALYSIS_CONFIDENCE: f64 = 0.6;
/// Confidence of the decision when the analyzer could not be reached.
pub const ANALYZER_FAILURE_CONFIDENCE: f64 = 0.5;
/// Non-forced choices stay strictly below 1.0.
pub const MAX_DERIVED_CONFIDENCE: f64 = 0.99;

#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_description: String,
    pub capture: Option<TrafficCapture>,
    pub prior_session: Option<SessionRecording>,
    pub forced: Option<Modality>,
    /// Why the requested capture could not be loaded.
    pub capture_error: Option<String>,
}

impl TaskContext {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            ..Default::default()
        }
    }

    /// The explicit capture, else one derived from the prior session.
    pub fn effective_capture(&self) -> Option<TrafficCapture> {
        self.capture
            .clone()
            .or_else(|| self.prior_session.as_ref().map(TrafficCapture::from_recording))
    }
}

/// Protocol automation at reduced confidence, naming why analysis was impossible.
fn analysis_failed(cause: String) -> ModalityChoice {
    let mut metadata = BTreeMap::new();
    metadata.insert("fallbackCause".to_string(), json!(cause));
    ModalityChoice {
        modality: Modality::ProtocolAutomation,
        confidence: ANALYZER_FAILURE_CONFIDENCE,
        estimated_duration_seconds: default_duration_seconds(Modality::ProtocolAutomation),
        reasoning: format!("analyzer fallback: {}", cause),
        metadata,
        analysis: None,
    }
}

/// Threshold step of the decision.
pub fn decide(confidence: f64, config: &OptimizerConfig) -> Modality {
    if confidence >= config.high_threshold {
        Modality::DirectCallReplication
    } else if confidence >= config.medium_threshold {
        Modality::ProtocolAutomation
    } else {
        Modality::ManualFallback
    }
}

pub fn default_duration_seconds(modality: Modality) -> f64 {
    match modality {
        Modality::DirectCallReplication => 5.0,
        Modality::ProtocolAutomation => 30.0,
        Modality::ManualFallback => 300.0,
    }
}

#[derive(Debug, Clone)]
pub struct ModalityOptimizer {
    config: OptimizerConfig,
    analyzer_timeout: Duration,
}

impl ModalityOptimizer {
    pub fn new(config: OptimizerConfig, analyzer_timeout: Duration) -> Self {
        Self {
            config,
            analyzer_timeout,
        }
    }

    pub fn from_config(config: &OrbitConfig) -> Self {
        Self::new(config.optimizer.clone(), config.analyzer.timeout())
    }

    pub async fn choose(
        &self,
        ctx: &TaskContext,
        analyzer: Option<&dyn TrafficAnalyzer>,
    ) -> ModalityChoice {
        if let Some(modality) = ctx.forced {
            info!("Modality forced by caller: {}", modality);
            let mut metadata = BTreeMap::new();
            metadata.insert("forced".to_string(), json!(true));
            // Direct calls still need generated code; the analyzer's opinion
            // on confidence is ignored.
            let analysis = match (modality, ctx.effective_capture(), analyzer) {
                (Modality::DirectCallReplication, Some(capture), Some(analyzer)) => {
                    match self.run_analyzer(analyzer, &capture, &ctx.task_description).await {
                        Ok(report) => Some(report),
                        Err(e) => {
                            warn!("Analysis for forced direct calls failed: {}", e);
                            None
                        }
                    }
                }
                _ => None,
            };
            return ModalityChoice {
                modality,
                confidence: 1.0,
                estimated_duration_seconds: default_duration_seconds(modality),
                reasoning: "forced".to_string(),
                metadata,
                analysis,
            };
        }

        if let Some(cause) = &ctx.capture_error {
            warn!("Capture unavailable, falling back to protocol automation: {}", cause);
            return analysis_failed(format!("capture unavailable: {}", cause));
        }
        let Some(capture) = ctx.effective_capture() else {
            return self.no_analysis("no analysis available: no traffic capture or prior session");
        };
        let Some(analyzer) = analyzer else {
            return self.no_analysis("no analysis available: no traffic analyzer configured");
        };

        match self.run_analyzer(analyzer, &capture, &ctx.task_description).await {
            Ok(report) => self.from_report(report, analyzer.name(), &capture),
            Err(e) => {
                warn!("Traffic analysis failed, falling back to protocol automation: {}", e);
                analysis_failed(e.to_string())
            }
        }
    }

    async fn run_analyzer(
        &self,
        analyzer: &dyn TrafficAnalyzer,
        capture: &TrafficCapture,
        task: &str,
    ) -> Result<AnalysisReport, AnalyzerError> {
        if capture.is_empty() {
            return Err(AnalyzerError::MalformedCapture(
                "capture contains no network exchanges".into(),
            ));
        }
        match tokio::time::timeout(self.analyzer_timeout, analyzer.analyze(capture, task)).await {
            Ok(result) => result,
            Err(_) => Err(AnalyzerError::Timeout(self.analyzer_timeout.as_millis() as u64)),
        }
    }

    fn from_report(&self, report: AnalysisReport, analyzer: &str, capture: &TrafficCapture) -> ModalityChoice {
        let confidence = report.confidence.clamp(0.0, MAX_DERIVED_CONFIDENCE);
        let modality = decide(confidence, &self.config);
        let reasoning = match modality {
            Modality::DirectCallReplication => format!(
                "analyzer confidence {:.2} >= {:.2}: replicate {} API endpoint(s) directly",
                confidence, self.config.high_threshold, report.api_endpoint_count
            ),
            Modality::ProtocolAutomation => format!(
                "analyzer confidence {:.2} >= {:.2}: drive the browser over the debugging protocol",
                confidence, self.config.medium_threshold
            ),
            Modality::ManualFallback => format!(
                "analyzer confidence {:.2} < {:.2}: hand over to a human",
                confidence, self.config.medium_threshold
            ),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("analyzer".to_string(), json!(analyzer));
        metadata.insert("apiEndpointCount".to_string(), json!(report.api_endpoint_count));
        metadata.insert("exchangeCount".to_string(), json!(capture.exchanges.len()));
        metadata.insert(
            "hasGeneratedCode".to_string(),
            json!(report.generated_code.is_some()),
        );

        info!("Chose {} (confidence {:.2})", modality, confidence);
        ModalityChoice {
            modality,
            confidence,
            estimated_duration_seconds: report
                .estimated_time_seconds
                .unwrap_or_else(|| default_duration_seconds(modality)),
            reasoning,
            metadata,
            analysis: Some(report),
        }
    }

    fn no_analysis(&self, reasoning: &str) -> ModalityChoice {
        info!("{}", reasoning);
        ModalityChoice {
            modality: Modality::ProtocolAutomation,
            confidence: NO_ANALYSIS_CONFIDENCE,
            estimated_duration_seconds: default_duration_seconds(Modality::ProtocolAutomation),
            reasoning: reasoning.to_string(),
            metadata: BTreeMap::new(),
            analysis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_partition_confidence() {
        let config = OptimizerConfig::default();
        for i in 0..=100 {
            let c = i as f64 / 100.0;
            let expected = if c >= 0.85 {
                Modality::DirectCallReplication
            } else if c >= 0.70 {
                Modality::ProtocolAutomation
            } else {
                Modality::ManualFallback
            };
            assert_eq!(decide(c, &config), expected, "confidence {}", c);
        }
    }

    #[test]
    fn custom_thresholds_apply() {
        let config = OptimizerConfig {
            high_threshold: 0.95,
            medium_threshold: 0.5,
        };
        assert_eq!(decide(0.9, &config), Modality::ProtocolAutomation);
        assert_eq!(decide(0.5, &config), Modality::ProtocolAutomation);
        assert_eq!(decide(0.49, &config), Modality::ManualFallback);
    }
}
