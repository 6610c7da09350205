use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    DirectCallReplication,
    ProtocolAutomation,
    ManualFallback,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::DirectCallReplication => "DIRECT_CALL_REPLICATION",
            Modality::ProtocolAutomation => "PROTOCOL_AUTOMATION",
            Modality::ManualFallback => "MANUAL_FALLBACK",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown modality: {0} (expected direct, protocol or manual)")]
pub struct UnknownModality(pub String);

impl FromStr for Modality {
    type Err = UnknownModality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" | "direct_call" | "direct_call_replication" | "api" => {
                Ok(Modality::DirectCallReplication)
            }
            "protocol" | "protocol_automation" | "cdp" | "automation" => {
                Ok(Modality::ProtocolAutomation)
            }
            "manual" | "manual_fallback" => Ok(Modality::ManualFallback),
            _ => Err(UnknownModality(s.to_string())),
        }
    }
}

/// What the traffic analyzer returned for a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
    #[serde(default)]
    pub api_endpoint_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_seconds: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisReport {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            generated_code: None,
            api_endpoint_count: 0,
            estimated_time_seconds: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_generated_code(mut self, code: impl Into<String>) -> Self {
        self.generated_code = Some(code.into());
        self
    }
}

/// Output of the decision step.
///
/// `confidence` is exactly `1.0` if and only if the caller forced the modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalityChoice {
    pub modality: Modality,
    pub confidence: f64,
    pub estimated_duration_seconds: f64,
    pub reasoning: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisReport>,
}

impl ModalityChoice {
    pub fn is_forced(&self) -> bool {
        self.confidence == 1.0
    }

    pub fn generated_code(&self) -> Option<&str> {
        self.analysis
            .as_ref()
            .and_then(|a| a.generated_code.as_deref())
    }
}
