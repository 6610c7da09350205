use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrbitConfig {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub direct_call: DirectCallConfig,
    #[serde(default)]
    pub reattach: ReattachConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl OrbitConfig {
    pub fn validate(&self) -> Result<(), String> {
        let o = &self.optimizer;
        if !(0.0..=1.0).contains(&o.high_threshold) || !(0.0..=1.0).contains(&o.medium_threshold) {
            return Err("optimizer thresholds must lie in [0, 1]".into());
        }
        if o.medium_threshold > o.high_threshold {
            return Err(format!(
                "optimizer.medium_threshold ({}) exceeds optimizer.high_threshold ({})",
                o.medium_threshold, o.high_threshold
            ));
        }
        if self.replay.min_wait_ms == 0 {
            return Err("replay.min_wait_ms must be positive".into());
        }
        if self.recording.max_duration_ms == 0 {
            return Err("recording.max_duration_ms must be positive".into());
        }
        if self.recording.capture_duration_ms == 0 {
            return Err("recording.capture_duration_ms must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
        }
    }
}

fn default_high_threshold() -> f64 {
    0.85
}

fn default_medium_threshold() -> f64 {
    0.70
}

/// External traffic analyzer. `command` takes precedence over `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_analyzer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            url: None,
            timeout_ms: default_analyzer_timeout_ms(),
        }
    }
}

impl AnalyzerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_analyzer_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Limit of a recorded session unless the request sets one.
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    /// Limit of a traffic capture unless the request sets one.
    #[serde(default = "default_capture_duration_ms")]
    pub capture_duration_ms: u64,
    #[serde(default = "default_inactivity_ms")]
    pub inactivity_ms: u64,
    #[serde(default = "default_screenshot_interval_ms")]
    pub screenshot_interval_ms: u64,
    #[serde(default = "default_capture_level")]
    pub default_capture_level: u8,
    /// Gaps between replayable actions longer than this become WAIT actions.
    #[serde(default = "default_wait_threshold_ms")]
    pub wait_threshold_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_duration_ms(),
            capture_duration_ms: default_capture_duration_ms(),
            inactivity_ms: default_inactivity_ms(),
            screenshot_interval_ms: default_screenshot_interval_ms(),
            default_capture_level: default_capture_level(),
            wait_threshold_ms: default_wait_threshold_ms(),
        }
    }
}

fn default_max_duration_ms() -> u64 {
    30 * 60 * 1000
}

fn default_capture_duration_ms() -> u64 {
    30_000
}

fn default_inactivity_ms() -> u64 {
    30_000
}

fn default_screenshot_interval_ms() -> u64 {
    10_000
}

fn default_capture_level() -> u8 {
    3
}

fn default_wait_threshold_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_inter_action_delay_ms")]
    pub inter_action_delay_ms: u64,
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            inter_action_delay_ms: default_inter_action_delay_ms(),
            min_wait_ms: default_min_wait_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

fn default_inter_action_delay_ms() -> u64 {
    100
}

fn default_min_wait_ms() -> u64 {
    100
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_execution_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_manual_timeout_ms")]
    pub manual_timeout_ms: u64,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_execution_timeout_ms(),
            manual_timeout_ms: default_manual_timeout_ms(),
            headless: default_headless(),
        }
    }
}

fn default_execution_timeout_ms() -> u64 {
    300_000
}

fn default_manual_timeout_ms() -> u64 {
    600_000
}

fn default_headless() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectCallConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_code_extension")]
    pub file_extension: String,
}

impl Default for DirectCallConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            file_extension: default_code_extension(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_code_extension() -> String {
    "py".to_string()
}

/// Bounded retry when the page's execution context is replaced by a navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReattachConfig {
    #[serde(default = "default_reattach_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reattach_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReattachConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reattach_attempts(),
            delay_ms: default_reattach_delay_ms(),
        }
    }
}

fn default_reattach_attempts() -> u32 {
    10
}

fn default_reattach_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            captures_dir: default_captures_dir(),
        }
    }
}

fn orbit_home() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".orbit"),
        None => PathBuf::from("./.orbit"),
    }
}

fn default_sessions_dir() -> PathBuf {
    orbit_home().join("sessions")
}

fn default_captures_dir() -> PathBuf {
    orbit_home().join("captures")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Overrides `CHROME_BIN`.
    #[serde(default)]
    pub chrome_bin: Option<PathBuf>,
    /// Profile directory used for persistent targets.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrbitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.high_threshold, 0.85);
        assert_eq!(config.optimizer.medium_threshold, 0.70);
        assert_eq!(config.recording.max_duration_ms, 1_800_000);
        assert_eq!(config.recording.inactivity_ms, 30_000);
        assert_eq!(config.recording.capture_duration_ms, 30_000);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = OrbitConfig::default();
        config.optimizer.medium_threshold = 0.9;
        config.optimizer.high_threshold = 0.8;
        assert!(config.validate().is_err());
    }
}
