use super::{TrafficAnalyzer, parse_report};
use async_trait::async_trait;
use orbit_common::capture::TrafficCapture;
use orbit_common::error::AnalyzerError;
use orbit_common::modality::AnalysisReport;
use std::process::Stdio;
use tokio::process::Command;

/// Runs an external analyzer program.
///
/// Invocation: `<program> <args...> <capture.json> <task description>`. The
/// program prints one JSON object on stdout. The child is killed if the
/// analysis future is dropped (e.g. by the optimizer's timeout).
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TrafficAnalyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        "command"
    }

    async fn analyze(
        &self,
        capture: &TrafficCapture,
        task_description: &str,
    ) -> Result<AnalysisReport, AnalyzerError> {
        let json = serde_json::to_vec(capture)
            .map_err(|e| AnalyzerError::MalformedCapture(e.to_string()))?;
        let capture_file = tempfile::Builder::new()
            .prefix("orbit-capture-")
            .suffix(".json")
            .tempfile()?
            .into_temp_path();
        tokio::fs::write(&capture_file, &json).await?;

        tracing::info!(
            "Running analyzer {} on {} exchanges",
            self.program,
            capture.exchanges.len()
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&*capture_file)
            .arg(task_description)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AnalyzerError::Process(format!("failed to spawn {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzerError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalyzerError::InvalidResponse(format!("stdout is not JSON: {}", e)))?;
        parse_report(value)
    }
}
