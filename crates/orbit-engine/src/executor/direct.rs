use super::{ExecutionContext, ExecutionError, ExecutionStrategy, Progress};
use crate::config::schema::DirectCallConfig;
use async_trait::async_trait;
use orbit_common::modality::{Modality, ModalityChoice};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Runs the analyzer's generated call code with the configured interpreter.
///
/// The task description is exported as `ORBIT_TASK`. Exit status 0 is
/// success; stdout becomes the output.
pub struct DirectCallStrategy {
    config: DirectCallConfig,
    timeout: Duration,
}

impl DirectCallStrategy {
    pub fn new(config: DirectCallConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl ExecutionStrategy for DirectCallStrategy {
    fn modality(&self) -> Modality {
        Modality::DirectCallReplication
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        task_description: &str,
        choice: &ModalityChoice,
        _ctx: &ExecutionContext,
        progress: &mut Progress,
    ) -> Result<String, ExecutionError> {
        let code = choice.generated_code().ok_or(ExecutionError::NoGeneratedCode)?;

        let suffix = format!(".{}", self.config.file_extension.trim_start_matches('.'));
        // Removed when `script` drops.
        let script = tempfile::Builder::new()
            .prefix("orbit-direct-")
            .suffix(&suffix)
            .tempfile()?
            .into_temp_path();
        tokio::fs::write(&script, code).await?;

        info!(
            "Running generated code ({} bytes) with {}",
            code.len(),
            self.config.interpreter
        );
        progress.note("interpreter", self.config.interpreter.clone());

        let output = Command::new(&self.config.interpreter)
            .args(&self.config.args)
            .arg(&*script)
            .env("ORBIT_TASK", task_description)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ExecutionError::Process(format!("failed to spawn {}: {}", self.config.interpreter, e))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            progress.note("stderr", stderr.clone());
        }
        if let Some(code) = output.status.code() {
            progress.note("exitCode", code);
        }

        if !output.status.success() {
            return Err(ExecutionError::Process(format!(
                "{} exited with {}: {}",
                self.config.interpreter, output.status, stderr
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}
