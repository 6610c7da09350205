/// Failure on the control channel of a live target.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("Command {method} failed: {message}")]
    Command { method: String, message: String },
    #[error("Navigation failed: {0}")]
    Navigation(String),
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
    #[error("Execution context lost after {attempts} attempts: {message}")]
    ContextLost { attempts: u32, message: String },
    #[error("Launch failed: {0}")]
    Launch(String),
    #[error("Target closed")]
    Closed,
    #[error("Timeout after {0} ms")]
    Timeout(u64),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Other: {0}")]
    Other(String),
}

impl ProtocolError {
    pub fn command(method: impl Into<String>, message: impl ToString) -> Self {
        ProtocolError::Command {
            method: method.into(),
            message: message.to_string(),
        }
    }

    /// The target reports that a domain was already enabled.
    pub fn is_already_enabled(&self) -> bool {
        match self {
            ProtocolError::Command { message, .. } => {
                message.to_ascii_lowercase().contains("already enabled")
            }
            _ => false,
        }
    }
}

/// Failure reaching or interpreting the traffic analyzer.
#[derive(thiserror::Error, Debug)]
pub enum AnalyzerError {
    #[error("Analyzer timed out after {0} ms")]
    Timeout(u64),
    #[error("Malformed capture: {0}")]
    MalformedCapture(String),
    #[error("Analyzer process failed: {0}")]
    Process(String),
    #[error("Analyzer request failed: {0}")]
    Request(String),
    #[error("Invalid analyzer response: {0}")]
    InvalidResponse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
