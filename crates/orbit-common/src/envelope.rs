use serde::{Deserialize, Serialize};

/// Uniform response of every tool operation: `{success, data}` or `{success, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(EnvelopeError {
                message: message.into(),
                session_id,
                kind: None,
            }),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        if let Some(err) = self.error.as_mut() {
            err.kind = Some(kind.into());
        }
        self
    }

    /// A failed envelope that still carries partial data.
    pub fn fail_with_data(data: T, message: impl Into<String>, session_id: Option<String>) -> Self {
        let mut env = Self::fail(message, session_id);
        env.data = Some(data);
        env
    }
}
