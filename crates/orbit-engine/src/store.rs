//! File-backed session store: one `<session_id>.json` per recording.
//!
//! Recordings are write-once-then-read-many. Replay never mutates them.

use orbit_common::capture::TrafficCapture;
use orbit_common::recording::SessionRecording;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Invalid recording {session_id}: {reason}")]
    InvalidRecording { session_id: String, reason: String },
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error("Recording {0} is already finalized and persisted")]
    AlreadyPersisted(String),
    #[error("Capture not found: {0}")]
    CaptureNotFound(String),
    #[error("Malformed capture {path}: {reason}")]
    MalformedCapture { path: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Generates a fresh session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Session ids become file names; path separators and dot-only names are rejected.
pub fn validate_session_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(id.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions_dir: PathBuf,
    captures_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>, captures_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            captures_dir: captures_dir.into(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self.sessions_dir.join(format!("{}.json", session_id)))
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        match self.path_for(session_id) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Persist a recording. A finalized recording already on disk is never overwritten.
    pub async fn save(&self, recording: &SessionRecording) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&recording.session_id)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let existing = self.load(&recording.session_id).await;
            if matches!(&existing, Ok(r) if r.is_finalized()) {
                return Err(StoreError::AlreadyPersisted(recording.session_id.clone()));
            }
        }

        tokio::fs::create_dir_all(&self.sessions_dir).await?;
        let json = serde_json::to_string_pretty(recording)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::info!(
            "Saved session {} ({} actions) to {}",
            recording.session_id,
            recording.actions.len(),
            path.display()
        );
        Ok(path)
    }

    pub async fn load(&self, session_id: &str) -> Result<SessionRecording, StoreError> {
        let path = self.path_for(session_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::InvalidRecording {
            session_id: session_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Ids of every persisted session, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let pattern = self.sessions_dir.join("*.json");
        let pattern = pattern.to_string_lossy();
        let mut ids: Vec<String> = glob::glob(&pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?
            .filter_map(Result::ok)
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub async fn save_capture(&self, capture_id: &str, capture: &TrafficCapture) -> Result<PathBuf, StoreError> {
        validate_session_id(capture_id)?;
        tokio::fs::create_dir_all(&self.captures_dir).await?;
        let path = self.captures_dir.join(format!("{}.json", capture_id));
        tokio::fs::write(&path, serde_json::to_string_pretty(capture)?).await?;
        Ok(path)
    }

    /// Load a capture by file path or by id under the captures directory.
    pub async fn load_capture(&self, reference: &str) -> Result<TrafficCapture, StoreError> {
        let direct = PathBuf::from(reference);
        let path = if direct.extension().is_some() || direct.components().count() > 1 {
            direct
        } else {
            validate_session_id(reference)?;
            self.captures_dir.join(format!("{}.json", reference))
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::CaptureNotFound(reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::MalformedCapture {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
