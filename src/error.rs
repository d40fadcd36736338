//! Error types for the playback core
//!
//! Every error here degrades to "no playback". None of them is fatal to the
//! host process.

use std::path::PathBuf;

/// Errors raised by the playback core
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// The audio file is missing, unreadable or not decodable
    FileOpen { path: PathBuf, reason: String },
    /// The render backend could not be opened or started
    EngineStart(String),
    /// A session-scoped operation was issued while nothing is loaded
    NoSession,
}

impl AudioError {
    pub fn file_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AudioError::FileOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn engine_start(reason: impl ToString) -> Self {
        AudioError::EngineStart(reason.to_string())
    }
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::FileOpen { path, reason } => {
                write!(f, "Failed to open {}: {}", path.display(), reason)
            }
            AudioError::EngineStart(e) => write!(f, "Audio engine failed to start: {}", e),
            AudioError::NoSession => write!(f, "No audio loaded"),
        }
    }
}

impl std::error::Error for AudioError {}
