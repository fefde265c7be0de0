//! Error taxonomy shared by the controller, sessions and worker bridges.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an offline operation.
///
/// There is no cancellation variant: a cancelled generation resolves with
/// [`crate::GenerationOutput::cancelled`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfflineError {
    #[error("failed to load model '{model_id}': {message}")]
    LoadFailure { model_id: String, message: String },

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("intermediate translation produced no text; try disabling two-step translation")]
    EmptyIntermediateResult,

    #[error("failed to delete cache for '{model_id}': {message}")]
    DeleteFailure { model_id: String, message: String },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("a generation is already in progress")]
    GenerationBusy,

    #[error("no model is loaded")]
    EngineNotLoaded,

    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailure(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Error category carried on the wire so the bridge can rebuild the right
/// [`OfflineError`] variant without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownOperation,
    Load,
    Generation,
    Delete,
    Busy,
    NotLoaded,
    Transcription,
}

impl OfflineError {
    /// Rebuild an error received from a worker. `model_id` fills in the
    /// variants that name a model.
    pub fn from_worker(kind: ErrorKind, message: String, model_id: Option<&str>) -> Self {
        let model_id = model_id.unwrap_or_default().to_string();
        match kind {
            ErrorKind::UnknownOperation => Self::UnknownOperation(message),
            ErrorKind::Load => Self::LoadFailure { model_id, message },
            ErrorKind::Generation => Self::GenerationFailure(message),
            ErrorKind::Delete => Self::DeleteFailure { model_id, message },
            ErrorKind::Busy => Self::GenerationBusy,
            ErrorKind::NotLoaded => Self::EngineNotLoaded,
            ErrorKind::Transcription => Self::TranscriptionFailure(message),
        }
    }
}

impl From<String> for OfflineError {
    /// Database helpers report plain strings.
    fn from(message: String) -> Self {
        Self::Storage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_worker_keeps_model_id() {
        let err = OfflineError::from_worker(ErrorKind::Load, "no space".into(), Some("qwen"));
        assert_eq!(
            err,
            OfflineError::LoadFailure {
                model_id: "qwen".into(),
                message: "no space".into()
            }
        );
        assert_eq!(err.to_string(), "failed to load model 'qwen': no space");
    }

    #[test]
    fn test_error_kind_wire_format() {
        let json = serde_json::to_string(&ErrorKind::UnknownOperation).unwrap();
        assert_eq!(json, "\"UnknownOperation\"");
    }
}
