//! Controller-side handle to the transcription worker.

use std::collections::BTreeMap;

use offline_types::{ErrorKind, OfflineError, ProgressReport};
use tokio::sync::mpsc;

use super::ipc_types::*;
use super::transport::WorkerLink;
use super::worker_bridge::{unexpected, BridgeCore};

/// Model id reported in errors about the speech model cache as a whole.
pub const SPEECH_CACHE_LABEL: &str = "speech models";

pub struct TranscriptionBridge {
    core: BridgeCore<TranscriptionPayload>,
}

impl TranscriptionBridge {
    /// Requires a tokio runtime.
    pub fn new(link: WorkerLink<TranscriptionPayload>) -> Self {
        Self {
            core: BridgeCore::new(link),
        }
    }

    pub async fn load(
        &self,
        model_id: &str,
        quantization: BTreeMap<String, String>,
        progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    ) -> Result<(), OfflineError> {
        let command = TranscriptionCommand::Load {
            model_id: model_id.to_string(),
            quantization,
        };
        match self.core.send_and_wait(command, progress).await? {
            TranscriptionPayload::Loaded { .. } => Ok(()),
            TranscriptionPayload::Error { kind, message } => Err(match kind {
                ErrorKind::Load => OfflineError::LoadFailure {
                    model_id: model_id.to_string(),
                    message,
                },
                other => OfflineError::from_worker(other, message, Some(model_id)),
            }),
            other => Err(unexpected("Load", &other)),
        }
    }

    /// Transcribe mono 16 kHz samples; `language` is a UI language code.
    pub async fn transcribe(&self, audio: Vec<f32>, language: &str) -> Result<String, OfflineError> {
        let command = TranscriptionCommand::Transcribe {
            audio,
            language: language.to_string(),
        };
        match self.core.send_and_wait(command, None).await? {
            TranscriptionPayload::Transcription { text } => Ok(text),
            TranscriptionPayload::Error { kind, message } => Err(match kind {
                ErrorKind::UnknownOperation => OfflineError::UnknownOperation(message),
                _ => OfflineError::TranscriptionFailure(message),
            }),
            other => Err(unexpected("Transcribe", &other)),
        }
    }

    pub async fn is_cached(&self, model_id: &str) -> Result<bool, OfflineError> {
        let command = TranscriptionCommand::CacheStatus {
            model_id: model_id.to_string(),
        };
        match self.core.send_and_wait(command, None).await? {
            TranscriptionPayload::CacheStatus { cached, .. } => Ok(cached),
            TranscriptionPayload::Error { kind, message } => Err(match kind {
                ErrorKind::Load => OfflineError::UnknownModel(model_id.to_string()),
                other => OfflineError::from_worker(other, message, Some(model_id)),
            }),
            other => Err(unexpected("CacheStatus", &other)),
        }
    }

    /// Unloads the current pipeline as a side effect.
    pub async fn clear_cache(&self) -> Result<(), OfflineError> {
        match self
            .core
            .send_and_wait(TranscriptionCommand::ClearCache, None)
            .await?
        {
            TranscriptionPayload::CacheCleared => Ok(()),
            TranscriptionPayload::Error { kind, message } => Err(OfflineError::from_worker(
                kind,
                message,
                Some(SPEECH_CACHE_LABEL),
            )),
            other => Err(unexpected("ClearCache", &other)),
        }
    }
}
