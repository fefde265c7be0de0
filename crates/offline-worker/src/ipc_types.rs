//! IPC protocol types for controller ↔ worker communication.
//!
//! Uses JSON Lines (one JSON object per line) whether the worker runs on a
//! thread or in a child process.

use std::collections::BTreeMap;

use offline_types::{ErrorKind, ModelDescriptor, ProgressReport, SamplingOptions};
use serde::{Deserialize, Serialize};

/// Request sent from the controller to a worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkerRequest<C> {
    /// Monotonic request ID for correlating responses. 0 = fire-and-forget.
    pub id: u64,
    pub command: C,
}

/// Response sent from a worker. Every event echoes the id of the request
/// that caused it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkerResponse<P> {
    pub id: u64,
    pub payload: P,
}

/// Commands understood by the engine worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum WorkerCommand {
    /// Load a prebuilt model by id.
    LoadModel { model_id: String },
    /// Load a model from explicit artifact locations.
    LoadCustomModel {
        model_id: String,
        weights_location: String,
        runtime_library_location: String,
    },
    UnloadModel,
    Generate {
        prompt: String,
        options: SamplingOptions,
    },
    /// Cancel the generation started by request `generation_id`.
    Abort { generation_id: u64 },
    /// Purge cached artifacts for one model (unloading it first if loaded).
    DeleteCache {
        model_id: String,
        #[serde(default)]
        descriptor: Option<ModelDescriptor>,
    },
    /// Purge every listed model's artifacts.
    ClearAllCache { descriptors: Vec<ModelDescriptor> },
    /// Keep-alive; receiving any message is the activity signal.
    ResetTimer,
}

/// Events emitted by the engine worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum WorkerPayload {
    Progress { report: ProgressReport },
    Loaded { model_id: String },
    Unloaded,
    /// A streamed piece of generated text.
    Chunk { text: String },
    /// Generation finished. `text` is the concatenation of every chunk sent
    /// for this request.
    Complete { text: String, cancelled: bool },
    CacheDeleted { model_id: String },
    CacheCleared { failures: Vec<String> },
    Error { kind: ErrorKind, message: String },
}

/// Commands understood by the transcription worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum TranscriptionCommand {
    Load {
        model_id: String,
        quantization: BTreeMap<String, String>,
    },
    /// `audio` is mono f32 PCM at 16 kHz; `language` is a UI language code.
    Transcribe { audio: Vec<f32>, language: String },
    CacheStatus { model_id: String },
    /// Drop the loaded pipeline and delete every downloaded speech model.
    ClearCache,
}

/// Events emitted by the transcription worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum TranscriptionPayload {
    Progress { report: ProgressReport },
    Loaded { model_id: String },
    Transcription { text: String },
    CacheStatus { model_id: String, cached: bool },
    CacheCleared,
    Error { kind: ErrorKind, message: String },
}

pub type EngineRequest = WorkerRequest<WorkerCommand>;
pub type EngineResponse = WorkerResponse<WorkerPayload>;
pub type TranscriptionRequest = WorkerRequest<TranscriptionCommand>;
pub type TranscriptionResponse = WorkerResponse<TranscriptionPayload>;

/// Payloads that can describe a failure, so worker loops and bridges can be
/// shared between the two protocols.
pub trait ErrorPayload: Sized {
    fn error(kind: ErrorKind, message: String) -> Self;
    fn as_error(&self) -> Option<(ErrorKind, &str)>;
}

impl ErrorPayload for WorkerPayload {
    fn error(kind: ErrorKind, message: String) -> Self {
        WorkerPayload::Error { kind, message }
    }

    fn as_error(&self) -> Option<(ErrorKind, &str)> {
        match self {
            WorkerPayload::Error { kind, message } => Some((*kind, message)),
            _ => None,
        }
    }
}

impl ErrorPayload for TranscriptionPayload {
    fn error(kind: ErrorKind, message: String) -> Self {
        TranscriptionPayload::Error { kind, message }
    }

    fn as_error(&self) -> Option<(ErrorKind, &str)> {
        match self {
            TranscriptionPayload::Error { kind, message } => Some((*kind, message)),
            _ => None,
        }
    }
}

impl<P> WorkerResponse<P> {
    pub fn ok(id: u64, payload: P) -> Self {
        Self { id, payload }
    }
}

impl<P: ErrorPayload> WorkerResponse<P> {
    pub fn error(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: P::error(kind, message.into()),
        }
    }
}

/// Parse one request line. On failure the request id is recovered when the
/// line is at least a JSON object with a numeric `id`.
pub fn parse_request<C>(line: &str) -> Result<WorkerRequest<C>, (u64, String)>
where
    C: serde::de::DeserializeOwned,
{
    serde_json::from_str(line).map_err(|e| {
        let id = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
            .unwrap_or(0);
        (id, format!("Unrecognized request: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = WorkerRequest {
            id: 7,
            command: WorkerCommand::LoadModel {
                model_id: "Qwen3-4B-q4f16_1-MLC".to_string(),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"command":{"type":"LoadModel","model_id":"Qwen3-4B-q4f16_1-MLC"}}"#
        );
    }

    #[test]
    fn test_delete_cache_descriptor_is_optional() {
        let parsed: EngineRequest =
            parse_request(r#"{"id":3,"command":{"type":"DeleteCache","model_id":"m"}}"#).unwrap();
        assert_eq!(
            parsed.command,
            WorkerCommand::DeleteCache {
                model_id: "m".to_string(),
                descriptor: None
            }
        );
    }

    #[test]
    fn test_unknown_type_recovers_id() {
        let err = parse_request::<WorkerCommand>(r#"{"id":42,"command":{"type":"Explode"}}"#)
            .unwrap_err();
        assert_eq!(err.0, 42);
        assert!(err.1.starts_with("Unrecognized request"));

        let err = parse_request::<WorkerCommand>("not json").unwrap_err();
        assert_eq!(err.0, 0);
    }

    #[test]
    fn test_error_payload_helpers() {
        let response = EngineResponse::error(5, ErrorKind::Busy, "busy");
        assert_eq!(response.payload.as_error(), Some((ErrorKind::Busy, "busy")));
        assert!(WorkerPayload::Unloaded.as_error().is_none());
    }
}
