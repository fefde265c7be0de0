//! Shared types for the offline translation core.
//!
//! Everything that crosses a worker boundary or is persisted lives here so the
//! worker, database and orchestration crates agree on one shape.

pub mod error;
pub mod languages;

pub use error::{ErrorKind, OfflineError};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a model's artifacts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Shipped with the engine's own model list; loaded by id alone.
    Prebuilt,
    /// Loaded from explicit weights + runtime library locations.
    UserCustom,
}

/// Everything needed to load one model. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_library_location: Option<String>,
}

impl ModelDescriptor {
    pub fn prebuilt(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_kind: SourceKind::Prebuilt,
            weights_location: None,
            runtime_library_location: None,
        }
    }

    pub fn custom(
        id: impl Into<String>,
        weights_location: impl Into<String>,
        runtime_library_location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_kind: SourceKind::UserCustom,
            weights_location: Some(weights_location.into()),
            runtime_library_location: Some(runtime_library_location.into()),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.source_kind == SourceKind::UserCustom
    }
}

/// Check that `id` can name a cache directory.
///
/// `org/name` ids are allowed; every segment between separators must be a
/// plain name, so empty segments and segments starting with `.` (including
/// `.` and `..`) are rejected.
pub fn validate_model_id(id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("model id must not be empty".to_string());
    }
    if id.contains('\0') {
        return Err(format!("model id '{}' contains a NUL byte", id.escape_default()));
    }
    let plain = id
        .split(['/', '\\'])
        .all(|segment| !segment.is_empty() && !segment.starts_with('.'));
    if !plain {
        return Err(format!("model id '{id}' is not a valid cache name"));
    }
    Ok(())
}

/// A user-registered model (the caller-side custom registry entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModel {
    pub id: String,
    pub name: String,
    pub model_url: String,
    pub model_lib_url: String,
}

impl CustomModel {
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::custom(&self.id, &self.model_url, &self.model_lib_url)
    }
}

/// Sampling knobs forwarded verbatim to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2048,
            presence_penalty: 0.1,
            frequency_penalty: 0.1,
        }
    }
}

/// One prompt plus its sampling options. Single use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub options: SamplingOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, options: SamplingOptions) -> Self {
        Self {
            prompt: prompt.into(),
            options,
        }
    }
}

/// Final text of a generation.
///
/// `text` is always the in-order concatenation of the chunks that were
/// delivered. A cancelled generation is not an error: it carries whatever
/// streamed before the cancellation took effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    pub cancelled: bool,
}

impl GenerationOutput {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cancelled: false,
        }
    }

    pub fn cancelled(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cancelled: true,
        }
    }
}

/// Load progress emitted by a boundary while a model materializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Fraction in `0.0..=1.0`.
    pub progress: f32,
    pub text: String,
    /// File currently being fetched, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl ProgressReport {
    pub fn new(progress: f32, text: impl Into<String>) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            text: text.into(),
            file: None,
        }
    }
}

/// Speech recognition model entry; `quantization` maps pipeline component to dtype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsrModel {
    pub id: String,
    pub name: String,
    pub quantization: BTreeMap<String, String>,
    pub size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_model_descriptor() {
        let model = CustomModel {
            id: "my-model".to_string(),
            name: "Mine".to_string(),
            model_url: "https://example.com/w".to_string(),
            model_lib_url: "https://example.com/lib.wasm".to_string(),
        };
        let descriptor = model.descriptor();
        assert!(descriptor.is_custom());
        assert_eq!(descriptor.weights_location.as_deref(), Some("https://example.com/w"));
        assert_eq!(
            descriptor.runtime_library_location.as_deref(),
            Some("https://example.com/lib.wasm")
        );
    }

    #[test]
    fn test_prebuilt_descriptor_skips_locations_in_json() {
        let json = serde_json::to_string(&ModelDescriptor::prebuilt("Qwen")).unwrap();
        assert!(!json.contains("weights_location"));
        let back: ModelDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source_kind, SourceKind::Prebuilt);
    }

    #[test]
    fn test_validate_model_id() {
        assert!(validate_model_id("Qwen3-4B-q4f16_1-MLC").is_ok());
        assert!(validate_model_id("Xenova/whisper-base").is_ok());
        assert!(validate_model_id("v1.2").is_ok());
        let rejected = [
            "", "  ", ".", "..", "../db", "org/..", "a//b", "/abs", "a\\..", ".speech", "x\0y",
        ];
        for bad in rejected {
            assert!(validate_model_id(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(ProgressReport::new(1.7, "done").progress, 1.0);
        assert_eq!(ProgressReport::new(-0.2, "start").progress, 0.0);
    }

    #[test]
    fn test_default_sampling_options() {
        let options = SamplingOptions::default();
        assert_eq!(options.max_tokens, 2048);
        assert!((options.temperature - 0.3).abs() < f32::EPSILON);
    }
}
