// Speech recognition seam and its mock backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use offline_types::ProgressReport;

use crate::mock::cache_dir_name;

/// Per-call decoding options handed to the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeOptions {
    /// Whisper-style language name (e.g. `"chinese"`); `None` lets the model detect.
    pub language: Option<String>,
    /// Text fed ahead of the audio to bias script or dialect.
    pub prompt: Option<String>,
    pub temperature: f32,
}

/// Builds speech recognition pipelines.
pub trait Transcriber: Send + 'static {
    fn load(
        &mut self,
        model_id: &str,
        quantization: &BTreeMap<String, String>,
        progress: &mut dyn FnMut(ProgressReport),
    ) -> Result<Box<dyn TranscriberPipeline>, String>;

    /// Whether the artifacts for `model_id` are already downloaded.
    fn is_cached(&self, model_id: &str) -> Result<bool, String>;

    /// Delete every downloaded speech model. Callers drop live pipelines first.
    fn clear_cache(&mut self) -> Result<(), String>;
}

pub trait TranscriberPipeline: Send {
    fn model_id(&self) -> &str;

    /// `audio` is mono f32 PCM at 16 kHz.
    fn transcribe(&mut self, audio: &[f32], options: &TranscribeOptions) -> Result<String, String>;
}

type Reply = Arc<dyn Fn(&[f32], &TranscribeOptions) -> String + Send + Sync>;

/// Mock recognizer: reports the sample count, padded with whitespace the way
/// real decoders often are.
#[derive(Clone)]
pub struct MockTranscriber {
    cache_dir: Option<PathBuf>,
    reply: Reply,
    failing_loads: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<Vec<TranscribeOptions>>>,
    loads: Arc<Mutex<Vec<String>>>,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            cache_dir: None,
            reply: Arc::new(|audio: &[f32], _: &TranscribeOptions| {
                format!("  transcribed {} samples \n", audio.len())
            }),
            failing_loads: Arc::default(),
            calls: Arc::default(),
            loads: Arc::default(),
        }
    }

    /// Write a `config.json` per loaded model under `dir`; the cache status
    /// checks look for it.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_reply(
        mut self,
        reply: impl Fn(&[f32], &TranscribeOptions) -> String + Send + Sync + 'static,
    ) -> Self {
        self.reply = Arc::new(reply);
        self
    }

    pub fn with_failing_load(self, model_id: &str) -> Self {
        if let Ok(mut list) = self.failing_loads.lock() {
            list.push(model_id.to_string());
        }
        self
    }

    /// Options of every transcribe call, in order.
    pub fn calls(&self) -> Vec<TranscribeOptions> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Model ids of every pipeline construction, in order.
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Transcriber for MockTranscriber {
    fn load(
        &mut self,
        model_id: &str,
        quantization: &BTreeMap<String, String>,
        progress: &mut dyn FnMut(ProgressReport),
    ) -> Result<Box<dyn TranscriberPipeline>, String> {
        if let Ok(mut loads) = self.loads.lock() {
            loads.push(model_id.to_string());
        }

        for (index, (component, dtype)) in quantization.iter().enumerate() {
            let mut report = ProgressReport::new(
                index as f32 / quantization.len().max(1) as f32,
                format!("Loading {component} ({dtype})"),
            );
            report.file = Some(format!("onnx/{component}_{dtype}.onnx"));
            progress(report);
        }

        let fails = self
            .failing_loads
            .lock()
            .map(|list| list.iter().any(|id| id == model_id))
            .unwrap_or(false);
        if fails {
            return Err(format!("Mock pipeline failure for {model_id}"));
        }

        if let Some(dir) = &self.cache_dir {
            let model_dir = dir.join(cache_dir_name(model_id)?);
            std::fs::create_dir_all(&model_dir)
                .map_err(|e| format!("Failed to create {}: {e}", model_dir.display()))?;
            let config = serde_json::json!({ "model_id": model_id, "quantization": quantization });
            std::fs::write(model_dir.join("config.json"), config.to_string())
                .map_err(|e| format!("Failed to write model config: {e}"))?;
        }

        progress(ProgressReport::new(1.0, "ready"));
        Ok(Box::new(MockPipeline {
            model_id: model_id.to_string(),
            reply: self.reply.clone(),
            calls: self.calls.clone(),
        }))
    }

    fn is_cached(&self, model_id: &str) -> Result<bool, String> {
        let name = cache_dir_name(model_id)?;
        Ok(self
            .cache_dir
            .as_ref()
            .is_some_and(|dir| dir.join(name).join("config.json").exists()))
    }

    fn clear_cache(&mut self) -> Result<(), String> {
        match &self.cache_dir {
            Some(dir) if dir.exists() => std::fs::remove_dir_all(dir)
                .map_err(|e| format!("Failed to remove {}: {e}", dir.display())),
            _ => Ok(()),
        }
    }
}

struct MockPipeline {
    model_id: String,
    reply: Reply,
    calls: Arc<Mutex<Vec<TranscribeOptions>>>,
}

impl TranscriberPipeline for MockPipeline {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn transcribe(&mut self, audio: &[f32], options: &TranscribeOptions) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(options.clone());
        }
        Ok((self.reply)(audio, options))
    }
}
