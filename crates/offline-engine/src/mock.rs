// Mock engine for the CLI demo mode and tests.
// Echoes the quoted text of a translation prompt back in small chunks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offline_types::{
    validate_model_id, GenerationOutput, GenerationRequest, ModelDescriptor, ProgressReport,
};

use super::{EngineInstance, InferenceEngine};

/// Turns a prompt into the chunks the mock will stream.
pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Shared, ordered record of what the mock was asked to do.
///
/// Entries look like `load:<id>`, `unload:<id>`, `generate:<prompt>`, `purge:<id>`.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: String) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of events starting with `prefix` (e.g. `"generate:"`).
    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

#[derive(Clone)]
pub struct MockEngine {
    models_dir: Option<PathBuf>,
    load_delay: Duration,
    token_delay: Duration,
    responder: Responder,
    failing_loads: Arc<Mutex<HashSet<String>>>,
    failing_purges: Arc<Mutex<HashSet<String>>>,
    events: EventLog,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            models_dir: None,
            load_delay: Duration::ZERO,
            token_delay: Duration::ZERO,
            responder: Arc::new(echo_quoted),
            failing_loads: Arc::default(),
            failing_purges: Arc::default(),
            events: EventLog::default(),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Write marker files for loaded models under `dir` and delete them on purge.
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&str) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    /// Always stream `chunks`, whatever the prompt.
    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        self.with_responder(move |_| chunks.clone())
    }

    pub fn with_failing_load(self, model_id: &str) -> Self {
        if let Ok(mut set) = self.failing_loads.lock() {
            set.insert(model_id.to_string());
        }
        self
    }

    pub fn with_failing_purge(self, model_id: &str) -> Self {
        if let Ok(mut set) = self.failing_purges.lock() {
            set.insert(model_id.to_string());
        }
        self
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of instances that were ever alive at once.
    pub fn max_live_instances(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn model_dir(&self, model_id: &str) -> Result<Option<PathBuf>, String> {
        match self.models_dir.as_deref() {
            Some(dir) => Ok(Some(dir.join(cache_dir_name(model_id)?))),
            None => Ok(None),
        }
    }

    fn materialize(&self, descriptor: &ModelDescriptor, dir: &Path) -> Result<(), String> {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
        let json = serde_json::to_string_pretty(descriptor)
            .map_err(|e| format!("Failed to serialize descriptor: {e}"))?;
        std::fs::write(dir.join("model.json"), json)
            .map_err(|e| format!("Failed to write model marker: {e}"))
    }
}

impl InferenceEngine for MockEngine {
    fn load(
        &mut self,
        descriptor: &ModelDescriptor,
        progress: &mut dyn FnMut(ProgressReport),
    ) -> Result<Box<dyn EngineInstance>, String> {
        self.events.push(format!("load:{}", descriptor.id));

        const STEPS: usize = 4;
        for step in 0..STEPS {
            progress(ProgressReport::new(
                step as f32 / STEPS as f32,
                format!("Fetching param cache[{step}/{STEPS}]"),
            ));
            if !self.load_delay.is_zero() {
                std::thread::sleep(self.load_delay / STEPS as u32);
            }
        }

        let fails = self
            .failing_loads
            .lock()
            .map(|set| set.contains(&descriptor.id))
            .unwrap_or(false);
        if fails {
            return Err(format!("Mock load failure for {}", descriptor.id));
        }

        if let Some(dir) = self.model_dir(&descriptor.id)? {
            self.materialize(descriptor, &dir)?;
        }
        progress(ProgressReport::new(1.0, "Finish loading"));

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(MockInstance {
            model_id: descriptor.id.clone(),
            token_delay: self.token_delay,
            responder: self.responder.clone(),
            events: self.events.clone(),
            live: self.live.clone(),
        }))
    }

    fn purge(&mut self, descriptor: &ModelDescriptor) -> Result<(), String> {
        self.events.push(format!("purge:{}", descriptor.id));

        let fails = self
            .failing_purges
            .lock()
            .map(|set| set.contains(&descriptor.id))
            .unwrap_or(false);
        if fails {
            return Err(format!("Mock purge failure for {}", descriptor.id));
        }

        match self.model_dir(&descriptor.id)? {
            Some(dir) if dir.exists() => std::fs::remove_dir_all(&dir)
                .map_err(|e| format!("Failed to remove {}: {e}", dir.display())),
            _ => Ok(()),
        }
    }
}

struct MockInstance {
    model_id: String,
    token_delay: Duration,
    responder: Responder,
    events: EventLog,
    live: Arc<AtomicUsize>,
}

impl EngineInstance for MockInstance {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(
        &mut self,
        request: &GenerationRequest,
        cancel: &AtomicBool,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationOutput, String> {
        self.events.push(format!("generate:{}", request.prompt));

        let mut text = String::new();
        for chunk in (self.responder)(&request.prompt) {
            if cancel.load(Ordering::SeqCst) {
                return Ok(GenerationOutput::cancelled(text));
            }
            if !self.token_delay.is_zero() {
                std::thread::sleep(self.token_delay);
            }
            if cancel.load(Ordering::SeqCst) {
                return Ok(GenerationOutput::cancelled(text));
            }
            on_token(&chunk);
            text.push_str(&chunk);
        }

        Ok(GenerationOutput::completed(text))
    }
}

impl Drop for MockInstance {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.events.push(format!("unload:{}", self.model_id));
    }
}

/// Directory name for a model id (`org/name` ids are flattened).
///
/// Fails for ids that could resolve outside the models directory.
pub fn cache_dir_name(model_id: &str) -> Result<String, String> {
    validate_model_id(model_id)?;
    Ok(model_id.replace(['/', '\\'], "--"))
}

/// Default responder: stream the quoted part of the prompt in 4-char pieces.
fn echo_quoted(prompt: &str) -> Vec<String> {
    let quoted = match (prompt.find('"'), prompt.rfind('"')) {
        (Some(start), Some(end)) if end > start => &prompt[start + 1..end],
        _ => prompt,
    };
    let chars: Vec<char> = quoted.trim().chars().collect();
    chars.chunks(4).map(|c| c.iter().collect()).collect()
}
