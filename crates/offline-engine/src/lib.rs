//! Engine seams for the offline worker boundaries.
//!
//! A real backend implements [`InferenceEngine`] / [`Transcriber`]; the
//! worker loops only ever talk to these traits. The bundled mock backends
//! drive the CLI demo mode and the test suites.

pub mod mock;
pub mod transcriber;

pub use mock::{cache_dir_name, EventLog, MockEngine};
pub use transcriber::{MockTranscriber, TranscribeOptions, Transcriber, TranscriberPipeline};

use std::sync::atomic::AtomicBool;

use offline_types::{GenerationOutput, GenerationRequest, ModelDescriptor, ProgressReport};

/// Factory for engine instances plus owner of the on-disk model cache.
///
/// Lives on the worker's command thread. At most one [`EngineInstance`] built
/// by it is alive at a time; the worker enforces this by dropping the old
/// instance before calling [`InferenceEngine::load`] again.
pub trait InferenceEngine: Send + 'static {
    /// Materialize (download if needed) and construct an engine for `descriptor`.
    fn load(
        &mut self,
        descriptor: &ModelDescriptor,
        progress: &mut dyn FnMut(ProgressReport),
    ) -> Result<Box<dyn EngineInstance>, String>;

    /// Remove cached artifacts for `descriptor`. Missing artifacts are not an error.
    fn purge(&mut self, descriptor: &ModelDescriptor) -> Result<(), String>;
}

/// A loaded model. Dropping it releases the engine.
pub trait EngineInstance: Send {
    fn model_id(&self) -> &str;

    /// Run one generation, calling `on_token` for each streamed piece.
    ///
    /// `cancel` is polled between tokens. When it is observed the call returns
    /// `Ok` with `cancelled: true` and the text produced so far.
    fn generate(
        &mut self,
        request: &GenerationRequest,
        cancel: &AtomicBool,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationOutput, String>;
}
