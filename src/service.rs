//! Caller-facing facade over the lifecycle controller, sessions and the
//! transcription boundary.

use std::sync::{Arc, Mutex, RwLock};

use offline_db::CacheLedger;
use offline_types::{CustomModel, GenerationOutput, OfflineError, ProgressReport, SamplingOptions};
use offline_worker::{SharedWorkerBridge, TranscriptionBridge, WorkerBridge};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;

use crate::catalog;
use crate::config::OfflineConfig;
use crate::idle::ActivityThrottle;
use crate::model_manager::{IdleUnloadCallback, ModelManager};
use crate::session::ChunkSink;
use crate::two_step::{translate_direct, translate_two_step, RouteTable, TranslationJob};

pub struct OfflineTranslator {
    manager: ModelManager,
    routes: RouteTable,
    throttle: ActivityThrottle,
    custom_models: RwLock<Vec<CustomModel>>,
    /// Held for the whole of a translation; later callers queue behind it.
    generation_lock: TokioMutex<()>,
    /// Token of the translation currently holding the generation lock.
    active_cancel: Mutex<Option<CancellationToken>>,
    transcription: Option<TranscriptionBridge>,
}

impl OfflineTranslator {
    /// Must be called inside a tokio runtime.
    pub fn new(bridge: SharedWorkerBridge, ledger: Arc<CacheLedger>, config: &OfflineConfig) -> Self {
        let manager = ModelManager::new(bridge, ledger, config.idle_timeout);
        let throttle = ActivityThrottle::new(manager.supervisor().clone(), config.activity_throttle);
        Self {
            manager,
            routes: RouteTable::default(),
            throttle,
            custom_models: RwLock::new(Vec::new()),
            generation_lock: TokioMutex::new(()),
            active_cancel: Mutex::new(None),
            transcription: None,
        }
    }

    pub fn with_transcription(mut self, bridge: TranscriptionBridge) -> Self {
        self.transcription = Some(bridge);
        self
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Replace the caller-side registry of custom models.
    pub fn set_custom_models(&self, models: Vec<CustomModel>) {
        if let Ok(mut slot) = self.custom_models.write() {
            *slot = models;
        }
    }

    fn custom_models(&self) -> Vec<CustomModel> {
        self.custom_models
            .read()
            .map(|models| models.clone())
            .unwrap_or_default()
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    pub async fn load_model(
        &self,
        model_id: &str,
        progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    ) -> Result<(), OfflineError> {
        self.manager.load(model_id, &self.custom_models(), progress).await
    }

    pub async fn unload_model(&self) {
        self.manager.unload().await;
    }

    pub async fn delete_model(&self, model_id: &str) -> Result<(), OfflineError> {
        self.manager
            .delete_cached_model(model_id, &self.custom_models())
            .await
    }

    /// Returns one entry per model whose purge failed.
    pub async fn clear_all_models(&self) -> Vec<String> {
        self.manager.clear_all(&self.custom_models()).await
    }

    pub fn list_cached_models(&self) -> Vec<String> {
        self.manager.list_cached_models()
    }

    pub async fn loaded_model(&self) -> Option<String> {
        self.manager.loaded_model().await
    }

    /// Translate `text`, streaming the visible output to `on_chunk`.
    ///
    /// Concurrent calls are queued and run one after another.
    #[allow(clippy::too_many_arguments)]
    pub async fn translate_stream(
        &self,
        text: &str,
        from: &str,
        to: &str,
        two_step_enabled: bool,
        options: SamplingOptions,
        on_chunk: ChunkSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, OfflineError> {
        let _turn = self.generation_lock.lock().await;
        let _active = ActiveToken::publish(&self.active_cancel, cancel);

        let job = TranslationJob {
            text,
            source: from,
            target: to,
            options,
        };
        let bridge: &WorkerBridge = self.manager.bridge();
        if two_step_enabled {
            translate_two_step(bridge, &self.routes, job, on_chunk, cancel).await
        } else {
            translate_direct(bridge, job, on_chunk, cancel).await
        }
    }

    /// Cancel the translation currently running, if any. Queued ones are untouched.
    pub fn cancel_active(&self) -> bool {
        let token = self
            .active_cancel
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// External activity signal (user input). Throttled before it reaches the idle timer.
    pub fn reset_idle_timer(&self) {
        self.throttle.signal();
    }

    pub fn register_idle_unload_callback(&self, callback: IdleUnloadCallback) {
        self.manager.set_idle_unload_callback(callback);
    }

    fn transcription(&self) -> Result<&TranscriptionBridge, OfflineError> {
        self.transcription
            .as_ref()
            .ok_or_else(|| OfflineError::WorkerUnavailable("no transcription worker".into()))
    }

    pub async fn load_asr_model(
        &self,
        model_id: &str,
        progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    ) -> Result<(), OfflineError> {
        let model = catalog::find_asr_model(model_id)
            .ok_or_else(|| OfflineError::UnknownModel(model_id.to_string()))?;
        self.transcription()?
            .load(&model.id, model.quantization, progress)
            .await
    }

    /// Whether the speech model `model_id` is already downloaded.
    pub async fn asr_cache_status(&self, model_id: &str) -> Result<bool, OfflineError> {
        let model = catalog::find_asr_model(model_id)
            .ok_or_else(|| OfflineError::UnknownModel(model_id.to_string()))?;
        self.transcription()?.is_cached(&model.id).await
    }

    /// Cache status of every catalog speech model, in catalog order.
    pub async fn asr_cache_statuses(&self) -> Result<Vec<(String, bool)>, OfflineError> {
        let transcription = self.transcription()?;
        let mut statuses = Vec::new();
        for model in catalog::asr_models() {
            let cached = transcription.is_cached(&model.id).await?;
            statuses.push((model.id, cached));
        }
        Ok(statuses)
    }

    /// Delete every downloaded speech model. The loaded one must be loaded again.
    pub async fn clear_asr_cache(&self) -> Result<(), OfflineError> {
        self.transcription()?.clear_cache().await
    }

    /// `audio` is mono f32 PCM at 16 kHz; `language` a UI language code.
    pub async fn transcribe(&self, audio: Vec<f32>, language: &str) -> Result<String, OfflineError> {
        self.transcription()?.transcribe(audio, language).await
    }
}

/// Publishes the running translation's token and clears it on drop, also
/// when the translation future is dropped before finishing.
struct ActiveToken<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl<'a> ActiveToken<'a> {
    fn publish(slot: &'a Mutex<Option<CancellationToken>>, token: &CancellationToken) -> Self {
        if let Ok(mut current) = slot.lock() {
            *current = Some(token.clone());
        }
        Self { slot }
    }
}

impl Drop for ActiveToken<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.slot.lock() {
            *current = None;
        }
    }
}
