//! Model lifecycle: which engine is loaded, what is cached, and when to let go.

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use offline_db::CacheLedger;
use offline_types::{CustomModel, ModelDescriptor, OfflineError, ProgressReport};
use offline_worker::SharedWorkerBridge;
use tokio::sync::{mpsc, Mutex as TokioMutex, MutexGuard};

use crate::catalog;
use crate::idle::IdleSupervisor;

/// Invoked with the model id after an idle-triggered unload.
pub type IdleUnloadCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct ManagerInner {
    bridge: SharedWorkerBridge,
    ledger: Arc<CacheLedger>,
    /// Model served by the worker's engine. Holding this lock serializes
    /// load, unload, delete and clear.
    loaded: TokioMutex<Option<String>>,
    supervisor: IdleSupervisor,
    idle_callback: RwLock<Option<IdleUnloadCallback>>,
}

/// Owns the single engine slot behind a worker bridge.
#[derive(Clone)]
pub struct ModelManager {
    inner: Arc<ManagerInner>,
}

impl ModelManager {
    /// Must be called inside a tokio runtime.
    pub fn new(bridge: SharedWorkerBridge, ledger: Arc<CacheLedger>, idle_timeout: Duration) -> Self {
        let (supervisor, idle_rx) = IdleSupervisor::spawn(idle_timeout);

        // Every message sent towards the worker counts as activity.
        let observer = supervisor.clone();
        bridge.set_activity_observer(Arc::new(move || observer.activity()));

        let inner = Arc::new(ManagerInner {
            bridge,
            ledger,
            loaded: TokioMutex::new(None),
            supervisor,
            idle_callback: RwLock::new(None),
        });
        tokio::spawn(idle_listener(Arc::downgrade(&inner), idle_rx));

        Self { inner }
    }

    pub fn bridge(&self) -> &SharedWorkerBridge {
        &self.inner.bridge
    }

    pub fn supervisor(&self) -> &IdleSupervisor {
        &self.inner.supervisor
    }

    pub fn set_idle_unload_callback(&self, callback: IdleUnloadCallback) {
        if let Ok(mut slot) = self.inner.idle_callback.write() {
            *slot = Some(callback);
        }
    }

    pub async fn loaded_model(&self) -> Option<String> {
        self.inner.loaded.lock().await.clone()
    }

    pub fn list_cached_models(&self) -> Vec<String> {
        self.inner.ledger.all().into_iter().collect()
    }

    pub fn is_cached(&self, model_id: &str) -> bool {
        self.inner.ledger.has(model_id)
    }

    /// Load `model_id`, replacing whatever engine is loaded. Returns at once
    /// when the model is already being served.
    pub async fn load(
        &self,
        model_id: &str,
        custom_models: &[CustomModel],
        progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    ) -> Result<(), OfflineError> {
        let descriptor = catalog::resolve(model_id, custom_models)?;
        let mut loaded = self.inner.loaded.lock().await;

        if loaded.as_deref() == Some(model_id) {
            log::debug!("[MODEL_MGR] {model_id} already loaded");
            return Ok(());
        }
        self.release(&mut loaded).await;

        log::info!("[MODEL_MGR] Loading {model_id}");
        self.inner.bridge.load_model(&descriptor, progress).await?;

        *loaded = Some(model_id.to_string());
        if let Err(e) = self.inner.ledger.add(model_id) {
            log::warn!("[MODEL_MGR] Failed to record {model_id} in cache ledger: {e}");
        }
        self.inner.supervisor.start();
        log::info!("[MODEL_MGR] {model_id} ready");
        Ok(())
    }

    /// Release the loaded engine, if any.
    pub async fn unload(&self) {
        let mut loaded = self.inner.loaded.lock().await;
        self.release(&mut loaded).await;
    }

    /// Remove a model's cached artifacts. The ledger entry is dropped even
    /// when the purge fails; the failure is still returned.
    pub async fn delete_cached_model(
        &self,
        model_id: &str,
        custom_models: &[CustomModel],
    ) -> Result<(), OfflineError> {
        let mut loaded = self.inner.loaded.lock().await;

        let is_loaded = loaded.as_deref() == Some(model_id);
        if !is_loaded && !self.inner.ledger.has(model_id) {
            log::debug!("[MODEL_MGR] {model_id} is not cached, nothing to delete");
            return Ok(());
        }
        if is_loaded {
            self.release(&mut loaded).await;
        }

        let descriptor = catalog::resolve(model_id, custom_models).ok();
        let purged = self.inner.bridge.delete_cache(model_id, descriptor).await;

        if let Err(e) = self.inner.ledger.remove(model_id) {
            log::warn!("[MODEL_MGR] Failed to remove {model_id} from cache ledger: {e}");
        }
        match purged {
            Ok(()) => {
                log::info!("[MODEL_MGR] Deleted {model_id}");
                Ok(())
            }
            Err(e) => {
                log::warn!("[MODEL_MGR] Purge of {model_id} reported: {e}");
                Err(e)
            }
        }
    }

    /// Purge every known model and empty the ledger. Returns one description
    /// per purge that failed.
    pub async fn clear_all(&self, custom_models: &[CustomModel]) -> Vec<String> {
        let mut loaded = self.inner.loaded.lock().await;
        self.release(&mut loaded).await;

        let mut descriptors = catalog::descriptors_for_purge(custom_models);
        for model_id in self.inner.ledger.all() {
            if !descriptors.iter().any(|d| d.id == model_id) {
                descriptors.push(ModelDescriptor::prebuilt(model_id));
            }
        }

        let failures = match self.inner.bridge.clear_all_cache(descriptors).await {
            Ok(failures) => failures,
            Err(e) => vec![e.to_string()],
        };
        if let Err(e) = self.inner.ledger.clear() {
            log::warn!("[MODEL_MGR] Failed to clear cache ledger: {e}");
        }
        log::info!("[MODEL_MGR] Cleared all models ({} failures)", failures.len());
        failures
    }

    async fn release(&self, loaded: &mut MutexGuard<'_, Option<String>>) {
        self.inner.supervisor.stop();
        let Some(model_id) = loaded.take() else {
            return;
        };
        log::info!("[MODEL_MGR] Unloading {model_id}");
        if let Err(e) = self.inner.bridge.unload_model().await {
            log::warn!("[MODEL_MGR] Unload of {model_id} reported: {e}");
        }
    }

    async fn handle_idle(&self) {
        let unloaded = {
            let mut loaded = self.inner.loaded.lock().await;
            // A load may have re-armed the timer since it fired.
            if self.inner.supervisor.is_active() || loaded.is_none() {
                return;
            }
            let model_id = loaded.clone();
            self.release(&mut loaded).await;
            model_id
        };

        let Some(model_id) = unloaded else {
            return;
        };
        log::info!("[MODEL_MGR] Unloaded {model_id} after idle timeout");
        let callback = self
            .inner
            .idle_callback
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(&model_id);
        }
    }
}

async fn idle_listener(inner: Weak<ManagerInner>, mut idle_rx: mpsc::UnboundedReceiver<()>) {
    while idle_rx.recv().await.is_some() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        ModelManager { inner }.handle_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offline_db::Database;
    use offline_engine::MockEngine;
    use offline_worker::{spawn_thread_worker, WorkerBridge};

    const QWEN: &str = "Qwen3-4B-q4f16_1-MLC";
    const QWEN_25: &str = "Qwen2.5-3B-Instruct-q4f16_1-MLC";
    const T: Duration = Duration::from_secs(300);

    fn ledger() -> Arc<CacheLedger> {
        let db = Arc::new(Database::new(":memory:").unwrap());
        Arc::new(CacheLedger::load(db).unwrap())
    }

    fn manager(engine: &MockEngine) -> ModelManager {
        let bridge = Arc::new(WorkerBridge::new(spawn_thread_worker(engine.clone())));
        ModelManager::new(bridge, ledger(), T)
    }

    #[tokio::test]
    async fn test_switching_models_unloads_first() {
        let engine = MockEngine::new();
        let manager = manager(&engine);

        manager.load(QWEN, &[], None).await.unwrap();
        manager.load(QWEN_25, &[], None).await.unwrap();

        assert_eq!(
            engine.events().events(),
            vec![
                format!("load:{QWEN}"),
                format!("unload:{QWEN}"),
                format!("load:{QWEN_25}"),
            ]
        );
        assert_eq!(engine.max_live_instances(), 1);
        assert_eq!(manager.loaded_model().await.as_deref(), Some(QWEN_25));
    }

    #[tokio::test]
    async fn test_reloading_same_model_is_free() {
        let engine = MockEngine::new();
        let manager = manager(&engine);

        manager.load(QWEN, &[], None).await.unwrap();
        manager.load(QWEN, &[], None).await.unwrap();

        assert_eq!(engine.events().count("load:"), 1);
        assert_eq!(engine.live_instances(), 1);
    }

    #[tokio::test]
    async fn test_load_forwards_progress_and_records_ledger() {
        let engine = MockEngine::new();
        let manager = manager(&engine);
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.load(QWEN, &[], Some(tx)).await.unwrap();

        let mut reports = Vec::new();
        while let Ok(report) = rx.try_recv() {
            reports.push(report);
        }
        assert_eq!(reports.len(), 5);
        assert_eq!(reports.last().map(|r| r.progress), Some(1.0));
        assert!(manager.is_cached(QWEN));
        assert!(manager.supervisor().is_active());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_nothing_loaded() {
        let engine = MockEngine::new().with_failing_load(QWEN_25);
        let manager = manager(&engine);

        manager.load(QWEN, &[], None).await.unwrap();
        let err = manager.load(QWEN_25, &[], None).await.unwrap_err();

        assert!(matches!(err, OfflineError::LoadFailure { ref model_id, .. } if model_id == QWEN_25));
        assert_eq!(manager.loaded_model().await, None);
        assert!(!manager.is_cached(QWEN_25));
        assert!(!manager.supervisor().is_active());
        assert_eq!(engine.live_instances(), 0);
    }

    #[tokio::test]
    async fn test_unknown_model_is_rejected_without_worker_traffic() {
        let engine = MockEngine::new();
        let manager = manager(&engine);

        let err = manager.load("nope", &[], None).await.unwrap_err();
        assert_eq!(err, OfflineError::UnknownModel("nope".to_string()));
        assert!(engine.events().events().is_empty());
    }

    #[tokio::test]
    async fn test_custom_model_loads_through_registry() {
        let engine = MockEngine::new();
        let manager = manager(&engine);
        let custom = vec![CustomModel {
            id: "mine".to_string(),
            name: "Mine".to_string(),
            model_url: "https://example.com/mine".to_string(),
            model_lib_url: "https://example.com/mine.wasm".to_string(),
        }];

        manager.load("mine", &custom, None).await.unwrap();
        assert_eq!(manager.list_cached_models(), vec!["mine".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_updates_ledger_even_when_purge_fails() {
        let engine = MockEngine::new().with_failing_purge(QWEN);
        let manager = manager(&engine);

        manager.load(QWEN, &[], None).await.unwrap();
        assert!(manager.is_cached(QWEN));

        let err = manager.delete_cached_model(QWEN, &[]).await.unwrap_err();
        assert!(matches!(err, OfflineError::DeleteFailure { .. }));
        assert!(!manager.is_cached(QWEN));
        assert_eq!(manager.loaded_model().await, None);
        assert_eq!(engine.events().count("unload:"), 1);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_entry_is_a_no_op() {
        let engine = MockEngine::new();
        let manager = manager(&engine);

        manager.delete_cached_model(QWEN, &[]).await.unwrap();
        assert!(engine.events().events().is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_purges_catalog_and_ledger_leftovers() {
        let engine = MockEngine::new();
        let manager = manager(&engine);

        manager.load(QWEN, &[], None).await.unwrap();
        manager.inner.ledger.add("orphan").unwrap();

        let failures = manager.clear_all(&[]).await;
        assert!(failures.is_empty());
        assert!(manager.list_cached_models().is_empty());
        assert_eq!(manager.loaded_model().await, None);
        assert_eq!(
            engine.events().count("purge:"),
            catalog::OFFLINE_MODELS.len() + 1
        );
    }

    #[tokio::test]
    async fn test_unload_without_engine_is_a_no_op() {
        let engine = MockEngine::new();
        let manager = manager(&engine);
        manager.unload().await;
        assert!(engine.events().events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_unload_only_after_silence() {
        let engine = MockEngine::new();
        let manager = manager(&engine);
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        manager.set_idle_unload_callback(Arc::new(move |model_id| {
            let _ = fired_tx.send(model_id.to_string());
        }));

        manager.load(QWEN, &[], None).await.unwrap();

        // Keep-alives every T/2 for 10T.
        for _ in 0..20 {
            tokio::time::sleep(T / 2).await;
            manager.bridge().reset_timer();
        }
        assert!(fired_rx.try_recv().is_err());
        assert_eq!(manager.loaded_model().await.as_deref(), Some(QWEN));

        tokio::time::sleep(T + Duration::from_secs(1)).await;
        assert_eq!(fired_rx.recv().await.as_deref(), Some(QWEN));
        assert_eq!(manager.loaded_model().await, None);
        assert_eq!(engine.events().count("unload:"), 1);

        tokio::time::sleep(T * 3).await;
        assert!(fired_rx.try_recv().is_err());
        // Still cached; only the engine went away.
        assert!(manager.is_cached(QWEN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_unload_does_not_fire_idle_callback() {
        let engine = MockEngine::new();
        let manager = manager(&engine);
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel::<String>();
        manager.set_idle_unload_callback(Arc::new(move |model_id| {
            let _ = fired_tx.send(model_id.to_string());
        }));

        manager.load(QWEN, &[], None).await.unwrap();
        manager.unload().await;
        tokio::time::sleep(T * 2).await;

        assert!(fired_rx.try_recv().is_err());
        assert_eq!(engine.events().count("unload:"), 1);
    }
}
