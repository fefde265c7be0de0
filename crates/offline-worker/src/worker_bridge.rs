//! Controller-side abstraction for communicating with a worker.
//!
//! Owns request/response correlation: every request gets a fresh id, and
//! every event the worker emits is routed by the id it echoes. Progress goes
//! to a per-request sink, chunks go to the single active generation, and the
//! final payload resolves the pending request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use offline_types::{
    ErrorKind, GenerationOutput, GenerationRequest, ModelDescriptor, OfflineError, ProgressReport,
    SourceKind,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};

use super::ipc_types::*;
use super::process_manager::ProcessManager;
use super::transport::WorkerLink;

/// Called for every message sent towards a worker.
pub type ActivityObserver = Arc<dyn Fn() + Send + Sync>;

/// Shared reference to the WorkerBridge.
pub type SharedWorkerBridge = Arc<WorkerBridge>;

/// Where an incoming payload goes.
pub(crate) enum Route<P> {
    Progress(ProgressReport),
    Chunk(String),
    Final(P),
}

/// Payloads the bridge core knows how to route.
pub(crate) trait RoutedPayload: ErrorPayload + Send + 'static {
    fn route(self) -> Route<Self>;
}

impl RoutedPayload for WorkerPayload {
    fn route(self) -> Route<Self> {
        match self {
            WorkerPayload::Progress { report } => Route::Progress(report),
            WorkerPayload::Chunk { text } => Route::Chunk(text),
            other => Route::Final(other),
        }
    }
}

impl RoutedPayload for TranscriptionPayload {
    fn route(self) -> Route<Self> {
        match self {
            TranscriptionPayload::Progress { report } => Route::Progress(report),
            other => Route::Final(other),
        }
    }
}

struct PendingTable<P> {
    requests: HashMap<u64, oneshot::Sender<P>>,
    /// Set once the worker's event stream ended; no new request may wait.
    closed: bool,
}

struct ActiveGeneration {
    request_id: u64,
    chunk_tx: mpsc::UnboundedSender<String>,
}

struct Shared<P> {
    pending: TokioMutex<PendingTable<P>>,
    progress: TokioMutex<HashMap<u64, mpsc::UnboundedSender<ProgressReport>>>,
    active_generation: TokioMutex<Option<ActiveGeneration>>,
}

/// Protocol-independent half of a bridge.
pub(crate) struct BridgeCore<P> {
    cmd_tx: crossbeam_channel::Sender<String>,
    shared: Arc<Shared<P>>,
    next_id: AtomicU64,
    activity: RwLock<Option<ActivityObserver>>,
    process: Option<Arc<ProcessManager>>,
}

impl<P: RoutedPayload> BridgeCore<P> {
    /// Must be called inside a tokio runtime: the event reader is a task.
    pub(crate) fn new(link: WorkerLink<P>) -> Self {
        let shared = Arc::new(Shared {
            pending: TokioMutex::new(PendingTable {
                requests: HashMap::new(),
                closed: false,
            }),
            progress: TokioMutex::new(HashMap::new()),
            active_generation: TokioMutex::new(None),
        });

        tokio::spawn(event_reader_task(link.events, shared.clone()));

        Self {
            cmd_tx: link.commands,
            shared,
            next_id: AtomicU64::new(1),
            activity: RwLock::new(None),
            process: link.process,
        }
    }

    pub(crate) fn set_activity_observer(&self, observer: ActivityObserver) {
        if let Ok(mut slot) = self.activity.write() {
            *slot = Some(observer);
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.process.as_ref().map_or(true, |p| p.is_alive())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send_line<C: Serialize>(&self, id: u64, command: C) -> Result<(), OfflineError> {
        let json = serde_json::to_string(&WorkerRequest { id, command })
            .map_err(|e| OfflineError::WorkerUnavailable(format!("Serialize error: {e}")))?;

        if let Ok(slot) = self.activity.read() {
            if let Some(observer) = slot.as_ref() {
                observer();
            }
        }

        self.cmd_tx
            .send(json)
            .map_err(|_| OfflineError::WorkerUnavailable("worker command channel closed".into()))
    }

    async fn register(&self, id: u64) -> Result<oneshot::Receiver<P>, OfflineError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.shared.pending.lock().await;
        if pending.closed {
            return Err(OfflineError::WorkerUnavailable("worker exited".into()));
        }
        pending.requests.insert(id, tx);
        Ok(rx)
    }

    async fn forget(&self, id: u64) {
        self.shared.pending.lock().await.requests.remove(&id);
        self.shared.progress.lock().await.remove(&id);
    }

    /// Send a command and wait for its final response.
    pub(crate) async fn send_and_wait<C: Serialize>(
        &self,
        command: C,
        progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    ) -> Result<P, OfflineError> {
        let id = self.next_id();
        let rx = self.register(id).await?;
        if let Some(progress) = progress {
            self.shared.progress.lock().await.insert(id, progress);
        }

        if let Err(e) = self.send_line(id, command) {
            self.forget(id).await;
            return Err(e);
        }

        rx.await
            .map_err(|_| OfflineError::WorkerUnavailable("worker exited before responding".into()))
    }

    /// Send a command no response is expected for (id 0).
    pub(crate) fn send_fire_and_forget<C: Serialize>(&self, command: C) {
        if let Err(e) = self.send_line(0, command) {
            log::warn!("[BRIDGE] {e}");
        }
    }
}

/// Task that routes worker events to whoever is waiting for them.
async fn event_reader_task<P: RoutedPayload>(
    mut events: mpsc::UnboundedReceiver<WorkerResponse<P>>,
    shared: Arc<Shared<P>>,
) {
    while let Some(response) = events.recv().await {
        let id = response.id;
        match response.payload.route() {
            Route::Progress(report) => {
                if let Some(sink) = shared.progress.lock().await.get(&id) {
                    let _ = sink.send(report);
                }
            }
            Route::Chunk(text) => {
                let active = shared.active_generation.lock().await;
                match *active {
                    Some(ref generation) if generation.request_id == id => {
                        let _ = generation.chunk_tx.send(text);
                    }
                    _ => log::debug!("[BRIDGE] Dropping chunk for inactive generation id={id}"),
                }
            }
            Route::Final(payload) => {
                shared.progress.lock().await.remove(&id);
                {
                    // Closing the chunk channel tells the session every chunk has arrived.
                    let mut active = shared.active_generation.lock().await;
                    if active.as_ref().is_some_and(|g| g.request_id == id) {
                        *active = None;
                    }
                }

                let waiter = shared.pending.lock().await.requests.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(payload);
                    }
                    None => {
                        if let Some((kind, message)) = payload.as_error() {
                            log::warn!("[BRIDGE] Unsolicited worker error ({kind:?}): {message}");
                        } else if id != 0 {
                            log::warn!("[BRIDGE] No pending request for response id={id}");
                        }
                    }
                }
            }
        }
    }

    log::warn!("[BRIDGE] Worker event stream ended, failing pending requests");
    {
        let mut pending = shared.pending.lock().await;
        pending.closed = true;
        // Dropping the senders resolves every waiter with WorkerUnavailable.
        pending.requests.clear();
    }
    shared.progress.lock().await.clear();
    *shared.active_generation.lock().await = None;
}

/// A generation in flight: streamed chunks, then one final payload.
pub struct GenerationStream {
    pub id: u64,
    /// Closes once the final payload has been received.
    pub chunks: mpsc::UnboundedReceiver<String>,
    done: oneshot::Receiver<WorkerPayload>,
}

impl GenerationStream {
    /// Wait for the final payload.
    pub async fn outcome(&mut self) -> Result<GenerationOutput, OfflineError> {
        let payload = (&mut self.done).await.map_err(|_| {
            OfflineError::WorkerUnavailable("worker exited during generation".into())
        })?;
        match payload {
            WorkerPayload::Complete { text, cancelled } => Ok(GenerationOutput { text, cancelled }),
            WorkerPayload::Error { kind, message } => Err(match kind {
                ErrorKind::Busy => OfflineError::GenerationBusy,
                ErrorKind::NotLoaded => OfflineError::EngineNotLoaded,
                // Anything else is a failure of this generation.
                _ => OfflineError::GenerationFailure(message),
            }),
            other => Err(unexpected("Generate", &other)),
        }
    }
}

/// Controller-side handle to the engine worker.
pub struct WorkerBridge {
    core: BridgeCore<WorkerPayload>,
}

impl WorkerBridge {
    /// Create a bridge and start its event reader. Requires a tokio runtime.
    pub fn new(link: WorkerLink<WorkerPayload>) -> Self {
        Self {
            core: BridgeCore::new(link),
        }
    }

    /// Install the hook invoked on every boundary-directed message.
    pub fn set_activity_observer(&self, observer: ActivityObserver) {
        self.core.set_activity_observer(observer);
    }

    /// Whether the worker process (if any) is still running.
    pub fn is_alive(&self) -> bool {
        self.core.is_alive()
    }

    /// Load a model, forwarding progress to `progress` when given.
    pub async fn load_model(
        &self,
        descriptor: &ModelDescriptor,
        progress: Option<mpsc::UnboundedSender<ProgressReport>>,
    ) -> Result<String, OfflineError> {
        let command = match descriptor.source_kind {
            SourceKind::Prebuilt => WorkerCommand::LoadModel {
                model_id: descriptor.id.clone(),
            },
            SourceKind::UserCustom => WorkerCommand::LoadCustomModel {
                model_id: descriptor.id.clone(),
                weights_location: descriptor.weights_location.clone().unwrap_or_default(),
                runtime_library_location: descriptor
                    .runtime_library_location
                    .clone()
                    .unwrap_or_default(),
            },
        };

        match self.core.send_and_wait(command, progress).await? {
            WorkerPayload::Loaded { model_id } => Ok(model_id),
            WorkerPayload::Error { kind, message } => Err(match kind {
                ErrorKind::UnknownOperation => OfflineError::UnknownOperation(message),
                _ => OfflineError::LoadFailure {
                    model_id: descriptor.id.clone(),
                    message,
                },
            }),
            other => Err(unexpected("LoadModel", &other)),
        }
    }

    /// Release the engine inside the worker.
    pub async fn unload_model(&self) -> Result<(), OfflineError> {
        match self.core.send_and_wait(WorkerCommand::UnloadModel, None).await? {
            WorkerPayload::Unloaded => Ok(()),
            WorkerPayload::Error { kind, message } => {
                Err(OfflineError::from_worker(kind, message, None))
            }
            other => Err(unexpected("UnloadModel", &other)),
        }
    }

    /// Purge one model's cached artifacts.
    pub async fn delete_cache(
        &self,
        model_id: &str,
        descriptor: Option<ModelDescriptor>,
    ) -> Result<(), OfflineError> {
        let command = WorkerCommand::DeleteCache {
            model_id: model_id.to_string(),
            descriptor,
        };
        match self.core.send_and_wait(command, None).await? {
            WorkerPayload::CacheDeleted { .. } => Ok(()),
            WorkerPayload::Error { kind, message } => Err(match kind {
                ErrorKind::UnknownOperation => OfflineError::UnknownOperation(message),
                _ => OfflineError::DeleteFailure {
                    model_id: model_id.to_string(),
                    message,
                },
            }),
            other => Err(unexpected("DeleteCache", &other)),
        }
    }

    /// Purge every listed model. Returns per-model failure descriptions.
    pub async fn clear_all_cache(
        &self,
        descriptors: Vec<ModelDescriptor>,
    ) -> Result<Vec<String>, OfflineError> {
        let command = WorkerCommand::ClearAllCache { descriptors };
        match self.core.send_and_wait(command, None).await? {
            WorkerPayload::CacheCleared { failures } => Ok(failures),
            WorkerPayload::Error { kind, message } => {
                Err(OfflineError::from_worker(kind, message, None))
            }
            other => Err(unexpected("ClearAllCache", &other)),
        }
    }

    /// Start a generation. Rejected with `GenerationBusy` while another
    /// generation started through this bridge has not resolved.
    pub async fn start_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationStream, OfflineError> {
        let id = self.core.next_id();
        let (chunk_tx, chunks) = mpsc::unbounded_channel::<String>();

        {
            let mut active = self.core.shared.active_generation.lock().await;
            if active.is_some() {
                return Err(OfflineError::GenerationBusy);
            }
            *active = Some(ActiveGeneration {
                request_id: id,
                chunk_tx,
            });
        }

        let done = match self.core.register(id).await {
            Ok(done) => done,
            Err(e) => {
                *self.core.shared.active_generation.lock().await = None;
                return Err(e);
            }
        };

        let command = WorkerCommand::Generate {
            prompt: request.prompt.clone(),
            options: request.options,
        };
        if let Err(e) = self.core.send_line(id, command) {
            self.core.forget(id).await;
            *self.core.shared.active_generation.lock().await = None;
            return Err(e);
        }

        Ok(GenerationStream { id, chunks, done })
    }

    /// Ask the worker to stop generation `generation_id` (fire-and-forget).
    pub fn abort(&self, generation_id: u64) {
        self.core
            .send_fire_and_forget(WorkerCommand::Abort { generation_id });
    }

    /// Keep-alive message; counts as activity like any other message.
    pub fn reset_timer(&self) {
        self.core.send_fire_and_forget(WorkerCommand::ResetTimer);
    }

    /// Send a raw line to the worker and wait for the response with `id`.
    /// Skips the activity observer.
    #[cfg(test)]
    pub(crate) async fn send_raw(&self, id: u64, line: String) -> Result<WorkerPayload, OfflineError> {
        let rx = self.core.register(id).await?;
        if self.core.cmd_tx.send(line).is_err() {
            self.core.forget(id).await;
            return Err(OfflineError::WorkerUnavailable(
                "worker command channel closed".into(),
            ));
        }
        rx.await
            .map_err(|_| OfflineError::WorkerUnavailable("worker exited before responding".into()))
    }
}

pub(crate) fn unexpected<P: std::fmt::Debug>(request: &str, payload: &P) -> OfflineError {
    OfflineError::WorkerUnavailable(format!("unexpected response to {request}: {payload:?}"))
}
