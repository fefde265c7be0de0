//! Engine worker loop.
//!
//! Owns the inference engine and at most one loaded instance. Reads JSON
//! command lines from a channel and emits responses on another, so the same
//! loop runs on a dedicated thread or inside a child process.
//!
//! Thread design:
//! - Command thread (this loop): selects between incoming commands and
//!   finished generations
//! - Generation thread (temporary): owns the engine handle while a
//!   generation runs, sends chunks directly, then hands the handle back

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender};
use offline_engine::{EngineInstance, InferenceEngine};
use offline_types::{ErrorKind, GenerationOutput, GenerationRequest, ModelDescriptor};

use super::ipc_types::*;

/// Lifecycle of the engine inside one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unloaded,
    Loading,
    Ready,
    Generating,
    Unloading,
}

/// Exclusive ownership of the loaded engine instance.
struct EngineHandle {
    model_id: String,
    instance: Box<dyn EngineInstance>,
}

struct RunningGeneration {
    request_id: u64,
    cancel: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Sent by the generation thread when it is done with the handle.
struct GenerationDone {
    request_id: u64,
    /// `None` when the generation panicked and the instance was discarded.
    handle: Option<EngineHandle>,
    result: Result<GenerationOutput, String>,
}

struct EngineWorker<E> {
    engine: E,
    state: WorkerState,
    handle: Option<EngineHandle>,
    generation: Option<RunningGeneration>,
    events: Sender<EngineResponse>,
    done_tx: Sender<GenerationDone>,
    done_rx: Receiver<GenerationDone>,
}

/// Run the engine worker until the command channel closes.
pub fn run_engine_worker<E: InferenceEngine>(
    engine: E,
    commands: Receiver<String>,
    events: Sender<EngineResponse>,
) {
    log::info!("[WORKER] Engine worker ready, waiting for commands...");

    let (done_tx, done_rx) = crossbeam_channel::unbounded::<GenerationDone>();
    let mut worker = EngineWorker {
        engine,
        state: WorkerState::Unloaded,
        handle: None,
        generation: None,
        events,
        done_tx,
        done_rx: done_rx.clone(),
    };

    loop {
        select! {
            recv(commands) -> line => match line {
                Ok(line) => worker.handle_line(&line),
                Err(_) => {
                    log::info!("[WORKER] Command channel disconnected, shutting down");
                    break;
                }
            },
            recv(done_rx) -> done => {
                if let Ok(done) = done {
                    worker.finish_generation(done);
                }
            }
        }
    }

    worker.interrupt_generation();
    worker.release_engine();
    log::info!("[WORKER] Exiting");
}

impl<E: InferenceEngine> EngineWorker<E> {
    fn send(&self, response: EngineResponse) {
        if self.events.send(response).is_err() {
            log::warn!("[WORKER] Event channel closed, dropping response");
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if self.state != state {
            log::debug!("[WORKER] {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn handle_line(&mut self, line: &str) {
        let request: EngineRequest = match parse_request(line) {
            Ok(request) => request,
            Err((id, message)) => {
                log::warn!("[WORKER] {message}");
                self.send(EngineResponse::error(id, ErrorKind::UnknownOperation, message));
                return;
            }
        };

        let id = request.id;
        match request.command {
            WorkerCommand::LoadModel { model_id } => {
                self.load(id, ModelDescriptor::prebuilt(model_id));
            }
            WorkerCommand::LoadCustomModel {
                model_id,
                weights_location,
                runtime_library_location,
            } => {
                self.load(
                    id,
                    ModelDescriptor::custom(model_id, weights_location, runtime_library_location),
                );
            }
            WorkerCommand::UnloadModel => {
                self.interrupt_generation();
                self.release_engine();
                self.send(EngineResponse::ok(id, WorkerPayload::Unloaded));
            }
            WorkerCommand::Generate { prompt, options } => {
                self.generate(id, GenerationRequest::new(prompt, options));
            }
            WorkerCommand::Abort { generation_id } => match self.generation {
                Some(ref running) if running.request_id == generation_id => {
                    running.cancel.store(true, Ordering::SeqCst);
                    log::info!("[WORKER] Cancellation flag set for generation {generation_id}");
                }
                _ => log::debug!("[WORKER] Abort for inactive generation {generation_id} ignored"),
            },
            WorkerCommand::DeleteCache {
                model_id,
                descriptor,
            } => {
                self.interrupt_generation();
                if self.handle.as_ref().is_some_and(|h| h.model_id == model_id) {
                    self.release_engine();
                }
                let descriptor =
                    descriptor.unwrap_or_else(|| ModelDescriptor::prebuilt(model_id.clone()));
                match self.engine.purge(&descriptor) {
                    Ok(()) => {
                        log::info!("[WORKER] Cache deleted for {model_id}");
                        self.send(EngineResponse::ok(id, WorkerPayload::CacheDeleted { model_id }));
                    }
                    Err(e) => {
                        log::warn!("[WORKER] Failed to delete cache for {model_id}: {e}");
                        self.send(EngineResponse::error(id, ErrorKind::Delete, e));
                    }
                }
            }
            WorkerCommand::ClearAllCache { descriptors } => {
                self.interrupt_generation();
                self.release_engine();
                let mut failures = Vec::new();
                for descriptor in &descriptors {
                    if let Err(e) = self.engine.purge(descriptor) {
                        log::warn!("[WORKER] Failed to purge {}: {e}", descriptor.id);
                        failures.push(format!("{}: {e}", descriptor.id));
                    }
                }
                log::info!(
                    "[WORKER] Cleared cache for {} models ({} failures)",
                    descriptors.len(),
                    failures.len()
                );
                self.send(EngineResponse::ok(id, WorkerPayload::CacheCleared { failures }));
            }
            WorkerCommand::ResetTimer => {}
        }
    }

    fn load(&mut self, id: u64, descriptor: ModelDescriptor) {
        self.interrupt_generation();

        if self
            .handle
            .as_ref()
            .is_some_and(|h| h.model_id == descriptor.id)
        {
            log::info!("[WORKER] Model {} already loaded", descriptor.id);
            self.send(EngineResponse::ok(
                id,
                WorkerPayload::Loaded {
                    model_id: descriptor.id,
                },
            ));
            return;
        }

        // Never two instances at once: the old one is gone before loading starts.
        self.release_engine();

        log::info!("[WORKER] Loading model: {}", descriptor.id);
        self.set_state(WorkerState::Loading);
        let events = self.events.clone();
        let result = self.engine.load(&descriptor, &mut |report| {
            let _ = events.send(EngineResponse::ok(id, WorkerPayload::Progress { report }));
        });

        match result {
            Ok(instance) => {
                log::info!("[WORKER] Model {} loaded successfully", descriptor.id);
                self.handle = Some(EngineHandle {
                    model_id: descriptor.id.clone(),
                    instance,
                });
                self.set_state(WorkerState::Ready);
                self.send(EngineResponse::ok(
                    id,
                    WorkerPayload::Loaded {
                        model_id: descriptor.id,
                    },
                ));
            }
            Err(e) => {
                log::error!("[WORKER] Model load failed: {e}");
                self.set_state(WorkerState::Unloaded);
                self.send(EngineResponse::error(id, ErrorKind::Load, e));
            }
        }
    }

    /// Drop the loaded instance, if any.
    fn release_engine(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.set_state(WorkerState::Unloading);
            log::info!("[WORKER] Unloading model {}", handle.model_id);
            drop(handle);
        }
        self.set_state(WorkerState::Unloaded);
    }

    fn generate(&mut self, id: u64, request: GenerationRequest) {
        if self.generation.is_some() {
            self.send(EngineResponse::error(
                id,
                ErrorKind::Busy,
                "Generation already in progress",
            ));
            return;
        }
        let Some(mut handle) = self.handle.take() else {
            self.send(EngineResponse::error(
                id,
                ErrorKind::NotLoaded,
                "Engine not initialized",
            ));
            return;
        };

        log::info!(
            "[WORKER] Starting generation {id} on {} (prompt_len={})",
            handle.model_id,
            request.prompt.len()
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let events = self.events.clone();
        let done_tx = self.done_tx.clone();

        let thread = thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handle.instance.generate(&request, &flag, &mut |text| {
                    let _ = events.send(EngineResponse::ok(
                        id,
                        WorkerPayload::Chunk {
                            text: text.to_string(),
                        },
                    ));
                })
            }));

            let done = match result {
                Ok(result) => GenerationDone {
                    request_id: id,
                    handle: Some(handle),
                    result,
                },
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic in generation thread".to_string()
                    };
                    log::error!("[WORKER] Generation thread panicked: {msg}");
                    GenerationDone {
                        request_id: id,
                        handle: None,
                        result: Err(format!("Generation panicked: {msg}")),
                    }
                }
            };
            let _ = done_tx.send(done);
        });

        self.generation = Some(RunningGeneration {
            request_id: id,
            cancel,
            thread,
        });
        self.set_state(WorkerState::Generating);
    }

    /// Reinstall the handle, then report the outcome. The order matters: a
    /// `Generate` sent in reaction to `Complete` must find the engine Ready.
    fn finish_generation(&mut self, done: GenerationDone) {
        if let Some(running) = self.generation.take() {
            let _ = running.thread.join();
        }

        self.handle = done.handle;
        self.set_state(if self.handle.is_some() {
            WorkerState::Ready
        } else {
            WorkerState::Unloaded
        });

        let payload = match done.result {
            Ok(output) => {
                log::info!(
                    "[WORKER] Generation {} finished (cancelled={}, len={})",
                    done.request_id,
                    output.cancelled,
                    output.text.len()
                );
                WorkerPayload::Complete {
                    text: output.text,
                    cancelled: output.cancelled,
                }
            }
            Err(message) => {
                log::error!("[WORKER] Generation error: {message}");
                WorkerPayload::Error {
                    kind: ErrorKind::Generation,
                    message,
                }
            }
        };
        self.send(EngineResponse::ok(done.request_id, payload));
    }

    /// Cancel a running generation and wait for its handle to come back.
    fn interrupt_generation(&mut self) {
        let Some(ref running) = self.generation else {
            return;
        };
        log::info!(
            "[WORKER] Interrupting generation {} before lifecycle change",
            running.request_id
        );
        running.cancel.store(true, Ordering::SeqCst);
        match self.done_rx.recv() {
            Ok(done) => self.finish_generation(done),
            Err(_) => self.generation = None,
        }
    }
}
