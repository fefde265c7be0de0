//! Transports connecting a bridge to a worker loop.
//!
//! A [`WorkerLink`] is the controller's end: JSON command lines go in,
//! parsed responses come out. The worker may run on a thread of this process
//! or in a child process; the bridge cannot tell the difference.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use offline_engine::{InferenceEngine, Transcriber};
use serde::Serialize;
use tokio::sync::mpsc;

use super::ipc_types::*;
use super::process_manager::ProcessManager;
use super::transcription_worker::run_transcription_worker;
use super::worker_main::run_engine_worker;

/// Controller-side end of a worker connection.
pub struct WorkerLink<P> {
    /// Serialized requests, one per line (no trailing newline).
    pub commands: Sender<String>,
    pub events: mpsc::UnboundedReceiver<WorkerResponse<P>>,
    /// Keeps a child-process worker alive for as long as the link is used.
    pub process: Option<Arc<ProcessManager>>,
}

/// Run an engine worker on a dedicated thread.
pub fn spawn_thread_worker<E: InferenceEngine>(engine: E) -> WorkerLink<WorkerPayload> {
    spawn_thread("engine-worker", move |commands, events| {
        run_engine_worker(engine, commands, events)
    })
}

/// Run a transcription worker on a dedicated thread.
pub fn spawn_thread_transcriber<T: Transcriber>(
    transcriber: T,
) -> WorkerLink<TranscriptionPayload> {
    spawn_thread("asr-worker", move |commands, events| {
        run_transcription_worker(transcriber, commands, events)
    })
}

fn spawn_thread<P, F>(name: &str, run: F) -> WorkerLink<P>
where
    P: Send + 'static,
    F: FnOnce(Receiver<String>, Sender<WorkerResponse<P>>) + Send + 'static,
{
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<String>();
    let (evt_tx, evt_rx) = crossbeam_channel::unbounded::<WorkerResponse<P>>();
    let (async_tx, async_rx) = mpsc::unbounded_channel();

    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run(cmd_rx, evt_tx));
    if let Err(e) = spawned {
        // The event side closes immediately; the bridge reports the worker unavailable.
        log::error!("[WORKER] Failed to spawn {name} thread: {e}");
    }

    // Forward events from the blocking worker side into the async runtime.
    let forward_name = format!("{name}-events");
    let forwarded = thread::Builder::new().name(forward_name).spawn(move || {
        for response in evt_rx.iter() {
            if async_tx.send(response).is_err() {
                break;
            }
        }
    });
    if let Err(e) = forwarded {
        log::error!("[WORKER] Failed to spawn event forwarder: {e}");
    }

    WorkerLink {
        commands: cmd_tx,
        events: async_rx,
        process: None,
    }
}

/// Child-process entry for the engine worker: commands on stdin, responses
/// on stdout. Returns when stdin closes.
pub fn serve_engine_stdio<E: InferenceEngine>(engine: E) {
    serve_stdio(move |commands, events| run_engine_worker(engine, commands, events));
}

/// Child-process entry for the transcription worker.
pub fn serve_transcription_stdio<T: Transcriber>(transcriber: T) {
    serve_stdio(move |commands, events| run_transcription_worker(transcriber, commands, events));
}

fn serve_stdio<P, F>(run: F)
where
    P: Serialize + Send + 'static,
    F: FnOnce(Receiver<String>, Sender<WorkerResponse<P>>),
{
    log::info!("[WORKER] Serving on stdio (pid={})", std::process::id());

    let (stdin_tx, stdin_rx) = crossbeam_channel::unbounded::<String>();
    let (stdout_tx, stdout_rx) = crossbeam_channel::unbounded::<WorkerResponse<P>>();

    // Stdin reader
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) if !l.trim().is_empty() => {
                    if stdin_tx.send(l).is_err() {
                        break; // Worker loop exited
                    }
                }
                Ok(_) => {}
                Err(_) => break, // stdin closed (parent died)
            }
        }
        log::info!("[WORKER] Stdin reader thread exiting");
    });

    // Stdout writer
    let writer = thread::spawn(move || {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        for response in stdout_rx.iter() {
            if !write_response(&mut stdout, &response) {
                break;
            }
        }
    });

    run(stdin_rx, stdout_tx);
    let _ = writer.join();
}

/// Write a JSON response line, flushing immediately. Returns false once the
/// pipe is gone.
pub(crate) fn write_response<W: Write, T: Serialize>(out: &mut W, response: &T) -> bool {
    match serde_json::to_string(response) {
        Ok(json) => writeln!(out, "{json}").is_ok() && out.flush().is_ok(),
        Err(e) => {
            log::error!("[WORKER] Failed to serialize response: {e}");
            true
        }
    }
}
