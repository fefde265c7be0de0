//! Engine and transcription worker boundaries.
//!
//! Each boundary hosts at most one engine (or speech pipeline) and is reached
//! only through JSON Lines messages carrying correlation ids.

pub mod ipc_types;
pub mod process_manager;
pub mod transcription_bridge;
pub mod transcription_worker;
pub mod transport;
pub mod worker_bridge;
pub mod worker_main;

pub use process_manager::ProcessManager;
pub use transcription_bridge::TranscriptionBridge;
pub use transport::{
    serve_engine_stdio, serve_transcription_stdio, spawn_thread_transcriber, spawn_thread_worker,
    WorkerLink,
};
pub use worker_bridge::{ActivityObserver, GenerationStream, SharedWorkerBridge, WorkerBridge};
