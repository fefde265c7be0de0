//! Worker process lifecycle management.
//!
//! Spawns a worker as a child process (normally the same binary with its
//! hidden `worker` subcommand) and kills it when dropped.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::ipc_types::WorkerResponse;
use super::transport::WorkerLink;

/// Manages the worker child process lifecycle.
pub struct ProcessManager {
    child: Mutex<Option<Child>>,
}

impl ProcessManager {
    /// Spawn the current executable with `args`.
    pub fn spawn<P>(args: &[&str]) -> Result<WorkerLink<P>, String>
    where
        P: DeserializeOwned + Send + 'static,
    {
        let exe =
            std::env::current_exe().map_err(|e| format!("Cannot find own executable: {e}"))?;
        Self::spawn_program(&exe.to_string_lossy(), args)
    }

    /// Spawn `program` with `args` and connect a [`WorkerLink`] to its pipes.
    pub fn spawn_program<P>(program: &str, args: &[&str]) -> Result<WorkerLink<P>, String>
    where
        P: DeserializeOwned + Send + 'static,
    {
        log::info!("[PROCESS_MGR] Spawning worker: {program} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Worker logs go to parent's stderr
            .spawn()
            .map_err(|e| format!("Failed to spawn worker: {e}"))?;

        let stdin = child.stdin.take().ok_or("Worker stdin not available")?;
        let stdout = child.stdout.take().ok_or("Worker stdout not available")?;

        let manager = Arc::new(Self {
            child: Mutex::new(Some(child)),
        });

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<String>();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<WorkerResponse<P>>();

        thread::spawn(move || stdin_writer(cmd_rx, stdin));
        thread::spawn(move || stdout_reader(stdout, evt_tx));

        Ok(WorkerLink {
            commands: cmd_tx,
            events: evt_rx,
            process: Some(manager),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().map(|c| matches!(c.try_wait(), Ok(None))))
            .unwrap_or(false)
    }

    /// Kill the worker process immediately. OS reclaims all memory.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(ref mut child) = *guard {
                log::info!("[PROCESS_MGR] Killing worker process (pid={})", child.id());
                let _ = child.kill();
                let _ = child.wait(); // Reap
            }
            *guard = None;
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Writes command lines to the worker's stdin until the sender side closes.
fn stdin_writer(commands: crossbeam_channel::Receiver<String>, mut stdin: ChildStdin) {
    for json_line in commands.iter() {
        if writeln!(stdin, "{json_line}").is_err() || stdin.flush().is_err() {
            log::warn!("[PROCESS_MGR] Failed to write to worker stdin");
            break;
        }
    }
    log::debug!("[PROCESS_MGR] Stdin writer exiting");
}

/// Reads response lines from the worker's stdout and forwards parsed responses.
fn stdout_reader<P: DeserializeOwned>(
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<WorkerResponse<P>>,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(l) if !l.trim().is_empty() => l,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("[PROCESS_MGR] Worker stdout read error: {e}");
                break;
            }
        };
        match serde_json::from_str::<WorkerResponse<P>>(&line) {
            Ok(response) => {
                if events.send(response).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("[PROCESS_MGR] Failed to parse worker response: {e}"),
        }
    }
    log::debug!("[PROCESS_MGR] Stdout reader exiting");
}
