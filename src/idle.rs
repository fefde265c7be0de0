//! Idle timeout supervision for the loaded engine.
//!
//! The supervisor only knows about a deadline. Where activity comes from
//! (boundary traffic, user input) is up to whoever calls [`IdleSupervisor::activity`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes
pub const ACTIVITY_THROTTLE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct IdleTimer {
    deadline: Instant,
    active: bool,
}

struct SupervisorState {
    timeout: Duration,
    timer: Mutex<IdleTimer>,
    rearm: Notify,
}

impl SupervisorState {
    fn timer(&self) -> MutexGuard<'_, IdleTimer> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle to the idle timer. The background task stops once every
/// clone has been dropped.
#[derive(Clone)]
pub struct IdleSupervisor {
    state: Arc<SupervisorState>,
    _shutdown: Arc<DropGuard>,
}

impl IdleSupervisor {
    /// Spawn the timer task. The receiver yields once per idle firing.
    /// Must be called inside a tokio runtime.
    pub fn spawn(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<()>) {
        let state = Arc::new(SupervisorState {
            timeout,
            timer: Mutex::new(IdleTimer {
                deadline: Instant::now() + timeout,
                active: false,
            }),
            rearm: Notify::new(),
        });
        let shutdown = CancellationToken::new();
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();

        tokio::spawn(timer_task(state.clone(), shutdown.clone(), idle_tx));

        (
            Self {
                state,
                _shutdown: Arc::new(shutdown.drop_guard()),
            },
            idle_rx,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    /// Arm the timer (an engine was loaded).
    pub fn start(&self) {
        {
            let mut timer = self.state.timer();
            timer.active = true;
            timer.deadline = Instant::now() + self.state.timeout;
        }
        log::debug!("[IDLE] Timer started ({:?})", self.state.timeout);
        self.state.rearm.notify_one();
    }

    /// Disarm the timer (the engine was unloaded).
    pub fn stop(&self) {
        self.state.timer().active = false;
        log::debug!("[IDLE] Timer stopped");
        self.state.rearm.notify_one();
    }

    /// Push the deadline out. Ignored while no engine is loaded.
    pub fn activity(&self) {
        {
            let mut timer = self.state.timer();
            if !timer.active {
                return;
            }
            timer.deadline = Instant::now() + self.state.timeout;
        }
        self.state.rearm.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.state.timer().active
    }
}

async fn timer_task(
    state: Arc<SupervisorState>,
    shutdown: CancellationToken,
    idle_tx: mpsc::UnboundedSender<()>,
) {
    loop {
        let IdleTimer { deadline, active } = *state.timer();

        if !active {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = state.rearm.notified() => continue,
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = state.rearm.notified() => {}
            _ = tokio::time::sleep_until(deadline) => {
                let fired = {
                    let mut timer = state.timer();
                    // Re-check under the lock: activity may have raced the sleep.
                    if timer.active && Instant::now() >= timer.deadline {
                        timer.active = false;
                        true
                    } else {
                        false
                    }
                };
                if fired {
                    log::info!("[IDLE] No activity for {:?}, requesting unload", state.timeout);
                    if idle_tx.send(()).is_err() {
                        break;
                    }
                }
            }
        }
    }
    log::debug!("[IDLE] Timer task exiting");
}

/// Collapses bursts of activity signals into at most one forwarded
/// [`IdleSupervisor::activity`] per interval, sent on the trailing edge.
#[derive(Clone)]
pub struct ActivityThrottle {
    supervisor: IdleSupervisor,
    interval: Duration,
    scheduled: Arc<AtomicBool>,
}

impl ActivityThrottle {
    pub fn new(supervisor: IdleSupervisor, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
            scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record an activity signal. Must be called inside a tokio runtime.
    pub fn signal(&self) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let supervisor = self.supervisor.clone();
        let scheduled = self.scheduled.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            scheduled.store(false, Ordering::SeqCst);
            supervisor.activity();
        });
    }
}
