//! C2 — the operation scheduler: a keyed concurrent map guaranteeing
//! at-most-one in-flight operation per key, with exponential backoff on
//! failure (spec §4.2). This collapses the event stream (resyncs, duplicate
//! watch deliveries) into at-most-one in-flight attempt per target while
//! allowing unlimited parallelism across distinct targets — the same
//! rationale the Go `goroutinemap` this design is modeled on exists for.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(15 * 60);

/// Outcome of a [`Scheduler::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The operation was started.
    Started,
    /// An operation for this key is already running; this call was a no-op.
    AlreadyRunning,
    /// The key is within its backoff window following a prior failure; this
    /// call was a no-op.
    BackingOff,
}

struct KeyState {
    running: bool,
    next_backoff: Duration,
    backoff_until: Option<Instant>,
}

impl KeyState {
    fn fresh() -> Self {
        KeyState {
            running: false,
            next_backoff: INITIAL_BACKOFF,
            backoff_until: None,
        }
    }
}

/// The keyed operation scheduler (C2).
///
/// `backoff_cap` corresponds to the `fail-retry-threshold` configuration
/// knob (§6); it defaults to the spec's 15 minute cap.
pub struct Scheduler {
    state: Arc<Mutex<HashMap<String, KeyState>>>,
    backoff_cap: Duration,
    exponential_backoff_enabled: bool,
    idle: Arc<tokio::sync::Notify>,
}

impl Scheduler {
    pub fn new(backoff_cap: Duration, exponential_backoff_enabled: bool) -> Self {
        Scheduler {
            state: Arc::new(Mutex::new(HashMap::new())),
            backoff_cap,
            exponential_backoff_enabled,
            idle: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Starts `op` under `key` unless an operation for `key` is already
    /// running or `key` is within its backoff window. The closure runs on a
    /// freshly spawned task; its result updates the key's backoff state.
    pub async fn run<F, Fut>(&self, key: impl Into<String>, op: F) -> RunOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let key = key.into();
        let now = Instant::now();

        {
            let mut state = self.state.lock().await;
            let entry = state.entry(key.clone()).or_insert_with(KeyState::fresh);

            if entry.running {
                return RunOutcome::AlreadyRunning;
            }

            if let Some(until) = entry.backoff_until {
                if now < until {
                    debug!(key = %key, "operation backing off");
                    return RunOutcome::BackingOff;
                }
            }

            entry.running = true;
        }

        let state = Arc::clone(&self.state);
        let backoff_cap = self.backoff_cap;
        let exponential_backoff_enabled = self.exponential_backoff_enabled;
        let idle = Arc::clone(&self.idle);
        let task_key = key.clone();

        tokio::spawn(async move {
            let result = op().await;

            let mut state = state.lock().await;
            if let Some(entry) = state.get_mut(&task_key) {
                entry.running = false;
                match result {
                    Ok(()) => {
                        entry.next_backoff = INITIAL_BACKOFF;
                        entry.backoff_until = None;
                    }
                    Err(ref message) => {
                        warn!(key = %task_key, error = %message, "operation failed, scheduling backoff");
                        if exponential_backoff_enabled {
                            entry.backoff_until = Some(Instant::now() + entry.next_backoff);
                            entry.next_backoff =
                                (entry.next_backoff * BACKOFF_MULTIPLIER).min(backoff_cap);
                        } else {
                            entry.backoff_until = None;
                        }
                    }
                }
            }

            if state.values().all(|entry| !entry.running) {
                idle.notify_waiters();
            }
        });

        RunOutcome::Started
    }

    /// Clears backoff state for `key`, e.g. after detecting the claim/class
    /// was fixed and a retry should not wait out the remaining window.
    pub async fn reset(&self, key: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.get_mut(key) {
            entry.next_backoff = INITIAL_BACKOFF;
            entry.backoff_until = None;
        }
    }

    /// Blocks until no operations remain running. Used by tests and by
    /// graceful shutdown to drain in-flight work (spec §5, "Cancellation").
    pub async fn wait(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.values().all(|entry| !entry.running) {
                    return;
                }
            }
            self.idle.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_running(&self, key: &str) -> bool {
        self.state
            .lock()
            .await
            .get(key)
            .map(|entry| entry.running)
            .unwrap_or(false)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(DEFAULT_BACKOFF_CAP, true)
    }
}
