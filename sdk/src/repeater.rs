//! Repeating task: prepare once, then sleep and run until cancelled
//!
//! Lifecycle:
//!
//! ```text
//! Created -> Preparing -> Cancelled
//!                      -> Running -> ShuttingDown -> Stopped
//! ```
//!
//! A task that cannot start (bad configuration) returns [`RepeaterCancelled`]
//! from `prepare()` and the repeater ends quietly without ever calling `run()`.
//! Errors from `run()` are logged and the loop carries on with the next sleep.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`Repeater`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeaterState {
    Created,
    Preparing,
    Cancelled,
    Running,
    ShuttingDown,
    Stopped,
}

/// Marker error: stop the repeater without complaint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeaterCancelled;

impl fmt::Display for RepeaterCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repeater cancelled")
    }
}

impl std::error::Error for RepeaterCancelled {}

fn is_cancelled(error: &anyhow::Error) -> bool {
    error.downcast_ref::<RepeaterCancelled>().is_some()
}

/// Work done by a [`Repeater`]
#[async_trait]
pub trait RepeaterTask: Send + 'static {
    /// Called once before the loop starts
    async fn prepare(&mut self) -> Result<()>;

    /// Time to sleep before each `run()` - read after `prepare()` succeeds
    fn interval(&self) -> Duration;

    /// One iteration
    async fn run(&mut self) -> Result<()>;
}

/// Drives a [`RepeaterTask`] on its own tokio task
pub struct Repeater {
    name: String,
    state: Arc<watch::Sender<RepeaterState>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Repeater {
    /// Create, stopping whenever `parent` is cancelled
    pub fn new(name: &str, parent: &CancellationToken) -> Self {
        let (state, _) = watch::channel(RepeaterState::Created);
        Self {
            name: name.to_string(),
            state: Arc::new(state),
            cancel: parent.child_token(),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RepeaterState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RepeaterState> {
        self.state.subscribe()
    }

    /// Spawn the loop
    pub async fn start<T: RepeaterTask>(&self, task: T) {
        let name = self.name.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(repeat(name, task, state, cancel));
        *self.handle.lock().await = Some(handle);
    }

    /// Cancel and wait for the loop to end. The current iteration, if any,
    /// is allowed to complete.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("{} ended abnormally: {e}", self.name);
            }
        }
    }
}

impl fmt::Debug for Repeater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repeater")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

async fn repeat<T: RepeaterTask>(
    name: String,
    mut task: T,
    state: Arc<watch::Sender<RepeaterState>>,
    cancel: CancellationToken,
) {
    state.send_replace(RepeaterState::Preparing);

    if let Err(e) = task.prepare().await {
        if is_cancelled(&e) {
            info!("{name} cancelled during prepare");
        } else {
            error!("{name} failed to prepare: {e}");
        }
        state.send_replace(RepeaterState::Cancelled);
        return;
    }

    let interval = task.interval();
    info!("{name} running every {interval:?}");
    state.send_replace(RepeaterState::Running);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = task.run().await {
            if is_cancelled(&e) {
                info!("{name} cancelled itself");
                break;
            }
            warn!("{name} iteration failed: {e}");
        }
    }

    state.send_replace(RepeaterState::ShuttingDown);
    debug!("{name} shutting down");
    state.send_replace(RepeaterState::Stopped);
}

/// Convert a configured interval to a Duration, cancelling if it can't run
pub fn checked_interval(seconds: f64) -> Result<Duration> {
    if !(seconds > 0.0) {
        return Err(RepeaterCancelled.into());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| RepeaterCancelled.into())
}
