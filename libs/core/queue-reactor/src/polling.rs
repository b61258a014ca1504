//! Idle back-off execution loop.
//!
//! [`PollingEngine`] repeatedly runs a [`UnitOfWork`]. A unit that reports
//! work done is followed immediately by the next one so a backlog drains
//! without delay; a unit that reports no work is followed by a wait of the
//! configured interval. Cancelling interrupts the wait but never the unit in
//! flight.
//!
//! Errors and panics raised by the unit of work are logged and the loop
//! carries on.

use crate::error::{MessagingError, ProcessingError};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// One iteration of a polling loop.
///
/// Returns `true` when useful work was done.
#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    async fn execute(&self) -> Result<bool, MessagingError>;
}

#[async_trait]
impl<F, Fut> UnitOfWork for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, MessagingError>> + Send + 'static,
{
    async fn execute(&self) -> Result<bool, MessagingError> {
        (self)().await
    }
}

/// Cloneable stop signal for a [`PollingEngine`].
///
/// The unit of work may hold one to stop its own loop; the loop then exits
/// once the current unit returns.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request the loop to stop.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn reset(&self) -> watch::Receiver<bool> {
        self.tx.send_replace(false);
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Background loop with idle back-off.
pub struct PollingEngine {
    name: String,
    interval: Duration,
    work: Arc<dyn UnitOfWork>,
    cancel: CancelHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingEngine {
    /// Create an engine; nothing runs until [`start`](Self::start).
    pub fn new(name: impl Into<String>, interval: Duration, work: impl UnitOfWork) -> Self {
        Self::with_cancel_handle(name, interval, work, CancelHandle::new())
    }

    /// Create an engine controlled by an existing cancel handle.
    pub fn with_cancel_handle(
        name: impl Into<String>,
        interval: Duration,
        work: impl UnitOfWork,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            work: Arc::new(work),
            cancel,
            task: Mutex::new(None),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop. Returns false when it is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(engine = %self.name, "Polling engine already running");
            return false;
        }

        let cancel = self.cancel.reset();
        let name = self.name.clone();
        let work = Arc::clone(&self.work);
        let interval = self.interval;

        info!(engine = %name, interval_ms = interval.as_millis() as u64, "Starting polling engine");
        *task = Some(tokio::spawn(run_loop(name, interval, work, cancel)));
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the loop to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            return;
        };

        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(engine = %self.name, error = %e, "Polling loop terminated abnormally"),
        }
        info!(engine = %self.name, "Polling engine stopped");
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    work: Arc<dyn UnitOfWork>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }

        let did_work = match AssertUnwindSafe(work.execute()).catch_unwind().await {
            Ok(Ok(did_work)) => did_work,
            Ok(Err(e)) => {
                error!(engine = %name, error = %e, "Unit of work failed");
                false
            }
            Err(panic) => {
                let e = ProcessingError::from_panic(panic);
                error!(engine = %name, error = %e, "Unit of work panicked");
                false
            }
        };

        if *cancel.borrow() {
            break;
        }

        if did_work {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(engine = %name, "Polling loop exited");
}
