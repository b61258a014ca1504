//! Reactor supervision.
//!
//! [`ReactorHost`] runs one supervisor task per registered queue. A
//! supervisor builds the reactor, starts it and waits for either a
//! [`ReactorEvent::NeedReconnect`] or shutdown. On a reconnect request, or
//! when the reactor cannot start, it stops the reactor, waits the queue's
//! polling interval and builds a fresh adapter and reactor for the same
//! queue id. This repeats for as long as the host runs.

use crate::config::QueueSettings;
use crate::error::MessagingError;
use crate::factory::ReactorFactory;
use crate::reactor::{QueueHealth, Reactor, ReactorEvent};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Aggregated health of every supervised queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Every critical, health-checked queue is running and connected
    pub healthy: bool,
    pub queues: Vec<QueueHealth>,
}

/// One supervised queue.
///
/// Error counts survive rebuilds: a retired reactor's count, and every
/// failed attempt to build one, is folded into `retired_errors`.
struct QueueSlot {
    settings: QueueSettings,
    reactor: RwLock<Option<Arc<dyn Reactor>>>,
    retired_errors: AtomicU64,
}

impl QueueSlot {
    fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            reactor: RwLock::new(None),
            retired_errors: AtomicU64::new(0),
        }
    }

    fn current(&self) -> Option<Arc<dyn Reactor>> {
        self.reactor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, reactor: Arc<dyn Reactor>) {
        let retired = self
            .reactor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(reactor);
        if let Some(retired) = retired {
            self.retired_errors
                .fetch_add(retired.error_count(), Ordering::SeqCst);
        }
    }

    /// Count a reactor that could not be built.
    fn record_build_failure(&self) {
        self.retired_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn health(&self) -> QueueHealth {
        let retired = self.retired_errors.load(Ordering::SeqCst);
        match self.current() {
            Some(reactor) => {
                let mut health = reactor.health();
                health.error_count += retired;
                health
            }
            None => QueueHealth {
                queue_id: self.settings.id.clone(),
                processing_type: self.settings.processing_type,
                running: false,
                connected: false,
                error_count: retired,
                critical: self.settings.health_check.critical,
            },
        }
    }
}

/// Owns and supervises every reactor of the process.
pub struct ReactorHost {
    factory: Arc<ReactorFactory>,
    slots: Mutex<Vec<Arc<QueueSlot>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ReactorHost {
    pub fn new(factory: ReactorFactory) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            factory: Arc::new(factory),
            slots: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn factory(&self) -> &ReactorFactory {
        &self.factory
    }

    /// Build and start a reactor for every registered queue.
    ///
    /// Configuration errors abort the start before anything runs. Adapter
    /// failures do not; the affected queue is retried by its supervisor.
    pub async fn start(&self) -> Result<(), MessagingError> {
        if !self.slots.lock().unwrap_or_else(PoisonError::into_inner).is_empty() {
            debug!("Reactor host already started");
            return Ok(());
        }

        let mut initial = Vec::new();
        for queue_id in self.factory.queue_ids() {
            let settings = self.factory.settings(queue_id)?.clone();
            let reactor = match self.factory.create_queue_reactor(queue_id) {
                Ok(reactor) => Some(reactor),
                Err(MessagingError::Config(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(queue_id, error = %e, "Failed to create reactor, will retry");
                    None
                }
            };
            initial.push((settings, reactor));
        }

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (settings, reactor) in initial {
            let slot = Arc::new(QueueSlot::new(settings));
            if reactor.is_none() {
                slot.record_build_failure();
            }
            slots.push(Arc::clone(&slot));
            tasks.push(tokio::spawn(supervise(
                Arc::clone(&self.factory),
                slot,
                reactor,
                self.shutdown.subscribe(),
            )));
        }

        info!(queues = slots.len(), "Reactor host started");
        Ok(())
    }

    /// Current reactor of `queue_id`, if one has been built.
    pub fn reactor(&self, queue_id: &str) -> Option<Arc<dyn Reactor>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|slot| slot.settings.id == queue_id)
            .and_then(|slot| slot.current())
    }

    /// Health of every queue with health checks enabled.
    pub fn health(&self) -> HealthStatus {
        let queues: Vec<QueueHealth> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|slot| slot.settings.health_check.enabled)
            .map(|slot| slot.health())
            .collect();

        let healthy = queues
            .iter()
            .filter(|queue| queue.critical)
            .all(QueueHealth::is_healthy);

        HealthStatus { healthy, queues }
    }

    /// Stop every reactor and wait for the supervisors to exit.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Supervisor task failed");
            }
        }
        info!("Reactor host stopped");
    }

    /// Start, run until `signal` resolves, then shut down.
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> Result<(), MessagingError> {
        self.start().await?;
        signal.await;
        self.shutdown().await;
        Ok(())
    }
}

/// Sleep `interval` unless shutdown comes first. True on shutdown.
async fn shutdown_within(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn supervise(
    factory: Arc<ReactorFactory>,
    slot: Arc<QueueSlot>,
    mut initial: Option<Arc<dyn Reactor>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue_id = slot.settings.id.clone();
    let retry_interval = slot.settings.polling_interval();
    let mut generation: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let reactor = match initial.take() {
            Some(reactor) => reactor,
            None => match factory.create_queue_reactor(&queue_id) {
                Ok(reactor) => reactor,
                Err(e) => {
                    slot.record_build_failure();
                    warn!(queue_id = %queue_id, error = %e, "Failed to rebuild reactor, retrying");
                    if shutdown_within(retry_interval, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            },
        };

        generation += 1;
        let mut events = reactor.events();
        slot.replace(Arc::clone(&reactor));

        if !reactor.start_processing().await {
            reactor.stop().await;
            warn!(queue_id = %queue_id, generation, "Reactor failed to start, retrying");
            if shutdown_within(retry_interval, &mut shutdown).await {
                break;
            }
            continue;
        }
        debug!(queue_id = %queue_id, generation, "Reactor supervised");

        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ReactorEvent::NeedReconnect { reason, .. }) => {
                        warn!(queue_id = %queue_id, reason = %reason, "Rebuilding reactor");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(queue_id = %queue_id, skipped, "Missed reactor events, rebuilding");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(queue_id = %queue_id, "Reactor event channel closed, rebuilding");
                    }
                }
                reactor.stop().await;
                if shutdown_within(retry_interval, &mut shutdown).await {
                    break;
                }
            }
            _ = shutdown.changed() => {
                reactor.stop().await;
                break;
            }
        }
    }

    if let Some(reactor) = slot.current() {
        reactor.stop().await;
    }
    debug!(queue_id = %queue_id, "Supervisor exited");
}
