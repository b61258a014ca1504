//! Queue Reactor Host
//!
//! Runs one reactor per configured queue over the in-memory broker and
//! keeps them alive until SIGINT/SIGTERM.
//!
//! ## Architecture
//!
//! ```text
//! QueuesConfig (MQ_QUEUES_FILE / MQ_QUEUES, or the demo set)
//!   ↓
//! ReactorFactory + ProcessorRegistry (processors::register)
//!   ↓
//! ReactorHost (one supervisor per queue, reconnect on failure)
//!   ↓
//! InMemoryBroker  ←  traffic generator (optional)
//! ```
//!
//! ## Environment
//!
//! | Variable                      | Default | Meaning                         |
//! |-------------------------------|---------|---------------------------------|
//! | `APP_ENV`                     | development | log format and filter       |
//! | `MQ_QUEUES_FILE`, `MQ_QUEUES` | demo queues | queue configuration         |
//! | `MQ_DEMO_TRAFFIC`             | `true`  | run the traffic generator       |
//! | `MQ_TRAFFIC_INTERVAL_MS`      | `2000`  | traffic tick                    |
//! | `MQ_HEALTH_INTERVAL_MS`       | `10000` | health report period            |

pub mod processors;
pub mod shutdown;
pub mod traffic;

use core_config::{ConfigError, Environment, FromEnv, env_duration_ms, env_parse};
use eyre::{Result, WrapErr};
use queue_reactor::{
    ProcessingType, QueueSettings, QueuesConfig, ReactorFactory, ReactorHost,
    memory::{InMemoryAdapterFactory, InMemoryBroker},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Host process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub demo_traffic: bool,
    pub traffic_interval: Duration,
    pub health_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            demo_traffic: true,
            traffic_interval: Duration::from_secs(2),
            health_interval: Duration::from_secs(10),
        }
    }
}

impl FromEnv for HostConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            demo_traffic: env_parse("MQ_DEMO_TRAFFIC", defaults.demo_traffic)?,
            traffic_interval: env_duration_ms("MQ_TRAFFIC_INTERVAL_MS", defaults.traffic_interval)?,
            health_interval: env_duration_ms("MQ_HEALTH_INTERVAL_MS", defaults.health_interval)?,
        })
    }
}

/// Queues used when no configuration is provided.
pub fn demo_queues() -> Result<QueuesConfig, queue_reactor::ConfigError> {
    QueuesConfig::new(vec![
        QueueSettings::new(traffic::PING_QUEUE, "mem://local", "DEMO.PING")
            .with_polling_interval(Duration::from_millis(250))
            .with_receive_timeout(Duration::from_millis(500)),
        QueueSettings::new("audit", "mem://local", "DEMO.AUDIT")
            .with_processing_type(ProcessingType::Subscribe)
            .with_transacted(true),
        QueueSettings::new(traffic::ECHO_QUEUE, "mem://local", "DEMO.ECHO")
            .with_processing_type(ProcessingType::SubscribeAndReply)
            .with_reply_queue("DEMO.ECHO.REPLY"),
    ])
}

/// Configured queues, or the demo set when neither config variable is set.
pub fn load_queues() -> Result<QueuesConfig> {
    let configured = std::env::var_os(queue_reactor::config::QUEUES_FILE_ENV).is_some()
        || std::env::var_os(queue_reactor::config::QUEUES_ENV).is_some();

    if configured {
        QueuesConfig::from_env().wrap_err("Failed to load queue configuration")
    } else {
        info!("No queue configuration set, using demo queues");
        demo_queues().wrap_err("Invalid demo queue configuration")
    }
}

/// Log the aggregated health every `interval` until shutdown.
fn spawn_health_reporter(
    host: Arc<ReactorHost>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = host.health();
                    for queue in status.queues.iter().filter(|q| !q.is_healthy()) {
                        warn!(
                            queue_id = %queue.queue_id,
                            running = queue.running,
                            connected = queue.connected,
                            error_count = queue.error_count,
                            "Queue unhealthy"
                        );
                    }
                    info!(healthy = status.healthy, queues = status.queues.len(), "Health check");
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }
    })
}

/// Run the reactor host
///
/// This is the main entry point. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads the queue configuration and registers the processors
/// 3. Starts one supervised reactor per queue
/// 4. Waits for SIGINT/SIGTERM and stops every reactor
///
/// # Errors
///
/// Returns an error if the configuration is invalid or does not match the
/// registered processors.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        ?environment,
        "Starting queue reactor host"
    );

    let config = HostConfig::from_env().wrap_err("Failed to load host configuration")?;
    let queues = load_queues()?;
    info!(queues = ?queues.ids().collect::<Vec<_>>(), "Queue configuration loaded");

    let stats = Arc::new(processors::ProcessorStats::default());
    let registry =
        processors::register(&queues, &stats).wrap_err("Failed to register processors")?;

    let broker = InMemoryBroker::new();
    let adapters = Arc::new(InMemoryAdapterFactory::new(broker));
    let factory = ReactorFactory::new(queues, registry, adapters)
        .wrap_err("Processor registrations do not match the queue configuration")?;

    let host = Arc::new(ReactorHost::new(factory));
    host.start().await.wrap_err("Failed to start reactors")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown::spawn_signal_handler(shutdown_tx);

    let mut tasks = vec![spawn_health_reporter(
        Arc::clone(&host),
        config.health_interval,
        shutdown_rx.clone(),
    )];

    if config.demo_traffic {
        let generator =
            traffic::Traffic::new(host.factory()).wrap_err("Failed to build demo traffic")?;
        if !generator.is_empty() {
            info!(interval = ?config.traffic_interval, "Starting demo traffic");
            tasks.push(generator.spawn(config.traffic_interval, shutdown_rx.clone()));
        }
    }

    let mut waiter = shutdown_rx;
    shutdown::requested(&mut waiter).await;

    host.shutdown().await;
    for task in tasks {
        let _ = task.await;
    }

    info!(
        pings = stats.pings(),
        audited = stats.audited(),
        echoed = stats.echoed(),
        "Queue reactor host stopped"
    );
    Ok(())
}
