//! Demo traffic generator.
//!
//! Sends `ping` to the `ping` queue and an RPC request to the `echo`
//! queue every tick, for whichever of the two is configured.

use queue_reactor::{
    MessageSender, MessagingError, ReactorFactory, RpcSender, SerializerRegistry,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const PING_QUEUE: &str = "ping";
pub const ECHO_QUEUE: &str = "echo";

/// Bound on each echo round trip.
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

/// Façades used by the generator.
pub struct Traffic {
    ping: Option<MessageSender<String>>,
    echo: Option<RpcSender<String, String>>,
}

impl Traffic {
    /// Build the façades for the demo queues present in the configuration.
    pub fn new(factory: &ReactorFactory) -> Result<Self, MessagingError> {
        let serializers = SerializerRegistry::with_defaults();

        let ping = match factory.config().get(PING_QUEUE) {
            Some(_) => Some(factory.sender::<String>(PING_QUEUE, &serializers)?),
            None => None,
        };
        let echo = match factory.config().get(ECHO_QUEUE) {
            Some(_) => Some(
                factory
                    .rpc_sender::<String, String>(ECHO_QUEUE, &serializers)?
                    .with_timeout(ECHO_TIMEOUT),
            ),
            None => None,
        };

        Ok(Self { ping, echo })
    }

    pub fn is_empty(&self) -> bool {
        self.ping.is_none() && self.echo.is_none()
    }

    /// One round of traffic. Failures are logged, never fatal.
    pub async fn tick(&self, sequence: u64) {
        if let Some(ping) = &self.ping {
            match ping.send(&"ping".to_string()).await {
                Ok(sent) => debug!(message_id = %sent.message_id, sequence, "Sent ping"),
                Err(e) => warn!(error = %e, sequence, "Ping failed"),
            }
        }

        if let Some(echo) = &self.echo {
            let request = format!("echo #{sequence}");
            match echo.call(&request).await {
                Ok(reply) => info!(sequence, %reply, "Echo reply"),
                Err(e) => warn!(error = %e, sequence, "Echo failed"),
            }
        }
    }

    /// Tick every `interval` until shutdown.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut sequence = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sequence += 1;
                        self.tick(sequence).await;
                    }
                    _ = crate::shutdown::requested(&mut shutdown) => break,
                }
            }
            debug!(sent = sequence, "Traffic generator stopped");
        })
    }
}
