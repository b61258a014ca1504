//! Reactor Host - Entry Point
//!
//! Runs every configured queue reactor until SIGINT/SIGTERM.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    mq_reactor_host::run().await
}
