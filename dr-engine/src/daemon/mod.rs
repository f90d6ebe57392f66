//! Long-running mode: the backup scheduler until a shutdown signal.

pub mod shutdown;

pub use shutdown::ShutdownCoordinator;

use crate::engine::Engine;
use std::sync::Arc;
use tracing::info;

pub async fn run(engine: Arc<Engine>) {
    let coordinator = ShutdownCoordinator::default();
    let token = coordinator.token();
    let scheduler = engine.scheduler();

    info!(
        "Daemon started for {} (interval: {})",
        engine.config().node_id,
        engine.config().schedule.interval
    );
    let handle = tokio::spawn(async move { scheduler.run(token).await });

    coordinator.wait_for_signal().await;
    coordinator.drain(handle).await;
}
