use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatcher::Relay;

/// Default interval between ping sweeps.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the sweep loop. A connection that has not answered a ping by the
/// next tick is terminated.
pub fn spawn_heartbeat(relay: Relay, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = relay.sweep().await;
            if evicted > 0 {
                info!("Heartbeat evicted {} dead connection(s)", evicted);
            }
        }
    })
}
