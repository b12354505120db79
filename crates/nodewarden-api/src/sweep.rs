use std::time::Duration;

use tracing::{info, warn};

use nodewarden_node::clients::ClientManager;
use nodewarden_node::exec::CommandRunner;

/// Periodic expiry sweep. Runs forever on its own task. It holds no lock
/// against concurrent API-driven deletes; deleting an already-deleted
/// client is a no-op false, so the sweep and the API can race safely.
pub async fn run<R: CommandRunner + Clone>(manager: ClientManager<R>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "starting expiry sweep");

    loop {
        tokio::time::sleep(interval).await;

        match manager.cleanup_expired().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "revoked expired clients"),
            Err(err) => warn!(error = %err, "expiry sweep failed"),
        }
    }
}
