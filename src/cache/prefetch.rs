//! Prefetch Worker
//!
//! One background task per cache. Producers push keys with `try_send` and
//! never wait; the worker waits up to the idle timeout for a first key,
//! drains whatever else is queued up to the batch limit, and loads the batch
//! from the remote tier into the local tier.
//!
//! The worker holds only a weak reference to the cache, so dropping the
//! cache ends the loop; it also stops on its cancellation token. Failures
//! are logged and dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::tiered::TieredCache;

/// Worker loop
pub(crate) async fn run(
    cache: Weak<TieredCache>,
    mut rx: mpsc::Receiver<String>,
    batch_limit: usize,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    info!(batch_limit, ?idle_timeout, "Prefetch worker started");

    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = tokio::time::timeout(idle_timeout, rx.recv()) => match received {
                Ok(Some(key)) => key,
                Ok(None) => break,
                Err(_) => {
                    if cache.strong_count() == 0 {
                        break;
                    }
                    continue;
                }
            },
        };

        let mut batch = Vec::with_capacity(batch_limit.max(1));
        batch.push(first);
        while batch.len() < batch_limit {
            match rx.try_recv() {
                Ok(key) => batch.push(key),
                Err(_) => break,
            }
        }

        let Some(cache) = cache.upgrade() else {
            break;
        };
        let requested = batch.len();
        match cache.prefetch_batch(batch).await {
            Ok(loaded) => debug!(requested, loaded, "Prefetch batch complete"),
            Err(e) => {
                cache.record_prefetch_failure(requested as u64);
                debug!(requested, error = %e, "Prefetch batch failed");
            }
        }
    }

    info!("Prefetch worker stopped");
}
