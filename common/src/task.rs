use std::future::Future;

use log::{debug, trace};
use tokio::task::JoinHandle;

/// Spawn a named tokio task, logging its lifecycle.
pub fn spawn_task<F>(name: &'static str, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    trace!("Spawning task '{}'", name);
    tokio::spawn(async move {
        let output = future.await;
        debug!("Task '{}' has exited", name);
        output
    })
}
