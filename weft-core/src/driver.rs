//! Background Driver
//!
//! Without a driver, queued work runs when the host calls
//! [`Runtime::flush`] or [`Runtime::settle`]. [`spawn_driver`] runs a tokio
//! task that settles the runtime whenever work is queued, after a short
//! debounce so that a burst of writes is handled by one pass.
//!
//! The driver holds only a weak reference and stops once the runtime is
//! dropped.

use tokio::task::JoinHandle;

use crate::reactive::Runtime;

/// Spawn the driver on the current tokio runtime.
pub fn spawn_driver(runtime: &Runtime) -> JoinHandle<()> {
    let weak = runtime.downgrade();
    let wake = runtime.wake_handle();
    let debounce = runtime.config().debounce();

    tokio::spawn(async move {
        tracing::debug!(?debounce, "driver started");
        loop {
            // Work queued before the driver started is picked up at once.
            let pending = match weak.upgrade() {
                Some(runtime) => runtime.has_pending_work(),
                None => break,
            };
            if !pending {
                wake.notified().await;
            }
            if !debounce.is_zero() {
                tokio::time::sleep(debounce).await;
            }

            let Some(runtime) = weak.upgrade() else {
                break;
            };
            let report = runtime.settle().await;
            if !report.failed.is_empty() {
                tracing::warn!(failed = report.failed.len(), "driver pass had failures");
            }
            tracing::trace!(ran = report.ran.len(), "driver pass");
        }
        tracing::debug!("driver stopped");
    })
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::graph::Eagerness;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn driver_runs_queued_work() {
        let rt = Runtime::with_config(RuntimeConfig::new().driver_debounce(Duration::from_millis(1)));
        let count = rt.signal(0);
        let runs = Arc::new(AtomicUsize::new(0));

        let (c, r) = (count.clone(), runs.clone());
        rt.effect(Eagerness::Idle, move |_| {
            c.read();
            r.fetch_add(1, Ordering::SeqCst);
        });
        let handle = spawn_driver(&rt);

        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.write(1);
        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        drop(count);
        drop(rt);
        handle.abort();
    }
}
