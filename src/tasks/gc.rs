//! Garbage Collection Task
//!
//! Background sweep that removes entries long past their expiry, even when
//! nobody reads them again.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Something the GC task can sweep.
pub(crate) trait Sweep: Send + Sync + 'static {
    /// Removes collectable entries.
    ///
    /// Returns the number removed, or `None` once there is nothing left to
    /// watch and the task should stop.
    fn sweep(&self) -> Option<usize>;
}

/// Spawns a task that sweeps `target` every `interval`.
///
/// The task holds only a weak reference and exits on its own when the target
/// is dropped or reports that it is empty.
pub(crate) fn spawn_gc_task<S: Sweep>(target: Weak<S>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "GC task started");

        loop {
            tokio::time::sleep(interval).await;

            let Some(target) = target.upgrade() else {
                break;
            };

            match target.sweep() {
                Some(0) => debug!("GC sweep: no collectable entries found"),
                Some(removed) => info!("GC sweep: removed {} expired entries", removed),
                None => {
                    debug!("GC task stopping, cache is empty");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Countdown {
        remaining: AtomicUsize,
        sweeps: AtomicUsize,
    }

    impl Sweep for Countdown {
        fn sweep(&self) -> Option<usize> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            let left = self.remaining.fetch_sub(1, Ordering::SeqCst);
            (left > 1).then_some(1)
        }
    }

    #[tokio::test]
    async fn test_gc_task_stops_when_target_reports_empty() {
        let target = Arc::new(Countdown {
            remaining: AtomicUsize::new(3),
            sweeps: AtomicUsize::new(0),
        });

        let handle = spawn_gc_task(Arc::downgrade(&target), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(handle.is_finished(), "Task should stop once nothing is left");
        assert_eq!(target.sweeps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gc_task_stops_when_target_dropped() {
        let target = Arc::new(Countdown {
            remaining: AtomicUsize::new(usize::MAX),
            sweeps: AtomicUsize::new(0),
        });

        let handle = spawn_gc_task(Arc::downgrade(&target), Duration::from_millis(10));
        drop(target);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_gc_task_can_be_aborted() {
        let target = Arc::new(Countdown {
            remaining: AtomicUsize::new(usize::MAX),
            sweeps: AtomicUsize::new(0),
        });

        let handle = spawn_gc_task(Arc::downgrade(&target), Duration::from_secs(1));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
