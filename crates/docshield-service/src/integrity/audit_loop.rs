//! Periodic background loop.
//!
//! Waits `initial_delay`, then runs `job` on the blocking pool every
//! `interval` until shutdown. A `Notify` wakes it early.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub fn spawn_audit_loop<F>(
    name: &'static str,
    initial_delay: Duration,
    interval: Duration,
    wake: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job = Arc::new(job);
    tokio::spawn(async move {
        info!(
            task = name,
            initial_delay_secs = initial_delay.as_secs(),
            interval_secs = interval.as_secs(),
            "audit loop started"
        );

        let mut delay = initial_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wake.notified() => {
                    debug!(task = name, "audit loop woken early");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(task = name, "audit loop shutting down");
                        return;
                    }
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }
            delay = interval;

            let job = job.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
                error!(task = name, error = %e, "audit job panicked");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn wake_runs_job_and_shutdown_stops_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let wake = Arc::new(Notify::new());
        let (tx, rx) = watch::channel(false);
        let counter = runs.clone();
        let handle = spawn_audit_loop(
            "test",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            wake.clone(),
            rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        wake.notify_one();
        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
