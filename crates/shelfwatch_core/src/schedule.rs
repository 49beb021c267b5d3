//! Cancellable periodic tasks and the non-reentrancy guard.
//!
//! # Responsibility
//! - Drive a `Job` at a fixed interval after an optional initial delay.
//! - Provide `SingleFlight`, the guard that turns overlapping runs into
//!   no-ops.
//!
//! # Invariants
//! - `stop()` prevents future ticks but never cancels a run in progress.
//! - At most one tick loop exists per `ScheduledTask`.

use crate::storage::lock;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Single-flight flag. Entering while another holder is active fails.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard when no other run is active.
    pub fn try_enter(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { flag: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its `SingleFlight` on drop.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Work unit run by a `ScheduledTask`.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    async fn run(&self);
}

struct TickLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic driver with `start()`, `stop()` and `trigger_now()`.
pub struct ScheduledTask {
    job: Arc<dyn Job>,
    interval: Duration,
    initial_delay: Duration,
    tick_loop: Mutex<Option<TickLoop>>,
}

impl ScheduledTask {
    pub fn new(job: Arc<dyn Job>, interval: Duration, initial_delay: Duration) -> Self {
        Self {
            job,
            interval: interval.max(Duration::from_millis(1)),
            initial_delay,
            tick_loop: Mutex::new(None),
        }
    }

    /// Starts ticking. Returns `false` when already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = lock(&self.tick_loop);
        if slot
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            return false;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let job = Arc::clone(&self.job);
        let interval = self.interval;
        let initial_delay = self.initial_delay;

        let handle = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(initial_delay) => {}
                    _ = stop_rx.changed() => return,
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *stop_rx.borrow() {
                    break;
                }
                debug!("event=task_tick module=schedule status=start job={}", job.name());
                job.run().await;
            }
            debug!("event=task_loop_exit module=schedule status=ok job={}", job.name());
        });

        info!(
            "event=task_start module=schedule status=ok job={} interval_ms={} initial_delay_ms={}",
            self.job.name(),
            self.interval.as_millis(),
            self.initial_delay.as_millis()
        );
        *slot = Some(TickLoop { stop_tx, handle });
        true
    }

    /// Stops future ticks. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        let Some(running) = lock(&self.tick_loop).take() else {
            return false;
        };
        let _ = running.stop_tx.send(true);
        info!(
            "event=task_stop module=schedule status=ok job={}",
            self.job.name()
        );
        true
    }

    /// Runs the job once outside the timer.
    pub async fn trigger_now(&self) {
        self.job.run().await;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.tick_loop)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.tick_loop).take() {
            let _ = running.stop_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Job, ScheduledTask, SingleFlight};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn single_flight_rejects_second_entry_until_guard_drops() {
        let flight = SingleFlight::new();
        let guard = flight.try_enter().expect("first entry");
        assert!(flight.try_enter().is_none());
        drop(guard);
        assert!(flight.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_interval_until_stopped() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
        });
        let task = ScheduledTask::new(job.clone(), Duration::from_secs(10), Duration::ZERO);
        assert!(task.start());
        assert!(!task.start());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        assert!(task.stop());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_postpones_first_run() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
        });
        let task = ScheduledTask::new(job.clone(), Duration::from_secs(10), Duration::from_secs(5));
        task.start();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        task.stop();
    }

    #[tokio::test]
    async fn trigger_now_runs_once() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
        });
        let task = ScheduledTask::new(job.clone(), Duration::from_secs(60), Duration::ZERO);
        task.trigger_now().await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }
}
