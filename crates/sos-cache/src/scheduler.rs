//! Periodic complete updates on a background thread

use parking_lot::{Condvar, Mutex, MutexGuard};
use sos_common::{Error, Result};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Something the scheduler can ask for a complete update
pub trait UpdateTarget: Send + Sync + 'static {
    fn run_scheduled_update(&self) -> Result<()>;
}

#[derive(Debug)]
struct Timer {
    interval: Duration,
    generation: u64,
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    timer: Mutex<Timer>,
    wake: Condvar,
}

/// Runs [`UpdateTarget::run_scheduled_update`] every `interval`
///
/// The thread only holds a weak reference to its target and exits once the
/// target is gone. A zero interval keeps the thread idle until it is
/// rescheduled or stopped.
#[derive(Debug)]
pub struct UpdateScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl UpdateScheduler {
    pub fn start<T: UpdateTarget>(target: Weak<T>, interval: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            timer: Mutex::new(Timer {
                interval,
                generation: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("cache-update".into())
            .spawn(move || run(&thread_shared, &target))
            .map_err(|e| Error::internal(format!("failed to spawn update scheduler: {e}")))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn interval(&self) -> Duration {
        self.shared.timer.lock().interval
    }

    /// Change the interval; the next update is due `interval` from now
    pub fn reschedule(&self, interval: Duration) {
        let mut timer = self.shared.timer.lock();
        timer.interval = interval;
        timer.generation += 1;
        self.shared.wake.notify_all();
        info!("Content cache update interval set to {:?}", interval);
    }

    /// Stop the thread and wait for a running update to finish
    pub fn stop(&self) {
        {
            let mut timer = self.shared.timer.lock();
            if timer.shutdown {
                return;
            }
            timer.shutdown = true;
            self.shared.wake.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            // Dropping the target from inside its own update thread
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Content cache update thread panicked");
            }
        }
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<T: UpdateTarget>(shared: &Shared, target: &Weak<T>) {
    info!("Content cache update thread started");

    let mut timer = shared.timer.lock();
    loop {
        if timer.shutdown {
            break;
        }
        // A deadline past the end of time never fires, so idle like a zero interval
        let deadline = match Instant::now().checked_add(timer.interval) {
            Some(deadline) if !timer.interval.is_zero() => deadline,
            _ => {
                shared.wake.wait(&mut timer);
                continue;
            }
        };

        let generation = timer.generation;
        while !timer.shutdown && timer.generation == generation && Instant::now() < deadline {
            shared.wake.wait_until(&mut timer, deadline);
        }
        if timer.shutdown {
            break;
        }
        if timer.generation != generation {
            continue;
        }

        let alive = MutexGuard::unlocked(&mut timer, || {
            let Some(target) = target.upgrade() else {
                return false;
            };
            debug!("Starting scheduled content cache update");
            match target.run_scheduled_update() {
                Ok(()) => {}
                Err(e) if e.is_execution_failure() => {
                    warn!("Scheduled content cache update failed: {}", e);
                }
                Err(e) => warn!("Scheduled content cache update aborted: {}", e),
            }
            true
        });
        if !alive {
            debug!("Update target dropped; stopping scheduler");
            break;
        }
    }

    info!("Content cache update thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counter {
        runs: AtomicU64,
        fail: bool,
    }

    impl UpdateTarget for Counter {
        fn run_scheduled_update(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::datasource("offline"));
            }
            Ok(())
        }
    }

    fn wait_for_runs(counter: &Counter, at_least: u64) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if counter.runs.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_scheduler_triggers_and_stops() {
        let counter = Arc::new(Counter::default());
        let scheduler = UpdateScheduler::start(Arc::downgrade(&counter), Duration::from_millis(10)).unwrap();

        assert!(wait_for_runs(&counter, 3));
        scheduler.stop();

        let after_stop = counter.runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.runs.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_failures_do_not_stop_the_schedule() {
        let counter = Arc::new(Counter {
            runs: AtomicU64::new(0),
            fail: true,
        });
        let _scheduler = UpdateScheduler::start(Arc::downgrade(&counter), Duration::from_millis(5)).unwrap();
        assert!(wait_for_runs(&counter, 3));
    }

    #[test]
    fn test_zero_interval_idles_until_rescheduled() {
        let counter = Arc::new(Counter::default());
        let scheduler = UpdateScheduler::start(Arc::downgrade(&counter), Duration::ZERO).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);

        scheduler.reschedule(Duration::from_millis(5));
        assert_eq!(scheduler.interval(), Duration::from_millis(5));
        assert!(wait_for_runs(&counter, 1));
    }

    #[test]
    fn test_unbounded_interval_idles_until_rescheduled() {
        let counter = Arc::new(Counter::default());
        let scheduler = UpdateScheduler::start(Arc::downgrade(&counter), Duration::from_millis(5)).unwrap();
        assert!(wait_for_runs(&counter, 1));

        scheduler.reschedule(Duration::MAX);
        thread::sleep(Duration::from_millis(20));
        let idle = counter.runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.runs.load(Ordering::SeqCst), idle);

        // Thread is still alive and picks up a usable interval
        scheduler.reschedule(Duration::from_millis(5));
        assert!(wait_for_runs(&counter, idle + 2));
    }

    #[test]
    fn test_thread_exits_when_target_dropped() {
        let counter = Arc::new(Counter::default());
        let scheduler = UpdateScheduler::start(Arc::downgrade(&counter), Duration::from_millis(5)).unwrap();
        drop(counter);
        // Joins without hanging
        scheduler.stop();
    }
}
