use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::constants::DEFAULT_FLUSH_INTERVAL;
use crate::env::Environment;

/// Stop signal shared with the timer thread.
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Periodic flush driver running on a background thread.
///
/// At each tick the timer calls [`Environment::flush`] without shutdown
/// semantics, checkpointing and evicting files no handle is using, so
/// long-running processes reclaim resources without closing handles
/// explicitly. Stopping or dropping the timer wakes the thread and joins
/// it; the final shutdown flush stays the caller's responsibility.
pub struct FlushTimer {
    signal: Arc<Signal>,
    worker: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Start a timer flushing `env` at the default interval.
    pub fn start(env: Arc<Environment>) -> FlushTimer {
        FlushTimer::with_interval(env, DEFAULT_FLUSH_INTERVAL)
    }

    /// Start a timer flushing `env` at the given interval.
    pub fn with_interval(env: Arc<Environment>, interval: Duration) -> FlushTimer {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let worker = thread::Builder::new()
            .name("arkdb-flush".into())
            .spawn(move || flush_loop(&env, &thread_signal, interval))
            .expect("failed to spawn flush timer thread");
        FlushTimer {
            signal,
            worker: Some(worker),
        }
    }

    /// Stop the timer and join its thread. Safe to call more than once.
    pub fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wake.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn flush_loop(env: &Environment, signal: &Signal, interval: Duration) {
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if *stopped {
                return;
            }
            let wait = signal.wake.wait_for(&mut stopped, interval);
            if *stopped {
                return;
            }
            if !wait.timed_out() {
                // Spurious wakeup, go back to waiting
                continue;
            }
        }
        debug!("flush timer tick");
        env.flush(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DbFlags;
    use crate::database::Database;
    use std::time::Instant;
    use tempfile::tempdir;

    #[test]
    fn stop_is_idempotent() {
        let env = Arc::new(Environment::make_mock());
        let mut timer = FlushTimer::with_interval(env, Duration::from_millis(5));
        timer.stop();
        timer.stop();
    }

    #[test]
    fn tick_evicts_unused_files() {
        let dir = tempdir().unwrap();
        let env = Arc::new(Environment::new(dir.path()));
        {
            let mut db = Database::open(&env, "timer.dat", DbFlags::CREATE).unwrap();
            assert!(db.write("k", &1u32, true));
        }
        assert!(env.is_cached("timer.dat"));

        let mut timer = FlushTimer::with_interval(Arc::clone(&env), Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(10);
        while env.is_cached("timer.dat") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        timer.stop();
        assert!(!env.is_cached("timer.dat"));
    }

    #[test]
    fn dropping_the_timer_joins_the_thread() {
        let env = Arc::new(Environment::make_mock());
        let timer = FlushTimer::with_interval(env, Duration::from_secs(3600));
        drop(timer);
    }
}
