//! Maintenance scheduling
//!
//! A small interval scheduler driving the periodic passes: expired-entry
//! cleanup, optimization, TTL maintenance, and coordinator checks. Tasks
//! carry their own interval and are driven either by the background
//! thread or synchronously through [`MaintenanceScheduler::run_due`],
//! which takes an explicit `now` so behavior never depends on wall-clock
//! waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::artifact::ArtifactCache;
use crate::coordinator::CacheCoordinator;
use crate::results::ResultCache;

/// Interval between expired-entry cleanup passes
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between optimization passes
pub const OPTIMIZE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Interval between coordinator pressure checks
pub const PRESSURE_INTERVAL: Duration = Duration::from_secs(5);

/// Background thread wake-up granularity
const TICK: Duration = Duration::from_millis(100);

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Task {
    name: String,
    interval: Duration,
    last_run: Instant,
    callback: Callback,
}

struct SchedulerInner {
    tasks: Mutex<Vec<Task>>,
    shutdown: AtomicBool,
    sleep_lock: Mutex<()>,
    wakeup: Condvar,
}

/// Interval-based task runner for cache maintenance
pub struct MaintenanceScheduler {
    inner: Arc<SchedulerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
                sleep_lock: Mutex::new(()),
                wakeup: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Register a named task; its first run is one interval after now
    pub fn add_task<F>(&self, name: &str, interval: Duration, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.tasks.lock().unwrap().push(Task {
            name: name.to_string(),
            interval,
            last_run: Instant::now(),
            callback: Arc::new(callback),
        });
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().unwrap().len()
    }

    /// Run every task whose interval has elapsed as of `now`
    ///
    /// Callbacks run on the calling thread, outside the task lock, so a
    /// task may register further tasks.
    pub fn run_due(&self, now: Instant) -> usize {
        run_due_inner(&self.inner, now)
    }

    /// Run every task immediately, regardless of interval
    pub fn run_all_now(&self) -> usize {
        let now = Instant::now();
        let all: Vec<Callback> = {
            let mut tasks = self.inner.tasks.lock().unwrap();
            tasks
                .iter_mut()
                .map(|task| {
                    task.last_run = now;
                    Arc::clone(&task.callback)
                })
                .collect()
        };
        for callback in &all {
            callback();
        }
        all.len()
    }

    /// Start the background thread; idempotent
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle = Some(std::thread::spawn(move || {
            while !inner.shutdown.load(Ordering::SeqCst) {
                let guard = inner.sleep_lock.lock().unwrap();
                let (_guard, _timeout) = inner.wakeup.wait_timeout(guard, TICK).unwrap();
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                run_due_inner(&inner, Instant::now());
            }
        }));
    }

    /// Stop the background thread and wait for it to exit
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run_due_inner(inner: &SchedulerInner, now: Instant) -> usize {
    let due: Vec<(String, Callback)> = {
        let mut tasks = inner.tasks.lock().unwrap();
        tasks
            .iter_mut()
            .filter(|task| now.duration_since(task.last_run) >= task.interval)
            .map(|task| {
                task.last_run = now;
                (task.name.clone(), Arc::clone(&task.callback))
            })
            .collect()
    };
    for (name, callback) in &due {
        debug!(task = %name, "maintenance task running");
        callback();
    }
    due.len()
}

impl Default for MaintenanceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wire the standard maintenance tasks for a cache stack
///
/// Tasks hold weak references, so dropping a cache elsewhere silently
/// disables its maintenance instead of keeping it alive.
pub fn wire_standard_tasks(
    scheduler: &MaintenanceScheduler,
    artifacts: &Arc<ArtifactCache>,
    results: &Arc<ResultCache>,
    coordinator: &Arc<CacheCoordinator>,
) {
    let weak = Arc::downgrade(artifacts);
    scheduler.add_task("artifact-cleanup", CLEANUP_INTERVAL, move || {
        if let Some(cache) = weak.upgrade() {
            cache.cleanup_expired();
        }
    });

    let weak = Arc::downgrade(artifacts);
    scheduler.add_task("artifact-optimize", OPTIMIZE_INTERVAL, move || {
        if let Some(cache) = weak.upgrade() {
            cache.optimize();
        }
    });

    let weak = Arc::downgrade(results);
    scheduler.add_task("result-maintenance", OPTIMIZE_INTERVAL, move || {
        if let Some(cache) = weak.upgrade() {
            cache.maintenance();
        }
    });

    let config = coordinator.config();

    let weak: Weak<CacheCoordinator> = Arc::downgrade(coordinator);
    scheduler.add_task("pressure-check", PRESSURE_INTERVAL, move || {
        if let Some(coordinator) = weak.upgrade() {
            coordinator.handle_memory_pressure();
        }
    });

    let weak = Arc::downgrade(coordinator);
    scheduler.add_task("system-memory-check", config.system_check_interval, move || {
        if let Some(coordinator) = weak.upgrade() {
            coordinator.handle_system_memory_pressure();
        }
    });

    let weak = Arc::downgrade(coordinator);
    scheduler.add_task("limit-enforcement", config.cleanup_interval, move || {
        if let Some(coordinator) = weak.upgrade() {
            coordinator.enforce_memory_limits();
        }
    });

    let weak = Arc::downgrade(coordinator);
    scheduler.add_task("stats-publish", config.stats_interval, move || {
        if let Some(coordinator) = weak.upgrade() {
            coordinator.update_statistics();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_run_due_respects_intervals() {
        let scheduler = MaintenanceScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.add_task("counted", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Not due yet
        assert_eq!(scheduler.run_due(Instant::now()), 0);

        // Due once the interval has elapsed
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(scheduler.run_due(later), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Interval restarts after a run
        assert_eq!(scheduler.run_due(later), 0);
        assert_eq!(scheduler.run_due(later + Duration::from_secs(61)), 1);
    }

    #[test]
    fn test_run_all_now_ignores_intervals() {
        let scheduler = MaintenanceScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&runs);
            scheduler.add_task("task", Duration::from_secs(3600), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scheduler.run_all_now(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_task_may_add_tasks() {
        let scheduler = Arc::new(MaintenanceScheduler::new());
        let scheduler_clone = Arc::clone(&scheduler);
        scheduler.add_task("spawner", Duration::ZERO, move || {
            scheduler_clone.add_task("spawned", Duration::from_secs(1), || {});
        });

        scheduler.run_all_now();
        assert_eq!(scheduler.task_count(), 2);
    }

    #[test]
    fn test_background_thread_runs_tasks() {
        let scheduler = MaintenanceScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.add_task("fast", Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.start();
        std::thread::sleep(Duration::from_millis(400));
        scheduler.shutdown();

        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = MaintenanceScheduler::new();
        scheduler.start();
        scheduler.shutdown();
        scheduler.shutdown();
    }

    #[test]
    fn test_standard_wiring() {
        let scheduler = MaintenanceScheduler::new();
        let artifacts = Arc::new(ArtifactCache::default());
        let results = Arc::new(ResultCache::default());
        let coordinator = Arc::new(CacheCoordinator::new());

        wire_standard_tasks(&scheduler, &artifacts, &results, &coordinator);
        assert_eq!(scheduler.task_count(), 7);

        // All tasks are safely runnable right away
        assert_eq!(scheduler.run_all_now(), 7);
    }
}
