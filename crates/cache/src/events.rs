//! Synchronous observer fan-out for cache and coordinator events

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::component::CacheStats;
use crate::types::{ArtifactKind, CachePriority};

/// Events published by the individual cache tiers
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A lookup found an entry
    Hit { key: String, latency_micros: u64 },

    /// A lookup found nothing
    Miss { key: String },

    /// An entry was removed by automatic eviction or aging
    Evicted { key: String },

    /// An entry's retention priority was changed
    PriorityChanged {
        key: String,
        priority: CachePriority,
    },

    /// An optimization pass finished
    Optimized {
        items_removed: usize,
        bytes_freed: usize,
    },

    /// A page artifact should be produced ahead of use
    PreloadRequested { page: u32, kind: ArtifactKind },

    /// A snapshot export finished
    Exported { path: PathBuf, success: bool },

    /// A snapshot import finished
    Imported { path: PathBuf, success: bool },
}

/// Events published by the coordinator
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// Combined usage exceeded the global budget
    MemoryLimitExceeded { usage: usize, limit: usize },

    /// Global utilization crossed the warning threshold
    MemoryPressure { ratio: f64 },

    /// The host process is consuming too much of system memory
    SystemMemoryPressure { ratio: f64 },

    /// An aggressive eviction pass ran
    EmergencyEviction { bytes_freed: usize },

    /// Periodic per-cache statistics
    CacheStatsUpdated { name: String, stats: CacheStats },

    /// Periodic global statistics
    GlobalStatsUpdated {
        total_memory: usize,
        hit_ratio: f64,
    },
}

type Subscriber<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Minimal synchronous event bus
///
/// Subscribers are invoked on the emitting thread, outside the bus lock,
/// so a callback may publish further events or touch the emitting cache
/// without deadlocking.
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for every future event
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribers.lock().unwrap().push(Arc::new(callback));
    }

    /// Deliver an event to every subscriber, in subscription order
    pub fn emit(&self, event: &E) {
        let subscribers: Vec<Subscriber<E>> = self.subscribers.lock().unwrap().clone();
        for subscriber in subscribers {
            subscriber(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.subscribe(move |value| {
                count.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }

        bus.emit(&5);
        assert_eq!(count.load(Ordering::SeqCst), 15);
        assert_eq!(bus.subscriber_count(), 3);
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus: EventBus<CacheEvent> = EventBus::new();
        bus.emit(&CacheEvent::Miss {
            key: "page_1".to_string(),
        });
    }

    #[test]
    fn test_subscriber_may_resubscribe_during_emit() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let bus_clone = Arc::clone(&bus);
        bus.subscribe(move |_| {
            bus_clone.subscribe(|_| {});
        });

        bus.emit(&1);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
