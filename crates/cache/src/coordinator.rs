//! Cache coordinator
//!
//! Owns the global memory budget across every registered cache tier and
//! drives pressure handling, limit enforcement, and adaptive limit
//! redistribution. The coordinator is plain data: construct one, hand it
//! the caches to supervise, and wire its periodic entry points to a
//! scheduler. Registration is non-owning (`Weak`), so dropping a cache
//! elsewhere simply makes it disappear from coordination.
//!
//! Locking rule: the registry lock is only held while snapshotting; no
//! cache method is ever called under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::component::{CacheComponent, CacheStats};
use crate::events::{CoordinatorEvent, EventBus};
use crate::memory::{MemoryPressure, MemorySource, ProcMemorySource};

/// Global coordination settings
#[derive(Debug, Clone, Copy)]
pub struct GlobalCacheConfig {
    /// Combined byte budget across all tiers
    pub total_memory_limit: usize,

    /// Utilization ratio that triggers pressure eviction
    pub warning_threshold: f64,

    /// Utilization ratio treated as an emergency
    pub critical_threshold: f64,

    /// Utilization to evict down to under pressure
    pub target_utilization: f64,

    /// Process share of system memory that triggers emergency eviction
    pub system_pressure_threshold: f64,

    /// How often expired-entry cleanup should run
    pub cleanup_interval: Duration,

    /// How often statistics should be published
    pub stats_interval: Duration,

    /// How often the system memory probe should run
    pub system_check_interval: Duration,

    /// Smallest share of the budget adaptive redistribution may assign
    pub adaptive_min_share: f64,

    /// Largest share of the budget adaptive redistribution may assign
    pub adaptive_max_share: f64,
}

impl Default for GlobalCacheConfig {
    fn default() -> Self {
        Self {
            total_memory_limit: 512 * 1024 * 1024,
            warning_threshold: 0.75,
            critical_threshold: 0.90,
            target_utilization: 0.70,
            system_pressure_threshold: 0.85,
            cleanup_interval: Duration::from_secs(30),
            stats_interval: Duration::from_secs(10),
            system_check_interval: Duration::from_secs(10),
            adaptive_min_share: 0.05,
            adaptive_max_share: 0.15,
        }
    }
}

impl GlobalCacheConfig {
    pub fn new(total_memory_mb: usize) -> Self {
        Self {
            total_memory_limit: total_memory_mb * 1024 * 1024,
            ..Default::default()
        }
    }

    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_critical_threshold(mut self, threshold: f64) -> Self {
        self.critical_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_target_utilization(mut self, target: f64) -> Self {
        self.target_utilization = target.clamp(0.0, 1.0);
        self
    }

    pub fn with_system_pressure_threshold(mut self, threshold: f64) -> Self {
        self.system_pressure_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

struct Registered {
    cache: Option<Weak<dyn CacheComponent>>,
    /// Byte limit assigned by the coordinator, if any
    limit: Option<usize>,
    /// Eviction strategy tag, configuration surface only
    strategy: String,
    /// Relative value of this tier for adaptive redistribution
    importance: f64,
    /// Hit ratio captured by the last usage-pattern pass
    last_hit_ratio: f64,
}

impl Default for Registered {
    fn default() -> Self {
        Self {
            cache: None,
            limit: None,
            strategy: "LRU".to_string(),
            importance: 0.5,
            last_hit_ratio: 0.0,
        }
    }
}

/// Coordinates budgets, pressure, and statistics across cache tiers
pub struct CacheCoordinator {
    registry: Mutex<HashMap<String, Registered>>,
    config: Mutex<GlobalCacheConfig>,
    events: EventBus<CoordinatorEvent>,
    memory_source: Box<dyn MemorySource>,
    adaptive_enabled: AtomicBool,
}

impl CacheCoordinator {
    pub fn new() -> Self {
        Self::with_memory_source(GlobalCacheConfig::default(), Box::new(ProcMemorySource))
    }

    pub fn with_config(config: GlobalCacheConfig) -> Self {
        Self::with_memory_source(config, Box::new(ProcMemorySource))
    }

    /// Construct with an injected system memory probe
    pub fn with_memory_source(config: GlobalCacheConfig, source: Box<dyn MemorySource>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
            events: EventBus::new(),
            memory_source: source,
            adaptive_enabled: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &EventBus<CoordinatorEvent> {
        &self.events
    }

    pub fn config(&self) -> GlobalCacheConfig {
        *self.config.lock().unwrap()
    }

    pub fn set_config(&self, config: GlobalCacheConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Register a cache under a name
    ///
    /// Re-registering a name replaces the previous reference. A byte
    /// limit assigned before registration is applied immediately.
    pub fn register_cache(&self, name: &str, cache: Arc<dyn CacheComponent>) {
        let pending_limit = {
            let mut registry = self.registry.lock().unwrap();
            let slot = registry.entry(name.to_string()).or_default();
            slot.cache = Some(Arc::downgrade(&cache));
            slot.limit
        };
        if let Some(limit) = pending_limit {
            cache.set_max_memory_limit(limit);
        }
        info!(cache = name, "cache registered");
    }

    /// Drop a cache from coordination; the cache itself is untouched
    pub fn unregister_cache(&self, name: &str) -> bool {
        self.registry.lock().unwrap().remove(name).is_some()
    }

    pub fn is_cache_registered(&self, name: &str) -> bool {
        let registry = self.registry.lock().unwrap();
        registry
            .get(name)
            .and_then(|slot| slot.cache.as_ref())
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registry.lock().unwrap().keys().cloned().collect()
    }

    /// Point-in-time view of the live caches; dead references are skipped
    fn snapshot(&self) -> Vec<(String, Arc<dyn CacheComponent>, Option<usize>)> {
        let registry = self.registry.lock().unwrap();
        registry
            .iter()
            .filter_map(|(name, slot)| {
                let cache = slot.cache.as_ref()?.upgrade()?;
                Some((name.clone(), cache, slot.limit))
            })
            .collect()
    }

    fn live_cache(&self, name: &str) -> Option<Arc<dyn CacheComponent>> {
        let registry = self.registry.lock().unwrap();
        registry.get(name)?.cache.as_ref()?.upgrade()
    }

    /// Combined usage of the enabled caches
    pub fn total_memory_usage(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|(_, cache, _)| cache.is_enabled())
            .map(|(_, cache, _)| cache.memory_usage())
            .sum()
    }

    pub fn total_memory_limit(&self) -> usize {
        self.config.lock().unwrap().total_memory_limit
    }

    /// Combined usage as a fraction of the global budget
    pub fn global_memory_usage_ratio(&self) -> f64 {
        let limit = self.total_memory_limit();
        if limit == 0 {
            return 0.0;
        }
        self.total_memory_usage() as f64 / limit as f64
    }

    /// Pressure classification of the current global ratio
    pub fn memory_pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.global_memory_usage_ratio())
    }

    /// Hit ratio across every live cache
    pub fn global_hit_ratio(&self) -> f64 {
        let mut hits = 0u64;
        let mut misses = 0u64;
        for (_, cache, _) in self.snapshot() {
            hits += cache.hit_count();
            misses += cache.miss_count();
        }
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn cache_stats(&self, name: &str) -> Option<CacheStats> {
        Some(self.live_cache(name)?.stats())
    }

    pub fn all_cache_stats(&self) -> Vec<(String, CacheStats)> {
        self.snapshot()
            .into_iter()
            .map(|(name, cache, _)| (name, cache.stats()))
            .collect()
    }

    pub fn clear_all_caches(&self) {
        for (_, cache, _) in self.snapshot() {
            cache.clear();
        }
    }

    pub fn clear_cache(&self, name: &str) -> bool {
        match self.live_cache(name) {
            Some(cache) => {
                cache.clear();
                true
            }
            None => false,
        }
    }

    pub fn set_cache_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.live_cache(name) {
            Some(cache) => {
                cache.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn is_cache_enabled(&self, name: &str) -> Option<bool> {
        Some(self.live_cache(name)?.is_enabled())
    }

    /// Assign a byte limit to a named cache
    ///
    /// Stored even when the cache is not registered yet; applied on
    /// registration.
    pub fn set_cache_limit(&self, name: &str, limit: usize) {
        let cache = {
            let mut registry = self.registry.lock().unwrap();
            let slot = registry.entry(name.to_string()).or_default();
            slot.limit = Some(limit);
            slot.cache.as_ref().and_then(Weak::upgrade)
        };
        if let Some(cache) = cache {
            cache.set_max_memory_limit(limit);
        }
    }

    pub fn cache_limit(&self, name: &str) -> Option<usize> {
        self.registry.lock().unwrap().get(name)?.limit
    }

    /// Relative tier value used by adaptive redistribution (0.0 to 1.0)
    pub fn set_cache_importance(&self, name: &str, importance: f64) {
        let mut registry = self.registry.lock().unwrap();
        let slot = registry.entry(name.to_string()).or_default();
        slot.importance = importance.clamp(0.0, 1.0);
    }

    /// Set a cache's eviction strategy tag
    ///
    /// Accepts `LRU`, `LFU`, `FIFO`, and `TTL` case-insensitively;
    /// anything else falls back to `LRU`.
    pub fn set_eviction_strategy(&self, name: &str, strategy: &str) {
        let canonical = match strategy.to_ascii_lowercase().as_str() {
            "lru" => "LRU",
            "lfu" => "LFU",
            "fifo" => "FIFO",
            "ttl" => "TTL",
            other => {
                warn!(cache = name, strategy = other, "unknown eviction strategy, using LRU");
                "LRU"
            }
        };
        let mut registry = self.registry.lock().unwrap();
        let slot = registry.entry(name.to_string()).or_default();
        slot.strategy = canonical.to_string();
    }

    pub fn eviction_strategy(&self, name: &str) -> String {
        self.registry
            .lock()
            .unwrap()
            .get(name)
            .map(|slot| slot.strategy.clone())
            .unwrap_or_else(|| "LRU".to_string())
    }

    /// Evict any cache exceeding its assigned limit back down to it
    ///
    /// Returns the bytes evicted. Emits [`CoordinatorEvent::MemoryLimitExceeded`]
    /// when the combined usage is over the global budget.
    pub fn enforce_memory_limits(&self) -> usize {
        let mut freed = 0;
        for (name, cache, assigned) in self.snapshot() {
            let limit = assigned.unwrap_or_else(|| cache.max_memory_limit());
            let usage = cache.memory_usage();
            if usage > limit {
                let evicted = cache.evict_lru(usage - limit);
                debug!(cache = %name, evicted, "per-cache limit enforced");
                freed += evicted;
            }
        }

        let usage = self.total_memory_usage();
        let limit = self.total_memory_limit();
        if usage > limit {
            self.events
                .emit(&CoordinatorEvent::MemoryLimitExceeded { usage, limit });
        }
        freed
    }

    /// React to global cache pressure
    ///
    /// When utilization is past the warning threshold, evicts down toward
    /// the target, draining low-hit-ratio caches first and taking at most
    /// half of any single cache's usage per pass. Returns the bytes freed.
    pub fn handle_memory_pressure(&self) -> usize {
        let config = self.config();
        let ratio = self.global_memory_usage_ratio();
        if ratio <= config.warning_threshold {
            return 0;
        }
        self.events.emit(&CoordinatorEvent::MemoryPressure { ratio });
        warn!(ratio, "cache memory pressure");

        let target = (config.total_memory_limit as f64 * config.target_utilization) as usize;
        let usage = self.total_memory_usage();
        let mut remaining = usage.saturating_sub(target);

        let mut caches: Vec<(Arc<dyn CacheComponent>, f64)> = self
            .snapshot()
            .into_iter()
            .filter(|(_, cache, _)| cache.is_enabled())
            .map(|(_, cache, _)| {
                let rate = cache.stats().hit_rate();
                (cache, rate)
            })
            .collect();
        caches.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut freed = 0;
        for (cache, _) in caches {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(cache.memory_usage() / 2);
            if take == 0 {
                continue;
            }
            let evicted = cache.evict_lru(take);
            freed += evicted;
            remaining = remaining.saturating_sub(evicted);
        }

        if ratio >= config.critical_threshold {
            self.events
                .emit(&CoordinatorEvent::EmergencyEviction { bytes_freed: freed });
        }
        freed
    }

    /// React to the process's share of system memory
    ///
    /// When the probe reports a share past the configured threshold,
    /// evicts a quarter of every cache's usage proportionally. Returns
    /// the bytes freed.
    pub fn handle_system_memory_pressure(&self) -> usize {
        let Some(share) = self.memory_source.system_memory_pressure() else {
            return 0;
        };
        let threshold = self.config().system_pressure_threshold;
        if share <= threshold {
            return 0;
        }
        warn!(share, "system memory pressure");
        self.events
            .emit(&CoordinatorEvent::SystemMemoryPressure { ratio: share });

        let mut freed = 0;
        for (_, cache, _) in self.snapshot() {
            let take = cache.memory_usage() / 4;
            if take > 0 {
                freed += cache.evict_lru(take);
            }
        }
        self.events
            .emit(&CoordinatorEvent::EmergencyEviction { bytes_freed: freed });
        freed
    }

    pub fn set_adaptive_enabled(&self, enabled: bool) {
        self.adaptive_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_adaptive_enabled(&self) -> bool {
        self.adaptive_enabled.load(Ordering::SeqCst)
    }

    /// Capture per-cache hit ratios for the next redistribution pass
    pub fn record_usage_patterns(&self) {
        let ratios: Vec<(String, f64)> = self
            .snapshot()
            .into_iter()
            .map(|(name, cache, _)| (name, cache.stats().hit_rate()))
            .collect();

        let mut registry = self.registry.lock().unwrap();
        for (name, ratio) in ratios {
            if let Some(slot) = registry.get_mut(&name) {
                slot.last_hit_ratio = ratio;
            }
        }
    }

    /// Reassign per-cache byte limits from observed hit ratios
    ///
    /// Each cache gets `total * (0.7 * hit_ratio + 0.3 * importance)`
    /// scaled into the configured share window, clamped to
    /// `[adaptive_min_share, adaptive_max_share]` of the global budget.
    /// No-op unless adaptive management is enabled.
    pub fn redistribute_limits(&self) {
        if !self.is_adaptive_enabled() {
            return;
        }
        let config = self.config();
        let total = config.total_memory_limit as f64;

        let plan: Vec<(String, Arc<dyn CacheComponent>, usize)> = {
            let registry = self.registry.lock().unwrap();
            registry
                .iter()
                .filter_map(|(name, slot)| {
                    let cache = slot.cache.as_ref()?.upgrade()?;
                    let factor = 0.7 * slot.last_hit_ratio + 0.3 * slot.importance;
                    let share = (factor * config.adaptive_max_share)
                        .clamp(config.adaptive_min_share, config.adaptive_max_share);
                    Some((name.clone(), cache, (total * share) as usize))
                })
                .collect()
        };

        for (name, cache, limit) in plan {
            cache.set_max_memory_limit(limit);
            info!(cache = %name, limit, "adaptive limit assigned");
            let mut registry = self.registry.lock().unwrap();
            if let Some(slot) = registry.get_mut(&name) {
                slot.limit = Some(limit);
            }
        }
    }

    /// Publish per-cache and global statistics
    pub fn update_statistics(&self) {
        let snapshot = self.snapshot();
        let mut total_memory = 0;
        let mut hits = 0u64;
        let mut misses = 0u64;

        for (name, cache, _) in &snapshot {
            let stats = cache.stats();
            total_memory += stats.memory_used;
            hits += stats.hits;
            misses += stats.misses;
            self.events.emit(&CoordinatorEvent::CacheStatsUpdated {
                name: name.clone(),
                stats,
            });
        }

        let total = hits + misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        self.events.emit(&CoordinatorEvent::GlobalStatsUpdated {
            total_memory,
            hit_ratio,
        });
    }
}

impl Default for CacheCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactCache, ArtifactKey};
    use crate::memory::FixedMemorySource;
    use crate::types::{CachePayload, CachePriority};
    use std::sync::atomic::AtomicUsize;

    fn filled_cache(pages: u32) -> Arc<ArtifactCache> {
        let cache = Arc::new(ArtifactCache::with_mb_limit(64));
        for page in 0..pages {
            cache.insert(
                ArtifactKey::thumbnail(page),
                CachePayload::Bitmap {
                    width: 64,
                    height: 64,
                    pixels: vec![0u8; 64 * 64 * 4],
                },
                CachePriority::Normal,
            );
        }
        cache
    }

    #[test]
    fn test_register_and_totals() {
        let coordinator = CacheCoordinator::new();
        let cache = filled_cache(4);
        coordinator.register_cache("artifacts", cache.clone());

        assert!(coordinator.is_cache_registered("artifacts"));
        assert_eq!(coordinator.total_memory_usage(), cache.memory_usage());
        assert!(coordinator.cache_stats("artifacts").is_some());
    }

    #[test]
    fn test_dead_reference_tolerated() {
        let coordinator = CacheCoordinator::new();
        {
            let cache = filled_cache(4);
            coordinator.register_cache("artifacts", cache);
        }

        assert!(!coordinator.is_cache_registered("artifacts"));
        assert_eq!(coordinator.total_memory_usage(), 0);
        assert!(coordinator.cache_stats("artifacts").is_none());
        assert_eq!(coordinator.enforce_memory_limits(), 0);
    }

    #[test]
    fn test_reregistration_replaces() {
        let coordinator = CacheCoordinator::new();
        let first = filled_cache(2);
        let second = filled_cache(8);
        coordinator.register_cache("artifacts", first);
        coordinator.register_cache("artifacts", second.clone());

        assert_eq!(coordinator.total_memory_usage(), second.memory_usage());
    }

    #[test]
    fn test_limit_applied_on_registration() {
        let coordinator = CacheCoordinator::new();
        coordinator.set_cache_limit("artifacts", 2 * 64 * 64 * 4 + 10);

        let cache = filled_cache(8);
        coordinator.register_cache("artifacts", cache.clone());

        assert!(cache.memory_usage() <= 2 * 64 * 64 * 4 + 10);
        assert_eq!(coordinator.cache_limit("artifacts"), Some(2 * 64 * 64 * 4 + 10));
    }

    #[test]
    fn test_enforce_memory_limits_evicts() {
        let coordinator = CacheCoordinator::new();
        let cache = filled_cache(8);
        coordinator.register_cache("artifacts", cache.clone());

        // Shrink the assigned limit below current usage without the
        // setter path so enforcement has work to do
        let usage = cache.memory_usage();
        {
            let mut registry = coordinator.registry.lock().unwrap();
            registry.get_mut("artifacts").unwrap().limit = Some(usage / 2);
        }

        let freed = coordinator.enforce_memory_limits();
        assert!(freed >= usage / 2 - 64 * 64 * 4);
        assert!(cache.memory_usage() <= usage / 2);
    }

    #[test]
    fn test_memory_pressure_eviction() {
        let tile = 64 * 64 * 4;
        let config = GlobalCacheConfig {
            total_memory_limit: 10 * tile,
            ..Default::default()
        };
        let coordinator =
            CacheCoordinator::with_memory_source(config, Box::new(FixedMemorySource(0.0)));
        let cache = filled_cache(9); // 90% of budget
        coordinator.register_cache("artifacts", cache.clone());

        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        coordinator.events().subscribe(move |event| {
            if matches!(event, CoordinatorEvent::MemoryPressure { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let freed = coordinator.handle_memory_pressure();
        assert!(freed > 0);
        assert!(cache.memory_usage() < 9 * tile);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_pressure_below_warning() {
        let coordinator = CacheCoordinator::new();
        let cache = filled_cache(2);
        coordinator.register_cache("artifacts", cache);
        assert_eq!(coordinator.handle_memory_pressure(), 0);
    }

    #[test]
    fn test_system_pressure_eviction() {
        let coordinator = CacheCoordinator::with_memory_source(
            GlobalCacheConfig::default(),
            Box::new(FixedMemorySource(0.95)),
        );
        let cache = filled_cache(8);
        coordinator.register_cache("artifacts", cache.clone());

        let before = cache.memory_usage();
        let freed = coordinator.handle_system_memory_pressure();
        assert!(freed > 0);
        assert!(cache.memory_usage() < before);
    }

    #[test]
    fn test_system_pressure_quiet_below_threshold() {
        let coordinator = CacheCoordinator::with_memory_source(
            GlobalCacheConfig::default(),
            Box::new(FixedMemorySource(0.10)),
        );
        let cache = filled_cache(8);
        coordinator.register_cache("artifacts", cache.clone());
        assert_eq!(coordinator.handle_system_memory_pressure(), 0);
    }

    #[test]
    fn test_adaptive_redistribution_clamped() {
        let coordinator = CacheCoordinator::new();
        let total = coordinator.total_memory_limit() as f64;

        let cold = filled_cache(2); // no lookups, hit ratio 0
        let hot = filled_cache(2);
        for page in 0..2 {
            hot.get(&ArtifactKey::thumbnail(page));
        }
        coordinator.register_cache("cold", cold.clone());
        coordinator.register_cache("hot", hot.clone());

        coordinator.set_adaptive_enabled(true);
        coordinator.record_usage_patterns();
        coordinator.redistribute_limits();

        let config = coordinator.config();
        let min = (total * config.adaptive_min_share) as usize;
        let max = (total * config.adaptive_max_share) as usize;

        let cold_limit = cold.max_memory_limit();
        let hot_limit = hot.max_memory_limit();
        assert!(cold_limit >= min && cold_limit <= max);
        assert!(hot_limit >= min && hot_limit <= max);
        assert!(hot_limit > cold_limit);
    }

    #[test]
    fn test_adaptive_noop_when_disabled() {
        let coordinator = CacheCoordinator::new();
        let cache = filled_cache(2);
        let before = cache.max_memory_limit();
        coordinator.register_cache("artifacts", cache.clone());
        coordinator.record_usage_patterns();
        coordinator.redistribute_limits();
        assert_eq!(cache.max_memory_limit(), before);
    }

    #[test]
    fn test_eviction_strategy_normalization() {
        let coordinator = CacheCoordinator::new();
        coordinator.set_eviction_strategy("artifacts", "ttl");
        assert_eq!(coordinator.eviction_strategy("artifacts"), "TTL");
        coordinator.set_eviction_strategy("artifacts", "mystery");
        assert_eq!(coordinator.eviction_strategy("artifacts"), "LRU");
        assert_eq!(coordinator.eviction_strategy("unknown"), "LRU");
    }

    #[test]
    fn test_clear_and_enable_by_name() {
        let coordinator = CacheCoordinator::new();
        let cache = filled_cache(4);
        coordinator.register_cache("artifacts", cache.clone());

        assert!(coordinator.clear_cache("artifacts"));
        assert_eq!(cache.entry_count(), 0);

        assert!(coordinator.set_cache_enabled("artifacts", false));
        assert_eq!(coordinator.is_cache_enabled("artifacts"), Some(false));
        assert!(!coordinator.clear_cache("missing"));
    }

    #[test]
    fn test_update_statistics_publishes() {
        let coordinator = CacheCoordinator::new();
        let cache = filled_cache(2);
        cache.get(&ArtifactKey::thumbnail(0));
        coordinator.register_cache("artifacts", cache.clone());

        let per_cache = Arc::new(AtomicUsize::new(0));
        let global = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&per_cache);
        let g = Arc::clone(&global);
        coordinator.events().subscribe(move |event| match event {
            CoordinatorEvent::CacheStatsUpdated { .. } => {
                p.fetch_add(1, Ordering::SeqCst);
            }
            CoordinatorEvent::GlobalStatsUpdated { .. } => {
                g.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        });

        coordinator.update_statistics();
        assert_eq!(per_cache.load(Ordering::SeqCst), 1);
        assert_eq!(global.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_registration_and_iteration() {
        let coordinator = Arc::new(CacheCoordinator::new());
        let mut handles = Vec::new();

        for t in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let name = format!("cache-{}-{}", t, i % 5);
                    let cache = filled_cache(1);
                    coordinator.register_cache(&name, cache);
                    coordinator.total_memory_usage();
                    coordinator.all_cache_stats();
                    coordinator.unregister_cache(&name);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
