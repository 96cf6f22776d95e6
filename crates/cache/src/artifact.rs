//! Artifact cache for rendered pages, thumbnails, text, and annotations
//!
//! Bounded by both bytes and entry count. Eviction is scored: each entry
//! gets `priority_weight + age_seconds + 1 / (access_count + 1)` and the
//! lowest-scored candidate goes first. `Critical` entries are never
//! candidates, so a cache full of pinned entries rejects new inserts
//! rather than dropping them.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::component::{CacheComponent, CacheStats};
use crate::events::{CacheEvent, EventBus};
use crate::persist::{self, EntryMeta, ImportSummary, PersistError, Snapshot, SnapshotConfig};
use crate::types::{now_millis, ArtifactKind, CachePayload, CachePriority};

/// Default byte ceiling (256 MB)
pub const DEFAULT_MAX_MEMORY: usize = 256 * 1024 * 1024;

/// Default entry ceiling
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default per-entry maximum age (30 minutes)
pub const DEFAULT_ITEM_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Entries with no accesses older than this are dropped by [`ArtifactCache::optimize`]
const OPTIMIZE_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Key identifying one artifact
///
/// Composed of the artifact kind, the logical page, and an optional
/// modifier such as a render scale. Scale modifiers are canonicalized to
/// two decimals so equivalent spellings map to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub page_number: u32,
    pub modifier: Option<String>,
}

impl ArtifactKey {
    pub fn new(kind: ArtifactKind, page_number: u32) -> Self {
        Self {
            kind,
            page_number,
            modifier: None,
        }
    }

    pub fn with_modifier(kind: ArtifactKind, page_number: u32, modifier: impl Into<String>) -> Self {
        Self {
            kind,
            page_number,
            modifier: Some(modifier.into()),
        }
    }

    /// Key for a page rendered at a given scale
    pub fn rendered_page(page_number: u32, scale: f64) -> Self {
        Self::with_modifier(ArtifactKind::RenderedPage, page_number, format!("{:.2}", scale))
    }

    /// Key for a page thumbnail
    pub fn thumbnail(page_number: u32) -> Self {
        Self::new(ArtifactKind::Thumbnail, page_number)
    }

    /// Key for extracted page text
    pub fn text_content(page_number: u32) -> Self {
        Self::new(ArtifactKind::TextContent, page_number)
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.modifier {
            Some(modifier) => write!(f, "{}_{}_{}", self.kind.tag(), self.page_number, modifier),
            None => write!(f, "{}_{}", self.kind.tag(), self.page_number),
        }
    }
}

/// Per-tier weights used by the eviction score
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    pub low: f64,
    pub normal: f64,
    pub high: f64,
}

impl PriorityWeights {
    /// Weight for a priority tier; `Critical` is twice `high` for
    /// reporting purposes but never actually scored
    pub fn weight(&self, priority: CachePriority) -> f64 {
        match priority {
            CachePriority::Low => self.low,
            CachePriority::Normal => self.normal,
            CachePriority::High => self.high,
            CachePriority::Critical => self.high * 2.0,
        }
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            low: 0.1,
            normal: 1.0,
            high: 10.0,
        }
    }
}

/// Extended artifact statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactCacheStats {
    pub entry_count: usize,
    pub memory_used: usize,
    pub memory_limit: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removed: u64,
    pub average_hit_micros: f64,
}

struct ArtifactEntry {
    payload: CachePayload,
    priority: CachePriority,
    size_bytes: usize,
    created_ms: u64,
    last_access_ms: u64,
    access_count: u64,
}

impl ArtifactEntry {
    fn is_expired(&self, now_ms: u64, max_age: Duration) -> bool {
        if max_age.is_zero() {
            return false;
        }
        now_ms.saturating_sub(self.created_ms) >= max_age.as_millis() as u64
    }

    fn eviction_score(&self, now_ms: u64, weights: &PriorityWeights) -> f64 {
        let age_seconds = now_ms.saturating_sub(self.created_ms) as f64 / 1000.0;
        weights.weight(self.priority) + age_seconds + 1.0 / (self.access_count as f64 + 1.0)
    }
}

struct ArtifactState {
    entries: HashMap<ArtifactKey, ArtifactEntry>,
    memory_used: usize,
    max_memory: usize,
    max_items: usize,
    item_max_age: Duration,
    eviction_policy: String,
    weights: PriorityWeights,
    evictions: u64,
    expired_removed: u64,
    preload_enabled: bool,
    preload_strategy: String,
    preload_queue: VecDeque<(u32, ArtifactKind)>,
}

impl ArtifactState {
    fn new(max_memory: usize) -> Self {
        Self {
            entries: HashMap::new(),
            memory_used: 0,
            max_memory,
            max_items: DEFAULT_MAX_ITEMS,
            item_max_age: DEFAULT_ITEM_MAX_AGE,
            eviction_policy: "LRU".to_string(),
            weights: PriorityWeights::default(),
            evictions: 0,
            expired_removed: 0,
            preload_enabled: true,
            preload_strategy: "adaptive".to_string(),
            preload_queue: VecDeque::new(),
        }
    }

    fn remove_entry(&mut self, key: &ArtifactKey) -> Option<ArtifactEntry> {
        let entry = self.entries.remove(key)?;
        debug_assert!(
            self.memory_used >= entry.size_bytes,
            "artifact cache accounting underflow"
        );
        self.memory_used = self.memory_used.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Remove the lowest-scored non-Critical entry, expired ones first.
    /// Pushes the removed key into `evicted` and returns the bytes freed,
    /// or `None` when every remaining entry is pinned.
    fn evict_one(&mut self, evicted: &mut Vec<ArtifactKey>) -> Option<usize> {
        let now_ms = now_millis();

        let expired = self
            .entries
            .iter()
            .find(|(_, e)| e.priority != CachePriority::Critical && e.is_expired(now_ms, self.item_max_age))
            .map(|(k, _)| k.clone());

        let victim = match expired {
            Some(key) => {
                self.expired_removed += 1;
                Some(key)
            }
            None => self
                .entries
                .iter()
                .filter(|(_, e)| e.priority != CachePriority::Critical)
                .min_by(|(_, a), (_, b)| {
                    a.eviction_score(now_ms, &self.weights)
                        .total_cmp(&b.eviction_score(now_ms, &self.weights))
                })
                .map(|(k, _)| k.clone()),
        }?;

        let entry = self.remove_entry(&victim)?;
        self.evictions += 1;
        evicted.push(victim);
        Some(entry.size_bytes)
    }
}

#[derive(Default)]
struct LookupCounters {
    hits: u64,
    misses: u64,
    total_hit_micros: u64,
}

/// Thread-safe artifact cache with scored eviction
///
/// Structural state and lookup counters sit behind independent locks so
/// statistics reads never contend with inserts.
pub struct ArtifactCache {
    state: Mutex<ArtifactState>,
    counters: Mutex<LookupCounters>,
    enabled: AtomicBool,
    events: EventBus<CacheEvent>,
}

impl ArtifactCache {
    /// Create a cache with the given byte ceiling
    pub fn new(max_memory: usize) -> Self {
        Self {
            state: Mutex::new(ArtifactState::new(max_memory)),
            counters: Mutex::new(LookupCounters::default()),
            enabled: AtomicBool::new(true),
            events: EventBus::new(),
        }
    }

    /// Create a cache with a ceiling in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Event stream for hits, misses, evictions, and maintenance
    pub fn events(&self) -> &EventBus<CacheEvent> {
        &self.events
    }

    /// Store an artifact
    ///
    /// Evicts lowest-scored entries until the new artifact fits under
    /// both ceilings. Returns `false` when the cache is disabled or no
    /// amount of eviction can make room; a failed replacement leaves
    /// the prior entry at the key intact.
    pub fn insert(&self, key: ArtifactKey, payload: CachePayload, priority: CachePriority) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let size = payload.size_bytes();
        let mut evicted = Vec::new();
        let inserted = {
            let mut state = self.state.lock().unwrap();

            // Lift the old entry out so its bytes count as reclaimable
            // for the fit check; it goes back if the new payload loses.
            let previous = state.remove_entry(&key);
            if let Some(old) = &previous {
                debug!(key = %key, old_size = old.size_bytes, "replacing cached artifact");
            }

            let mut fits = true;
            while state.entries.len() + 1 > state.max_items
                || state.memory_used + size > state.max_memory
            {
                if state.evict_one(&mut evicted).is_none() {
                    fits = false;
                    break;
                }
            }

            if fits {
                let now = now_millis();
                state.memory_used += size;
                state.entries.insert(
                    key.clone(),
                    ArtifactEntry {
                        payload,
                        priority,
                        size_bytes: size,
                        created_ms: now,
                        last_access_ms: now,
                        access_count: 0,
                    },
                );
            } else if let Some(old) = previous {
                state.memory_used += old.size_bytes;
                state.entries.insert(key.clone(), old);
            }
            fits
        };

        for key in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: key.to_string() });
        }
        if !inserted {
            warn!(key = %key, size, "artifact rejected: eviction could not make room");
        }
        inserted
    }

    /// Look up an artifact, updating recency and hit statistics
    pub fn get(&self, key: &ArtifactKey) -> Option<CachePayload> {
        let start = Instant::now();
        let payload = {
            let mut state = self.state.lock().unwrap();
            match state.entries.get_mut(key) {
                Some(entry) if self.is_enabled() => {
                    entry.access_count += 1;
                    entry.last_access_ms = now_millis();
                    Some(entry.payload.clone())
                }
                _ => None,
            }
        };

        let mut counters = self.counters.lock().unwrap();
        match payload {
            Some(payload) => {
                let latency_micros = start.elapsed().as_micros() as u64;
                counters.hits += 1;
                counters.total_hit_micros += latency_micros;
                drop(counters);
                self.events.emit(&CacheEvent::Hit {
                    key: key.to_string(),
                    latency_micros,
                });
                Some(payload)
            }
            None => {
                counters.misses += 1;
                drop(counters);
                self.events.emit(&CacheEvent::Miss { key: key.to_string() });
                None
            }
        }
    }

    /// Check for an artifact without touching recency or statistics
    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.state.lock().unwrap().entries.contains_key(key)
    }

    /// Remove an artifact explicitly; works on any priority
    pub fn remove(&self, key: &ArtifactKey) -> bool {
        self.state.lock().unwrap().remove_entry(key).is_some()
    }

    /// Drop every artifact belonging to a logical page, any kind
    pub fn invalidate_page(&self, page_number: u32) -> usize {
        let mut state = self.state.lock().unwrap();
        let keys: Vec<ArtifactKey> = state
            .entries
            .keys()
            .filter(|k| k.page_number == page_number)
            .cloned()
            .collect();
        for key in &keys {
            state.remove_entry(key);
        }
        keys.len()
    }

    /// Change an artifact's retention priority
    pub fn set_priority(&self, key: &ArtifactKey, priority: CachePriority) -> bool {
        let changed = {
            let mut state = self.state.lock().unwrap();
            match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.priority = priority;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.events.emit(&CacheEvent::PriorityChanged {
                key: key.to_string(),
                priority,
            });
        }
        changed
    }

    /// Shortcut for promoting an artifact to `High`
    pub fn promote_to_high(&self, key: &ArtifactKey) -> bool {
        self.set_priority(key, CachePriority::High)
    }

    /// Reset an artifact's insertion timestamp and bump its access count
    pub fn refresh(&self, key: &ArtifactKey) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.entries.get_mut(key) {
            Some(entry) => {
                let now = now_millis();
                entry.created_ms = now;
                entry.last_access_ms = now;
                entry.access_count += 1;
                true
            }
            None => false,
        }
    }

    /// Set the eviction policy tag
    ///
    /// Accepts `LRU`, `LFU`, `FIFO`, and `Priority` case-insensitively.
    /// Anything else falls back to `LRU`. The tag is configuration
    /// surface; replacement order is always the scored policy.
    pub fn set_eviction_policy(&self, policy: &str) {
        let canonical = match policy.to_ascii_lowercase().as_str() {
            "lru" => "LRU",
            "lfu" => "LFU",
            "fifo" => "FIFO",
            "priority" => "Priority",
            other => {
                warn!(policy = other, "unknown eviction policy, using LRU");
                "LRU"
            }
        };
        self.state.lock().unwrap().eviction_policy = canonical.to_string();
    }

    pub fn eviction_policy(&self) -> String {
        self.state.lock().unwrap().eviction_policy.clone()
    }

    /// Set the scoring weights for the Low, Normal, and High tiers
    ///
    /// Negative weights are rejected and the previous weights kept.
    pub fn set_priority_weights(&self, low: f64, normal: f64, high: f64) -> bool {
        if low < 0.0 || normal < 0.0 || high < 0.0 {
            warn!(low, normal, high, "rejecting negative priority weights");
            return false;
        }
        self.state.lock().unwrap().weights = PriorityWeights { low, normal, high };
        true
    }

    pub fn priority_weights(&self) -> PriorityWeights {
        self.state.lock().unwrap().weights
    }

    /// Set the per-entry maximum age; zero disables aging
    pub fn set_item_max_age(&self, max_age: Duration) {
        self.state.lock().unwrap().item_max_age = max_age;
    }

    pub fn item_max_age(&self) -> Duration {
        self.state.lock().unwrap().item_max_age
    }

    /// Change the entry ceiling, evicting down to fit
    pub fn set_max_items(&self, max_items: usize) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            state.max_items = max_items.max(1);
            while state.entries.len() > state.max_items {
                if state.evict_one(&mut evicted).is_none() {
                    break;
                }
            }
        }
        for key in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: key.to_string() });
        }
    }

    pub fn max_items(&self) -> usize {
        self.state.lock().unwrap().max_items
    }

    /// Remove expired non-Critical entries; returns how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let now_ms = now_millis();
            let max_age = state.item_max_age;
            let keys: Vec<ArtifactKey> = state
                .entries
                .iter()
                .filter(|(_, e)| {
                    e.priority != CachePriority::Critical && e.is_expired(now_ms, max_age)
                })
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                state.remove_entry(key);
                state.expired_removed += 1;
                evicted.push(key.clone());
            }
        }
        for key in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: key.to_string() });
        }
        evicted.len()
    }

    /// Optimization pass: expired entries plus never-accessed entries
    /// older than five minutes. Returns `(items_removed, bytes_freed)`.
    pub fn optimize(&self) -> (usize, usize) {
        self.optimize_with(OPTIMIZE_STALE_AFTER)
    }

    /// Optimization pass with an explicit staleness cutoff for
    /// never-accessed entries
    pub fn optimize_with(&self, stale_after: Duration) -> (usize, usize) {
        let mut evicted = Vec::new();
        let bytes_freed = {
            let mut state = self.state.lock().unwrap();
            let now_ms = now_millis();
            let max_age = state.item_max_age;
            let stale_ms = stale_after.as_millis() as u64;

            let keys: Vec<ArtifactKey> = state
                .entries
                .iter()
                .filter(|(_, e)| {
                    if e.priority == CachePriority::Critical {
                        return false;
                    }
                    e.is_expired(now_ms, max_age)
                        || (e.access_count == 0
                            && now_ms.saturating_sub(e.created_ms) >= stale_ms)
                })
                .map(|(k, _)| k.clone())
                .collect();

            let mut freed = 0;
            for key in &keys {
                if let Some(entry) = state.remove_entry(key) {
                    freed += entry.size_bytes;
                    evicted.push(key.clone());
                }
            }
            freed
        };

        for key in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: key.to_string() });
        }
        if !evicted.is_empty() {
            debug!(items = evicted.len(), bytes_freed, "artifact cache optimized");
        }
        self.events.emit(&CacheEvent::Optimized {
            items_removed: evicted.len(),
            bytes_freed,
        });
        (evicted.len(), bytes_freed)
    }

    /// All cached keys, unordered
    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.state.lock().unwrap().entries.keys().cloned().collect()
    }

    /// Cached keys of one kind, unordered
    pub fn keys_of_kind(&self, kind: ArtifactKind) -> Vec<ArtifactKey> {
        self.state
            .lock()
            .unwrap()
            .entries
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect()
    }

    /// Entry counts grouped by artifact kind
    pub fn count_by_kind(&self) -> HashMap<ArtifactKind, usize> {
        let state = self.state.lock().unwrap();
        let mut counts = HashMap::new();
        for key in state.entries.keys() {
            *counts.entry(key.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Byte usage grouped by artifact kind
    pub fn memory_usage_by_kind(&self) -> HashMap<ArtifactKind, usize> {
        let state = self.state.lock().unwrap();
        let mut usage = HashMap::new();
        for (key, entry) in &state.entries {
            *usage.entry(key.kind).or_insert(0) += entry.size_bytes;
        }
        usage
    }

    /// Extended statistics including eviction and latency detail
    pub fn detailed_stats(&self) -> ArtifactCacheStats {
        let (entry_count, memory_used, memory_limit, evictions, expired_removed) = {
            let state = self.state.lock().unwrap();
            (
                state.entries.len(),
                state.memory_used,
                state.max_memory,
                state.evictions,
                state.expired_removed,
            )
        };
        let counters = self.counters.lock().unwrap();
        let average_hit_micros = if counters.hits == 0 {
            0.0
        } else {
            counters.total_hit_micros as f64 / counters.hits as f64
        };
        ArtifactCacheStats {
            entry_count,
            memory_used,
            memory_limit,
            hits: counters.hits,
            misses: counters.misses,
            evictions,
            expired_removed,
            average_hit_micros,
        }
    }

    // Preloading surface. The cache only plans: it queues page requests
    // and publishes them; an external producer renders and inserts.

    pub fn set_preloading_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().preload_enabled = enabled;
    }

    pub fn is_preloading_enabled(&self) -> bool {
        self.state.lock().unwrap().preload_enabled
    }

    /// Set the preload strategy tag (`sequential` or `adaptive`;
    /// anything else falls back to `adaptive`)
    pub fn set_preloading_strategy(&self, strategy: &str) {
        let canonical = match strategy.to_ascii_lowercase().as_str() {
            "sequential" => "sequential",
            "adaptive" => "adaptive",
            other => {
                warn!(strategy = other, "unknown preload strategy, using adaptive");
                "adaptive"
            }
        };
        self.state.lock().unwrap().preload_strategy = canonical.to_string();
    }

    pub fn preloading_strategy(&self) -> String {
        self.state.lock().unwrap().preload_strategy.clone()
    }

    /// Queue preload requests for specific pages, skipping pages that
    /// already have an artifact of that kind
    pub fn request_preload(&self, pages: &[u32], kind: ArtifactKind) {
        let mut emitted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.preload_enabled {
                return;
            }
            for &page in pages {
                let cached = state
                    .entries
                    .keys()
                    .any(|k| k.kind == kind && k.page_number == page);
                let queued = state.preload_queue.iter().any(|&(p, k)| p == page && k == kind);
                if !cached && !queued {
                    state.preload_queue.push_back((page, kind));
                    emitted.push(page);
                }
            }
        }
        for page in emitted {
            self.events.emit(&CacheEvent::PreloadRequested { page, kind });
        }
    }

    /// Queue preload requests for the pages around `center`
    pub fn request_preload_around(&self, center: u32, radius: u32) {
        let first = center.saturating_sub(radius);
        let pages: Vec<u32> = (first..=center.saturating_add(radius))
            .filter(|&p| p != center)
            .collect();
        self.request_preload(&pages, ArtifactKind::RenderedPage);
    }

    /// Drain queued preload requests for an external producer
    pub fn take_preload_requests(&self) -> Vec<(u32, ArtifactKind)> {
        self.state.lock().unwrap().preload_queue.drain(..).collect()
    }

    /// Export configuration and entry metadata to a snapshot file
    ///
    /// Payload bytes are never written. Emits `Exported` with the
    /// outcome either way.
    pub fn export_to_file(&self, path: &Path) -> Result<(), PersistError> {
        let snapshot = {
            let state = self.state.lock().unwrap();
            Snapshot {
                config: SnapshotConfig {
                    max_memory: state.max_memory as u64,
                    max_items: state.max_items as u32,
                    max_age_secs: state.item_max_age.as_secs(),
                    eviction_policy: state.eviction_policy.clone(),
                },
                entries: state
                    .entries
                    .iter()
                    .map(|(key, entry)| EntryMeta {
                        kind: key.kind,
                        page_number: key.page_number,
                        modifier: key.modifier.clone(),
                        priority: entry.priority,
                        created_ms: entry.created_ms,
                        last_access_ms: entry.last_access_ms,
                        access_count: entry.access_count,
                        size_bytes: entry.size_bytes as u64,
                    })
                    .collect(),
            }
        };

        let result = persist::write_snapshot_file(path, &snapshot);
        self.events.emit(&CacheEvent::Exported {
            path: path.to_path_buf(),
            success: result.is_ok(),
        });
        result
    }

    /// Validate a snapshot file and summarize its contents
    ///
    /// Reads metadata only; cache state is never touched, so a corrupt
    /// or mismatched file cannot damage a live cache. Emits `Imported`
    /// with the outcome either way.
    pub fn import_from_file(&self, path: &Path) -> Result<ImportSummary, PersistError> {
        let result = persist::read_snapshot_file(path).map(ImportSummary::from);
        if result.is_err() {
            warn!(path = %path.display(), "cache snapshot import failed");
        }
        self.events.emit(&CacheEvent::Imported {
            path: path.to_path_buf(),
            success: result.is_ok(),
        });
        result
    }

    fn clear_inner(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.memory_used = 0;
        state.preload_queue.clear();
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY)
    }
}

impl CacheComponent for ArtifactCache {
    fn memory_usage(&self) -> usize {
        self.state.lock().unwrap().memory_used
    }

    fn max_memory_limit(&self) -> usize {
        self.state.lock().unwrap().max_memory
    }

    fn set_max_memory_limit(&self, limit: usize) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            state.max_memory = limit;
            while state.memory_used > state.max_memory {
                if state.evict_one(&mut evicted).is_none() {
                    // Pinned entries can keep the cache over a shrunken
                    // limit; inserts will fail until they are released.
                    break;
                }
            }
        }
        for key in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: key.to_string() });
        }
    }

    fn clear(&self) {
        self.clear_inner();
    }

    fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    fn evict_lru(&self, bytes_to_free: usize) -> usize {
        let mut evicted = Vec::new();
        let freed = {
            let mut state = self.state.lock().unwrap();
            let mut freed = 0;
            while freed < bytes_to_free {
                match state.evict_one(&mut evicted) {
                    Some(bytes) => freed += bytes,
                    None => break,
                }
            }
            freed
        };
        for key in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: key.to_string() });
        }
        freed
    }

    fn hit_count(&self) -> u64 {
        self.counters.lock().unwrap().hits
    }

    fn miss_count(&self) -> u64 {
        self.counters.lock().unwrap().misses
    }

    fn reset_statistics(&self) {
        {
            let mut counters = self.counters.lock().unwrap();
            *counters = LookupCounters::default();
        }
        let mut state = self.state.lock().unwrap();
        state.evictions = 0;
        state.expired_removed = 0;
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.clear_inner();
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stats(&self) -> CacheStats {
        let detailed = self.detailed_stats();
        CacheStats {
            entry_count: detailed.entry_count,
            memory_used: detailed.memory_used,
            memory_limit: detailed.memory_limit,
            hits: detailed.hits,
            misses: detailed.misses,
            evictions: detailed.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bitmap(side: u32) -> CachePayload {
        CachePayload::Bitmap {
            width: side,
            height: side,
            pixels: vec![0u8; (side * side * 4) as usize],
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = ArtifactCache::with_mb_limit(16);
        let key = ArtifactKey::rendered_page(1, 1.5);

        assert!(cache.insert(key.clone(), bitmap(64), CachePriority::Normal));
        assert!(cache.get(&key).is_some());
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 0);
    }

    #[test]
    fn test_miss_is_counted() {
        let cache = ArtifactCache::with_mb_limit(16);
        assert!(cache.get(&ArtifactKey::thumbnail(9)).is_none());
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_scale_modifier_canonicalization() {
        let a = ArtifactKey::rendered_page(3, 1.5);
        let b = ArtifactKey::rendered_page(3, 1.50);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "page_3_1.50");
    }

    #[test]
    fn test_memory_accounting_after_churn() {
        let cache = ArtifactCache::with_mb_limit(1);
        for i in 0..50 {
            cache.insert(ArtifactKey::thumbnail(i), bitmap(32), CachePriority::Normal);
        }
        for i in 0..25 {
            cache.remove(&ArtifactKey::thumbnail(i));
        }

        let expected: usize = cache
            .keys()
            .iter()
            .filter_map(|k| cache.get(k).map(|p| p.size_bytes()))
            .sum();
        assert_eq!(cache.memory_usage(), expected);
    }

    #[test]
    fn test_max_items_ceiling_holds() {
        let cache = ArtifactCache::with_mb_limit(64);
        cache.set_max_items(10);
        for i in 0..100 {
            cache.insert(ArtifactKey::thumbnail(i), bitmap(8), CachePriority::Normal);
            assert!(cache.entry_count() <= 10);
        }
        assert_eq!(cache.entry_count(), 10);
    }

    #[test]
    fn test_accounting_under_random_churn() {
        use rand::Rng;

        let cache = ArtifactCache::with_mb_limit(2);
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let page = rng.gen_range(0..40);
            match rng.gen_range(0..4) {
                0 => {
                    cache.insert(ArtifactKey::thumbnail(page), bitmap(16), CachePriority::Normal);
                }
                1 => {
                    cache.insert(
                        ArtifactKey::rendered_page(page, 1.0),
                        bitmap(32),
                        CachePriority::Normal,
                    );
                }
                2 => {
                    cache.remove(&ArtifactKey::thumbnail(page));
                }
                _ => {
                    cache.get(&ArtifactKey::rendered_page(page, 1.0));
                }
            }
        }

        let expected: usize = cache
            .keys()
            .iter()
            .filter_map(|k| cache.get(k).map(|p| p.size_bytes()))
            .sum();
        assert_eq!(cache.memory_usage(), expected);
        assert!(cache.entry_count() <= cache.max_items());
    }

    #[test]
    fn test_failed_replacement_keeps_prior_entry() {
        // Budget fits the small bitmap but nowhere near the big one.
        let cache = ArtifactCache::new(8 * 8 * 4 + 16);
        let key = ArtifactKey::thumbnail(1);
        assert!(cache.insert(key.clone(), bitmap(8), CachePriority::Normal));

        assert!(!cache.insert(key.clone(), bitmap(64), CachePriority::Normal));
        assert!(cache.contains(&key));
        assert_eq!(cache.memory_usage(), 8 * 8 * 4);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_replacement_updates_accounting() {
        let cache = ArtifactCache::with_mb_limit(16);
        let key = ArtifactKey::thumbnail(1);
        cache.insert(key.clone(), bitmap(64), CachePriority::Normal);
        let first = cache.memory_usage();
        cache.insert(key.clone(), bitmap(32), CachePriority::Normal);
        assert!(cache.memory_usage() < first);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_critical_entries_survive_eviction() {
        // Budget fits roughly three 64x64 bitmaps
        let cache = ArtifactCache::new(3 * 64 * 64 * 4 + 100);
        let pinned = ArtifactKey::rendered_page(1, 1.0);
        cache.insert(pinned.clone(), bitmap(64), CachePriority::Critical);

        for i in 2..20 {
            cache.insert(ArtifactKey::rendered_page(i, 1.0), bitmap(64), CachePriority::Normal);
        }

        assert!(cache.contains(&pinned));
    }

    #[test]
    fn test_insert_fails_when_only_pinned_entries_remain() {
        let cache = ArtifactCache::new(64 * 64 * 4 + 10);
        assert!(cache.insert(
            ArtifactKey::rendered_page(1, 1.0),
            bitmap(64),
            CachePriority::Critical
        ));
        // No non-Critical candidates, so nothing can be evicted
        assert!(!cache.insert(
            ArtifactKey::rendered_page(2, 1.0),
            bitmap(64),
            CachePriority::Normal
        ));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_zero_limit_insert_fails() {
        let cache = ArtifactCache::new(0);
        assert!(!cache.insert(ArtifactKey::thumbnail(1), bitmap(8), CachePriority::High));
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_low_priority_evicted_before_high() {
        let cache = ArtifactCache::new(2 * 64 * 64 * 4 + 100);
        let low = ArtifactKey::rendered_page(1, 1.0);
        let high = ArtifactKey::rendered_page(2, 1.0);
        cache.insert(low.clone(), bitmap(64), CachePriority::Low);
        cache.insert(high.clone(), bitmap(64), CachePriority::High);

        cache.insert(ArtifactKey::rendered_page(3, 1.0), bitmap(64), CachePriority::Normal);

        assert!(!cache.contains(&low));
        assert!(cache.contains(&high));
    }

    #[test]
    fn test_eviction_policy_normalization() {
        let cache = ArtifactCache::default();
        cache.set_eviction_policy("lfu");
        assert_eq!(cache.eviction_policy(), "LFU");
        cache.set_eviction_policy("PRIORITY");
        assert_eq!(cache.eviction_policy(), "Priority");
        cache.set_eviction_policy("random");
        assert_eq!(cache.eviction_policy(), "LRU");
    }

    #[test]
    fn test_negative_weights_rejected() {
        let cache = ArtifactCache::default();
        assert!(!cache.set_priority_weights(-1.0, 1.0, 10.0));
        let weights = cache.priority_weights();
        assert_eq!(weights.low, 0.1);

        assert!(cache.set_priority_weights(0.5, 2.0, 20.0));
        assert_eq!(cache.priority_weights().high, 20.0);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.set_item_max_age(Duration::from_millis(10));
        cache.insert(ArtifactKey::thumbnail(1), bitmap(8), CachePriority::Normal);
        cache.insert(ArtifactKey::thumbnail(2), bitmap(8), CachePriority::Critical);

        std::thread::sleep(Duration::from_millis(30));
        let removed = cache.cleanup_expired();

        assert_eq!(removed, 1);
        assert!(!cache.contains(&ArtifactKey::thumbnail(1)));
        // Critical entries never age out
        assert!(cache.contains(&ArtifactKey::thumbnail(2)));
    }

    #[test]
    fn test_zero_max_age_never_expires() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.set_item_max_age(Duration::ZERO);
        cache.insert(ArtifactKey::thumbnail(1), bitmap(8), CachePriority::Normal);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn test_optimize_drops_unaccessed_entries() {
        let cache = ArtifactCache::with_mb_limit(16);
        let touched = ArtifactKey::thumbnail(1);
        let untouched = ArtifactKey::thumbnail(2);
        cache.insert(touched.clone(), bitmap(8), CachePriority::Normal);
        cache.insert(untouched.clone(), bitmap(8), CachePriority::Normal);
        cache.get(&touched);

        let (removed, bytes) = cache.optimize_with(Duration::ZERO);

        assert_eq!(removed, 1);
        assert!(bytes > 0);
        assert!(cache.contains(&touched));
        assert!(!cache.contains(&untouched));
    }

    #[test]
    fn test_refresh_protects_from_expiry() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.set_item_max_age(Duration::from_millis(50));
        let key = ArtifactKey::thumbnail(1);
        cache.insert(key.clone(), bitmap(8), CachePriority::Normal);

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.refresh(&key));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.cleanup_expired(), 0);
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_evict_lru_is_best_effort() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::thumbnail(1), bitmap(16), CachePriority::Normal);
        let usage = cache.memory_usage();

        // Asking for more than the cache holds empties it
        let freed = cache.evict_lru(usize::MAX);
        assert_eq!(freed, usage);
        assert_eq!(cache.entry_count(), 0);

        // Empty cache frees nothing
        assert_eq!(cache.evict_lru(1024), 0);
    }

    #[test]
    fn test_evict_lru_spares_pinned() {
        let cache = ArtifactCache::with_mb_limit(16);
        let pinned = ArtifactKey::thumbnail(1);
        cache.insert(pinned.clone(), bitmap(16), CachePriority::Critical);
        cache.insert(ArtifactKey::thumbnail(2), bitmap(16), CachePriority::Normal);

        cache.evict_lru(usize::MAX);
        assert!(cache.contains(&pinned));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_disabled_cache_semantics() {
        let cache = ArtifactCache::with_mb_limit(16);
        let key = ArtifactKey::thumbnail(1);
        cache.insert(key.clone(), bitmap(8), CachePriority::Normal);

        cache.set_enabled(false);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.memory_usage(), 0);
        assert!(!cache.insert(key.clone(), bitmap(8), CachePriority::Normal));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.miss_count(), 1);

        cache.set_enabled(true);
        assert!(cache.insert(key.clone(), bitmap(8), CachePriority::Normal));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_hit_miss_conservation() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::thumbnail(1), bitmap(8), CachePriority::Normal);

        let mut lookups = 0u64;
        for i in 0..40 {
            cache.get(&ArtifactKey::thumbnail(i % 4));
            lookups += 1;
        }
        assert_eq!(cache.hit_count() + cache.miss_count(), lookups);
    }

    #[test]
    fn test_invalidate_page_removes_all_kinds() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::rendered_page(5, 1.0), bitmap(8), CachePriority::Normal);
        cache.insert(ArtifactKey::thumbnail(5), bitmap(8), CachePriority::Critical);
        cache.insert(ArtifactKey::thumbnail(6), bitmap(8), CachePriority::Normal);

        assert_eq!(cache.invalidate_page(5), 2);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_count_and_memory_by_kind() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::rendered_page(1, 1.0), bitmap(16), CachePriority::Normal);
        cache.insert(ArtifactKey::rendered_page(2, 1.0), bitmap(16), CachePriority::Normal);
        cache.insert(ArtifactKey::thumbnail(1), bitmap(8), CachePriority::Normal);

        let counts = cache.count_by_kind();
        assert_eq!(counts.get(&ArtifactKind::RenderedPage), Some(&2));
        assert_eq!(counts.get(&ArtifactKind::Thumbnail), Some(&1));

        let usage = cache.memory_usage_by_kind();
        assert_eq!(usage.values().sum::<usize>(), cache.memory_usage());
    }

    #[test]
    fn test_preload_queue() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::rendered_page(4, 1.0), bitmap(8), CachePriority::Normal);

        cache.request_preload_around(5, 2);
        let mut pages: Vec<u32> = cache
            .take_preload_requests()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        pages.sort_unstable();

        // Center is skipped, and page 4 already has a rendered artifact
        assert_eq!(pages, vec![3, 6, 7]);

        // Queue drained
        assert!(cache.take_preload_requests().is_empty());
    }

    #[test]
    fn test_preload_disabled_queues_nothing() {
        let cache = ArtifactCache::with_mb_limit(16);
        cache.set_preloading_enabled(false);
        cache.request_preload_around(5, 2);
        assert!(cache.take_preload_requests().is_empty());
    }

    #[test]
    fn test_preload_strategy_normalization() {
        let cache = ArtifactCache::default();
        cache.set_preloading_strategy("SEQUENTIAL");
        assert_eq!(cache.preloading_strategy(), "sequential");
        cache.set_preloading_strategy("psychic");
        assert_eq!(cache.preloading_strategy(), "adaptive");
    }

    #[test]
    fn test_evicted_events_fire() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = Arc::new(ArtifactCache::new(2 * 8 * 8 * 4 + 10));
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evictions);
        cache.events().subscribe(move |event| {
            if matches!(event, CacheEvent::Evicted { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..5 {
            cache.insert(ArtifactKey::thumbnail(i), bitmap(8), CachePriority::Normal);
        }
        assert!(evictions.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_export_and_import_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.cachemeta");

        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::rendered_page(1, 1.5), bitmap(16), CachePriority::High);
        cache.insert(ArtifactKey::thumbnail(2), bitmap(8), CachePriority::Normal);
        cache.set_eviction_policy("lfu");

        cache.export_to_file(&path).unwrap();
        let summary = cache.import_from_file(&path).unwrap();

        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.total_size_bytes as usize, cache.memory_usage());
        assert_eq!(summary.config.eviction_policy, "LFU");
    }

    #[test]
    fn test_import_failure_leaves_cache_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.cachemeta");
        std::fs::write(&path, b"definitely not a snapshot").unwrap();

        let cache = ArtifactCache::with_mb_limit(16);
        cache.insert(ArtifactKey::thumbnail(1), bitmap(8), CachePriority::Normal);
        let usage = cache.memory_usage();

        assert!(cache.import_from_file(&path).is_err());
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.memory_usage(), usage);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ArtifactCache::with_mb_limit(32));
        let mut handles = Vec::new();

        for t in 0..4u32 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let page = t * 100 + i;
                    cache.insert(ArtifactKey::thumbnail(page), bitmap(8), CachePriority::Normal);
                    cache.get(&ArtifactKey::thumbnail(page));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.hit_count() + cache.miss_count(), 400);
        let expected: usize = cache
            .keys()
            .iter()
            .filter_map(|k| cache.get(k).map(|p| p.size_bytes()))
            .sum();
        assert_eq!(cache.memory_usage(), expected);
    }
}
