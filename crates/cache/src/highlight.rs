//! Search highlight cache
//!
//! Small count-bounded LRU for per-page highlight geometry, keyed by
//! document, page, and query.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::warn;

use crate::component::{CacheComponent, CacheStats};
use crate::types::{now_millis, RectF};

/// Default entry ceiling
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// Default byte ceiling used for reporting (25 MB)
pub const DEFAULT_MAX_MEMORY: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HighlightKey {
    pub document_id: String,
    pub page_number: u32,
    pub query: String,
}

impl HighlightKey {
    pub fn new(document_id: impl Into<String>, page_number: u32, query: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            page_number,
            query: query.into(),
        }
    }
}

/// Highlight geometry for one page and query
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightSet {
    pub regions: Vec<RectF>,
    pub color: String,
}

struct HighlightEntry {
    set: HighlightSet,
    timestamp_ms: u64,
    access_count: u64,
    size_bytes: usize,
}

fn entry_size(set: &HighlightSet) -> usize {
    set.regions.len() * mem::size_of::<RectF>() + set.color.len() + mem::size_of::<HighlightEntry>()
}

struct HighlightState {
    entries: HashMap<HighlightKey, HighlightEntry>,
    memory_used: usize,
    max_entries: usize,
    max_memory: usize,
    evictions: u64,
}

impl HighlightState {
    fn remove_entry(&mut self, key: &HighlightKey) -> Option<HighlightEntry> {
        let entry = self.entries.remove(key)?;
        debug_assert!(
            self.memory_used >= entry.size_bytes,
            "highlight cache accounting underflow"
        );
        self.memory_used = self.memory_used.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<usize> {
        let victim = self
            .entries
            .iter()
            .min_by(|(ka, a), (kb, b)| {
                a.timestamp_ms
                    .cmp(&b.timestamp_ms)
                    .then(ka.page_number.cmp(&kb.page_number))
            })
            .map(|(k, _)| k.clone())?;
        let entry = self.remove_entry(&victim)?;
        self.evictions += 1;
        Some(entry.size_bytes)
    }
}

/// Count-bounded cache of search highlight regions
pub struct HighlightCache {
    state: Mutex<HighlightState>,
    counters: Mutex<(u64, u64)>, // (hits, misses)
    enabled: AtomicBool,
}

impl HighlightCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(HighlightState {
                entries: HashMap::new(),
                memory_used: 0,
                max_entries: max_entries.max(1),
                max_memory: DEFAULT_MAX_MEMORY,
                evictions: 0,
            }),
            counters: Mutex::new((0, 0)),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn store(&self, key: HighlightKey, set: HighlightSet) {
        if !self.is_enabled() {
            return;
        }
        let size = entry_size(&set);
        let mut state = self.state.lock().unwrap();
        state.remove_entry(&key);

        while state.entries.len() >= state.max_entries {
            if state.evict_oldest().is_none() {
                break;
            }
        }

        state.memory_used += size;
        state.entries.insert(
            key,
            HighlightEntry {
                set,
                timestamp_ms: now_millis(),
                access_count: 0,
                size_bytes: size,
            },
        );
    }

    pub fn get(&self, key: &HighlightKey) -> Option<HighlightSet> {
        let set = {
            let mut state = self.state.lock().unwrap();
            match state.entries.get_mut(key) {
                Some(entry) if self.is_enabled() => {
                    entry.access_count += 1;
                    entry.timestamp_ms = now_millis();
                    Some(entry.set.clone())
                }
                _ => None,
            }
        };

        let mut counters = self.counters.lock().unwrap();
        if set.is_some() {
            counters.0 += 1;
        } else {
            counters.1 += 1;
        }
        set
    }

    pub fn contains(&self, key: &HighlightKey) -> bool {
        self.state.lock().unwrap().entries.contains_key(key)
    }

    /// Drop every highlight belonging to one document
    pub fn invalidate_document(&self, document_id: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        let keys: Vec<HighlightKey> = state
            .entries
            .keys()
            .filter(|k| k.document_id == document_id)
            .cloned()
            .collect();
        for key in &keys {
            state.remove_entry(key);
        }
        keys.len()
    }

    /// Change the entry ceiling; zero is rejected and the default restored
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut state = self.state.lock().unwrap();
        state.max_entries = if max_entries == 0 {
            warn!("highlight cache size 0 rejected, using default");
            DEFAULT_MAX_ENTRIES
        } else {
            max_entries
        };
        while state.entries.len() > state.max_entries {
            if state.evict_oldest().is_none() {
                break;
            }
        }
    }

    pub fn max_entries(&self) -> usize {
        self.state.lock().unwrap().max_entries
    }
}

impl Default for HighlightCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl CacheComponent for HighlightCache {
    fn memory_usage(&self) -> usize {
        self.state.lock().unwrap().memory_used
    }

    fn max_memory_limit(&self) -> usize {
        self.state.lock().unwrap().max_memory
    }

    fn set_max_memory_limit(&self, limit: usize) {
        // Count-bounded tier: the byte value is reporting surface, but a
        // shrink still evicts down so coordinator budgets are honored.
        let mut state = self.state.lock().unwrap();
        state.max_memory = limit;
        while state.memory_used > state.max_memory {
            if state.evict_oldest().is_none() {
                break;
            }
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.memory_used = 0;
    }

    fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    fn evict_lru(&self, bytes_to_free: usize) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut freed = 0;
        while freed < bytes_to_free {
            match state.evict_oldest() {
                Some(bytes) => freed += bytes,
                None => break,
            }
        }
        freed
    }

    fn hit_count(&self) -> u64 {
        self.counters.lock().unwrap().0
    }

    fn miss_count(&self) -> u64 {
        self.counters.lock().unwrap().1
    }

    fn reset_statistics(&self) {
        *self.counters.lock().unwrap() = (0, 0);
        self.state.lock().unwrap().evictions = 0;
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.clear();
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stats(&self) -> CacheStats {
        let (entry_count, memory_used, memory_limit, evictions) = {
            let state = self.state.lock().unwrap();
            (
                state.entries.len(),
                state.memory_used,
                state.max_memory,
                state.evictions,
            )
        };
        let counters = self.counters.lock().unwrap();
        CacheStats {
            entry_count,
            memory_used,
            memory_limit,
            hits: counters.0,
            misses: counters.1,
            evictions,
        }
    }
}
