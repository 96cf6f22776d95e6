//! Page text cache
//!
//! Plain LRU keyed by document and page. Eviction order is fully
//! deterministic: oldest timestamp first, then lowest access count, then
//! lowest page number, then lexicographically smallest document id.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::component::{CacheComponent, CacheStats};
use crate::types::{now_millis, BYTES_PER_CHAR};

/// Default entry ceiling
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default byte ceiling (50 MB)
pub const DEFAULT_MAX_MEMORY: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TextKey {
    document_id: String,
    page_number: u32,
}

struct TextEntry {
    text: String,
    timestamp_ms: u64,
    access_count: u64,
    size_bytes: usize,
}

fn entry_size(text: &str) -> usize {
    text.chars().count() * BYTES_PER_CHAR + mem::size_of::<TextEntry>()
}

struct TextState {
    entries: HashMap<TextKey, TextEntry>,
    memory_used: usize,
    max_entries: usize,
    max_memory: usize,
    evictions: u64,
}

impl TextState {
    fn remove_entry(&mut self, key: &TextKey) -> Option<TextEntry> {
        let entry = self.entries.remove(key)?;
        debug_assert!(
            self.memory_used >= entry.size_bytes,
            "text cache accounting underflow"
        );
        self.memory_used = self.memory_used.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evict exactly one entry by the deterministic LRU order
    fn evict_lru_one(&mut self) -> Option<usize> {
        let victim = self
            .entries
            .iter()
            .min_by(|(ka, a), (kb, b)| {
                a.timestamp_ms
                    .cmp(&b.timestamp_ms)
                    .then(a.access_count.cmp(&b.access_count))
                    .then(ka.page_number.cmp(&kb.page_number))
                    .then_with(|| ka.document_id.cmp(&kb.document_id))
            })
            .map(|(k, _)| k.clone())?;
        let entry = self.remove_entry(&victim)?;
        self.evictions += 1;
        debug!(document = %victim.document_id, page = victim.page_number, "page text evicted");
        Some(entry.size_bytes)
    }
}

/// LRU cache for extracted page text
pub struct TextCache {
    state: Mutex<TextState>,
    counters: Mutex<(u64, u64)>, // (hits, misses)
    enabled: AtomicBool,
}

impl TextCache {
    pub fn new(max_entries: usize, max_memory: usize) -> Self {
        Self {
            state: Mutex::new(TextState {
                entries: HashMap::new(),
                memory_used: 0,
                max_entries: max_entries.max(1),
                max_memory,
                evictions: 0,
            }),
            counters: Mutex::new((0, 0)),
            enabled: AtomicBool::new(true),
        }
    }

    /// Store extracted text for a page
    ///
    /// Empty text is not cached; a disabled cache silently ignores stores.
    pub fn store(&self, document_id: &str, page_number: u32, text: impl Into<String>) {
        let text = text.into();
        if !self.is_enabled() || text.is_empty() {
            return;
        }
        self.store_with_timestamp(document_id, page_number, text, now_millis());
    }

    fn store_with_timestamp(&self, document_id: &str, page_number: u32, text: String, timestamp_ms: u64) {
        let size = entry_size(&text);
        let key = TextKey {
            document_id: document_id.to_string(),
            page_number,
        };

        let mut state = self.state.lock().unwrap();
        state.remove_entry(&key);

        while state.entries.len() >= state.max_entries
            || state.memory_used + size > state.max_memory
        {
            if state.evict_lru_one().is_none() {
                break;
            }
        }
        if state.memory_used + size > state.max_memory {
            // Single oversized page, nothing left to evict
            return;
        }

        state.memory_used += size;
        state.entries.insert(
            key,
            TextEntry {
                text,
                timestamp_ms,
                access_count: 0,
                size_bytes: size,
            },
        );
    }

    /// Look up text for a page, refreshing its recency
    pub fn get(&self, document_id: &str, page_number: u32) -> Option<String> {
        let key = TextKey {
            document_id: document_id.to_string(),
            page_number,
        };
        let text = {
            let mut state = self.state.lock().unwrap();
            match state.entries.get_mut(&key) {
                Some(entry) if self.is_enabled() => {
                    entry.access_count += 1;
                    entry.timestamp_ms = now_millis();
                    Some(entry.text.clone())
                }
                _ => None,
            }
        };

        let mut counters = self.counters.lock().unwrap();
        if text.is_some() {
            counters.0 += 1;
        } else {
            counters.1 += 1;
        }
        text
    }

    pub fn contains(&self, document_id: &str, page_number: u32) -> bool {
        let key = TextKey {
            document_id: document_id.to_string(),
            page_number,
        };
        self.state.lock().unwrap().entries.contains_key(&key)
    }

    /// Drop every cached page of one document
    pub fn invalidate_document(&self, document_id: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        let keys: Vec<TextKey> = state
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

    /// Change the entry ceiling (minimum 1), evicting down to fit
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut state = self.state.lock().unwrap();
        state.max_entries = max_entries.max(1);
        while state.entries.len() > state.max_entries {
            if state.evict_lru_one().is_none() {
                break;
            }
        }
    }

    pub fn max_entries(&self) -> usize {
        self.state.lock().unwrap().max_entries
    }

    #[cfg(test)]
    fn store_at(&self, document_id: &str, page_number: u32, text: &str, timestamp_ms: u64) {
        self.store_with_timestamp(document_id, page_number, text.to_string(), timestamp_ms);
    }
}

impl Default for TextCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_MEMORY)
    }
}

impl CacheComponent for TextCache {
    fn memory_usage(&self) -> usize {
        self.state.lock().unwrap().memory_used
    }

    fn max_memory_limit(&self) -> usize {
        self.state.lock().unwrap().max_memory
    }

    fn set_max_memory_limit(&self, limit: usize) {
        let mut state = self.state.lock().unwrap();
        state.max_memory = limit;
        while state.memory_used > state.max_memory {
            if state.evict_lru_one().is_none() {
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
            match state.evict_lru_one() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get() {
        let cache = TextCache::default();
        cache.store("doc", 1, "page one text");
        assert_eq!(cache.get("doc", 1).as_deref(), Some("page one text"));
        assert_eq!(cache.get("doc", 2), None);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_empty_text_not_cached() {
        let cache = TextCache::default();
        cache.store("doc", 1, "");
        assert!(!cache.contains("doc", 1));
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_entry_ceiling() {
        let cache = TextCache::new(3, DEFAULT_MAX_MEMORY);
        for page in 0..10 {
            cache.store("doc", page, "text");
            assert!(cache.entry_count() <= 3);
        }
        assert_eq!(cache.entry_count(), 3);
    }

    #[test]
    fn test_lru_evicts_oldest_timestamp() {
        let cache = TextCache::new(2, DEFAULT_MAX_MEMORY);
        cache.store_at("doc", 1, "old", 1000);
        cache.store_at("doc", 2, "new", 2000);
        cache.store_at("doc", 3, "newest", 3000);

        assert!(!cache.contains("doc", 1));
        assert!(cache.contains("doc", 2));
        assert!(cache.contains("doc", 3));
    }

    #[test]
    fn test_tie_break_by_access_count_then_page() {
        let cache = TextCache::new(3, DEFAULT_MAX_MEMORY);
        cache.store_at("doc", 7, "a", 1000);
        cache.store_at("doc", 2, "b", 1000);
        cache.store_at("doc", 5, "c", 1000);

        // Same timestamp, same access count: lowest page number goes first
        cache.store_at("doc", 9, "d", 1000);
        assert!(!cache.contains("doc", 2));
        assert!(cache.contains("doc", 5));
        assert!(cache.contains("doc", 7));
    }

    #[test]
    fn test_tie_break_across_documents_by_id() {
        let cache = TextCache::new(2, DEFAULT_MAX_MEMORY);
        cache.store_at("doc-b", 4, "same", 1000);
        cache.store_at("doc-a", 4, "same", 1000);

        // Same timestamp, access count, and page: smallest document id
        // goes first
        cache.store_at("doc-c", 9, "newer", 2000);
        assert!(!cache.contains("doc-a", 4));
        assert!(cache.contains("doc-b", 4));
        assert!(cache.contains("doc-c", 9));
    }

    #[test]
    fn test_tie_break_prefers_lower_access_count() {
        let cache = TextCache::new(2, DEFAULT_MAX_MEMORY);
        cache.store_at("doc", 1, "a", 1000);
        cache.store_at("doc", 2, "b", 1000);
        // Touch page 1 so its access count rises (timestamp also moves,
        // but that alone would already protect it)
        cache.get("doc", 1);

        cache.store_at("doc", 3, "c", 5000);
        assert!(cache.contains("doc", 1));
        assert!(!cache.contains("doc", 2));
    }

    #[test]
    fn test_memory_accounting() {
        let cache = TextCache::default();
        cache.store("doc", 1, "hello");
        cache.store("doc", 2, "world!");
        let expected = entry_size("hello") + entry_size("world!");
        assert_eq!(cache.memory_usage(), expected);

        cache.invalidate_document("doc");
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_invalidate_document_scoped() {
        let cache = TextCache::default();
        cache.store("a", 1, "text");
        cache.store("a", 2, "text");
        cache.store("b", 1, "text");

        assert_eq!(cache.invalidate_document("a"), 2);
        assert!(cache.contains("b", 1));
    }

    #[test]
    fn test_disabled_clears_and_rejects() {
        let cache = TextCache::default();
        cache.store("doc", 1, "text");
        cache.set_enabled(false);

        assert_eq!(cache.entry_count(), 0);
        cache.store("doc", 1, "text");
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.get("doc", 1), None);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_evict_lru_frees_requested_bytes() {
        let cache = TextCache::default();
        for page in 0..10 {
            cache.store("doc", page, "some page text");
        }
        let before = cache.memory_usage();
        let freed = cache.evict_lru(entry_size("some page text"));
        assert!(freed >= entry_size("some page text"));
        assert_eq!(cache.memory_usage(), before - freed);
    }

    #[test]
    fn test_memory_ceiling_evicts() {
        let budget = entry_size("0123456789") * 3;
        let cache = TextCache::new(100, budget);
        for page in 0..10 {
            cache.store("doc", page, "0123456789");
            assert!(cache.memory_usage() <= budget);
        }
        assert_eq!(cache.entry_count(), 3);
    }
}
