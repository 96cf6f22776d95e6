//! Search result cache
//!
//! Entries are keyed by a digest of the query, its options, and the
//! document identity (id plus modification time), so results can never
//! leak across documents or revisions. Expiry is enforced only by the
//! periodic [`ResultCache::maintenance`] pass, never on access.
//!
//! Incremental reuse: when a user extends a previous query by typing,
//! the prior hit list is filtered by context containment instead of
//! re-searching. This is a documented approximation: a hit whose context
//! snippet does not contain the longer query is dropped even if the page
//! itself would still match.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::component::{CacheComponent, CacheStats};
use crate::events::{CacheEvent, EventBus};
use crate::types::{now_millis, SearchHit, SearchOptions};

/// Default entry ceiling
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default byte ceiling (64 MB)
pub const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;

/// Default time-to-live (30 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Identity of one executed search
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub query: String,
    pub options: SearchOptions,
    pub document_id: String,
    /// Document modification time in milliseconds since the epoch;
    /// a revision change invalidates every prior key
    pub document_modified_ms: u64,
}

impl ResultKey {
    pub fn new(
        query: impl Into<String>,
        options: SearchOptions,
        document_id: impl Into<String>,
        document_modified_ms: u64,
    ) -> Self {
        Self {
            query: query.into(),
            options,
            document_id: document_id.into(),
            document_modified_ms,
        }
    }

    /// Hex-encoded SHA-256 digest over every identity component
    pub fn digest(&self) -> String {
        let material = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.query,
            self.options.case_sensitive as u8,
            self.options.whole_words as u8,
            self.options.use_regex as u8,
            self.options.search_backward as u8,
            self.document_id,
            self.document_modified_ms,
        );
        let digest = Sha256::digest(material.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

struct ResultEntry {
    hits: Vec<SearchHit>,
    timestamp_ms: u64,
    access_count: u64,
    size_bytes: usize,
}

fn entry_size(hits: &[SearchHit]) -> usize {
    hits.iter().map(SearchHit::estimated_size).sum::<usize>() + mem::size_of::<ResultEntry>()
}

struct ResultState {
    entries: HashMap<String, ResultEntry>,
    memory_used: usize,
    max_entries: usize,
    max_memory: usize,
    ttl: Duration,
    evictions: u64,
}

impl ResultState {
    fn remove_entry(&mut self, digest: &str) -> Option<ResultEntry> {
        let entry = self.entries.remove(digest)?;
        debug_assert!(
            self.memory_used >= entry.size_bytes,
            "result cache accounting underflow"
        );
        self.memory_used = self.memory_used.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evict the entry with the oldest store timestamp
    fn evict_oldest(&mut self) -> Option<usize> {
        let victim = self
            .entries
            .iter()
            .min_by(|(da, a), (db, b)| {
                a.timestamp_ms
                    .cmp(&b.timestamp_ms)
                    .then_with(|| da.cmp(db))
            })
            .map(|(d, _)| d.clone())?;
        let entry = self.remove_entry(&victim)?;
        self.evictions += 1;
        Some(entry.size_bytes)
    }
}

/// TTL-bounded cache of executed searches
pub struct ResultCache {
    state: Mutex<ResultState>,
    counters: Mutex<(u64, u64)>, // (hits, misses)
    enabled: AtomicBool,
    events: EventBus<CacheEvent>,
}

impl ResultCache {
    pub fn new(max_entries: usize, max_memory: usize) -> Self {
        Self {
            state: Mutex::new(ResultState {
                entries: HashMap::new(),
                memory_used: 0,
                max_entries: max_entries.max(1),
                max_memory,
                ttl: DEFAULT_TTL,
                evictions: 0,
            }),
            counters: Mutex::new((0, 0)),
            enabled: AtomicBool::new(true),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<CacheEvent> {
        &self.events
    }

    /// Store the results of an executed search
    ///
    /// Empty hit lists are cached too, so repeated no-match searches
    /// stay cheap.
    pub fn store_results(&self, key: &ResultKey, hits: Vec<SearchHit>) {
        if !self.is_enabled() {
            return;
        }
        self.store_with_timestamp(key, hits, now_millis());
    }

    fn store_with_timestamp(&self, key: &ResultKey, hits: Vec<SearchHit>, timestamp_ms: u64) {
        let size = entry_size(&hits);
        let digest = key.digest();

        let mut state = self.state.lock().unwrap();
        state.remove_entry(&digest);

        while state.entries.len() >= state.max_entries
            || state.memory_used + size > state.max_memory
        {
            if state.evict_oldest().is_none() {
                break;
            }
        }
        if state.memory_used + size > state.max_memory {
            return;
        }

        state.memory_used += size;
        state.entries.insert(
            digest,
            ResultEntry {
                hits,
                timestamp_ms,
                access_count: 0,
                size_bytes: size,
            },
        );
    }

    /// Whether results for this exact search are cached
    pub fn has_results(&self, key: &ResultKey) -> bool {
        self.state.lock().unwrap().entries.contains_key(&key.digest())
    }

    /// Look up cached results
    ///
    /// Entries past their TTL are still returned until the maintenance
    /// pass removes them.
    pub fn get_results(&self, key: &ResultKey) -> Option<Vec<SearchHit>> {
        let start = Instant::now();
        let digest = key.digest();
        let hits = {
            let mut state = self.state.lock().unwrap();
            match state.entries.get_mut(&digest) {
                Some(entry) if self.is_enabled() => {
                    entry.access_count += 1;
                    Some(entry.hits.clone())
                }
                _ => None,
            }
        };

        let mut counters = self.counters.lock().unwrap();
        match hits {
            Some(hits) => {
                counters.0 += 1;
                drop(counters);
                self.events.emit(&CacheEvent::Hit {
                    key: digest,
                    latency_micros: start.elapsed().as_micros() as u64,
                });
                Some(hits)
            }
            None => {
                counters.1 += 1;
                drop(counters);
                self.events.emit(&CacheEvent::Miss { key: digest });
                None
            }
        }
    }

    /// Whether the results stored under `previous` can seed `new`
    ///
    /// Requires the same document revision and options, regex disabled,
    /// and `new.query` strictly extending `previous.query`. The prefix
    /// check is exact regardless of the case-sensitivity option; only
    /// the containment filter case-folds.
    pub fn can_use_incremental(&self, new: &ResultKey, previous: &ResultKey) -> bool {
        new.document_id == previous.document_id
            && new.document_modified_ms == previous.document_modified_ms
            && new.options == previous.options
            && !new.options.use_regex
            && new.query.len() > previous.query.len()
            && new.query.starts_with(&previous.query)
    }

    /// Narrow a previous search's results to a longer query
    ///
    /// Filters the prior hits by containment of the new query in each
    /// hit's context snippet, stores the subset under the new key, and
    /// returns it. `None` when reuse is not applicable or the previous
    /// results are gone.
    pub fn get_incremental_results(
        &self,
        new: &ResultKey,
        previous: &ResultKey,
    ) -> Option<Vec<SearchHit>> {
        if !self.can_use_incremental(new, previous) {
            return None;
        }
        let prior = self.get_results(previous)?;

        let filtered: Vec<SearchHit> = if new.options.case_sensitive {
            prior
                .into_iter()
                .filter(|hit| hit.context.contains(&new.query))
                .collect()
        } else {
            let needle = new.query.to_lowercase();
            prior
                .into_iter()
                .filter(|hit| hit.context.to_lowercase().contains(&needle))
                .collect()
        };

        debug!(
            query = %new.query,
            kept = filtered.len(),
            "incremental search reuse"
        );
        self.store_results(new, filtered.clone());
        Some(filtered)
    }

    /// Purge entries older than the TTL; returns how many were dropped
    pub fn maintenance(&self) -> usize {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.ttl.is_zero() {
                return 0;
            }
            let now = now_millis();
            let ttl_ms = state.ttl.as_millis() as u64;
            let digests: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| now.saturating_sub(e.timestamp_ms) >= ttl_ms)
                .map(|(d, _)| d.clone())
                .collect();
            for digest in digests {
                state.remove_entry(&digest);
                evicted.push(digest);
            }
        }
        for digest in &evicted {
            self.events.emit(&CacheEvent::Evicted { key: digest.clone() });
        }
        evicted.len()
    }

    /// Change the TTL; zero disables expiry
    pub fn set_ttl(&self, ttl: Duration) {
        self.state.lock().unwrap().ttl = ttl;
    }

    pub fn ttl(&self) -> Duration {
        self.state.lock().unwrap().ttl
    }

    /// Change the entry ceiling (minimum 1), evicting down to fit
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut state = self.state.lock().unwrap();
        state.max_entries = max_entries.max(1);
        while state.entries.len() > state.max_entries {
            if state.evict_oldest().is_none() {
                break;
            }
        }
    }

    pub fn max_entries(&self) -> usize {
        self.state.lock().unwrap().max_entries
    }

    #[cfg(test)]
    fn store_at(&self, key: &ResultKey, hits: Vec<SearchHit>, timestamp_ms: u64) {
        self.store_with_timestamp(key, hits, timestamp_ms);
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_MEMORY)
    }
}

impl CacheComponent for ResultCache {
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
