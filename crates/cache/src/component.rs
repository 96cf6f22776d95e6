//! Uniform capability surface shared by every cache tier
//!
//! The coordinator only ever talks to caches through [`CacheComponent`],
//! so tiers can be registered, budgeted, and evicted without knowing
//! their concrete type.

/// Snapshot of a cache's counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries currently cached
    pub entry_count: usize,

    /// Bytes currently used
    pub memory_used: usize,

    /// Byte ceiling currently configured
    pub memory_limit: usize,

    /// Number of lookups that found an entry
    pub hits: u64,

    /// Number of lookups that found nothing
    pub misses: u64,

    /// Number of entries removed by automatic eviction
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the byte ceiling in use (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

/// Capability interface implemented by every cache tier
///
/// All methods take `&self`; implementations use interior mutability and
/// are safe to share across threads behind an `Arc`.
pub trait CacheComponent: Send + Sync {
    /// Bytes currently used by cached entries
    fn memory_usage(&self) -> usize;

    /// Configured byte ceiling
    fn max_memory_limit(&self) -> usize;

    /// Change the byte ceiling, evicting down to fit if necessary
    fn set_max_memory_limit(&self, limit: usize);

    /// Remove every entry
    fn clear(&self);

    /// Number of entries currently cached
    fn entry_count(&self) -> usize;

    /// Evict least-valuable entries until at least `bytes_to_free` bytes
    /// are released or the cache runs out of candidates
    ///
    /// Best effort: frees `min(bytes_to_free, memory_usage())` unless
    /// pinned entries prevent it. Returns the bytes actually freed.
    fn evict_lru(&self, bytes_to_free: usize) -> usize;

    /// Lookups that found an entry
    fn hit_count(&self) -> u64;

    /// Lookups that found nothing
    fn miss_count(&self) -> u64;

    /// Zero all statistics counters
    fn reset_statistics(&self);

    /// Enable or disable the cache
    ///
    /// Disabling also clears it. While disabled, stores are rejected and
    /// lookups miss (and are counted as misses).
    fn set_enabled(&self, enabled: bool);

    /// Whether the cache currently accepts and serves entries
    fn is_enabled(&self) -> bool;

    /// Counter snapshot
    fn stats(&self) -> CacheStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_memory_utilization_zero_limit() {
        let stats = CacheStats {
            memory_used: 100,
            memory_limit: 0,
            ..Default::default()
        };
        assert_eq!(stats.memory_utilization(), 0.0);
    }

    #[test]
    fn test_memory_utilization() {
        let stats = CacheStats {
            memory_used: 50,
            memory_limit: 200,
            ..Default::default()
        };
        assert!((stats.memory_utilization() - 0.25).abs() < 1e-9);
    }
}
