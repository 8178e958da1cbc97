//! Per-tier cache statistics.

/// Counters for one cache tier.
///
/// Each tier owns an instance; the lifecycle service exposes both.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of successful lookups
    pub hits: u64,
    /// Number of failed lookups
    pub misses: u64,
    /// Number of entries evicted to stay under capacity
    pub evictions: u64,
    /// Current size in the tier's size units
    pub size_units: u64,
    /// Current number of entries
    pub entry_count: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_evictions(&mut self, count: u64) {
        self.evictions += count;
    }

    pub fn update_size(&mut self, size_units: u64, entry_count: u64) {
        self.size_units = size_units;
        self.entry_count = entry_count;
    }

    /// Hit rate in [0, 1]; 0 when no lookups have happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_start_empty() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_size_update() {
        let mut stats = CacheStats::new();
        stats.update_size(4096, 2);
        assert_eq!(stats.size_units, 4096);
        assert_eq!(stats.entry_count, 2);
    }
}
