use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct ResolverStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    remote_lookups: AtomicU64,
    lookup_failures: AtomicU64,
    cache_read_failures: AtomicU64,
    cache_write_failures: AtomicU64,
}

impl Default for ResolverStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverStats {
    pub const fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            remote_lookups: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            cache_read_failures: AtomicU64::new(0),
            cache_write_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_remote_lookups(&self) {
        self.remote_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lookup_failures(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_read_failures(&self) {
        self.cache_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_write_failures(&self) {
        self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            remote_lookups: self.remote_lookups.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            cache_read_failures: self.cache_read_failures.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ResolverSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub remote_lookups: u64,
    pub lookup_failures: u64,
    pub cache_read_failures: u64,
    pub cache_write_failures: u64,
}
