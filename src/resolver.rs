use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::error::{LookupError, ResolutionError};
use crate::resolver_stats::{ResolverSnapshot, ResolverStats};
use crate::storage::BlockTimeStore;

/// Remote source of truth for block times.
#[async_trait]
pub trait BlockTimeLookup: Send + Sync {
    async fn fetch_block_time(&self, height: u64) -> Result<DateTime<Utc>, LookupError>;
}

type InFlight = Mutex<HashMap<u64, Arc<OnceCell<DateTime<Utc>>>>>;

/// Cache-then-node block time resolution.
///
/// A cache hit is authoritative. On a miss the node is asked once per height
/// even under concurrent callers, and the answer is written back before it is
/// returned. Failures are never cached.
pub struct BlockTimeResolver {
    store: Arc<dyn BlockTimeStore>,
    lookup: Arc<dyn BlockTimeLookup>,
    in_flight: InFlight,
    stats: ResolverStats,
}

impl BlockTimeResolver {
    pub fn new(store: Arc<dyn BlockTimeStore>, lookup: Arc<dyn BlockTimeLookup>) -> Self {
        Self {
            store,
            lookup,
            in_flight: Mutex::new(HashMap::new()),
            stats: ResolverStats::new(),
        }
    }

    pub fn stats(&self) -> ResolverSnapshot {
        self.stats.snapshot()
    }

    pub async fn resolve(&self, height: u64) -> Result<DateTime<Utc>, ResolutionError> {
        match self.store.get(height).await {
            Ok(Some(time)) => {
                self.stats.inc_cache_hits();
                debug!(height, "block time cache hit");
                return Ok(time);
            }
            Ok(None) => {
                self.stats.inc_cache_misses();
                debug!(height, "block time cache miss");
            }
            Err(err) => {
                self.stats.inc_cache_read_failures();
                warn!(height, error = %err, "block time cache read failed; asking node");
            }
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(height).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| self.fetch_and_store(height))
            .await
            .copied();

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(&height)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(&height);
            }
        }

        result
    }

    /// Resolves every distinct height with at most `concurrency` lookups in
    /// flight. Each height carries its own outcome.
    pub async fn resolve_many<I>(
        &self,
        heights: I,
        concurrency: usize,
    ) -> HashMap<u64, Result<DateTime<Utc>, ResolutionError>>
    where
        I: IntoIterator<Item = u64>,
    {
        let distinct: BTreeSet<u64> = heights.into_iter().collect();
        stream::iter(distinct)
            .map(|height| async move { (height, self.resolve(height).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// All-or-nothing variant of [`Self::resolve_many`]; the lowest failing
    /// height is reported.
    pub async fn resolve_all<I>(
        &self,
        heights: I,
        concurrency: usize,
    ) -> Result<BTreeMap<u64, DateTime<Utc>>, ResolutionError>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut times = BTreeMap::new();
        let mut first_err: Option<ResolutionError> = None;
        for (height, result) in self.resolve_many(heights, concurrency).await {
            match result {
                Ok(time) => {
                    times.insert(height, time);
                }
                Err(err) => {
                    if first_err.as_ref().map_or(true, |e| err.height < e.height) {
                        first_err = Some(err);
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(times),
        }
    }

    async fn fetch_and_store(&self, height: u64) -> Result<DateTime<Utc>, ResolutionError> {
        // A resolution that finished after our cache miss has already
        // written the time back.
        if let Ok(Some(time)) = self.store.get(height).await {
            debug!(height, "block time cached by an earlier resolution");
            return Ok(time);
        }

        self.stats.inc_remote_lookups();
        let time = self
            .lookup
            .fetch_block_time(height)
            .await
            .map_err(|source| {
                self.stats.inc_lookup_failures();
                ResolutionError { height, source }
            })?;

        if let Err(err) = self.store.set(height, time).await {
            self.stats.inc_cache_write_failures();
            warn!(height, error = %err, "failed to cache block time");
        }

        Ok(time)
    }
}
