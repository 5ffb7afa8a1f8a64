use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::BlockTimeStore;
use crate::error::CacheError;

/// Process-local block time cache.
#[derive(Debug, Default)]
pub struct MemoryBlockTimeStore {
    times: RwLock<HashMap<u64, DateTime<Utc>>>,
}

impl MemoryBlockTimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.times.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.times.read().await.is_empty()
    }
}

#[async_trait]
impl BlockTimeStore for MemoryBlockTimeStore {
    async fn get(&self, height: u64) -> Result<Option<DateTime<Utc>>, CacheError> {
        Ok(self.times.read().await.get(&height).copied())
    }

    async fn set(&self, height: u64, time: DateTime<Utc>) -> Result<(), CacheError> {
        self.times.write().await.entry(height).or_insert(time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn first_write_wins() {
        let store = MemoryBlockTimeStore::new();
        let first = Utc.with_ymd_and_hms(2021, 9, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2021, 9, 2, 0, 0, 0).unwrap();

        assert!(store.is_empty().await);
        store.set(5, first).await.unwrap();
        store.set(5, second).await.unwrap();

        assert_eq!(store.get(5).await.unwrap(), Some(first));
        assert_eq!(store.get(6).await.unwrap(), None);
        assert_eq!(store.len().await, 1);
    }
}
