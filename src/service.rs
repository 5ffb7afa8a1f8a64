use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chains::ChainTable;
use crate::classify::{attach_claimed_relays, Classifier};
use crate::config::{CacheBackend, Config};
use crate::error::{ClassificationError, NodeError, ResolutionError, RewardsError};
use crate::models::{MonthlyRewardSummary, NodeStatus, SortOrder, Transaction};
use crate::pocket::PocketClient;
use crate::resolver::BlockTimeResolver;
use crate::resolver_stats::ResolverSnapshot;
use crate::rewards::{AggregationPolicy, RewardsAggregator};
use crate::storage::{BlockTimeStore, MemoryBlockTimeStore, SqliteBlockTimeStore};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Rewards(#[from] RewardsError),
}

/// Read-only analytics over one Pocket node's view of the chain.
pub struct MonitoringService {
    node: Arc<PocketClient>,
    resolver: Arc<BlockTimeResolver>,
    classifier: Classifier,
    aggregator: RewardsAggregator,
    policy: AggregationPolicy,
    sync_tolerance: u64,
}

impl MonitoringService {
    pub fn new(
        node: Arc<PocketClient>,
        resolver: Arc<BlockTimeResolver>,
        chains: Arc<ChainTable>,
        policy: AggregationPolicy,
        sync_tolerance: u64,
    ) -> Self {
        let classifier = Classifier::new(chains);
        let aggregator = RewardsAggregator::new(resolver.clone(), classifier.clone(), policy);
        Self {
            node,
            resolver,
            classifier,
            aggregator,
            policy,
            sync_tolerance,
        }
    }

    /// Wires the node client, block time cache and chain table from
    /// configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let node = Arc::new(PocketClient::new(
            &config.node_url,
            config.node_timeout,
            config.relay_rates.clone(),
            config.account_txs_per_page,
        )?);

        let store: Arc<dyn BlockTimeStore> = match config.cache_backend {
            CacheBackend::Sqlite => Arc::new(
                SqliteBlockTimeStore::open(&config.database_url)
                    .await
                    .context("failed to open block time cache")?,
            ),
            CacheBackend::Memory => Arc::new(MemoryBlockTimeStore::new()),
        };

        let chains = match &config.chains_file {
            Some(path) => ChainTable::with_overrides_from(path)?,
            None => ChainTable::pocket_mainnet(),
        };
        tracing::info!(
            node_url = %node.base_url(),
            cache = ?config.cache_backend,
            chains = chains.len(),
            "monitoring service configured"
        );

        let resolver = Arc::new(BlockTimeResolver::new(store, node.clone()));
        Ok(Self::new(
            node,
            resolver,
            Arc::new(chains),
            AggregationPolicy {
                max_failure_ratio: config.max_failure_ratio,
                resolve_concurrency: config.resolve_concurrency,
            },
            config.sync_tolerance_blocks,
        ))
    }

    pub async fn height(&self) -> Result<u64, ServiceError> {
        Ok(self.node.height().await?)
    }

    pub async fn params(&self, height: u64) -> Result<Value, ServiceError> {
        Ok(self.node.params(height).await?)
    }

    /// Staking record, balance and sync state of a servicer node. The node
    /// counts as synced when its own height is within the configured
    /// tolerance of the chain height.
    pub async fn node(&self, address: &str) -> Result<NodeStatus, ServiceError> {
        let (staked, balance, chain_height) = tokio::try_join!(
            self.node.node(address),
            self.node.balance(address),
            self.node.height(),
        )?;

        let chains = staked
            .chains
            .iter()
            .map(|id| self.classifier.chains().resolve(id))
            .collect();

        let (is_synced, latest_block_height, latest_block_time) =
            match self.node.service_height(&staked.service_url).await {
                Ok(height) => {
                    let time = match self.resolver.resolve(height).await {
                        Ok(time) => Some(time),
                        Err(err) => {
                            debug!(address, height, error = %err, "no block time for servicer height");
                            None
                        }
                    };
                    let synced = height.saturating_add(self.sync_tolerance) >= chain_height;
                    (synced, height, time)
                }
                Err(err) => {
                    warn!(address, service_url = %staked.service_url, error = %err, "servicer height unavailable");
                    (false, 0, None)
                }
            };

        Ok(NodeStatus {
            address: staked.address,
            pubkey: staked.public_key,
            service_url: staked.service_url,
            balance,
            staked_balance: staked.staked_tokens,
            is_jailed: staked.jailed,
            chains,
            is_synced,
            latest_block_height,
            latest_block_time,
        })
    }

    pub async fn transaction(&self, hash: &str) -> Result<Transaction, ServiceError> {
        let raw = self.node.transaction(hash).await?;
        let time = self.resolver.resolve(raw.height).await?;
        Ok(self.classifier.classify(&raw, time)?)
    }

    /// One page of the account's history, classified. Proofs whose claim is
    /// on the same page get its relay count. Any failure fails the page.
    pub async fn account_transactions(
        &self,
        address: &str,
        page: u32,
        per_page: u32,
        sort: SortOrder,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let mut page = self
            .node
            .account_transactions(address, page, per_page, sort)
            .await?;
        attach_claimed_relays(&mut page.transactions);
        let times = self
            .resolver
            .resolve_all(
                page.transactions.iter().map(|tx| tx.height),
                self.policy.resolve_concurrency,
            )
            .await?;

        let mut out = Vec::with_capacity(page.transactions.len());
        for raw in &page.transactions {
            let time = match times.get(&raw.height) {
                Some(time) => *time,
                None => self.resolver.resolve(raw.height).await?,
            };
            out.push(self.classifier.classify(raw, time)?);
        }
        Ok(out)
    }

    pub async fn block_times(
        &self,
        heights: &[u64],
    ) -> Result<BTreeMap<u64, DateTime<Utc>>, ServiceError> {
        Ok(self
            .resolver
            .resolve_all(heights.iter().copied(), self.policy.resolve_concurrency)
            .await?)
    }

    pub async fn monthly_rewards(
        &self,
        address: &str,
    ) -> Result<Vec<MonthlyRewardSummary>, ServiceError> {
        Ok(self
            .aggregator
            .monthly_rewards(self.node.as_ref(), address)
            .await?)
    }

    pub fn resolver_stats(&self) -> ResolverSnapshot {
        self.resolver.stats()
    }
}
