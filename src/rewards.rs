//! Monthly reward aggregation.
//!
//! An account's transactions are resolved to block times, classified, split
//! into UTC calendar months and folded into [`MonthlyRewardSummary`] values,
//! newest month first. Per-transaction failures are collected over the whole
//! batch; the request only fails once the share of excluded transactions
//! passes the configured ratio.
//!
//! Proofs take their relay count from the claim of the same session. Once a
//! claim has been proven its relays are counted on the proof only.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc, Weekday};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::classify::{attach_claimed_relays, session_key, Classifier};
use crate::error::{ClassificationError, ResolutionError, RewardsError, SourceError};
use crate::models::{
    DayOfWeek, MonthlyRewardSummary, RawTransaction, RelaysByChain, Transaction, TxKind,
};
use crate::resolver::BlockTimeResolver;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Supplies every transaction an account has sent.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_account_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<RawTransaction>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationPolicy {
    /// Largest tolerated `excluded / total` share, 0.0 to 1.0.
    pub max_failure_ratio: f64,
    /// Upper bound on concurrent block time lookups.
    pub resolve_concurrency: usize,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            max_failure_ratio: 0.05,
            resolve_concurrency: 8,
        }
    }
}

pub struct RewardsAggregator {
    resolver: Arc<BlockTimeResolver>,
    classifier: Classifier,
    policy: AggregationPolicy,
}

/// Successes and typed failures of one pass over a batch.
#[derive(Debug, Default)]
struct Fold {
    classified: Vec<Transaction>,
    unresolved: usize,
    unclassified: usize,
    first_resolution_error: Option<ResolutionError>,
    first_classification_error: Option<ClassificationError>,
}

impl Fold {
    fn excluded(&self) -> usize {
        self.unresolved + self.unclassified
    }
}

impl RewardsAggregator {
    pub fn new(
        resolver: Arc<BlockTimeResolver>,
        classifier: Classifier,
        policy: AggregationPolicy,
    ) -> Self {
        Self {
            resolver,
            classifier,
            policy,
        }
    }

    /// Fetches the account's history from `source` and aggregates it.
    pub async fn monthly_rewards(
        &self,
        source: &dyn TransactionSource,
        address: &str,
    ) -> Result<Vec<MonthlyRewardSummary>, RewardsError> {
        let raw = source.fetch_account_transactions(address).await?;
        info!(address, transactions = raw.len(), "aggregating monthly rewards");
        self.aggregate(raw).await
    }

    pub async fn aggregate(
        &self,
        raw: Vec<RawTransaction>,
    ) -> Result<Vec<MonthlyRewardSummary>, RewardsError> {
        let mut raw = dedupe_by_hash(raw);
        settle_claims(&mut raw);
        let total = raw.len();

        let times = self
            .resolver
            .resolve_many(raw.iter().map(|tx| tx.height), self.policy.resolve_concurrency)
            .await;

        let mut fold = Fold::default();
        for tx in &raw {
            match times.get(&tx.height) {
                Some(Ok(_)) if is_unpaired_proof(tx) => {
                    warn!(hash = %tx.hash, "excluding proof without a matching claim");
                    fold.unclassified += 1;
                    fold.first_classification_error
                        .get_or_insert(ClassificationError::MissingField {
                            hash: tx.hash.clone(),
                            field: "num_relays",
                        });
                }
                Some(Ok(time)) => match self.classifier.classify(tx, *time) {
                    Ok(classified) => fold.classified.push(classified),
                    Err(err) => {
                        warn!(hash = %tx.hash, error = %err, "excluding unclassifiable transaction");
                        fold.unclassified += 1;
                        fold.first_classification_error.get_or_insert(err);
                    }
                },
                _ => {
                    warn!(hash = %tx.hash, height = tx.height, "excluding transaction without block time");
                    fold.unresolved += 1;
                }
            }
        }

        // Lowest failing height stands in for all resolution failures.
        fold.first_resolution_error = times
            .into_values()
            .filter_map(Result::err)
            .min_by_key(|err| err.height);

        self.check_failure_ratio(&mut fold, total)?;
        Ok(order_summaries(summarize_months(fold.classified)?))
    }

    fn check_failure_ratio(&self, fold: &mut Fold, total: usize) -> Result<(), RewardsError> {
        let excluded = fold.excluded();
        if excluded == 0 {
            return Ok(());
        }

        let ratio = excluded as f64 / total as f64;
        if ratio <= self.policy.max_failure_ratio {
            warn!(excluded, total, ratio, "aggregating with some transactions excluded");
            return Ok(());
        }

        warn!(
            excluded,
            total,
            ratio,
            max_ratio = self.policy.max_failure_ratio,
            "too many transactions excluded; failing request"
        );

        let resolution = fold
            .first_resolution_error
            .take()
            .map(|first| RewardsError::Resolution {
                failed: excluded,
                total,
                first,
            });
        let classification = fold
            .first_classification_error
            .take()
            .map(|first| RewardsError::Classification {
                failed: excluded,
                total,
                first,
            });

        // The dominant failure kind names the error; resolution wins ties.
        let err = if fold.unresolved >= fold.unclassified {
            resolution.or(classification)
        } else {
            classification.or(resolution)
        };
        err.map_or(Ok(()), Err)
    }
}

/// Moves each proven claim's relay count onto its proof so that the relays
/// are counted once, on the reward event.
fn settle_claims(raw: &mut [RawTransaction]) {
    let settled = attach_claimed_relays(raw);
    if settled.is_empty() {
        return;
    }
    for tx in raw.iter_mut().filter(|tx| {
        TxKind::from_msg_type(&tx.msg_type) == TxKind::Claim
            && session_key(tx).is_some_and(|key| settled.contains(&key))
    }) {
        tx.num_relays = Some("0".to_string());
    }
}

fn is_unpaired_proof(tx: &RawTransaction) -> bool {
    tx.num_relays.is_none() && TxKind::from_msg_type(&tx.msg_type) == TxKind::Proof
}

fn dedupe_by_hash(raw: Vec<RawTransaction>) -> Vec<RawTransaction> {
    let mut seen = HashSet::with_capacity(raw.len());
    raw.into_iter()
        .filter(|tx| seen.insert(tx.hash.clone()))
        .collect()
}

/// Buckets classified transactions by UTC (year, month) and summarizes each
/// non-empty bucket. Output order follows the bucket key, oldest first.
pub fn summarize_months(
    transactions: Vec<Transaction>,
) -> Result<Vec<MonthlyRewardSummary>, RewardsError> {
    let mut buckets: BTreeMap<(i32, u32), Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        buckets
            .entry((tx.time.year(), tx.time.month()))
            .or_default()
            .push(tx);
    }

    buckets
        .into_iter()
        .map(|((year, month), txs)| summarize_month(year, month, txs))
        .collect()
}

fn summarize_month(
    year: i32,
    month: u32,
    mut txs: Vec<Transaction>,
) -> Result<MonthlyRewardSummary, RewardsError> {
    txs.sort_by(|a, b| a.height.cmp(&b.height).then_with(|| a.hash.cmp(&b.hash)));
    let overflow = || RewardsError::Overflow { year, month };

    let mut num_relays: u64 = 0;
    let mut pokt_amount = Decimal::ZERO;
    let mut by_chain: BTreeMap<&str, RelaysByChain> = BTreeMap::new();
    for tx in &txs {
        num_relays = num_relays.checked_add(tx.num_relays).ok_or_else(overflow)?;
        pokt_amount = pokt_amount
            .checked_add(tx.pokt_amount())
            .ok_or_else(overflow)?;

        let entry = by_chain
            .entry(tx.chain_id.as_str())
            .or_insert_with(|| RelaysByChain {
                chain: tx.chain_id.clone(),
                name: tx.chain.name.clone(),
                num_relays: 0,
            });
        entry.num_relays = entry
            .num_relays
            .checked_add(tx.num_relays)
            .ok_or_else(overflow)?;
    }
    let relays_by_chain = by_chain.into_values().collect();

    let mut reward_times: Vec<DateTime<Utc>> = txs
        .iter()
        .filter(|tx| tx.kind.is_reward_event())
        .map(|tx| tx.time)
        .collect();
    reward_times.sort();

    let (avg_sec_between_rewards, total_sec_between_rewards) = gap_stats(&reward_times);

    Ok(MonthlyRewardSummary {
        year,
        month,
        num_relays,
        pokt_amount,
        relays_by_chain,
        avg_sec_between_rewards,
        total_sec_between_rewards,
        days_of_week: days_of_week(&reward_times),
        transactions: txs,
    })
}

/// Returns `(average, total)` seconds between consecutive sorted times; both
/// zero for fewer than two times.
fn gap_stats(sorted: &[DateTime<Utc>]) -> (f64, f64) {
    if sorted.len() < 2 {
        return (0.0, 0.0);
    }

    // Consecutive gaps of a sorted sequence sum to last - first.
    let span = sorted[sorted.len() - 1] - sorted[0];
    let total = match span.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => span.num_milliseconds() as f64 / 1e3,
    };
    (total / (sorted.len() - 1) as f64, total)
}

fn days_of_week(reward_times: &[DateTime<Utc>]) -> BTreeMap<u8, DayOfWeek> {
    let mut days: BTreeMap<u8, DayOfWeek> = WEEKDAYS
        .iter()
        .map(|day| {
            (
                day.num_days_from_sunday() as u8,
                DayOfWeek {
                    name: weekday_name(*day).to_string(),
                    num_proofs: 0,
                },
            )
        })
        .collect();

    for time in reward_times {
        let index = time.weekday().num_days_from_sunday() as u8;
        if let Some(day) = days.get_mut(&index) {
            day.num_proofs += 1;
        }
    }
    days
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

/// Most recent month first.
pub fn order_summaries(mut summaries: Vec<MonthlyRewardSummary>) -> Vec<MonthlyRewardSummary> {
    summaries.sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
    summaries
}
