use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::rates::RateSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node_url: String,
    pub database_url: String,
    pub cache_backend: CacheBackend,
    pub http_bind_addr: String,
    pub chains_file: Option<PathBuf>,
    pub relay_rates: RateSchedule,
    pub max_failure_ratio: f64,
    pub resolve_concurrency: usize,
    pub node_timeout: Duration,
    pub account_txs_per_page: u32,
    pub sync_tolerance_blocks: u64,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing POKT_NODE_URL env var")]
    MissingNodeUrl,

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_url = var("POKT_NODE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingNodeUrl)?;

        let database_url =
            var("DATABASE_URL").unwrap_or_else(|| "sqlite://data/block_times.db".to_string());
        let cache_backend = match var("CACHE_BACKEND").as_deref() {
            None | Some("sqlite") => CacheBackend::Sqlite,
            Some("memory") => CacheBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CACHE_BACKEND",
                    value: other.to_string(),
                    reason: "expected sqlite or memory",
                })
            }
        };
        let http_bind_addr = var("HTTP_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let chains_file = var("CHAINS_FILE").map(PathBuf::from);

        let pokt_per_relay: Decimal = parse_or(&var, "POKT_PER_RELAY", "0.0089")?;
        if is_negative(pokt_per_relay) {
            return Err(ConfigError::Invalid {
                key: "POKT_PER_RELAY",
                value: pokt_per_relay.to_string(),
                reason: "must not be negative",
            });
        }
        let relay_rates = match var("POKT_RATE_SCHEDULE") {
            Some(raw) => parse_rate_schedule(pokt_per_relay, &raw)?,
            None => RateSchedule::flat(pokt_per_relay),
        };

        let max_failure_ratio: f64 = parse_or(&var, "MAX_FAILURE_RATIO", "0.05")?;
        if !(0.0..=1.0).contains(&max_failure_ratio) {
            return Err(ConfigError::Invalid {
                key: "MAX_FAILURE_RATIO",
                value: max_failure_ratio.to_string(),
                reason: "must be between 0.0 and 1.0",
            });
        }

        let resolve_concurrency: usize = parse_or(&var, "RESOLVE_CONCURRENCY", "8")?;
        if resolve_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "RESOLVE_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }

        let node_timeout = Duration::from_secs(parse_or(&var, "NODE_TIMEOUT_SECS", "20")?);
        let account_txs_per_page: u32 = parse_or(&var, "ACCOUNT_TXS_PER_PAGE", "100")?;
        let sync_tolerance_blocks: u64 = parse_or(&var, "SYNC_TOLERANCE_BLOCKS", "2")?;

        Ok(Self {
            node_url,
            database_url,
            cache_backend,
            http_bind_addr,
            chains_file,
            relay_rates,
            max_failure_ratio,
            resolve_concurrency,
            node_timeout,
            account_txs_per_page,
            sync_tolerance_blocks,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = var(key).unwrap_or_else(|| default.to_string());
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: "unparseable value",
    })
}

fn is_negative(rate: Decimal) -> bool {
    rate.is_sign_negative() && !rate.is_zero()
}

/// Parses `height:rate` pairs separated by commas, e.g.
/// `30000:0.0065,60000:0.0042`.
fn parse_rate_schedule(base: Decimal, raw: &str) -> Result<RateSchedule, ConfigError> {
    let invalid = |value: &str, reason| ConfigError::Invalid {
        key: "POKT_RATE_SCHEDULE",
        value: value.to_string(),
        reason,
    };

    let mut rates = RateSchedule::flat(base);
    for step in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (height, rate) = step
            .split_once(':')
            .ok_or_else(|| invalid(step, "expected height:rate"))?;
        let height: u64 = height
            .trim()
            .parse()
            .map_err(|_| invalid(step, "unparseable height"))?;
        let rate = Decimal::from_str(rate.trim()).map_err(|_| invalid(step, "unparseable rate"))?;
        if is_negative(rate) {
            return Err(invalid(step, "rate must not be negative"));
        }
        rates = rates.with_step(height, rate);
    }
    Ok(rates)
}
