use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction as reported by the node, before classification.
///
/// Numeric fields are kept as the strings the node sent; the classifier owns
/// parsing so that a malformed value is scoped to the one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: String,
    pub height: u64,
    pub msg_type: String,
    pub result_code: u32,
    pub chain_id: Option<String>,
    pub session_height: Option<String>,
    pub expire_height: Option<String>,
    pub app_pubkey: Option<String>,
    pub num_relays: Option<String>,
    pub pokt_per_relay: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Proof,
    Claim,
    Send,
    Stake,
    Unstake,
    Unjail,
    Other,
}

impl TxKind {
    /// Maps both short (`proof`) and routed (`pocketcore/proof`) message
    /// types onto the closed set of kinds.
    pub fn from_msg_type(msg_type: &str) -> Self {
        let short = msg_type
            .rsplit('/')
            .next()
            .unwrap_or(msg_type)
            .to_ascii_lowercase();
        match short.as_str() {
            "proof" => TxKind::Proof,
            "claim" => TxKind::Claim,
            "send" => TxKind::Send,
            "stake_validator" | "stake" | "msgstake" => TxKind::Stake,
            "begin_unstake_validator" | "unstake" | "msgbeginunstake" => TxKind::Unstake,
            "unjail_validator" | "unjail" | "msgunjail" => TxKind::Unjail,
            _ => TxKind::Other,
        }
    }

    /// Only proofs count as reward events for timing and weekday statistics.
    pub fn is_reward_event(self) -> bool {
        matches!(self, TxKind::Proof)
    }

    pub fn carries_relays(self) -> bool {
        matches!(self, TxKind::Proof | TxKind::Claim)
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxKind::Proof => "proof",
            TxKind::Claim => "claim",
            TxKind::Send => "send",
            TxKind::Stake => "stake",
            TxKind::Unstake => "unstake",
            TxKind::Unjail => "unjail",
            TxKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    pub id: String,
}

/// A classified, timestamped ledger transaction. Never mutated after the
/// classifier builds it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub hash: String,
    pub height: u64,
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub chain_id: String,
    pub chain: Chain,
    pub session_height: u64,
    pub expire_height: u64,
    pub app_pubkey: String,
    pub num_relays: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub pokt_per_relay: Decimal,
    pub is_confirmed: bool,
}

impl Transaction {
    pub fn pokt_amount(&self) -> Decimal {
        self.pokt_per_relay
            .saturating_mul(Decimal::from(self.num_relays))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaysByChain {
    pub chain: String,
    pub name: String,
    pub num_relays: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayOfWeek {
    pub name: String,
    pub num_proofs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRewardSummary {
    pub year: i32,
    pub month: u32,
    pub num_relays: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub pokt_amount: Decimal,
    pub relays_by_chain: Vec<RelaysByChain>,
    pub avg_sec_between_rewards: f64,
    pub total_sec_between_rewards: f64,
    pub transactions: Vec<Transaction>,
    /// Keyed by weekday index, 0 = Sunday.
    pub days_of_week: BTreeMap<u8, DayOfWeek>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountTxsPage {
    pub transactions: Vec<RawTransaction>,
    pub page_count: u32,
    pub total_txs: u64,
}

/// Node (servicer) record as staked on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakedNode {
    pub address: String,
    pub public_key: String,
    pub service_url: String,
    pub chains: Vec<String>,
    pub jailed: bool,
    pub staked_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub pubkey: String,
    pub service_url: String,
    pub balance: u64,
    pub staked_balance: u64,
    pub is_jailed: bool,
    pub chains: Vec<Chain>,
    pub is_synced: bool,
    pub latest_block_height: u64,
    pub latest_block_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_accepts_routed_and_short_types() {
        assert_eq!(TxKind::from_msg_type("pocketcore/proof"), TxKind::Proof);
        assert_eq!(TxKind::from_msg_type("proof"), TxKind::Proof);
        assert_eq!(TxKind::from_msg_type("pocketcore/claim"), TxKind::Claim);
        assert_eq!(TxKind::from_msg_type("pos/Send"), TxKind::Send);
        assert_eq!(TxKind::from_msg_type("pos/MsgUnjail"), TxKind::Unjail);
        assert_eq!(TxKind::from_msg_type("gov/upgrade"), TxKind::Other);
        assert_eq!(TxKind::from_msg_type(""), TxKind::Other);
    }

    #[test]
    fn only_proofs_are_reward_events() {
        assert!(TxKind::Proof.is_reward_event());
        assert!(!TxKind::Claim.is_reward_event());
        assert!(TxKind::Claim.carries_relays());
        assert!(!TxKind::Send.carries_relays());
    }

    #[test]
    fn pokt_amount_is_exact() {
        let tx = Transaction {
            hash: "h".into(),
            height: 1,
            time: Utc::now(),
            kind: TxKind::Proof,
            chain_id: "0021".into(),
            chain: Chain {
                name: "Ethereum".into(),
                id: "0021".into(),
            },
            session_height: 1,
            expire_height: 5,
            app_pubkey: "app".into(),
            num_relays: 3,
            pokt_per_relay: Decimal::new(1, 1),
            is_confirmed: true,
        };
        assert_eq!(tx.pokt_amount(), Decimal::new(3, 1));
    }
}
