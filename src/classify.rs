use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::chains::ChainTable;
use crate::error::ClassificationError;
use crate::models::{RawTransaction, Transaction, TxKind};

#[derive(Debug, Clone)]
pub struct Classifier {
    chains: Arc<ChainTable>,
}

impl Classifier {
    pub fn new(chains: Arc<ChainTable>) -> Self {
        Self { chains }
    }

    pub fn chains(&self) -> &ChainTable {
        &self.chains
    }

    /// Builds a [`Transaction`] from a node record and its resolved block
    /// time.
    ///
    /// Relay-bearing kinds must carry a chain and a rate, and claims must
    /// carry their relay count. A proof without one (see
    /// [`attach_claimed_relays`]) counts zero relays, as do other kinds. A
    /// value that is present but unparseable is an error for every kind.
    pub fn classify(
        &self,
        raw: &RawTransaction,
        time: DateTime<Utc>,
    ) -> Result<Transaction, ClassificationError> {
        let kind = TxKind::from_msg_type(&raw.msg_type);
        let required = kind.carries_relays();

        let chain_id = match raw.chain_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ if required => return Err(missing(raw, "chain_id")),
            _ => String::new(),
        };
        let chain = self.chains.resolve(&chain_id);

        let num_relays = parse_field::<u64>(
            raw,
            "num_relays",
            raw.num_relays.as_deref(),
            kind == TxKind::Claim,
        )?;
        let pokt_per_relay =
            parse_field::<Decimal>(raw, "pokt_per_relay", raw.pokt_per_relay.as_deref(), required)?;
        if pokt_per_relay.is_sign_negative() && !pokt_per_relay.is_zero() {
            return Err(ClassificationError::Malformed {
                hash: raw.hash.clone(),
                field: "pokt_per_relay",
                value: pokt_per_relay.to_string(),
            });
        }
        if pokt_per_relay.checked_mul(Decimal::from(num_relays)).is_none() {
            return Err(ClassificationError::PayoutOverflow {
                hash: raw.hash.clone(),
            });
        }

        let session_height =
            parse_field::<u64>(raw, "session_height", raw.session_height.as_deref(), false)?;
        let expire_height =
            parse_field::<u64>(raw, "expire_height", raw.expire_height.as_deref(), false)?;
        if raw.expire_height.is_some() && expire_height < session_height {
            return Err(ClassificationError::InvalidWindow {
                hash: raw.hash.clone(),
                session: session_height,
                expire: expire_height,
            });
        }

        Ok(Transaction {
            hash: raw.hash.clone(),
            height: raw.height,
            time,
            kind,
            chain_id,
            chain,
            session_height,
            expire_height,
            app_pubkey: raw.app_pubkey.clone().unwrap_or_default(),
            num_relays,
            pokt_per_relay,
            is_confirmed: raw.result_code == 0 && raw.height > 0,
        })
    }
}

/// (app public key, chain id, session height) of a claim or proof.
pub type SessionKey = (String, String, String);

pub fn session_key(raw: &RawTransaction) -> Option<SessionKey> {
    let field = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some((
        field(&raw.app_pubkey)?,
        field(&raw.chain_id)?,
        field(&raw.session_height)?,
    ))
}

/// Proofs on chain carry no relay count; it is the `total_proofs` of the
/// claim for the same session. Copies that count onto every proof that lacks
/// one and returns the sessions whose claim was used.
pub fn attach_claimed_relays(raw: &mut [RawTransaction]) -> HashSet<SessionKey> {
    let mut claimed: HashMap<SessionKey, String> = HashMap::new();
    for tx in raw
        .iter()
        .filter(|tx| TxKind::from_msg_type(&tx.msg_type) == TxKind::Claim)
    {
        if let (Some(key), Some(count)) = (session_key(tx), tx.num_relays.as_ref()) {
            claimed.entry(key).or_insert_with(|| count.clone());
        }
    }

    let mut matched = HashSet::new();
    for tx in raw.iter_mut().filter(|tx| {
        tx.num_relays.is_none() && TxKind::from_msg_type(&tx.msg_type) == TxKind::Proof
    }) {
        let Some(key) = session_key(tx) else {
            continue;
        };
        if let Some(count) = claimed.get(&key) {
            tx.num_relays = Some(count.clone());
            matched.insert(key);
        }
    }
    matched
}

fn missing(raw: &RawTransaction, field: &'static str) -> ClassificationError {
    ClassificationError::MissingField {
        hash: raw.hash.clone(),
        field,
    }
}

fn parse_field<T>(
    raw: &RawTransaction,
    field: &'static str,
    value: Option<&str>,
    required: bool,
) -> Result<T, ClassificationError>
where
    T: FromStr + Default,
{
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.parse().map_err(|_| ClassificationError::Malformed {
            hash: raw.hash.clone(),
            field,
            value: v.to_string(),
        }),
        _ if required => Err(missing(raw, field)),
        _ => Ok(T::default()),
    }
}
