use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{
    error::{LookupError, NodeError, SourceError},
    models::{AccountTxsPage, RawTransaction, SortOrder, StakedNode},
    rates::RateSchedule,
    resolver::BlockTimeLookup,
    rewards::TransactionSource,
};

const PATH_HEIGHT: &str = "query/height";
const PATH_BLOCK: &str = "query/block";
const PATH_NODE: &str = "query/node";
const PATH_BALANCE: &str = "query/balance";
const PATH_TX: &str = "query/tx";
const PATH_ACCOUNT_TXS: &str = "query/accounttxs";
const PATH_ALL_PARAMS: &str = "query/allparams";

const MAX_ACCOUNT_TX_PAGES: u32 = 10_000;

/// JSON client for a Pocket node's `/v1` query API.
#[derive(Debug, Clone)]
pub struct PocketClient {
    http: reqwest::Client,
    base_url: String,
    relay_rates: RateSchedule,
    per_page: u32,
    max_pages: u32,
}

impl PocketClient {
    pub fn new(
        node_url: &str,
        timeout: Duration,
        relay_rates: RateSchedule,
        per_page: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(node_url).context("invalid POKT_NODE_URL")?;
        Ok(Self {
            http,
            base_url: url.as_str().trim_end_matches('/').to_string(),
            relay_rates,
            per_page: per_page.max(1),
            max_pages: MAX_ACCOUNT_TX_PAGES,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn height(&self) -> Result<u64, NodeError> {
        let resp: HeightResponse = self.post(&self.base_url, PATH_HEIGHT, &Empty {}).await?;
        Ok(resp.height)
    }

    /// Height reported by a servicer's own endpoint, used for sync checks.
    pub async fn service_height(&self, service_url: &str) -> Result<u64, NodeError> {
        let base = format!("{}/v1", service_url.trim_end_matches('/'));
        let resp: HeightResponse = self.post(&base, PATH_HEIGHT, &Empty {}).await?;
        Ok(resp.height)
    }

    pub async fn block_time(&self, height: u64) -> Result<DateTime<Utc>, LookupError> {
        let resp: BlockResponse = self
            .post(&self.base_url, PATH_BLOCK, &HeightRequest { height })
            .await?;
        resp.block
            .and_then(|b| b.header)
            .and_then(|h| h.time)
            .ok_or(LookupError::UnknownHeight(height))
    }

    pub async fn node(&self, address: &str) -> Result<StakedNode, NodeError> {
        let resp: WireNode = self
            .post(
                &self.base_url,
                PATH_NODE,
                &AddressRequest {
                    address,
                    height: 0,
                },
            )
            .await?;
        Ok(resp.into_staked_node())
    }

    pub async fn balance(&self, address: &str) -> Result<u64, NodeError> {
        let resp: BalanceResponse = self
            .post(
                &self.base_url,
                PATH_BALANCE,
                &AddressRequest {
                    address,
                    height: 0,
                },
            )
            .await?;
        Ok(resp.balance)
    }

    pub async fn transaction(&self, hash: &str) -> Result<RawTransaction, NodeError> {
        let resp: WireTx = self
            .post(&self.base_url, PATH_TX, &TxRequest { hash, prove: false })
            .await?;
        Ok(resp.into_raw(&self.relay_rates))
    }

    pub async fn account_transactions(
        &self,
        address: &str,
        page: u32,
        per_page: u32,
        sort: SortOrder,
    ) -> Result<AccountTxsPage, NodeError> {
        let req = AccountTxsRequest {
            address,
            page: page.max(1),
            per_page: per_page.max(1),
            prove: false,
            received: false,
            order: sort.as_str(),
        };
        let resp: AccountTxsResponse = self.post(&self.base_url, PATH_ACCOUNT_TXS, &req).await?;
        Ok(AccountTxsPage {
            transactions: resp
                .txs
                .into_iter()
                .map(|tx| tx.into_raw(&self.relay_rates))
                .collect(),
            page_count: resp.page_count,
            total_txs: resp.total_txs,
        })
    }

    pub async fn params(&self, height: u64) -> Result<Value, NodeError> {
        self.post(&self.base_url, PATH_ALL_PARAMS, &HeightRequest { height })
            .await
    }

    /// Walks every page of the account's sent transactions. Running into the
    /// page cap is an error rather than a truncated history.
    pub async fn all_account_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<RawTransaction>, NodeError> {
        let mut out = Vec::new();
        let mut page = 1;

        loop {
            let batch = self
                .account_transactions(address, page, self.per_page, SortOrder::Desc)
                .await?;
            let fetched = batch.transactions.len();
            out.extend(batch.transactions);

            tracing::debug!(
                address,
                page,
                page_count = batch.page_count,
                fetched,
                "fetched account transactions page"
            );

            if fetched == 0 || page >= batch.page_count {
                break;
            }
            if page >= self.max_pages {
                return Err(NodeError::PageLimit {
                    path: PATH_ACCOUNT_TXS.to_string(),
                    pages: page,
                });
            }
            page += 1;
        }

        Ok(out)
    }

    async fn post<Req, Resp>(&self, base: &str, path: &str, body: &Req) -> Result<Resp, NodeError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", base, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest(path, e))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| NodeError::from_reqwest(path, e))?;

        if !status.is_success() {
            return Err(NodeError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|source| NodeError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[async_trait]
impl BlockTimeLookup for PocketClient {
    async fn fetch_block_time(&self, height: u64) -> Result<DateTime<Utc>, LookupError> {
        self.block_time(height).await
    }
}

#[async_trait]
impl TransactionSource for PocketClient {
    async fn fetch_account_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<RawTransaction>, SourceError> {
        self.all_account_transactions(address)
            .await
            .map_err(|source| SourceError {
                address: address.to_string(),
                source,
            })
    }
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct HeightRequest {
    height: u64,
}

#[derive(Serialize)]
struct AddressRequest<'a> {
    address: &'a str,
    height: u64,
}

#[derive(Serialize)]
struct TxRequest<'a> {
    hash: &'a str,
    prove: bool,
}

#[derive(Serialize)]
struct AccountTxsRequest<'a> {
    address: &'a str,
    page: u32,
    per_page: u32,
    prove: bool,
    received: bool,
    order: &'a str,
}

#[derive(Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[derive(Deserialize)]
struct BlockResponse {
    block: Option<WireBlock>,
}

#[derive(Deserialize)]
struct WireBlock {
    header: Option<WireHeader>,
}

#[derive(Deserialize)]
struct WireHeader {
    time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct AccountTxsResponse {
    #[serde(default)]
    txs: Vec<WireTx>,
    #[serde(default)]
    page_count: u32,
    #[serde(default)]
    total_txs: u64,
}

#[derive(Deserialize)]
struct WireNode {
    address: String,
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    service_url: String,
    #[serde(default)]
    chains: Vec<String>,
    #[serde(default)]
    jailed: bool,
    #[serde(default)]
    tokens: Value,
}

impl WireNode {
    fn into_staked_node(self) -> StakedNode {
        StakedNode {
            address: self.address,
            public_key: self.public_key,
            service_url: self.service_url,
            chains: self.chains,
            jailed: self.jailed,
            staked_tokens: scalar_string(&self.tokens)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
struct WireTx {
    hash: String,
    #[serde(default)]
    height: u64,
    #[serde(default)]
    tx_result: WireTxResult,
    #[serde(rename = "stdTx", default)]
    std_tx: WireStdTx,
}

#[derive(Deserialize, Default)]
struct WireTxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message_type: String,
}

#[derive(Deserialize, Default)]
struct WireStdTx {
    #[serde(default)]
    msg: WireMsg,
}

#[derive(Deserialize, Default)]
struct WireMsg {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    value: Value,
}

impl WireTx {
    /// Flattens claim (`header.*`, `total_proofs`, `expiration_height`) and
    /// proof (`leaf.value.*`) message shapes into one record. Proofs carry no
    /// relay count of their own; it comes from the matching claim.
    fn into_raw(self, relay_rates: &RateSchedule) -> RawTransaction {
        let value = &self.std_tx.msg.value;
        let header = &value["header"];
        let leaf = &value["leaf"]["value"];

        let msg_type = if self.tx_result.message_type.is_empty() {
            self.std_tx.msg.kind.clone()
        } else {
            self.tx_result.message_type.clone()
        };

        RawTransaction {
            hash: self.hash,
            height: self.height,
            msg_type,
            result_code: self.tx_result.code,
            chain_id: first_scalar(&[&header["chain"], &leaf["blockchain"]]),
            session_height: first_scalar(&[
                &header["session_height"],
                &leaf["session_block_height"],
            ]),
            expire_height: first_scalar(&[&value["expiration_height"]]),
            app_pubkey: first_scalar(&[
                &header["app_public_key"],
                &leaf["aat"]["app_pub_key"],
            ]),
            num_relays: first_scalar(&[&value["total_proofs"]]),
            pokt_per_relay: Some(relay_rates.rate_at(self.height).to_string()),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_scalar(candidates: &[&Value]) -> Option<String> {
    candidates.iter().find_map(|v| scalar_string(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn rate() -> Decimal {
        Decimal::from_str("0.0089").unwrap()
    }

    fn client(server: &MockServer) -> PocketClient {
        PocketClient::new(
            &format!("{}/v1", server.uri()),
            Duration::from_secs(5),
            RateSchedule::flat(rate()),
            2,
        )
        .unwrap()
    }

    fn claim_json(hash: &str, height: u64) -> Value {
        json!({
            "hash": hash,
            "height": height,
            "tx_result": { "code": 0, "message_type": "claim" },
            "stdTx": {
                "msg": {
                    "type": "pocketcore/claim",
                    "value": {
                        "header": {
                            "app_public_key": "apppub",
                            "chain": "0021",
                            "session_height": "1000"
                        },
                        "total_proofs": "250",
                        "expiration_height": "1024"
                    }
                }
            }
        })
    }

    #[test]
    fn claim_is_flattened() {
        let wire: WireTx = serde_json::from_value(claim_json("abc", 1003)).unwrap();
        let raw = wire.into_raw(&RateSchedule::flat(rate()));
        assert_eq!(raw.hash, "abc");
        assert_eq!(raw.height, 1003);
        assert_eq!(raw.msg_type, "claim");
        assert_eq!(raw.chain_id.as_deref(), Some("0021"));
        assert_eq!(raw.session_height.as_deref(), Some("1000"));
        assert_eq!(raw.expire_height.as_deref(), Some("1024"));
        assert_eq!(raw.app_pubkey.as_deref(), Some("apppub"));
        assert_eq!(raw.num_relays.as_deref(), Some("250"));
        assert_eq!(raw.pokt_per_relay.as_deref(), Some("0.0089"));
    }

    #[test]
    fn proof_leaf_is_flattened() {
        let wire: WireTx = serde_json::from_value(json!({
            "hash": "p1",
            "height": 1010,
            "tx_result": { "code": 0, "message_type": "" },
            "stdTx": {
                "msg": {
                    "type": "pocketcore/proof",
                    "value": {
                        "leaf": {
                            "type": "pocketcore/relay_proof",
                            "value": {
                                "aat": {
                                    "app_pub_key": "apppub",
                                    "client_pub_key": "clientpub",
                                    "signature": "",
                                    "version": "0.0.1"
                                },
                                "blockchain": "0009",
                                "entropy": 3238049845291034_u64,
                                "request_hash": "rh",
                                "servicer_pub_key": "servpub",
                                "session_block_height": 1000,
                                "signature": "sig"
                            }
                        },
                        "evidence_type": 1
                    }
                }
            }
        }))
        .unwrap();
        let raw = wire.into_raw(&RateSchedule::flat(rate()));
        assert_eq!(raw.msg_type, "pocketcore/proof");
        assert_eq!(raw.chain_id.as_deref(), Some("0009"));
        assert_eq!(raw.session_height.as_deref(), Some("1000"));
        assert_eq!(raw.app_pubkey.as_deref(), Some("apppub"));
        assert_eq!(raw.num_relays, None);
        assert_eq!(raw.expire_height, None);
    }

    #[test]
    fn rate_follows_transaction_height() {
        let rates =
            RateSchedule::flat(rate()).with_step(2_000, Decimal::from_str("0.0042").unwrap());
        let early: WireTx = serde_json::from_value(claim_json("early", 1_999)).unwrap();
        let late: WireTx = serde_json::from_value(claim_json("late", 2_000)).unwrap();
        assert_eq!(early.into_raw(&rates).pokt_per_relay.as_deref(), Some("0.0089"));
        assert_eq!(late.into_raw(&rates).pokt_per_relay.as_deref(), Some("0.0042"));
    }

    #[tokio::test]
    async fn block_time_reads_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/block"))
            .and(body_partial_json(json!({ "height": 42 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "block": { "header": { "height": "42", "time": "2021-08-13T18:43:20.409Z" } }
            })))
            .mount(&server)
            .await;

        let time = client(&server).block_time(42).await.unwrap();
        let expected = Utc.with_ymd_and_hms(2021, 8, 13, 18, 43, 20).unwrap()
            + chrono::Duration::milliseconds(409);
        assert_eq!(time, expected);
    }

    #[tokio::test]
    async fn block_without_header_is_unknown_height() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/block"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "block": null })))
            .mount(&server)
            .await;

        let err = client(&server).block_time(7).await.unwrap_err();
        assert!(matches!(err, LookupError::UnknownHeight(7)));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/height"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server).height().await.unwrap_err();
        assert!(matches!(err, NodeError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn account_transactions_walk_all_pages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/accounttxs"))
            .and(body_partial_json(json!({ "page": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page_count": 2,
                "total_txs": 3,
                "txs": [claim_json("a", 10), claim_json("b", 11)]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/query/accounttxs"))
            .and(body_partial_json(json!({ "page": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page_count": 2,
                "total_txs": 3,
                "txs": [claim_json("c", 12)]
            })))
            .mount(&server)
            .await;

        let txs = client(&server)
            .fetch_account_transactions("addr")
            .await
            .unwrap();
        let hashes: Vec<_> = txs.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn page_cap_is_an_error_not_a_short_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/accounttxs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page_count": 50,
                "total_txs": 100,
                "txs": [claim_json("a", 10), claim_json("b", 11)]
            })))
            .mount(&server)
            .await;

        let mut client = client(&server);
        client.max_pages = 3;
        let err = client.all_account_transactions("addr").await.unwrap_err();
        assert!(matches!(err, NodeError::PageLimit { pages: 3, .. }));
    }

    #[tokio::test]
    async fn source_failure_names_the_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/accounttxs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_account_transactions("addr")
            .await
            .unwrap_err();
        assert_eq!(err.address, "addr");
        assert!(matches!(err.source, NodeError::Decode { .. }));
    }

    #[tokio::test]
    async fn node_tokens_parse_from_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query/node"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "address": "addr",
                "public_key": "pub",
                "service_url": "https://node.example:443",
                "chains": ["0021", "0099"],
                "jailed": true,
                "tokens": "15000000000"
            })))
            .mount(&server)
            .await;

        let node = client(&server).node("addr").await.unwrap();
        assert_eq!(node.staked_tokens, 15_000_000_000);
        assert!(node.jailed);
        assert_eq!(node.chains, vec!["0021", "0099"]);
    }
}
