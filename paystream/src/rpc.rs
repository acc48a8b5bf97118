//! JSON-RPC ledger client
//!
//! Talks to a single ledger node over JSON-RPC 2.0. Queries and submission
//! go to the same endpoint; a failed submission is reported, never retried
//! against another node.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    amount::{Coin, Denom},
    config::ClientConfig,
    error::Unreachable,
    events::{parse_timestamp, LedgerEvent, STREAM_EVENT_KINDS},
    flow_rate::FeeFraction,
    history::{merge_history, StreamTx},
    ledger::{
        BroadcastResult, FeeHint, LedgerQuery, LedgerSubmit, PageRequest, SignedTransition,
        StreamPage, StreamParams,
    },
    period::Period,
    state::{Amount, StreamState},
    transition::UnsignedTransition,
};

/// JSON-RPC request ID counter
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Outgoing JSON-RPC 2.0 call
#[derive(Debug, Serialize)]
struct RpcCall<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// Reply to an [`RpcCall`]; the envelope's `jsonrpc` and `id` are not checked
#[derive(Debug, Deserialize)]
struct RpcReply<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

/// Error object of a failed call
#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

/// Ledger node reached over JSON-RPC.
#[derive(Debug)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: String,
    denom: Denom,
    gas_adjustment: f64,
}

impl RpcLedger {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        denom: Denom,
        gas_adjustment: f64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            denom,
            gas_adjustment,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            config.rpc_url.clone(),
            config.request_timeout(),
            config.denom.clone(),
            config.gas_adjustment,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let call = RpcCall {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let start = Instant::now();
        let response = self.client.post(&self.url).json(&call).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned HTTP {}", method, response.status()));
        }

        let reply: RpcReply<T> = response.json().await?;
        debug!(
            method,
            id,
            latency_ms = start.elapsed().as_millis() as u64,
            "rpc call complete"
        );

        match (reply.result, reply.error) {
            (_, Some(fault)) => Err(anyhow!(
                "{} failed ({}): {}",
                method,
                fault.code,
                fault.message
            )),
            (Some(result), None) => Ok(result),
            (None, None) => Err(anyhow!("{} reply has neither result nor error", method)),
        }
    }

    async fn query<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, Unreachable> {
        self.call(method, params).await.map_err(|e| {
            warn!(method, "ledger query failed: {:#}", e);
            Unreachable::Query(format!("{:#}", e))
        })
    }

    /// Gas limit for a simulated gas figure.
    fn adjusted_gas(&self, gas_used: u64) -> u64 {
        (gas_used as f64 * self.gas_adjustment).ceil() as u64
    }
}

#[async_trait]
impl LedgerQuery for RpcLedger {
    async fn query_stream(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<StreamState>, Unreachable> {
        let result: StreamQueryResult = self
            .query(
                "stream_getStream",
                json!({ "sender": sender, "receiver": receiver }),
            )
            .await?;

        result
            .stream
            .map(|record| record.into_state(&self.denom))
            .transpose()
            .map_err(|e| Unreachable::Query(format!("{:#}", e)))
    }

    async fn query_calculate_flow_rate(
        &self,
        amount: &Coin,
        period: Period,
        duration: u64,
    ) -> Result<u64, Unreachable> {
        let result: FlowRateResult = self
            .query(
                "stream_calculateFlowRate",
                json!({
                    "coin": amount.to_string(),
                    "period": period.code(),
                    "duration": duration,
                }),
            )
            .await?;

        result
            .flow_rate
            .as_u64()
            .map_err(|e| Unreachable::Query(format!("{:#}", e)))
    }

    async fn query_streams(&self, page: &PageRequest) -> Result<StreamPage, Unreachable> {
        let result: StreamsResult = self
            .query(
                "stream_getStreams",
                json!({
                    "pagination": {
                        "key": page.key,
                        "limit": page.limit,
                        "count_total": page.count_total,
                        "reverse": page.reverse,
                    }
                }),
            )
            .await?;

        result
            .into_page(&self.denom)
            .map_err(|e| Unreachable::Query(format!("{:#}", e)))
    }

    async fn query_stream_history(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<StreamTx>, Unreachable> {
        let mut batches = Vec::with_capacity(STREAM_EVENT_KINDS.len());
        for kind in STREAM_EVENT_KINDS {
            let result: TxSearchResult = self
                .query(
                    "tx_searchEvents",
                    json!({
                        "events": pair_event_filter(kind, sender, receiver),
                        "order_by": "asc",
                    }),
                )
                .await?;

            let txs = result
                .tx_responses
                .into_iter()
                .map(TxResponse::into_result)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| Unreachable::Query(format!("{:#}", e)))?;
            debug!(kind, found = txs.len(), "searched stream transactions");
            batches.push(txs);
        }

        merge_history(sender, receiver, batches).map_err(|e| {
            warn!(sender, receiver, "stream history has an undecodable event: {}", e);
            Unreachable::Query(e.to_string())
        })
    }

    async fn query_params(&self) -> Result<StreamParams, Unreachable> {
        let result: ParamsResult = self.query("stream_getParams", json!({})).await?;
        let validator_fee: FeeFraction = result
            .params
            .validator_fee
            .parse()
            .map_err(|e| Unreachable::Query(format!("bad validator_fee param: {}", e)))?;

        Ok(StreamParams { validator_fee })
    }

    async fn query_balance(&self, address: &str, denom: &str) -> Result<Amount, Unreachable> {
        let result: BalanceResult = self
            .query(
                "bank_getBalance",
                json!({ "address": address, "denom": denom }),
            )
            .await?;

        match result.balance {
            Some(coin) => coin
                .amount
                .parse()
                .map_err(|_| Unreachable::Query(format!("bad balance amount {:?}", coin.amount))),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl LedgerSubmit for RpcLedger {
    async fn estimate_fee(&self, tx: &UnsignedTransition) -> Result<FeeHint, Unreachable> {
        let result: SimulateResult = self
            .call(
                "tx_simulate",
                json!({ "signer": tx.signer(), "messages": [tx.message()] }),
            )
            .await
            .map_err(|e| Unreachable::FeeEstimation(format!("{:#}", e)))?;

        let gas_used = result
            .gas_used
            .as_u64()
            .map_err(|e| Unreachable::FeeEstimation(format!("{:#}", e)))?;
        let gas_price = result
            .gas_price
            .as_u64()
            .map_err(|e| Unreachable::FeeEstimation(format!("{:#}", e)))?;
        let gas = self.adjusted_gas(gas_used);

        Ok(FeeHint {
            amount: self.denom.coin(gas as u128 * gas_price as u128),
            gas,
        })
    }

    async fn broadcast(&self, tx: SignedTransition) -> Result<BroadcastResult, Unreachable> {
        let tx_bytes = base64::engine::general_purpose::STANDARD.encode(&tx.tx_bytes);
        let response: TxResponse = self
            .call("tx_broadcast", json!({ "tx_bytes": tx_bytes }))
            .await
            .map_err(|e| Unreachable::Broadcast(format!("{:#}", e)))?;

        response
            .into_result()
            .map_err(|e| Unreachable::Broadcast(format!("{:#}", e)))
    }
}

// Response types for RPC calls

/// Integers arrive either as JSON numbers or as decimal strings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
enum Number {
    Int(u64),
    Str(String),
}

impl Number {
    fn as_u64(&self) -> Result<u64> {
        match self {
            Number::Int(n) => Ok(*n),
            Number::Str(s) => s
                .trim()
                .parse()
                .with_context(|| format!("expected an integer, got {:?}", s)),
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::Int(0)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct CoinRecord {
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct StreamQueryResult {
    stream: Option<StreamRecord>,
}

#[derive(Debug, Deserialize)]
struct StreamRecord {
    sender: String,
    receiver: String,
    deposit: CoinRecord,
    flow_rate: Number,
    last_outflow_time: String,
    deposit_zero_time: String,
}

impl StreamRecord {
    fn into_state(self, denom: &Denom) -> Result<StreamState> {
        if self.deposit.denom != denom.base {
            return Err(anyhow!(
                "stream deposit in {}, expected {}",
                self.deposit.denom,
                denom.base
            ));
        }
        let last_outflow_time = parse_timestamp(&self.last_outflow_time)
            .ok_or_else(|| anyhow!("bad last_outflow_time {:?}", self.last_outflow_time))?;
        let deposit_zero_time = parse_timestamp(&self.deposit_zero_time)
            .ok_or_else(|| anyhow!("bad deposit_zero_time {:?}", self.deposit_zero_time))?;

        Ok(StreamState {
            sender: self.sender,
            receiver: self.receiver,
            flow_rate: self.flow_rate.as_u64()?,
            deposit: self
                .deposit
                .amount
                .parse()
                .with_context(|| format!("bad deposit amount {:?}", self.deposit.amount))?,
            deposit_zero_time,
            last_outflow_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaginationRecord {
    #[serde(default)]
    next_key: Option<String>,
    #[serde(default)]
    total: Option<Number>,
}

#[derive(Debug, Deserialize)]
struct StreamsResult {
    #[serde(default)]
    streams: Vec<StreamRecord>,
    #[serde(default)]
    pagination: Option<PaginationRecord>,
}

impl StreamsResult {
    fn into_page(self, denom: &Denom) -> Result<StreamPage> {
        let streams = self
            .streams
            .into_iter()
            .map(|record| record.into_state(denom))
            .collect::<Result<Vec<_>>>()?;
        let (next_key, total) = match self.pagination {
            Some(p) => (
                p.next_key.filter(|key| !key.is_empty()),
                p.total.map(|n| n.as_u64()).transpose()?,
            ),
            None => (None, None),
        };

        Ok(StreamPage {
            streams,
            next_key,
            total,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TxSearchResult {
    #[serde(default)]
    tx_responses: Vec<TxResponse>,
}

/// Event search terms matching one stream event type for a pair.
fn pair_event_filter(kind: &str, sender: &str, receiver: &str) -> Vec<String> {
    vec![
        format!("{}.sender='{}'", kind, sender),
        format!("{}.receiver='{}'", kind, receiver),
    ]
}

#[derive(Debug, Deserialize)]
struct FlowRateResult {
    flow_rate: Number,
}

#[derive(Debug, Deserialize)]
struct ParamsRecord {
    validator_fee: String,
}

#[derive(Debug, Deserialize)]
struct ParamsResult {
    params: ParamsRecord,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    balance: Option<CoinRecord>,
}

#[derive(Debug, Deserialize)]
struct SimulateResult {
    gas_used: Number,
    #[serde(default)]
    gas_price: Number,
}

/// Result of an included transaction
#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
    txhash: String,
    #[serde(default)]
    height: Number,
    timestamp: String,
    #[serde(default)]
    gas_wanted: Number,
    #[serde(default)]
    gas_used: Number,
    #[serde(default)]
    events: Vec<LedgerEvent>,
}

impl TxResponse {
    fn into_result(self) -> Result<BroadcastResult> {
        let block_time = parse_timestamp(&self.timestamp)
            .ok_or_else(|| anyhow!("bad block timestamp {:?}", self.timestamp))?;

        Ok(BroadcastResult {
            code: self.code,
            raw_log: self.raw_log,
            tx_hash: self.txhash,
            height: self.height.as_u64()?,
            block_time,
            gas_wanted: self.gas_wanted.as_u64()?,
            gas_used: self.gas_used.as_u64()?,
            events: self.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_ledger_new() {
        let ledger = RpcLedger::from_config(&ClientConfig::default()).unwrap();
        assert_eq!(ledger.url(), "http://localhost:26657");
        assert_eq!(ledger.adjusted_gas(80_001), 160_002);
    }

    #[test]
    fn test_stream_record_into_state() {
        let result: StreamQueryResult = serde_json::from_value(json!({
            "stream": {
                "sender": "und1sender",
                "receiver": "und1receiver",
                "deposit": { "denom": "nund", "amount": "100000000000" },
                "flow_rate": "38051",
                "last_outflow_time": "2023-11-14T22:13:20Z",
                "deposit_zero_time": "2023-12-15 08:14:11 +0000 UTC"
            }
        }))
        .unwrap();

        let state = result
            .stream
            .unwrap()
            .into_state(&Denom::default())
            .unwrap();
        assert_eq!(state.flow_rate, 38_051);
        assert_eq!(state.deposit, 100_000_000_000);
        assert_eq!(state.last_outflow_time, 1_700_000_000);
        assert_eq!(state.deposit_zero_time, 1_700_000_000 + 2_628_051);
    }

    #[test]
    fn test_missing_stream_is_none() {
        let result: StreamQueryResult = serde_json::from_value(json!({ "stream": null })).unwrap();
        assert!(result.stream.is_none());
    }

    #[test]
    fn test_tx_response_into_result() {
        let response: TxResponse = serde_json::from_value(json!({
            "code": 0,
            "raw_log": "",
            "txhash": "ABCDEF",
            "height": "1234",
            "timestamp": "2023-11-14T22:13:20Z",
            "gas_wanted": "200000",
            "gas_used": 150000,
            "events": [
                {
                    "type": "create_stream",
                    "attributes": [
                        { "key": "sender", "value": "und1sender" },
                        { "key": "receiver", "value": "und1receiver" },
                        { "key": "flow_rate", "value": "38051" }
                    ]
                }
            ]
        }))
        .unwrap();

        let result = response.into_result().unwrap();
        assert_eq!(result.height, 1234);
        assert_eq!(result.block_time, 1_700_000_000);
        assert_eq!(result.gas_wanted, 200_000);
        assert_eq!(result.gas_used, 150_000);
        assert_eq!(result.events[0].attr("flow_rate"), Some("38051"));
    }

    #[test]
    fn test_streams_page() {
        let result: StreamsResult = serde_json::from_value(json!({
            "streams": [
                {
                    "sender": "und1sender",
                    "receiver": "und1receiver",
                    "deposit": { "denom": "nund", "amount": "5" },
                    "flow_rate": 1,
                    "last_outflow_time": "1700000000",
                    "deposit_zero_time": "1700000005"
                }
            ],
            "pagination": { "next_key": "AAE=", "total": "3" }
        }))
        .unwrap();

        let page = result.into_page(&Denom::default()).unwrap();
        assert_eq!(page.streams.len(), 1);
        assert_eq!(page.streams[0].deposit_zero_time, 1_700_000_005);
        assert_eq!(page.next_key.as_deref(), Some("AAE="));
        assert_eq!(page.total, Some(3));

        // An empty key marks the last page.
        let last: StreamsResult = serde_json::from_value(json!({
            "streams": [],
            "pagination": { "next_key": "", "total": null }
        }))
        .unwrap();
        let page = last.into_page(&Denom::default()).unwrap();
        assert_eq!(page.next_key, None);
        assert_eq!(page.total, None);
    }

    #[test]
    fn test_pair_event_filter() {
        assert_eq!(
            pair_event_filter("claim_stream", "und1a", "und1b"),
            ["claim_stream.sender='und1a'", "claim_stream.receiver='und1b'"]
        );
    }

    #[test]
    fn test_reply_envelope() {
        let ok: RpcReply<FlowRateResult> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "result": { "flow_rate": "38051" }
        }))
        .unwrap();
        assert_eq!(ok.result.unwrap().flow_rate.as_u64().unwrap(), 38_051);

        let failed: RpcReply<FlowRateResult> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 8,
            "error": { "code": -32601, "message": "method not found", "data": null }
        }))
        .unwrap();
        let fault = failed.error.unwrap();
        assert_eq!(fault.code, -32601);
        assert_eq!(fault.message, "method not found");
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(Number::Str(" 42 ".to_string()).as_u64().unwrap(), 42);
        assert!(Number::Str("-1".to_string()).as_u64().is_err());
    }
}
