//! Outbound port to an account-model destination chain.
//!
//! The trait captures exactly the capabilities the executor consumes:
//! simulate, broadcast a contract execute, smart-query, plain token send,
//! and the block height. The HTTP implementation speaks JSON-RPC 2.0 to the
//! resolver's signing gateway (the component holding the Cosmos key);
//! keeping signing behind the port keeps this crate free of chain-specific
//! key handling and makes the executor fully testable against the mock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fusionx_core::{ChainId, SwapError, TxId};

/// Native coin attachment for a contract execute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    /// Base units, stringified on the wire.
    pub amount: String,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self { denom: denom.into(), amount: amount.to_string() }
    }
}

/// A contract execution: target, JSON message, attached funds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractExecuteMsg {
    pub contract: String,
    pub msg: serde_json::Value,
    pub funds: Vec<Coin>,
}

#[async_trait]
pub trait CosmosRpc: Send + Sync {
    async fn get_block_height(&self) -> Result<u64, SwapError>;

    /// Dry-run a contract execute; returns the gas it would consume.
    async fn simulate(&self, msg: &ContractExecuteMsg) -> Result<u64, SwapError>;

    /// Sign and broadcast a contract execute with an explicit gas limit.
    async fn broadcast_execute(
        &self,
        msg: &ContractExecuteMsg,
        gas_limit: u64,
    ) -> Result<TxId, SwapError>;

    /// Smart-query a contract; `None` when the contract reports no data.
    async fn query_contract_smart(
        &self,
        contract: &str,
        query: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, SwapError>;

    /// Plain bank send (the non-atomic fallback path).
    async fn send_tokens(&self, to: &str, amount: u128, denom: &str) -> Result<TxId, SwapError>;
}

// ── HTTP client ──────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 client for the signing gateway in front of the destination
/// chain.
pub struct HttpCosmosClient {
    url: String,
    chain_id: ChainId,
    client: reqwest::Client,
}

impl HttpCosmosClient {
    pub fn new(url: &str, chain_id: ChainId) -> Self {
        Self { url: url.to_string(), chain_id, client: reqwest::Client::new() }
    }

    fn rpc_err(&self, reason: impl std::fmt::Display) -> SwapError {
        SwapError::Rpc { chain: self.chain_id, reason: reason.to_string() }
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SwapError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.rpc_err(format!("{method}: {e}")))?;
        let json: serde_json::Value =
            resp.json().await.map_err(|e| self.rpc_err(format!("{method}: {e}")))?;
        if let Some(err) = json.get("error") {
            if err.to_string().contains("tx already exists") {
                return Err(SwapError::AlreadyBroadcast(TxId::new("")));
            }
            return Err(self.rpc_err(format!("{method}: {err}")));
        }
        Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl CosmosRpc for HttpCosmosClient {
    async fn get_block_height(&self) -> Result<u64, SwapError> {
        let result = self.rpc("cosmos_getBlockHeight", serde_json::json!([])).await?;
        result
            .as_u64()
            .ok_or_else(|| self.rpc_err("getBlockHeight: expected number"))
    }

    async fn simulate(&self, msg: &ContractExecuteMsg) -> Result<u64, SwapError> {
        let result = self.rpc("cosmos_simulate", serde_json::json!([msg])).await?;
        result["gas_used"]
            .as_u64()
            .ok_or_else(|| self.rpc_err("simulate: missing gas_used"))
    }

    async fn broadcast_execute(
        &self,
        msg: &ContractExecuteMsg,
        gas_limit: u64,
    ) -> Result<TxId, SwapError> {
        let result = self
            .rpc("cosmos_execute", serde_json::json!([msg, gas_limit]))
            .await?;
        result["txhash"]
            .as_str()
            .map(|s| TxId::new(s.to_string()))
            .ok_or_else(|| self.rpc_err("execute: missing txhash"))
    }

    async fn query_contract_smart(
        &self,
        contract: &str,
        query: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, SwapError> {
        let result = self
            .rpc("cosmos_querySmart", serde_json::json!([contract, query]))
            .await?;
        Ok((!result.is_null()).then_some(result))
    }

    async fn send_tokens(&self, to: &str, amount: u128, denom: &str) -> Result<TxId, SwapError> {
        let result = self
            .rpc(
                "cosmos_sendTokens",
                serde_json::json!([to, amount.to_string(), denom]),
            )
            .await?;
        result["txhash"]
            .as_str()
            .map(|s| TxId::new(s.to_string()))
            .ok_or_else(|| self.rpc_err("sendTokens: missing txhash"))
    }
}

// ── Mock for tests ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MockCosmosState {
    height: u64,
    /// order_hash hex → stored order JSON, as the contract would report it.
    orders: HashMap<String, serde_json::Value>,
    executes: Vec<(ContractExecuteMsg, u64)>,
    sends: Vec<(String, u128, String)>,
    simulate_gas: u64,
    fail_simulate: bool,
    fail_broadcast: bool,
    next_tx: u64,
}

/// Scriptable in-memory destination chain.
#[derive(Clone, Default)]
pub struct MockCosmosRpc {
    state: Arc<Mutex<MockCosmosState>>,
}

impl MockCosmosRpc {
    pub fn new(height: u64) -> Self {
        let mock = Self::default();
        {
            let mut s = mock.state.lock().unwrap();
            s.height = height;
            s.simulate_gas = 250_000;
        }
        mock
    }

    pub fn set_order(&self, order_hash_hex: &str, order: serde_json::Value) {
        self.state.lock().unwrap().orders.insert(order_hash_hex.into(), order);
    }

    pub fn set_fail_simulate(&self, fail: bool) {
        self.state.lock().unwrap().fail_simulate = fail;
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        self.state.lock().unwrap().fail_broadcast = fail;
    }

    /// Every contract execute accepted, with the gas limit used.
    pub fn executes(&self) -> Vec<(ContractExecuteMsg, u64)> {
        self.state.lock().unwrap().executes.clone()
    }

    pub fn sends(&self) -> Vec<(String, u128, String)> {
        self.state.lock().unwrap().sends.clone()
    }
}

#[async_trait]
impl CosmosRpc for MockCosmosRpc {
    async fn get_block_height(&self) -> Result<u64, SwapError> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn simulate(&self, _msg: &ContractExecuteMsg) -> Result<u64, SwapError> {
        let s = self.state.lock().unwrap();
        if s.fail_simulate {
            return Err(SwapError::Rpc { chain: ChainId(0), reason: "simulation reverted".into() });
        }
        Ok(s.simulate_gas)
    }

    async fn broadcast_execute(
        &self,
        msg: &ContractExecuteMsg,
        gas_limit: u64,
    ) -> Result<TxId, SwapError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_broadcast {
            return Err(SwapError::Rpc { chain: ChainId(0), reason: "broadcast failed".into() });
        }
        s.executes.push((msg.clone(), gas_limit));
        s.next_tx += 1;
        Ok(TxId::new(format!("{:064X}", s.next_tx)))
    }

    async fn query_contract_smart(
        &self,
        _contract: &str,
        query: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, SwapError> {
        let s = self.state.lock().unwrap();
        if let Some(hash) = query
            .get("get_order")
            .and_then(|q| q.get("order_hash"))
            .and_then(|h| h.as_str())
        {
            return Ok(s.orders.get(hash).cloned());
        }
        Ok(None)
    }

    async fn send_tokens(&self, to: &str, amount: u128, denom: &str) -> Result<TxId, SwapError> {
        let mut s = self.state.lock().unwrap();
        s.sends.push((to.to_string(), amount, denom.to_string()));
        s.next_tx += 1;
        Ok(TxId::new(format!("{:064X}", s.next_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_executes() {
        let rpc = MockCosmosRpc::new(100);
        let msg = ContractExecuteMsg {
            contract: "neutron1contract".into(),
            msg: serde_json::json!({"probe": {}}),
            funds: vec![Coin::new("untrn", 500)],
        };
        let txid = rpc.broadcast_execute(&msg, 300_000).await.unwrap();
        assert!(!txid.as_str().is_empty());
        assert_eq!(rpc.executes().len(), 1);
        assert_eq!(rpc.executes()[0].1, 300_000);
    }

    #[tokio::test]
    async fn mock_order_query() {
        let rpc = MockCosmosRpc::new(100);
        rpc.set_order("aa".repeat(32).as_str(), serde_json::json!({"status": "matched"}));
        let query = serde_json::json!({"get_order": {"order_hash": "aa".repeat(32)}});
        assert!(rpc.query_contract_smart("c", &query).await.unwrap().is_some());

        let missing = serde_json::json!({"get_order": {"order_hash": "bb".repeat(32)}});
        assert!(rpc.query_contract_smart("c", &missing).await.unwrap().is_none());
    }
}
