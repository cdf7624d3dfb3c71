//! JSON-RPC port to the EVM source chain, HTTP implementation and the mock
//! used across executor, monitor and engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use primitive_types::{H160, H256, U256};
use tracing::debug;

use fusionx_core::{ChainId, SwapError, TxId};

use crate::abi;

/// Read-only call / gas-estimation request.
#[derive(Clone, Debug, Default)]
pub struct CallRequest {
    pub from: Option<H160>,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
}

/// Minimal receipt view: success flag and inclusion height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub status: bool,
    pub block_number: u64,
}

/// One log entry as returned by `eth_getLogs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmLog {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: TxId,
    pub log_index: u64,
}

/// `eth_getLogs` filter. Only what the monitor needs.
#[derive(Clone, Debug)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Option<H160>,
    pub topic0: Option<H256>,
}

/// Outbound port to an EVM chain.
#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn get_balance(&self, address: H160) -> Result<U256, SwapError>;
    async fn get_nonce(&self, address: H160) -> Result<u64, SwapError>;
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, SwapError>;
    async fn gas_price(&self) -> Result<U256, SwapError>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxId, SwapError>;
    async fn get_transaction_receipt(&self, txid: &TxId) -> Result<Option<Receipt>, SwapError>;
    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>, SwapError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>, SwapError>;
    async fn block_number(&self) -> Result<u64, SwapError>;
}

// ── HTTP client ──────────────────────────────────────────────────────────────

/// Plain JSON-RPC 2.0 over HTTP POST with serde_json, in the same shape the
/// wallet-style clients in this workspace use.
pub struct HttpEvmClient {
    url: String,
    chain_id: ChainId,
    client: reqwest::Client,
}

impl HttpEvmClient {
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
            let msg = err.to_string();
            // Duplicate submissions are success in disguise.
            if msg.contains("already known") || msg.contains("ALREADY_EXISTS") {
                return Err(SwapError::AlreadyBroadcast(TxId::new("")));
            }
            return Err(self.rpc_err(format!("{method}: {msg}")));
        }
        Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    fn parse_quantity(&self, value: &serde_json::Value, what: &str) -> Result<u64, SwapError> {
        let s = value
            .as_str()
            .ok_or_else(|| self.rpc_err(format!("{what}: expected quantity string")))?;
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| self.rpc_err(format!("{what}: {e}")))
    }

    fn parse_u256(&self, value: &serde_json::Value, what: &str) -> Result<U256, SwapError> {
        let s = value
            .as_str()
            .ok_or_else(|| self.rpc_err(format!("{what}: expected quantity string")))?;
        U256::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| self.rpc_err(format!("{what}: {e}")))
    }

    fn parse_bytes(&self, value: &serde_json::Value, what: &str) -> Result<Vec<u8>, SwapError> {
        let s = value
            .as_str()
            .ok_or_else(|| self.rpc_err(format!("{what}: expected data string")))?;
        hex::decode(s.trim_start_matches("0x")).map_err(|e| self.rpc_err(format!("{what}: {e}")))
    }

    fn call_object(request: &CallRequest) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "to": format!("{:#x}", request.to),
            "value": format!("{:#x}", request.value),
            "data": format!("0x{}", hex::encode(&request.data)),
        });
        if let Some(from) = request.from {
            obj["from"] = serde_json::json!(format!("{from:#x}"));
        }
        obj
    }
}

#[async_trait]
impl EvmRpc for HttpEvmClient {
    async fn get_balance(&self, address: H160) -> Result<U256, SwapError> {
        let result = self
            .rpc("eth_getBalance", serde_json::json!([format!("{address:#x}"), "latest"]))
            .await?;
        self.parse_u256(&result, "eth_getBalance")
    }

    async fn get_nonce(&self, address: H160) -> Result<u64, SwapError> {
        let result = self
            .rpc(
                "eth_getTransactionCount",
                serde_json::json!([format!("{address:#x}"), "pending"]),
            )
            .await?;
        self.parse_quantity(&result, "eth_getTransactionCount")
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, SwapError> {
        let result = self
            .rpc("eth_estimateGas", serde_json::json!([Self::call_object(request)]))
            .await?;
        self.parse_quantity(&result, "eth_estimateGas")
    }

    async fn gas_price(&self) -> Result<U256, SwapError> {
        let result = self.rpc("eth_gasPrice", serde_json::json!([])).await?;
        self.parse_u256(&result, "eth_gasPrice")
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxId, SwapError> {
        let result = self
            .rpc(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let txid = result
            .as_str()
            .ok_or_else(|| self.rpc_err("sendRawTransaction: expected tx hash"))?;
        debug!(txid, "raw transaction accepted");
        Ok(TxId::new(txid.to_string()))
    }

    async fn get_transaction_receipt(&self, txid: &TxId) -> Result<Option<Receipt>, SwapError> {
        let result = self
            .rpc("eth_getTransactionReceipt", serde_json::json!([txid.as_str()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let status = self.parse_quantity(&result["status"], "receipt status")? == 1;
        let block_number = self.parse_quantity(&result["blockNumber"], "receipt block")?;
        Ok(Some(Receipt { status, block_number }))
    }

    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>, SwapError> {
        let request = CallRequest { from: None, to, value: U256::zero(), data };
        let result = self
            .rpc("eth_call", serde_json::json!([Self::call_object(&request), "latest"]))
            .await?;
        self.parse_bytes(&result, "eth_call")
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>, SwapError> {
        let mut obj = serde_json::json!({
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        });
        if let Some(address) = filter.address {
            obj["address"] = serde_json::json!(format!("{address:#x}"));
        }
        if let Some(topic0) = filter.topic0 {
            obj["topics"] = serde_json::json!([format!("{topic0:#x}")]);
        }
        let result = self.rpc("eth_getLogs", serde_json::json!([obj])).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| self.rpc_err("eth_getLogs: expected array"))?;

        let mut logs = Vec::with_capacity(entries.len());
        for entry in entries {
            let topics = entry["topics"]
                .as_array()
                .map(|ts| {
                    ts.iter()
                        .filter_map(|t| t.as_str())
                        .filter_map(|t| {
                            hex::decode(t.trim_start_matches("0x")).ok().and_then(|b| {
                                (b.len() == 32).then(|| H256::from_slice(&b))
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            logs.push(EvmLog {
                address: entry["address"]
                    .as_str()
                    .and_then(|a| a.trim_start_matches("0x").parse().ok())
                    .unwrap_or_default(),
                topics,
                data: self.parse_bytes(&entry["data"], "log data").unwrap_or_default(),
                block_number: self.parse_quantity(&entry["blockNumber"], "log block")?,
                tx_hash: TxId::new(entry["transactionHash"].as_str().unwrap_or_default().to_string()),
                log_index: self.parse_quantity(&entry["logIndex"], "log index")?,
            });
        }
        Ok(logs)
    }

    async fn block_number(&self) -> Result<u64, SwapError> {
        let result = self.rpc("eth_blockNumber", serde_json::json!([])).await?;
        self.parse_quantity(&result, "eth_blockNumber")
    }
}

// ── Mock for tests ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MockEvmState {
    block_number: u64,
    balances: HashMap<H160, U256>,
    nonces: HashMap<H160, u64>,
    gas_price: U256,
    min_safety_deposit: U256,
    escrows: HashMap<[u8; 32], H160>,
    sent: Vec<Vec<u8>>,
    receipts: HashMap<String, Receipt>,
    logs: Vec<EvmLog>,
    fail_estimate_gas: bool,
}

/// Scriptable in-memory EVM chain. `call` understands the factory/registry
/// selectors the executor issues; everything else returns empty data.
#[derive(Clone, Default)]
pub struct MockEvmRpc {
    state: Arc<Mutex<MockEvmState>>,
}

impl MockEvmRpc {
    pub fn new(block_number: u64) -> Self {
        let mock = Self::default();
        {
            let mut s = mock.state.lock().unwrap();
            s.block_number = block_number;
            s.gas_price = U256::from(1_000_000_000u64);
            s.min_safety_deposit = U256::from(10_000u64);
        }
        mock
    }

    pub fn set_block_number(&self, n: u64) {
        self.state.lock().unwrap().block_number = n;
    }

    pub fn set_balance(&self, address: H160, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn set_escrow(&self, order_hash: [u8; 32], escrow: H160) {
        self.state.lock().unwrap().escrows.insert(order_hash, escrow);
    }

    pub fn set_fail_estimate_gas(&self, fail: bool) {
        self.state.lock().unwrap().fail_estimate_gas = fail;
    }

    pub fn push_log(&self, log: EvmLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Drop a log again, as a reorg would (tests).
    pub fn remove_log(&self, tx_hash: &TxId, log_index: u64) {
        self.state
            .lock()
            .unwrap()
            .logs
            .retain(|l| !(l.tx_hash == *tx_hash && l.log_index == log_index));
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl EvmRpc for MockEvmRpc {
    async fn get_balance(&self, address: H160) -> Result<U256, SwapError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_else(|| U256::from(u64::MAX)))
    }

    async fn get_nonce(&self, address: H160) -> Result<u64, SwapError> {
        Ok(self.state.lock().unwrap().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, SwapError> {
        let s = self.state.lock().unwrap();
        if s.fail_estimate_gas {
            return Err(SwapError::Rpc { chain: ChainId(0), reason: "estimateGas reverted".into() });
        }
        Ok(100_000)
    }

    async fn gas_price(&self) -> Result<U256, SwapError> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxId, SwapError> {
        let mut s = self.state.lock().unwrap();
        let txid = crate::tx::raw_tx_hash(raw);
        s.sent.push(raw.to_vec());
        let block_number = s.block_number;
        s.receipts
            .insert(txid.as_str().to_string(), Receipt { status: true, block_number });
        Ok(txid)
    }

    async fn get_transaction_receipt(&self, txid: &TxId) -> Result<Option<Receipt>, SwapError> {
        Ok(self.state.lock().unwrap().receipts.get(txid.as_str()).cloned())
    }

    async fn call(&self, _to: H160, data: Vec<u8>) -> Result<Vec<u8>, SwapError> {
        let s = self.state.lock().unwrap();
        if data.len() >= 4 {
            let sel: [u8; 4] = data[..4].try_into().unwrap();
            if sel == abi::selector("sourceEscrows(bytes32)") && data.len() >= 36 {
                let mut order = [0u8; 32];
                order.copy_from_slice(&data[4..36]);
                let escrow = s.escrows.get(&order).copied().unwrap_or_default();
                return Ok(ethabi::encode(&[ethabi::Token::Address(escrow)]));
            }
            if sel == abi::selector("calculateMinSafetyDeposit(uint256,uint256)") {
                return Ok(ethabi::encode(&[ethabi::Token::Uint(s.min_safety_deposit)]));
            }
        }
        Ok(Vec::new())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>, SwapError> {
        let s = self.state.lock().unwrap();
        Ok(s.logs
            .iter()
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
            .filter(|l| filter.topic0.is_none() || l.topics.first() == filter.topic0.as_ref())
            .cloned()
            .collect())
    }

    async fn block_number(&self) -> Result<u64, SwapError> {
        Ok(self.state.lock().unwrap().block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionx_core::{OrderHash, Secret};

    #[tokio::test]
    async fn mock_escrow_lookup_via_call() {
        let rpc = MockEvmRpc::new(100);
        let order = OrderHash::from_bytes([0xAA; 32]);
        let escrow = H160::from_low_u64_be(42);
        rpc.set_escrow(*order.as_bytes(), escrow);

        let data = abi::source_escrows(&order);
        let ret = rpc.call(H160::zero(), data).await.unwrap();
        assert_eq!(abi::decode_address(&ret).unwrap(), escrow);
    }

    #[tokio::test]
    async fn mock_unknown_escrow_is_zero() {
        let rpc = MockEvmRpc::new(100);
        let data = abi::source_escrows(&OrderHash::from_bytes([0xBB; 32]));
        let ret = rpc.call(H160::zero(), data).await.unwrap();
        assert_eq!(abi::decode_address(&ret).unwrap(), H160::zero());
    }

    #[tokio::test]
    async fn mock_log_filtering_by_range_and_topic() {
        let rpc = MockEvmRpc::new(100);
        let (topics, data) = abi::encode_secret_revealed(
            &OrderHash::from_bytes([1; 32]),
            &Secret::from_bytes([2; 32]),
        );
        rpc.push_log(EvmLog {
            address: H160::zero(),
            topics,
            data,
            block_number: 50,
            tx_hash: TxId::new("0x01"),
            log_index: 0,
        });

        let filter = LogFilter {
            from_block: 40,
            to_block: 60,
            address: None,
            topic0: Some(abi::secret_revealed_topic()),
        };
        assert_eq!(rpc.get_logs(&filter).await.unwrap().len(), 1);

        let out_of_range = LogFilter { from_block: 60, to_block: 70, ..filter };
        assert!(rpc.get_logs(&out_of_range).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mock_send_records_receipt() {
        let rpc = MockEvmRpc::new(7);
        let txid = rpc.send_raw_transaction(&[1, 2, 3]).await.unwrap();
        let receipt = rpc.get_transaction_receipt(&txid).await.unwrap().unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.block_number, 7);
        assert_eq!(rpc.sent().len(), 1);
    }
}
