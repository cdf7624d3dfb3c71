//! Chain API port for BTC-class chains, plus the Esplora-backed client.
//!
//! The executor only needs the handful of capabilities listed on the trait;
//! anything richer (mempool introspection, descriptor wallets) stays out so
//! the mock used in tests faithfully covers the whole surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use fusionx_core::{ChainId, SwapError, TxId};

/// One unspent output as reported by the chain API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiUtxo {
    pub txid: TxId,
    pub vout: u32,
    /// Value in sats.
    pub value: u64,
    pub confirmations: u64,
}

/// Outbound port to a BTC-class chain.
#[async_trait]
pub trait BitcoinApi: Send + Sync {
    async fn get_height(&self) -> Result<u64, SwapError>;

    async fn get_utxos(&self, address: &str) -> Result<Vec<ApiUtxo>, SwapError>;

    /// Recommended fee rate in sat/vB.
    async fn get_fee_rate(&self) -> Result<u64, SwapError>;

    /// Broadcast a raw transaction; returns the txid the node assigned.
    /// Implementations map "already in mempool" node answers to
    /// [`SwapError::AlreadyBroadcast`].
    async fn broadcast(&self, tx_hex: &str) -> Result<TxId, SwapError>;

    /// Raw transaction hex, or `None` if the node does not know the tx.
    async fn get_raw_transaction(&self, txid: &TxId) -> Result<Option<String>, SwapError>;

    /// Confirmations for a transaction; 0 when unconfirmed or unknown.
    async fn get_confirmations(&self, txid: &TxId) -> Result<u64, SwapError>;
}

// ── Esplora client ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

/// REST client for Esplora-compatible endpoints (Blockstream, mempool.space,
/// self-hosted electrs).
pub struct EsploraClient {
    base_url: String,
    chain_id: ChainId,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(base_url: &str, chain_id: ChainId) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id,
            client: reqwest::Client::new(),
        }
    }

    fn rpc_err(&self, reason: impl std::fmt::Display) -> SwapError {
        SwapError::Rpc { chain: self.chain_id, reason: reason.to_string() }
    }

    async fn get_text(&self, path: &str) -> Result<String, SwapError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.rpc_err(format!("GET {path}: {e}")))?;
        if !resp.status().is_success() {
            return Err(self.rpc_err(format!("GET {path}: HTTP {}", resp.status())));
        }
        resp.text().await.map_err(|e| self.rpc_err(e))
    }
}

#[async_trait]
impl BitcoinApi for EsploraClient {
    async fn get_height(&self) -> Result<u64, SwapError> {
        let text = self.get_text("/blocks/tip/height").await?;
        text.trim().parse().map_err(|e| self.rpc_err(format!("bad tip height: {e}")))
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<ApiUtxo>, SwapError> {
        let text = self.get_text(&format!("/address/{address}/utxo")).await?;
        let raw: Vec<EsploraUtxo> =
            serde_json::from_str(&text).map_err(|e| self.rpc_err(format!("bad utxo list: {e}")))?;

        let tip = self.get_height().await?;
        Ok(raw
            .into_iter()
            .map(|u| {
                let confirmations = match (u.status.confirmed, u.status.block_height) {
                    (true, Some(h)) => tip.saturating_sub(h) + 1,
                    _ => 0,
                };
                ApiUtxo { txid: TxId::new(u.txid), vout: u.vout, value: u.value, confirmations }
            })
            .collect())
    }

    async fn get_fee_rate(&self) -> Result<u64, SwapError> {
        // fee-estimates maps confirmation target → sat/vB (fractional).
        let text = self.get_text("/fee-estimates").await?;
        let estimates: HashMap<String, f64> =
            serde_json::from_str(&text).map_err(|e| self.rpc_err(format!("bad fee estimates: {e}")))?;
        let rate = estimates
            .get("3")
            .or_else(|| estimates.get("6"))
            .or_else(|| estimates.get("1"))
            .copied()
            .unwrap_or(1.0);
        Ok(rate.ceil().max(1.0) as u64)
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<TxId, SwapError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(|e| self.rpc_err(format!("broadcast: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            debug!(txid = %body.trim(), "broadcast accepted");
            return Ok(TxId::new(body.trim().to_string()));
        }
        // Duplicate submissions come back as errors but mean success.
        if body.contains("txn-already-in-mempool") || body.contains("already known") {
            return Err(SwapError::AlreadyBroadcast(TxId::new("")));
        }
        Err(self.rpc_err(format!("broadcast rejected (HTTP {status}): {body}")))
    }

    async fn get_raw_transaction(&self, txid: &TxId) -> Result<Option<String>, SwapError> {
        let url = format!("{}/tx/{}/hex", self.base_url, txid);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.rpc_err(format!("get tx: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(self.rpc_err(format!("get tx: HTTP {}", resp.status())));
        }
        Ok(Some(resp.text().await.map_err(|e| self.rpc_err(e))?))
    }

    async fn get_confirmations(&self, txid: &TxId) -> Result<u64, SwapError> {
        let text = match self.get_text(&format!("/tx/{txid}/status")).await {
            Ok(t) => t,
            Err(_) => return Ok(0),
        };
        let status: EsploraStatus =
            serde_json::from_str(&text).map_err(|e| self.rpc_err(format!("bad tx status: {e}")))?;
        match (status.confirmed, status.block_height) {
            (true, Some(h)) => {
                let tip = self.get_height().await?;
                Ok(tip.saturating_sub(h) + 1)
            }
            _ => Ok(0),
        }
    }
}

// ── Mock for tests ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    height: u64,
    fee_rate: u64,
    utxos: HashMap<String, Vec<ApiUtxo>>,
    broadcasts: Vec<String>,
    known_txs: HashMap<String, String>,
    confirmations: HashMap<String, u64>,
    fail_broadcast: bool,
}

/// Scriptable in-memory chain for executor and engine tests.
#[derive(Clone, Default)]
pub struct MockBitcoinApi {
    state: Arc<Mutex<MockState>>,
}

impl MockBitcoinApi {
    pub fn new(height: u64, fee_rate: u64) -> Self {
        let mock = Self::default();
        {
            let mut s = mock.state.lock().unwrap();
            s.height = height;
            s.fee_rate = fee_rate;
        }
        mock
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn add_utxo(&self, address: &str, utxo: ApiUtxo) {
        self.state.lock().unwrap().utxos.entry(address.into()).or_default().push(utxo);
    }

    pub fn clear_utxos(&self, address: &str) {
        self.state.lock().unwrap().utxos.remove(address);
    }

    pub fn set_confirmations(&self, txid: &TxId, confs: u64) {
        self.state.lock().unwrap().confirmations.insert(txid.as_str().into(), confs);
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        self.state.lock().unwrap().fail_broadcast = fail;
    }

    /// Raw hex of every accepted broadcast, in order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }
}

#[async_trait]
impl BitcoinApi for MockBitcoinApi {
    async fn get_height(&self) -> Result<u64, SwapError> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<ApiUtxo>, SwapError> {
        Ok(self.state.lock().unwrap().utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_fee_rate(&self) -> Result<u64, SwapError> {
        Ok(self.state.lock().unwrap().fee_rate.max(1))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<TxId, SwapError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_broadcast {
            return Err(SwapError::Rpc {
                chain: ChainId(0),
                reason: "mock broadcast failure".into(),
            });
        }
        let bytes = hex::decode(tx_hex)
            .map_err(|e| SwapError::Serialization(format!("bad tx hex: {e}")))?;
        let mut digest = crate::script::sha256d(&bytes);
        digest.reverse();
        let txid = TxId::new(hex::encode(digest));
        if s.known_txs.contains_key(txid.as_str()) {
            return Err(SwapError::AlreadyBroadcast(txid));
        }
        s.broadcasts.push(tx_hex.to_string());
        s.known_txs.insert(txid.as_str().to_string(), tx_hex.to_string());
        Ok(txid)
    }

    async fn get_raw_transaction(&self, txid: &TxId) -> Result<Option<String>, SwapError> {
        Ok(self.state.lock().unwrap().known_txs.get(txid.as_str()).cloned())
    }

    async fn get_confirmations(&self, txid: &TxId) -> Result<u64, SwapError> {
        Ok(self.state.lock().unwrap().confirmations.get(txid.as_str()).copied().unwrap_or(0))
    }
}
