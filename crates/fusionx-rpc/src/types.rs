use serde::{Deserialize, Serialize};

use fusionx_core::{
    Amount, BitcoinSwapInfo, ChainId, DstParams, Hashlock, NewOrder, OrderContext, OrderHash,
    SwapError,
};

/// Order submission payload as the gateway sends it. Hashes are hex (with or
/// without `0x`), amounts are decimal strings in base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNewOrder {
    pub order_hash: String,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub maker: String,
    pub src_token: String,
    pub dst_token: String,
    pub src_amount: String,
    pub dst_amount: String,
    pub hashlock: String,
    pub expiry_time: i64,
    pub dst_params: DstParams,
}

impl RpcNewOrder {
    fn parse_amount(value: &str, field: &'static str) -> Result<Amount, SwapError> {
        value.parse().map_err(|_| SwapError::MalformedOrder {
            field,
            reason: format!("not a base-unit integer: {value}"),
        })
    }

    pub fn into_order(self) -> Result<NewOrder, SwapError> {
        Ok(NewOrder {
            order_hash: OrderHash::from_hex(&self.order_hash).map_err(|e| {
                SwapError::MalformedOrder { field: "order_hash", reason: e.to_string() }
            })?,
            src_chain_id: ChainId(self.src_chain_id),
            dst_chain_id: ChainId(self.dst_chain_id),
            maker: self.maker,
            src_token: self.src_token,
            dst_token: self.dst_token,
            src_amount: Self::parse_amount(&self.src_amount, "src_amount")?,
            dst_amount: Self::parse_amount(&self.dst_amount, "dst_amount")?,
            hashlock: Hashlock::from_hex(&self.hashlock).map_err(|e| {
                SwapError::MalformedOrder { field: "hashlock", reason: e.to_string() }
            })?,
            expiry_time: self.expiry_time,
            dst_params: self.dst_params,
        })
    }
}

/// Result of `fusion_submitOrder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSubmitResult {
    pub order_hash: String,
    pub status: String,
}

/// Result of `fusion_cancelOrder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCancelResult {
    pub ok: bool,
    pub message: String,
}

/// JSON view of an order context for status queries. The secret is never
/// exposed; only whether one has been observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcOrderContext {
    pub order_hash: String,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub maker: String,
    pub src_token: String,
    pub dst_token: String,
    pub src_amount: String,
    pub dst_amount: String,
    pub hashlock: String,
    pub secret_revealed: bool,
    pub expiry_time: i64,
    pub status: String,
    pub bitcoin: Option<BitcoinSwapInfo>,
    pub match_txid: Option<String>,
    pub settle_txid: Option<String>,
    pub complete_txid: Option<String>,
    pub dst_txid: Option<String>,
    pub claim_txid: Option<String>,
    pub refund_txid: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub error: Option<String>,
}

impl From<OrderContext> for RpcOrderContext {
    fn from(ctx: OrderContext) -> Self {
        let status = serde_json::to_value(ctx.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            order_hash: ctx.order_hash.to_hex(),
            src_chain_id: ctx.src_chain_id.0,
            dst_chain_id: ctx.dst_chain_id.0,
            maker: ctx.maker,
            src_token: ctx.src_token,
            dst_token: ctx.dst_token,
            src_amount: ctx.src_amount.to_string(),
            dst_amount: ctx.dst_amount.to_string(),
            hashlock: ctx.hashlock.to_hex(),
            secret_revealed: ctx.secret.is_some(),
            expiry_time: ctx.expiry_time,
            status,
            bitcoin: ctx.bitcoin,
            match_txid: ctx.match_txid.map(|t| t.0),
            settle_txid: ctx.settle_txid.map(|t| t.0),
            complete_txid: ctx.complete_txid.map(|t| t.0),
            dst_txid: ctx.dst_txid.map(|t| t.0),
            claim_txid: ctx.claim_txid.map(|t| t.0),
            refund_txid: ctx.refund_txid.map(|t| t.0),
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
            error: ctx.error,
        }
    }
}

/// Node / protocol version information returned by `fusion_getVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVersionInfo {
    pub node_version: String,
    pub protocol: String,
    pub api_version: String,
}

impl RpcVersionInfo {
    pub fn current() -> Self {
        Self {
            node_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: "fusionx/1".to_string(),
            api_version: "1".to_string(),
        }
    }
}
