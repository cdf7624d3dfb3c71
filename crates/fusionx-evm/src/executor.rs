//! Source-side executor against the Fusion factory contract.
//!
//! All three operations are idempotent through chain state: matching checks
//! `sourceEscrows(orderHash)` for an existing escrow first, completion is a
//! no-op on the contract once the secret is recorded, and settlement targets
//! the escrow address the factory reports.

use std::sync::Arc;

use primitive_types::{H160, U256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use fusionx_core::{ChainId, OrderContext, OrderHash, Secret, SwapError, TxId};

use crate::abi;
use crate::rpc::{CallRequest, EvmRpc};
use crate::tx::{raw_tx_hash, EvmKey, LegacyTx};

/// Headroom multiplier applied to gas estimates, in percent.
const GAS_HEADROOM_PCT: u64 = 120;

pub struct EvmExecutor {
    rpc: Arc<dyn EvmRpc>,
    key: EvmKey,
    chain_id: ChainId,
    factory: H160,
    registry: H160,
    gas_ceiling: u64,
    /// Serializes nonce fetch + broadcast for the resolver account.
    nonce_lock: Mutex<()>,
}

impl EvmExecutor {
    pub fn new(
        rpc: Arc<dyn EvmRpc>,
        key: EvmKey,
        chain_id: ChainId,
        factory: H160,
        registry: H160,
        gas_ceiling: u64,
    ) -> Self {
        Self { rpc, key, chain_id, factory, registry, gas_ceiling, nonce_lock: Mutex::new(()) }
    }

    pub fn address(&self) -> H160 {
        self.key.address()
    }

    fn parse_address(s: &str) -> Result<H160, SwapError> {
        s.trim_start_matches("0x")
            .parse()
            .map_err(|_| SwapError::MalformedOrder {
                field: "address",
                reason: format!("not a 20-byte hex address: {s}"),
            })
    }

    /// Escrow registered for the order; zero address when unmatched.
    pub async fn source_escrow(&self, order_hash: &OrderHash) -> Result<H160, SwapError> {
        let ret = self.rpc.call(self.factory, abi::source_escrows(order_hash)).await?;
        abi::decode_address(&ret)
    }

    /// Match the order on the factory, posting the registry-quoted safety
    /// deposit. Returns `None` when an escrow already exists.
    pub async fn match_order(&self, ctx: &OrderContext) -> Result<Option<TxId>, SwapError> {
        if !self.source_escrow(&ctx.order_hash).await?.is_zero() {
            debug!(order_hash = %ctx.order_hash, "order already matched; skipping");
            return Ok(None);
        }

        let quote = self
            .rpc
            .call(
                self.registry,
                abi::calculate_min_safety_deposit(ctx.dst_chain_id.0, U256::from(ctx.src_amount)),
            )
            .await?;
        let deposit = abi::decode_uint(&quote)?;

        let balance = self.rpc.get_balance(self.address()).await?;
        if balance < deposit {
            return Err(SwapError::InsufficientBalance {
                chain: self.chain_id,
                need: deposit.to_string(),
                have: balance.to_string(),
            });
        }

        let txid = self
            .send_transaction(self.factory, deposit, abi::match_fusion_order(&ctx.order_hash))
            .await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, deposit = %deposit, "order matched");
        Ok(Some(txid))
    }

    /// Complete the source side with the revealed preimage.
    pub async fn complete_order(
        &self,
        order_hash: &OrderHash,
        secret: &Secret,
    ) -> Result<TxId, SwapError> {
        let txid = self
            .send_transaction(
                self.factory,
                U256::zero(),
                abi::complete_fusion_order(order_hash, secret),
            )
            .await?;
        info!(order_hash = %order_hash, txid = %txid, "order completed");
        Ok(txid)
    }

    /// Transfer the source-token amount into the order's escrow.
    pub async fn settle(&self, ctx: &OrderContext) -> Result<TxId, SwapError> {
        let escrow = self.source_escrow(&ctx.order_hash).await?;
        if escrow.is_zero() {
            return Err(SwapError::Other(format!(
                "order {} has no escrow to settle into",
                ctx.order_hash
            )));
        }
        let token = Self::parse_address(&ctx.src_token)?;
        let txid = self
            .send_transaction(
                token,
                U256::zero(),
                abi::erc20_transfer(escrow, U256::from(ctx.src_amount)),
            )
            .await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, escrow = %escrow, "order settled");
        Ok(txid)
    }

    /// Did a sent transaction land successfully?
    pub async fn check_receipt(&self, txid: &TxId) -> Result<Option<bool>, SwapError> {
        Ok(self
            .rpc
            .get_transaction_receipt(txid)
            .await?
            .map(|r| r.status))
    }

    async fn gas_limit_for(&self, request: &CallRequest) -> u64 {
        match self.rpc.estimate_gas(request).await {
            Ok(estimate) => (estimate * GAS_HEADROOM_PCT / 100).min(self.gas_ceiling),
            Err(e) => {
                debug!(error = %e, ceiling = self.gas_ceiling, "gas estimation failed; using ceiling");
                self.gas_ceiling
            }
        }
    }

    /// Build, sign and broadcast under the nonce lock.
    async fn send_transaction(
        &self,
        to: H160,
        value: U256,
        data: Vec<u8>,
    ) -> Result<TxId, SwapError> {
        let request = CallRequest {
            from: Some(self.address()),
            to,
            value,
            data: data.clone(),
        };
        let gas_limit = self.gas_limit_for(&request).await;

        let _guard = self.nonce_lock.lock().await;
        let nonce = self.rpc.get_nonce(self.address()).await?;
        let gas_price = self.rpc.gas_price().await?;

        let raw = LegacyTx { nonce, gas_price, gas_limit, to, value, data }
            .sign(&self.key, self.chain_id.0)?;

        match self.rpc.send_raw_transaction(&raw).await {
            Ok(txid) => Ok(txid),
            Err(SwapError::AlreadyBroadcast(_)) => Ok(raw_tx_hash(&raw)),
            Err(e) => Err(e),
        }
    }
}
