//! Executor for CosmWasm Fusion contracts.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use fusionx_core::constants::GAS_ADJUSTMENT_PCT;
use fusionx_core::{ChainId, CosmosNetwork, DstParams, OrderContext, Secret, SwapError, Timestamp, TxId};

use crate::rpc::{Coin, ContractExecuteMsg, CosmosRpc};

/// Extra lead added to the contract timeout beyond the order expiry, so the
/// engine's wall-clock expiry always fires strictly before the on-chain one.
const TIMEOUT_MARGIN_SECS: u64 = 600;

pub struct CosmosExecutor {
    rpc: Arc<dyn CosmosRpc>,
    chain_id: ChainId,
    network: CosmosNetwork,
}

impl CosmosExecutor {
    pub fn new(rpc: Arc<dyn CosmosRpc>, chain_id: ChainId, network: CosmosNetwork) -> Self {
        Self { rpc, chain_id, network }
    }

    fn cosmos_params(ctx: &OrderContext) -> Result<(&str, &str, Option<u64>), SwapError> {
        match &ctx.dst_params {
            DstParams::Cosmos { contract, recipient, gas_limit, .. } => {
                Ok((contract, recipient, *gas_limit))
            }
            other => Err(SwapError::MalformedOrder {
                field: "dst_params",
                reason: format!("expected cosmos params, got {other:?}"),
            }),
        }
    }

    /// Safety deposit the contract will demand, in base units.
    pub fn safety_deposit(&self, amount: u128) -> u128 {
        amount * self.network.safety_deposit_bps as u128 / 10_000
    }

    /// Contract-side view of the order, if it exists.
    pub async fn query_order(
        &self,
        contract: &str,
        ctx: &OrderContext,
    ) -> Result<Option<serde_json::Value>, SwapError> {
        let query = json!({ "get_order": { "order_hash": ctx.order_hash.to_hex() } });
        self.rpc.query_contract_smart(contract, &query).await
    }

    /// Lock destination funds on the contract. Returns `None` when the
    /// contract already holds the order (idempotent re-run).
    pub async fn execute_fusion_order(
        &self,
        ctx: &OrderContext,
        now: Timestamp,
    ) -> Result<Option<TxId>, SwapError> {
        let (contract, recipient, gas_override) = Self::cosmos_params(ctx)?;

        if contract.is_empty() {
            return self.native_fallback(ctx, recipient).await.map(Some);
        }

        if self.query_order(contract, ctx).await?.is_some() {
            debug!(order_hash = %ctx.order_hash, "contract already holds order; skipping execute");
            return Ok(None);
        }

        let amount = ctx.dst_amount;
        let resolver_fee = self.network.resolver_fee;
        let deposit = self.safety_deposit(amount);
        let total = amount + resolver_fee + deposit;

        let lead = (ctx.expiry_time - now).max(0) as u64;
        let timeout_seconds = lead + TIMEOUT_MARGIN_SECS;

        let msg = ContractExecuteMsg {
            contract: contract.to_string(),
            msg: json!({
                "execute_fusion_order": {
                    "order_hash": ctx.order_hash.to_hex(),
                    "hashlock": ctx.hashlock.to_hex(),
                    "maker": recipient,
                    "amount": amount.to_string(),
                    "resolver_fee": resolver_fee.to_string(),
                    "source_chain_id": ctx.src_chain_id.0,
                    "timeout_seconds": timeout_seconds,
                }
            }),
            funds: vec![Coin::new(&self.network.denom, total)],
        };

        let gas_limit = match gas_override {
            Some(gas) => gas,
            None => self.gas_limit_for(&msg).await,
        };
        let txid = self.rpc.broadcast_execute(&msg, gas_limit).await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, total, timeout_seconds,
              "fusion order executed on destination contract");
        Ok(Some(txid))
    }

    /// Release the destination lock with the revealed preimage.
    pub async fn claim_fusion_order(
        &self,
        ctx: &OrderContext,
        preimage: &Secret,
    ) -> Result<TxId, SwapError> {
        let (contract, _, gas_override) = Self::cosmos_params(ctx)?;
        if contract.is_empty() {
            // Nothing to claim on a bare transfer; the fallback already paid out.
            return Err(SwapError::NativeFallbackDisabled(self.chain_id));
        }

        let msg = ContractExecuteMsg {
            contract: contract.to_string(),
            msg: json!({
                "claim_fusion_order": {
                    "order_hash": ctx.order_hash.to_hex(),
                    "preimage": preimage.to_hex(),
                }
            }),
            funds: vec![],
        };
        let gas_limit = match gas_override {
            Some(gas) => gas,
            None => self.gas_limit_for(&msg).await,
        };
        let txid = self.rpc.broadcast_execute(&msg, gas_limit).await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, "fusion order claimed");
        Ok(txid)
    }

    /// Reclaim destination funds after the contract timeout.
    pub async fn refund_order(&self, ctx: &OrderContext) -> Result<TxId, SwapError> {
        let (contract, _, gas_override) = Self::cosmos_params(ctx)?;
        if contract.is_empty() {
            return Err(SwapError::NativeFallbackDisabled(self.chain_id));
        }
        let msg = ContractExecuteMsg {
            contract: contract.to_string(),
            msg: json!({ "refund_order": { "order_hash": ctx.order_hash.to_hex() } }),
            funds: vec![],
        };
        let gas_limit = match gas_override {
            Some(gas) => gas,
            None => self.gas_limit_for(&msg).await,
        };
        let txid = self.rpc.broadcast_execute(&msg, gas_limit).await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, "fusion order refunded");
        Ok(txid)
    }

    async fn gas_limit_for(&self, msg: &ContractExecuteMsg) -> u64 {
        match self.rpc.simulate(msg).await {
            Ok(gas_used) => {
                (gas_used * GAS_ADJUSTMENT_PCT / 100).min(self.network.gas_ceiling)
            }
            Err(e) => {
                debug!(error = %e, ceiling = self.network.gas_ceiling,
                       "simulation failed; using gas ceiling");
                self.network.gas_ceiling
            }
        }
    }

    /// Plain value transfer for chains without contract support. There is no
    /// hashlock on this path, so it is refused unless the operator opted in.
    async fn native_fallback(
        &self,
        ctx: &OrderContext,
        recipient: &str,
    ) -> Result<TxId, SwapError> {
        if !self.network.allow_native_fallback {
            return Err(SwapError::NativeFallbackDisabled(self.chain_id));
        }
        warn!(order_hash = %ctx.order_hash,
              "using non-atomic native transfer fallback (explicitly enabled)");
        self.rpc
            .send_tokens(recipient, ctx.dst_amount, &self.network.denom)
            .await
    }
}
