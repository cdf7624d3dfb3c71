//! Refund routing for expired funded locks.
//!
//! Invoked from the engine's expiry sweep for contexts sitting in
//! `htlc_funded` (or `secret_revealed` when the claim path is dead) past
//! their expiry time. A timelock that has not matured on-chain yet surfaces
//! as `NotYetRefundable`, which the engine treats as transient and retries
//! on a later tick.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use fusionx_core::{ChainKind, OrderContext, OrderStatus, SwapError, Timestamp, TxId};
use fusionx_store::OrderStore;

use fusionx_bitcoin::HtlcExecutor;
use fusionx_cosmos::CosmosExecutor;

pub struct RefundManager {
    store: Arc<OrderStore>,
    bitcoin: Option<Arc<HtlcExecutor>>,
    cosmos: HashMap<u64, Arc<CosmosExecutor>>,
}

impl RefundManager {
    pub fn new(
        store: Arc<OrderStore>,
        bitcoin: Option<Arc<HtlcExecutor>>,
        cosmos: HashMap<u64, Arc<CosmosExecutor>>,
    ) -> Self {
        Self { store, bitcoin, cosmos }
    }

    /// Build and broadcast the refund for `ctx`, persist the transaction id
    /// and finalize the context as `expired`.
    pub async fn refund(
        &self,
        ctx: &OrderContext,
        kind: ChainKind,
        now: Timestamp,
    ) -> Result<TxId, SwapError> {
        // Idempotency: a persisted refund txid means the refund was already
        // broadcast; just finish the transition if it didn't land.
        let prior = ctx
            .refund_txid
            .clone()
            .or_else(|| ctx.bitcoin.as_ref().and_then(|b| b.refund_txid.clone()));
        if let Some(txid) = prior {
            self.finalize(ctx, now)?;
            return Ok(txid);
        }

        let txid = match kind {
            ChainKind::Bitcoin => {
                let executor = self
                    .bitcoin
                    .as_ref()
                    .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                let txid = executor.refund(ctx).await?;
                self.store.update_bitcoin_info(&ctx.order_hash, now, |info| {
                    info.refund_txid = Some(txid.clone());
                })?;
                txid
            }
            ChainKind::Cosmos => {
                let executor = self
                    .cosmos
                    .get(&ctx.dst_chain_id.0)
                    .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                let txid = executor.refund_order(ctx).await?;
                self.store.update_with(&ctx.order_hash, now, |c| {
                    c.refund_txid = Some(txid.clone());
                })?;
                txid
            }
            ChainKind::Evm => {
                return Err(SwapError::Other(
                    "no refund path for an EVM destination".into(),
                ));
            }
        };

        self.finalize(ctx, now)?;
        info!(order_hash = %ctx.order_hash, txid = %txid, "order refunded after expiry");
        Ok(txid)
    }

    fn finalize(&self, ctx: &OrderContext, now: Timestamp) -> Result<(), SwapError> {
        match self.store.update_status(&ctx.order_hash, OrderStatus::Expired, now) {
            Ok(_) => Ok(()),
            // Someone else finished it concurrently; that's fine.
            Err(SwapError::StateConflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
