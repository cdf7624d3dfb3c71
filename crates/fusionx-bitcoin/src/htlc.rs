//! HTLC lifecycle on the UTXO destination: create-and-fund, claim with the
//! revealed preimage, refund after the timelock.
//!
//! Every operation is written to be re-runnable: re-deriving the script from
//! persisted state yields the same address, an existing funding output is
//! discovered by scanning the HTLC address before any new coins move, and a
//! duplicate broadcast is treated as success.

use std::sync::Arc;

use tracing::{info, warn};

use fusionx_core::{
    BitcoinNetwork, DstParams, OrderContext, Secret, SwapError, TxId,
};

use crate::api::BitcoinApi;
use crate::script::{
    address_script_pubkey, htlc_redeem_script, p2sh_address, p2sh_script_pubkey, push_data,
    HtlcScriptParams, OP_0, OP_1,
};
use crate::tx::{
    BitcoinKey, OutPoint, Transaction, TxIn, TxOut, SEQUENCE_FINAL, SEQUENCE_LOCKTIME,
};
use crate::utxo::UtxoManager;

/// Approximate scriptSig size of an HTLC spend (sig + preimage + redeem).
const HTLC_SPEND_SCRIPT_SIG_SIZE: usize = 240;

/// Result of `create_and_fund`, persisted into the order's bitcoin record.
#[derive(Clone, Debug)]
pub struct HtlcCreation {
    pub htlc_address: String,
    pub redeem_script: Vec<u8>,
    pub cltv_height: u64,
    pub funding_txid: TxId,
    /// Value of the HTLC output in sats.
    pub funding_amount: u64,
    /// False when an existing funding output was found instead of broadcast.
    pub newly_funded: bool,
}

/// Destination-side executor for BTC-class chains.
pub struct HtlcExecutor {
    api: Arc<dyn BitcoinApi>,
    utxos: Arc<UtxoManager>,
    key: BitcoinKey,
    network: BitcoinNetwork,
    change_address: String,
    dust_threshold: u64,
    min_timelock: u32,
}

impl HtlcExecutor {
    pub fn new(
        api: Arc<dyn BitcoinApi>,
        utxos: Arc<UtxoManager>,
        key: BitcoinKey,
        network: BitcoinNetwork,
        change_address: impl Into<String>,
        dust_threshold: u64,
        min_timelock: u32,
    ) -> Self {
        Self {
            api,
            utxos,
            key,
            network,
            change_address: change_address.into(),
            dust_threshold,
            min_timelock,
        }
    }

    fn utxo_params(ctx: &OrderContext) -> Result<(&str, u32, Option<u64>), SwapError> {
        match &ctx.dst_params {
            DstParams::Utxo { recipient_pubkey, timelock_blocks, fee_rate } => {
                Ok((recipient_pubkey, *timelock_blocks, *fee_rate))
            }
            other => Err(SwapError::MalformedOrder {
                field: "dst_params",
                reason: format!("expected utxo params, got {other:?}"),
            }),
        }
    }

    fn parse_pubkey(hex_key: &str) -> Result<[u8; 33], SwapError> {
        let bytes = hex::decode(hex_key).map_err(|e| SwapError::MalformedOrder {
            field: "recipient_pubkey",
            reason: e.to_string(),
        })?;
        if bytes.len() != 33 {
            return Err(SwapError::MalformedOrder {
                field: "recipient_pubkey",
                reason: format!("expected 33 bytes, got {}", bytes.len()),
            });
        }
        let mut out = [0u8; 33];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Redeem script for `ctx`, reusing the persisted CLTV height when the
    /// order already progressed (same script ⇒ same address on re-run).
    async fn resolve_script(&self, ctx: &OrderContext) -> Result<(Vec<u8>, u64), SwapError> {
        let (recipient_hex, timelock_blocks, _) = Self::utxo_params(ctx)?;
        if timelock_blocks < self.min_timelock {
            return Err(SwapError::TimelockBelowFloor {
                got: timelock_blocks,
                floor: self.min_timelock,
            });
        }

        if let Some(info) = &ctx.bitcoin {
            if let (Some(script_hex), Some(height)) = (&info.htlc_script, info.cltv_height) {
                let script = hex::decode(script_hex)
                    .map_err(|e| SwapError::Serialization(format!("stored script: {e}")))?;
                return Ok((script, height));
            }
        }

        let tip = self.api.get_height().await?;
        let cltv_height = tip + timelock_blocks as u64;
        let script = htlc_redeem_script(&HtlcScriptParams {
            hashlock: ctx.hashlock,
            recipient_pubkey: Self::parse_pubkey(recipient_hex)?,
            resolver_pubkey: self.key.public_key(),
            cltv_height,
        });
        Ok((script, cltv_height))
    }

    /// Scan the HTLC address for an output matching the order amount. This is
    /// the crash-recovery path: a funding tx may be on-chain even though the
    /// store never saw its txid.
    pub async fn find_funding(
        &self,
        htlc_address: &str,
        amount: u64,
    ) -> Result<Option<(TxId, u64)>, SwapError> {
        let utxos = self.api.get_utxos(htlc_address).await?;
        Ok(utxos
            .into_iter()
            .find(|u| u.value == amount)
            .map(|u| (u.txid, u.value)))
    }

    /// Derive the HTLC, fund it from the resolver wallet, and broadcast.
    pub async fn create_and_fund(&self, ctx: &OrderContext) -> Result<HtlcCreation, SwapError> {
        let (_, _, fee_override) = Self::utxo_params(ctx)?;
        let (redeem_script, cltv_height) = self.resolve_script(ctx).await?;
        let htlc_address = p2sh_address(&redeem_script, self.network);
        let amount = u64::try_from(ctx.dst_amount).map_err(|_| SwapError::MalformedOrder {
            field: "dst_amount",
            reason: "exceeds u64 sat range".into(),
        })?;

        // Already funded? A stored txid the chain still knows wins; otherwise
        // scan the address for an amount-matching output.
        if let Some(info) = &ctx.bitcoin {
            if let Some(txid) = &info.funding_txid {
                if self.api.get_raw_transaction(txid).await?.is_some() {
                    return Ok(HtlcCreation {
                        htlc_address,
                        redeem_script,
                        cltv_height,
                        funding_txid: txid.clone(),
                        funding_amount: info.funding_amount.unwrap_or(amount),
                        newly_funded: false,
                    });
                }
                warn!(order_hash = %ctx.order_hash, txid = %txid,
                      "stored funding tx unknown to chain; re-checking address");
            }
        }
        if let Some((txid, value)) = self.find_funding(&htlc_address, amount).await? {
            info!(order_hash = %ctx.order_hash, txid = %txid,
                  "found existing funding output; skipping broadcast");
            return Ok(HtlcCreation {
                htlc_address,
                redeem_script,
                cltv_height,
                funding_txid: txid,
                funding_amount: value,
                newly_funded: false,
            });
        }

        // Fund from the wallet. Reservation is released on any failure after
        // selection and committed only once the chain has the transaction.
        let fee_rate = match fee_override {
            Some(rate) => rate,
            None => self.utxos.fee_rate().await,
        };
        let selection = self.utxos.acquire(amount, fee_rate, 2).await?;

        let result = self
            .build_and_broadcast_funding(&redeem_script, amount, &selection)
            .await;
        match result {
            Ok(funding_txid) => {
                self.utxos.commit(selection.token, &funding_txid);
                info!(order_hash = %ctx.order_hash, txid = %funding_txid,
                      address = %htlc_address, amount, "HTLC funded");
                Ok(HtlcCreation {
                    htlc_address,
                    redeem_script,
                    cltv_height,
                    funding_txid,
                    funding_amount: amount,
                    newly_funded: true,
                })
            }
            Err(e) => {
                self.utxos.release(selection.token);
                Err(e)
            }
        }
    }

    async fn build_and_broadcast_funding(
        &self,
        redeem_script: &[u8],
        amount: u64,
        selection: &crate::utxo::UtxoSelection,
    ) -> Result<TxId, SwapError> {
        let mut tx = Transaction::new(0);
        for utxo in &selection.utxos {
            tx.inputs.push(TxIn {
                prevout: utxo.outpoint.clone(),
                script_sig: Vec::new(),
                sequence: SEQUENCE_FINAL,
            });
        }
        tx.outputs.push(TxOut {
            value: amount,
            script_pubkey: p2sh_script_pubkey(redeem_script),
        });
        let change = selection.total - amount - selection.fee;
        if change > self.dust_threshold {
            tx.outputs.push(TxOut {
                value: change,
                script_pubkey: address_script_pubkey(&self.change_address)?,
            });
        }

        for i in 0..tx.inputs.len() {
            tx.sign_p2pkh_input(i, &self.key)?;
        }
        self.broadcast_tolerant(&tx).await
    }

    /// Spend the HTLC output through the hash branch with the preimage.
    pub async fn claim(&self, ctx: &OrderContext, secret: &Secret) -> Result<TxId, SwapError> {
        let (redeem_script, _) = self.resolve_script(ctx).await?;
        let (funding_txid, value) = self.locate_htlc_output(ctx, &redeem_script).await?;

        let fee_rate = self.utxos.fee_rate().await;
        let fee = fee_rate * Transaction::estimate_size(1, 1, HTLC_SPEND_SCRIPT_SIG_SIZE) as u64;
        if fee >= value {
            return Err(SwapError::InsufficientFunds { need: fee, have: value });
        }

        let mut tx = Transaction::new(0);
        tx.inputs.push(TxIn {
            prevout: OutPoint { txid: funding_txid, vout: 0 },
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        });
        tx.outputs.push(TxOut {
            value: value - fee,
            script_pubkey: address_script_pubkey(&self.change_address)?,
        });

        let digest = tx.sighash_all(0, &redeem_script)?;
        let sig = self.key.sign_sighash(&digest)?;
        let mut script_sig = Vec::new();
        push_data(&mut script_sig, &sig);
        push_data(&mut script_sig, secret.as_bytes());
        script_sig.push(OP_1);
        push_data(&mut script_sig, &redeem_script);
        tx.inputs[0].script_sig = script_sig;

        let txid = self.broadcast_tolerant(&tx).await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, "HTLC claimed");
        Ok(txid)
    }

    /// Spend the HTLC output through the timelock branch after CLTV maturity.
    pub async fn refund(&self, ctx: &OrderContext) -> Result<TxId, SwapError> {
        let (redeem_script, cltv_height) = self.resolve_script(ctx).await?;
        let tip = self.api.get_height().await?;
        if tip < cltv_height {
            return Err(SwapError::NotYetRefundable { tip, cltv: cltv_height });
        }
        let (funding_txid, value) = self.locate_htlc_output(ctx, &redeem_script).await?;

        let fee_rate = self.utxos.fee_rate().await;
        let fee = fee_rate * Transaction::estimate_size(1, 1, HTLC_SPEND_SCRIPT_SIG_SIZE) as u64;
        if fee >= value {
            return Err(SwapError::InsufficientFunds { need: fee, have: value });
        }

        // nLockTime must reach the CLTV height and the input must opt in with
        // a non-final sequence, or the script fails.
        let mut tx = Transaction::new(cltv_height as u32);
        tx.inputs.push(TxIn {
            prevout: OutPoint { txid: funding_txid, vout: 0 },
            script_sig: Vec::new(),
            sequence: SEQUENCE_LOCKTIME,
        });
        tx.outputs.push(TxOut {
            value: value - fee,
            script_pubkey: address_script_pubkey(&self.change_address)?,
        });

        let digest = tx.sighash_all(0, &redeem_script)?;
        let sig = self.key.sign_sighash(&digest)?;
        let mut script_sig = Vec::new();
        push_data(&mut script_sig, &sig);
        script_sig.push(OP_0);
        push_data(&mut script_sig, &redeem_script);
        tx.inputs[0].script_sig = script_sig;

        let txid = self.broadcast_tolerant(&tx).await?;
        info!(order_hash = %ctx.order_hash, txid = %txid, cltv_height, "HTLC refunded");
        Ok(txid)
    }

    /// Confirmations of the funding transaction (0 when unknown).
    pub async fn funding_confirmations(&self, ctx: &OrderContext) -> Result<u64, SwapError> {
        match ctx.bitcoin.as_ref().and_then(|b| b.funding_txid.as_ref()) {
            Some(txid) => self.api.get_confirmations(txid).await,
            None => Ok(0),
        }
    }

    /// True when the recorded funding transaction has vanished from the
    /// chain's view entirely (reorg), including the address index.
    pub async fn funding_missing(&self, ctx: &OrderContext) -> Result<bool, SwapError> {
        let Some(info) = &ctx.bitcoin else { return Ok(true) };
        if let Some(txid) = &info.funding_txid {
            if self.api.get_raw_transaction(txid).await?.is_some() {
                return Ok(false);
            }
        }
        match &info.htlc_address {
            Some(address) => {
                let amount = ctx.dst_amount as u64;
                Ok(self.find_funding(address, amount).await?.is_none())
            }
            None => Ok(true),
        }
    }

    async fn locate_htlc_output(
        &self,
        ctx: &OrderContext,
        redeem_script: &[u8],
    ) -> Result<(TxId, u64), SwapError> {
        if let Some(info) = &ctx.bitcoin {
            if let (Some(txid), Some(value)) = (&info.funding_txid, info.funding_amount) {
                return Ok((txid.clone(), value));
            }
        }
        let address = p2sh_address(redeem_script, self.network);
        let amount = ctx.dst_amount as u64;
        self.find_funding(&address, amount)
            .await?
            .ok_or_else(|| SwapError::HtlcOutputNotFound(TxId::new(address)))
    }

    async fn broadcast_tolerant(&self, tx: &Transaction) -> Result<TxId, SwapError> {
        let hex_tx = tx.to_hex()?;
        match self.api.broadcast(&hex_tx).await {
            Ok(txid) => Ok(txid),
            Err(SwapError::AlreadyBroadcast(_)) => {
                let txid = tx.txid()?;
                info!(txid = %txid, "transaction already in mempool; treating as success");
                Ok(txid)
            }
            Err(e) => Err(e),
        }
    }
}
