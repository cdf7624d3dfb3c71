//! Order lifecycle types.
//!
//! [`OrderContext`] is the one aggregate the execution engine owns: the full
//! durable record of a swap from intake to terminal state. Executors receive
//! snapshots of it and report results back; only the engine (through the
//! store) mutates it.

use serde::{Deserialize, Serialize};

use crate::error::SwapError;
use crate::types::{Amount, ChainId, Hashlock, OrderHash, Secret, Timestamp, TxId};

// ── OrderStatus ──────────────────────────────────────────────────────────────

/// Per-order state machine.
///
/// ```text
/// pending → htlc_created → htlc_funded → secret_revealed → claimed
///              │                │                │
///              └→ failed        └────────────────┴→ expired (refund mined)
/// ```
///
/// `claimed`, `failed` and `expired` are terminal. `failed` is only reachable
/// before the destination lock is funded; once funds are locked, every
/// failure path routes through `expired` so the refund stays reachable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted and durable, destination work not yet started.
    #[default]
    Pending,
    /// Destination lock exists (HTLC address derived / contract order placed)
    /// but funds are not yet attached.
    HtlcCreated,
    /// Destination lock is funded; the maker can now claim against it.
    HtlcFunded,
    /// The maker's preimage was observed on the counterparty chain.
    SecretRevealed,
    /// Counter-claim landed; swap complete.
    Claimed,
    /// Timelock passed and the refund transaction is on its way to the chain.
    Expired,
    /// Rejected before funds were at risk.
    Failed,
}

impl OrderStatus {
    /// Check whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, HtlcCreated) => true,
            (Pending, Failed) => true,
            (HtlcCreated, HtlcFunded) => true,
            (HtlcCreated, Failed) => true,
            (HtlcFunded, SecretRevealed) => true,
            (HtlcFunded, Expired) => true,
            (SecretRevealed, Claimed) => true,
            // Monitor lag: secret arrived but past expiry; the refund path wins.
            (SecretRevealed, Expired) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Claimed | Self::Expired | Self::Failed)
    }

    /// States whose timelock expiry must route to the refund manager.
    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::HtlcFunded | Self::SecretRevealed)
    }
}

// ── Destination parameters ───────────────────────────────────────────────────

/// Chain-typed destination execution parameters, decoded at intake and
/// interpreted only by the matching executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DstParams {
    /// UTXO-chain HTLC parameters.
    Utxo {
        /// Hex-encoded 33-byte compressed recipient public key.
        recipient_pubkey: String,
        /// CLTV delta in blocks, added to the tip at creation time.
        timelock_blocks: u32,
        /// Target fee rate in sat/vB; falls back to the cached estimate.
        fee_rate: Option<u64>,
    },
    /// CosmWasm contract parameters.
    Cosmos {
        contract: String,
        denom: String,
        recipient: String,
        gas_limit: Option<u64>,
    },
}

// ── Bitcoin sub-record ───────────────────────────────────────────────────────

/// Everything the UTXO executor learns about an order, persisted so that a
/// restarted process can pick up mid-swap without re-deriving or re-funding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BitcoinSwapInfo {
    /// Base58Check P2SH address of the HTLC.
    pub htlc_address: Option<String>,
    /// Hex-encoded redeem script.
    pub htlc_script: Option<String>,
    /// Absolute CLTV block height baked into the script.
    pub cltv_height: Option<u64>,
    pub funding_txid: Option<TxId>,
    /// Value of the HTLC output in sats.
    pub funding_amount: Option<u64>,
    pub claiming_txid: Option<TxId>,
    pub refund_txid: Option<TxId>,
}

// ── New order (intake payload) ───────────────────────────────────────────────

/// A validated new-order record as handed over by the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_hash: OrderHash,
    pub src_chain_id: ChainId,
    pub dst_chain_id: ChainId,
    pub maker: String,
    pub src_token: String,
    pub dst_token: String,
    pub src_amount: Amount,
    pub dst_amount: Amount,
    pub hashlock: Hashlock,
    /// Absolute Unix seconds. Must precede the on-chain timelock with at
    /// least one destination confirmation window to spare.
    pub expiry_time: Timestamp,
    pub dst_params: DstParams,
}

// ── OrderContext ─────────────────────────────────────────────────────────────

/// Durable per-order aggregate. One instance per `order_hash`, owned by the
/// engine, persisted by the store on every transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderContext {
    pub order_hash: OrderHash,
    pub src_chain_id: ChainId,
    pub dst_chain_id: ChainId,
    pub maker: String,
    pub src_token: String,
    pub dst_token: String,
    pub src_amount: Amount,
    pub dst_amount: Amount,
    pub hashlock: Hashlock,
    /// Set only after an on-chain reveal passed `Secret::verify`.
    #[serde(default)]
    pub secret: Option<Secret>,
    pub expiry_time: Timestamp,
    pub status: OrderStatus,
    pub dst_params: DstParams,
    #[serde(default)]
    pub bitcoin: Option<BitcoinSwapInfo>,
    /// Source-chain match transaction, once sent by this resolver.
    #[serde(default)]
    pub match_txid: Option<TxId>,
    /// Source-chain token settlement into the escrow.
    #[serde(default)]
    pub settle_txid: Option<TxId>,
    /// Source-chain completion with the revealed secret.
    #[serde(default)]
    pub complete_txid: Option<TxId>,
    /// Destination tx id for account-model chains (contract execute).
    #[serde(default)]
    pub dst_txid: Option<TxId>,
    /// Destination claim tx id for account-model chains.
    #[serde(default)]
    pub claim_txid: Option<TxId>,
    /// Destination refund tx id for account-model chains.
    #[serde(default)]
    pub refund_txid: Option<TxId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Last failure message, kept across retries for the status endpoint.
    #[serde(default)]
    pub error: Option<String>,
}

impl OrderContext {
    /// Build a fresh `pending` context from an intake record.
    pub fn from_new_order(order: NewOrder, now: Timestamp) -> Self {
        Self {
            order_hash: order.order_hash,
            src_chain_id: order.src_chain_id,
            dst_chain_id: order.dst_chain_id,
            maker: order.maker,
            src_token: order.src_token,
            dst_token: order.dst_token,
            src_amount: order.src_amount,
            dst_amount: order.dst_amount,
            hashlock: order.hashlock,
            secret: None,
            expiry_time: order.expiry_time,
            status: OrderStatus::Pending,
            dst_params: order.dst_params,
            bitcoin: None,
            match_txid: None,
            settle_txid: None,
            complete_txid: None,
            dst_txid: None,
            claim_txid: None,
            refund_txid: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Transition to `next`, refusing illegal moves and any mutation of a
    /// terminal context.
    pub fn transition_to(&mut self, next: OrderStatus, now: Timestamp) -> Result<(), SwapError> {
        if self.status.is_terminal() {
            return Err(SwapError::StateConflict {
                order_hash: self.order_hash,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(SwapError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record the observed preimage. Rejects any candidate whose SHA-256
    /// image differs from the committed hashlock.
    pub fn set_secret(&mut self, secret: Secret, now: Timestamp) -> Result<(), SwapError> {
        if !secret.verify(&self.hashlock) {
            return Err(SwapError::PreimageMismatch {
                order_hash: self.order_hash,
            });
        }
        self.secret = Some(secret);
        self.updated_at = now;
        Ok(())
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiry_time
    }

    /// Mutable access to the bitcoin sub-record, created on first use.
    pub fn bitcoin_mut(&mut self) -> &mut BitcoinSwapInfo {
        self.bitcoin.get_or_insert_with(BitcoinSwapInfo::default)
    }
}
