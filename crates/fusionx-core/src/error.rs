use thiserror::Error;

use crate::order::OrderStatus;
use crate::types::{ChainId, OrderHash, TxId};

/// How the engine should react to a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Surfaced to the caller; no context is created or mutated.
    Validation,
    /// Retried with exponential backoff up to the configured attempt cap.
    Transient,
    /// No automatic retry; the engine decides between `failed` and refund.
    Permanent,
    /// The intended effect already holds on-chain; treat as success.
    AlreadyDone,
}

/// Error taxonomy for the whole coordinator. Executors return these; only
/// the engine classifies and acts on them.
#[derive(Debug, Error)]
pub enum SwapError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("malformed order field {field}: {reason}")]
    MalformedOrder { field: &'static str, reason: String },

    #[error("chain {0} is not on the configured allow-list")]
    UnknownChain(ChainId),

    #[error("expiry time {expiry} is not at least {min_lead}s in the future")]
    ExpiryTooSoon { expiry: i64, min_lead: i64 },

    #[error("timelock of {got} blocks is below the floor of {floor}")]
    TimelockBelowFloor { got: u32, floor: u32 },

    #[error("order {0} already processed to a terminal state")]
    AlreadyProcessed(OrderHash),

    #[error("order not found: {0}")]
    OrderNotFound(OrderHash),

    // ── Funds ────────────────────────────────────────────────────────────────
    #[error("insufficient funds: need {need} sats, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("insufficient balance on chain {chain}: need {need}, have {have}")]
    InsufficientBalance { chain: ChainId, need: String, have: String },

    // ── Chain interaction ────────────────────────────────────────────────────
    #[error("rpc error on chain {chain}: {reason}")]
    Rpc { chain: ChainId, reason: String },

    #[error("rpc call timed out on chain {chain}")]
    RpcTimeout { chain: ChainId },

    #[error("transaction {txid} reverted on chain {chain}")]
    Reverted { chain: ChainId, txid: TxId },

    #[error("transaction already known to the mempool: {0}")]
    AlreadyBroadcast(TxId),

    // ── State machine ────────────────────────────────────────────────────────
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order {order_hash} is terminal ({status:?}); refusing mutation")]
    StateConflict { order_hash: OrderHash, status: OrderStatus },

    #[error("candidate preimage does not hash to the committed hashlock for {order_hash}")]
    PreimageMismatch { order_hash: OrderHash },

    // ── UTXO side ────────────────────────────────────────────────────────────
    #[error("timelock not yet matured: tip {tip}, CLTV height {cltv}")]
    NotYetRefundable { tip: u64, cltv: u64 },

    #[error("HTLC output not found for funding tx {0}")]
    HtlcOutputNotFound(TxId),

    // ── Account-model side ───────────────────────────────────────────────────
    #[error("native transfer fallback is disabled for chain {0} (non-atomic)")]
    NativeFallbackDisabled(ChainId),

    // ── Persistence ──────────────────────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl SwapError {
    /// Classify for the engine's retry / fail / ignore decision.
    pub fn class(&self) -> ErrorClass {
        use SwapError::*;
        match self {
            MalformedOrder { .. }
            | UnknownChain(_)
            | ExpiryTooSoon { .. }
            | TimelockBelowFloor { .. }
            | AlreadyProcessed(_)
            | OrderNotFound(_) => ErrorClass::Validation,

            Rpc { .. } | RpcTimeout { .. } | Store(_) => ErrorClass::Transient,

            // Height catches up on its own; retried on a later tick.
            NotYetRefundable { .. } => ErrorClass::Transient,

            AlreadyBroadcast(_) => ErrorClass::AlreadyDone,

            InsufficientFunds { .. }
            | InsufficientBalance { .. }
            | Reverted { .. }
            | InvalidTransition { .. }
            | StateConflict { .. }
            | PreimageMismatch { .. }
            | HtlcOutputNotFound(_)
            | NativeFallbackDisabled(_)
            | Serialization(_)
            | Other(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
