use fusionx_core::{OrderHash, Secret, TxRef};

/// Everything the engine reacts to, in one inbox.
#[derive(Debug)]
pub enum EngineMessage {
    /// Drive the state machine for an order (new, recovered, or retried).
    ProcessOrder(OrderHash),
    /// The monitor observed a preimage on the counterparty chain.
    /// Duplicate delivery is expected and harmless.
    SecretRevealed {
        order_hash: OrderHash,
        secret: Secret,
        tx_ref: TxRef,
    },
    /// Periodic expiry / staleness sweep.
    Tick,
    /// Stop accepting work and drain.
    Shutdown,
}
