//! Event monitor: tails a chain for SecretRevealed logs on watched orders.
//!
//! Per poll it scans `[cursor − reorg_depth, tip − confirmation_depth]`,
//! filters by the watch set, deduplicates by `(order_hash, tx_hash,
//! log_index)`, and hands verified-shape events to the engine. The cursor
//! only advances after the engine has received the batch, and is persisted
//! so a restart resumes where the last run acknowledged.

mod monitor;

pub use monitor::{EventMonitor, SecretRevealedEvent};
