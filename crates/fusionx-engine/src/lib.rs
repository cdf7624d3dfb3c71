//! Cross-chain execution engine.
//!
//! One inbox, one state machine per order. The engine owns every
//! [`fusionx_core::OrderContext`] mutation: executors are passed in as
//! dependencies, only ever return values, and never call back. Messages
//! arrive from the gateway (new orders), the event monitor (secret reveals)
//! and the ticker (expiry sweeps); per-order processing is serialized by an
//! in-flight guard so transitions stay linearizable per order hash.

pub mod engine;
pub mod messages;
pub mod refund;
pub mod retry;
pub mod validate;

pub use engine::{Engine, EngineDeps, EngineHandle};
pub use messages::EngineMessage;
pub use refund::RefundManager;
