//! Durable order-context store.
//!
//! A single JSON file (`order-contexts.json`) holds every order context
//! keyed by order hash. Writes are coalesced behind a debounce window and
//! flushed atomically (write-to-temp + rename); transitions that enable
//! counter-party action (`htlc_funded`, `secret_revealed`) flush
//! synchronously regardless of the timer, so a crash can never lose a state
//! the other side is already allowed to act on.

mod store;

pub use store::{run_flusher, OrderStore, StoreFile};
