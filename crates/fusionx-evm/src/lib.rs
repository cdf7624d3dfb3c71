//! Source-chain (EVM) executor: matching, completion and settlement of
//! Fusion orders against the factory contract, plus the JSON-RPC client and
//! the ABI/event plumbing shared with the event monitor.

pub mod abi;
pub mod executor;
pub mod rpc;
pub mod tx;

pub use abi::{decode_secret_revealed, secret_revealed_topic};
pub use executor::EvmExecutor;
pub use rpc::{CallRequest, EvmLog, EvmRpc, HttpEvmClient, LogFilter, MockEvmRpc, Receipt};
pub use tx::EvmKey;
