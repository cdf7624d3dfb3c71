//! Account-model destination executor.
//!
//! Drives a CosmWasm Fusion contract: `execute_fusion_order` locks the
//! destination funds (amount + resolver fee + safety deposit) behind the
//! swap's hashlock, `claim_fusion_order` releases them against the revealed
//! preimage, `refund_order` returns them after the timeout. Chains without
//! contract support fall back to a plain transfer only when explicitly
//! allowed, since a bare transfer has no hashlock and is not atomic.

pub mod executor;
pub mod rpc;

pub use executor::CosmosExecutor;
pub use rpc::{Coin, ContractExecuteMsg, CosmosRpc, HttpCosmosClient, MockCosmosRpc};
