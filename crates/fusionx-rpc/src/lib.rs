//! Gateway-facing JSON-RPC surface.
//!
//! A thin adapter over [`fusionx_engine::EngineHandle`]: parse, delegate,
//! serialize. Anything resembling a decision lives in the engine.

pub mod api;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerState};
pub use types::{RpcCancelResult, RpcNewOrder, RpcOrderContext, RpcSubmitResult, RpcVersionInfo};
