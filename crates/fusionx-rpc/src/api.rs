use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    RpcCancelResult, RpcNewOrder, RpcOrderContext, RpcSubmitResult, RpcVersionInfo,
};

/// FusionX JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "fusion_" via `namespace = "fusion"`.
#[rpc(server, namespace = "fusion")]
pub trait FusionApi {
    /// Enqueue a validated order. Returns after the context is durable.
    #[method(name = "submitOrder")]
    async fn submit_order(&self, order: RpcNewOrder) -> RpcResult<RpcSubmitResult>;

    /// Get the full context for an order by its hex hash, or null.
    #[method(name = "getOrder")]
    async fn get_order(&self, order_hash: String) -> RpcResult<Option<RpcOrderContext>>;

    /// Cancel an order. Only honored while the order is still `pending`.
    #[method(name = "cancelOrder")]
    async fn cancel_order(&self, order_hash: String) -> RpcResult<RpcCancelResult>;

    /// All orders currently in `pending`.
    #[method(name = "listPending")]
    async fn list_pending(&self) -> RpcResult<Vec<RpcOrderContext>>;

    /// Orders filtered by status string, newest first, capped at `limit`
    /// (default 50, max 200).
    #[method(name = "listOrders")]
    async fn list_orders(
        &self,
        status: Option<String>,
        limit: Option<u32>,
    ) -> RpcResult<Vec<RpcOrderContext>>;

    /// Node and protocol version information.
    #[method(name = "getVersion")]
    async fn get_version(&self) -> RpcResult<RpcVersionInfo>;
}
