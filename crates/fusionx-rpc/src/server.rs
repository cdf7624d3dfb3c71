use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use fusionx_core::{ErrorClass, OrderHash, OrderStatus, SwapError};
use fusionx_engine::EngineHandle;

use crate::api::FusionApiServer;
use crate::types::{
    RpcCancelResult, RpcNewOrder, RpcOrderContext, RpcSubmitResult, RpcVersionInfo,
};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn map_err(err: SwapError) -> ErrorObject<'static> {
    let code = match err.class() {
        ErrorClass::Validation => -32602,
        _ => -32603,
    };
    rpc_err(code, err.to_string())
}

fn parse_hash(order_hash: &str) -> Result<OrderHash, ErrorObject<'static>> {
    OrderHash::from_hex(order_hash).map_err(|e| rpc_err(-32602, format!("invalid order hash: {e}")))
}

fn parse_status(status: &str) -> Result<OrderStatus, ErrorObject<'static>> {
    serde_json::from_value(serde_json::Value::String(status.to_string()))
        .map_err(|_| rpc_err(-32602, format!("unknown status: {status}")))
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub engine: EngineHandle,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl FusionApiServer for RpcServer {
    async fn submit_order(&self, order: RpcNewOrder) -> RpcResult<RpcSubmitResult> {
        let order = order.into_order().map_err(map_err)?;
        let (order_hash, status) = self.state.engine.submit(order).await.map_err(map_err)?;
        Ok(RpcSubmitResult {
            order_hash: order_hash.to_hex(),
            status: serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
        })
    }

    async fn get_order(&self, order_hash: String) -> RpcResult<Option<RpcOrderContext>> {
        let hash = parse_hash(&order_hash)?;
        Ok(self.state.engine.status(&hash).map(RpcOrderContext::from))
    }

    async fn cancel_order(&self, order_hash: String) -> RpcResult<RpcCancelResult> {
        let hash = parse_hash(&order_hash)?;
        match self.state.engine.cancel(&hash) {
            Ok(()) => Ok(RpcCancelResult { ok: true, message: "order cancelled".into() }),
            // Refusals are an answer, not a transport error.
            Err(e @ (SwapError::StateConflict { .. } | SwapError::OrderNotFound(_))) => {
                Ok(RpcCancelResult { ok: false, message: e.to_string() })
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn list_pending(&self) -> RpcResult<Vec<RpcOrderContext>> {
        Ok(self
            .state
            .engine
            .pending()
            .into_iter()
            .map(RpcOrderContext::from)
            .collect())
    }

    async fn list_orders(
        &self,
        status: Option<String>,
        limit: Option<u32>,
    ) -> RpcResult<Vec<RpcOrderContext>> {
        let status = status.as_deref().map(parse_status).transpose()?;
        let limit = limit.unwrap_or(50).min(200) as usize;
        Ok(self
            .state
            .engine
            .list(status, limit)
            .into_iter()
            .map(RpcOrderContext::from)
            .collect())
    }

    async fn get_version(&self) -> RpcResult<RpcVersionInfo> {
        Ok(RpcVersionInfo::current())
    }
}
