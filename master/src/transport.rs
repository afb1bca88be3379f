use std::{future::Future, time::Duration};

use common::{HeartbeatReply, HeartbeatRequest, MapReply, MapRequest, Method, RpcClient, RpcError};

/// Llamadas salientes del master hacia los nodos.
pub trait NodeTransport: Send + Sync + 'static {
    fn heartbeat(
        &self,
        address: &str,
        deadline: Duration,
    ) -> impl Future<Output = Result<HeartbeatReply, RpcError>> + Send;

    fn map_chunk(
        &self,
        address: &str,
        request: MapRequest,
        deadline: Duration,
    ) -> impl Future<Output = Result<MapReply, RpcError>> + Send;
}

impl NodeTransport for RpcClient {
    async fn heartbeat(&self, address: &str, deadline: Duration) -> Result<HeartbeatReply, RpcError> {
        self.call(address, Method::Heartbeat, &HeartbeatRequest {}, deadline)
            .await
    }

    async fn map_chunk(
        &self,
        address: &str,
        request: MapRequest,
        deadline: Duration,
    ) -> Result<MapReply, RpcError> {
        self.call(address, Method::Map, &request, deadline).await
    }
}
