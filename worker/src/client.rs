use std::{future::Future, time::Duration};

use anyhow::Result;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;

use common::{
    AssignIdReply, AssignIdRequest, Empty, GetTaskRequest, Method, RegisterMeRequest, ReportAck,
    ReportDoneRequest, ReportOutcome, RpcClient, RpcError, SignalFailureRequest, TaskLease,
    WorkerId,
};

/// Lo que el loop del worker necesita del master.
pub trait Coordinator: Send + Sync {
    fn get_task(
        &self,
        worker_id: WorkerId,
    ) -> impl Future<Output = Result<TaskLease, RpcError>> + Send;

    fn report_done(
        &self,
        worker_id: WorkerId,
        lease: &TaskLease,
    ) -> impl Future<Output = Result<ReportOutcome, RpcError>> + Send;

    fn signal_failure(
        &self,
        lease: &TaskLease,
        reason: &str,
    ) -> impl Future<Output = Result<ReportOutcome, RpcError>> + Send;
}

/// Cliente RPC contra el master. Toda llamada en vuelo se abandona con
/// `RpcError::Cancelled` en cuanto se publica el apagado.
#[derive(Clone)]
pub struct CoordinatorClient {
    rpc: RpcClient,
    base_url: String,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl CoordinatorClient {
    pub fn new(base_url: &str, timeout: Duration, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let http = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            rpc: RpcClient::from_http(http),
            base_url: base_url.to_string(),
            timeout,
            shutdown,
        })
    }

    async fn call<Req, Resp>(&self, method: Method, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut shutdown = self.shutdown.clone();
        self.rpc
            .call_until(&self.base_url, method, request, self.timeout, &mut shutdown)
            .await
    }

    pub async fn assign_id(&self) -> Result<WorkerId, RpcError> {
        let reply: AssignIdReply = self.call(Method::AssignId, &AssignIdRequest {}).await?;
        Ok(reply.id)
    }

    pub async fn register_me(&self, address: &str, hostname: &str) -> Result<(), RpcError> {
        let _: Empty = self
            .call(
                Method::RegisterMe,
                &RegisterMeRequest {
                    address: address.to_string(),
                    hostname: hostname.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

impl Coordinator for CoordinatorClient {
    async fn get_task(&self, worker_id: WorkerId) -> Result<TaskLease, RpcError> {
        self.call(
            Method::GetTask,
            &GetTaskRequest {
                worker_id: Some(worker_id),
            },
        )
        .await
    }

    async fn report_done(
        &self,
        worker_id: WorkerId,
        lease: &TaskLease,
    ) -> Result<ReportOutcome, RpcError> {
        let ack: ReportAck = self
            .call(
                Method::ReportDone,
                &ReportDoneRequest {
                    task_id: lease.task_id,
                    generation: lease.generation,
                    worker_id,
                },
            )
            .await?;
        Ok(ack.outcome)
    }

    async fn signal_failure(
        &self,
        lease: &TaskLease,
        reason: &str,
    ) -> Result<ReportOutcome, RpcError> {
        let ack: ReportAck = self
            .call(
                Method::SignalFailure,
                &SignalFailureRequest {
                    task_id: lease.task_id,
                    generation: lease.generation,
                    task_source: lease.source.clone(),
                    reason: reason.to_string(),
                },
            )
            .await?;
        Ok(ack.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::shutdown;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reports_are_cancelled_by_shutdown() {
        // master que acepta conexiones y nunca contesta
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let (tx, rx) = shutdown::channel();
        let client = CoordinatorClient::new(&addr, Duration::from_secs(30), rx).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let lease = TaskLease {
            task_id: 1,
            generation: 1,
            source: "a.txt".to_string(),
            lease_timeout_ms: 10_000,
            n_reduce: 2,
        };
        let res = tokio::time::timeout(Duration::from_secs(2), client.report_done(3, &lease))
            .await
            .expect("el apagado debió cortar ReportDone");
        assert!(res.unwrap_err().is_cancelled());

        // con el apagado ya publicado, la siguiente llamada no espera el plazo
        let res = tokio::time::timeout(Duration::from_secs(2), client.signal_failure(&lease, "x"))
            .await
            .expect("SignalFailure no debió esperar");
        assert!(res.unwrap_err().is_cancelled());
    }
}
