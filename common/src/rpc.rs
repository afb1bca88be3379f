//! Transporte RPC: POST /rpc/<Método> con JSON sobre HTTP.
//!
//! Cada llamada tiene un deadline. Si vence con la llamada en vuelo se
//! devuelve `Timeout` y la llamada se abandona: el otro lado pudo haberla
//! ejecutado igual, así que quien llama la trata como "quizás ocurrió".

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::shutdown;

pub const RPC_PREFIX: &str = "/rpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    AssignId,
    GetTask,
    ReportDone,
    SignalFailure,
    RegisterMe,
    Heartbeat,
    Process,
    Map,
    Status,
    Nodes,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::AssignId => "AssignID",
            Method::GetTask => "GetTask",
            Method::ReportDone => "ReportDone",
            Method::SignalFailure => "SignalFailure",
            Method::RegisterMe => "RegisterMe",
            Method::Heartbeat => "Heartbeat",
            Method::Process => "Process",
            Method::Map => "Map",
            Method::Status => "Status",
            Method::Nodes => "Nodes",
        }
    }

    /// Ruta HTTP del método, ej: "/rpc/GetTask".
    pub fn path(&self) -> String {
        format!("{}/{}", RPC_PREFIX, self.name())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCode {
    /// No quedan tareas: el job terminó
    NoJobs,
    /// GetTask sin identidad asignada
    NoIdentity,
    UnknownTask,
    NoLiveNodes,
    NodeFailed,
    ExecutionFailed,
    /// El servidor se está apagando
    ShuttingDown,
    Internal,
}

/// Error estructurado que devuelve un handler remoto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: FaultCode,
    pub message: String,
}

impl RpcFault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("nodo inalcanzable {address}: {source}")]
    NodeUnreachable {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout de {deadline:?} en {method} contra {address}")]
    Timeout {
        address: String,
        method: Method,
        deadline: Duration,
    },

    #[error("{method} contra {address} cancelada por apagado")]
    Cancelled { address: String, method: Method },

    #[error("{method} en {address} falló: {fault}")]
    Fault {
        address: String,
        method: Method,
        fault: RpcFault,
    },

    #[error("respuesta inválida de {address}: {source}")]
    Protocol {
        address: String,
        #[source]
        source: reqwest::Error,
    },
}

impl RpcError {
    pub fn fault(
        address: impl Into<String>,
        method: Method,
        code: FaultCode,
        message: impl Into<String>,
    ) -> Self {
        RpcError::Fault {
            address: address.into(),
            method,
            fault: RpcFault::new(code, message),
        }
    }

    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            RpcError::Fault { fault, .. } => Some(fault.code),
            _ => None,
        }
    }

    /// Señal terminal y esperada: el job está completo.
    pub fn is_no_jobs(&self) -> bool {
        self.fault_code() == Some(FaultCode::NoJobs)
    }

    /// La llamada se abandonó porque se publicó el apagado.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled { .. })
    }

    /// Errores de transporte que pueden desaparecer reintentando.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::NodeUnreachable { .. } | RpcError::Timeout { .. }
        )
    }
}

/// Normaliza "host:port" o una URL a la base sin '/' final.
pub fn base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[derive(Clone, Default)]
pub struct RpcClient {
    http: Client,
}

impl RpcClient {
    pub fn new() -> Self {
        Self::from_http(Client::new())
    }

    pub fn from_http(http: Client) -> Self {
        Self { http }
    }

    /// Llamada síncrona request/reply acotada por `deadline`.
    pub async fn call<Req, Resp>(
        &self,
        address: &str,
        method: Method,
        request: &Req,
        deadline: Duration,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        match tokio::time::timeout(deadline, self.send(address, method, request)).await {
            Ok(res) => res,
            Err(_) => Err(RpcError::Timeout {
                address: address.to_string(),
                method,
                deadline,
            }),
        }
    }

    /// Igual que `call`, pero se aborta en cuanto se publica el apagado.
    pub async fn call_until<Req, Resp>(
        &self,
        address: &str,
        method: Method,
        request: &Req,
        deadline: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        shutdown::or_shutdown(shutdown, self.call(address, method, request, deadline))
            .await
            .unwrap_or_else(|| {
                Err(RpcError::Cancelled {
                    address: address.to_string(),
                    method,
                })
            })
    }

    async fn send<Req, Resp>(
        &self,
        address: &str,
        method: Method,
        request: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", base_url(address), method.path());
        debug!("rpc {} -> {}", method, url);

        let resp = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RpcError::NodeUnreachable {
                address: address.to_string(),
                source: e,
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<Resp>().await.map_err(|e| RpcError::Protocol {
                address: address.to_string(),
                source: e,
            });
        }

        let body = resp.bytes().await.unwrap_or_default();
        let fault = serde_json::from_slice::<RpcFault>(&body)
            .unwrap_or_else(|_| unstructured_fault(status, &body));

        Err(RpcError::Fault {
            address: address.to_string(),
            method,
            fault,
        })
    }
}

fn unstructured_fault(status: StatusCode, body: &[u8]) -> RpcFault {
    RpcFault::new(
        FaultCode::Internal,
        format!("HTTP {}: {}", status, String::from_utf8_lossy(body)),
    )
}
