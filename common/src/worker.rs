use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identidad de worker emitida por el master (AssignID). Nunca se reutiliza.
pub type WorkerId = u64;

/// Cuerpo vacío para métodos sin argumentos ni respuesta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignIdRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignIdReply {
    pub id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMeRequest {
    /// Dirección en la que el nodo atiende Heartbeat y Map
    pub address: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub worker_id: Option<WorkerId>,
    pub cpu_percent: f32,
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesRequest {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeInfo {
    pub address: String,
    pub hostname: String,
    pub worker_id: Option<WorkerId>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_secs_ago: u64,
    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}
