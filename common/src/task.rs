use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::worker::WorkerId;

pub type TaskId = u64;

/// Generación del lease: se incrementa cada vez que la tarea se entrega.
pub type Generation = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskRequest {
    pub worker_id: Option<WorkerId>,
}

/// Lo que recibe un worker al tomar una tarea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLease {
    pub task_id: TaskId,
    pub generation: Generation,
    /// Ruta del archivo de entrada
    pub source: String,
    pub lease_timeout_ms: u64,
    pub n_reduce: u32,
}

impl TaskLease {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    /// Nombre del archivo de entrada hasta el primer '.', ej: "in/pg-1.txt" -> "pg-1".
    pub fn stem(&self) -> String {
        source_stem(&self.source)
    }
}

pub fn source_stem(source: &str) -> String {
    let name = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string());

    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDoneRequest {
    pub task_id: TaskId,
    pub generation: Generation,
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalFailureRequest {
    pub task_id: TaskId,
    pub generation: Generation,
    pub task_source: String,
    pub reason: String,
}

/// Resultado de un reporte (done o failure) sobre una tarea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportOutcome {
    /// La transición se aplicó
    Applied,
    /// La tarea ya estaba terminada; el reporte es un duplicado
    AlreadyDone,
    /// La generación no coincide (o no había nada que hacer); se ignora
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAck {
    pub outcome: ReportOutcome,
}
