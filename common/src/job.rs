use serde::{Deserialize, Serialize};

/// Envío push: el corpus se reparte entre los nodos vivos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub corpus: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReply {
    pub job_id: String,
    pub nodes: usize,
    pub chunk_len: usize,
    /// Bytes del final del corpus que no entraron en ningún chunk
    pub dropped_bytes: usize,
    /// (dirección del nodo, archivo final que escribió)
    pub outputs: Vec<(String, String)>,
}

/// Lo que el master le manda a cada nodo en un Process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRequest {
    pub job_id: String,
    pub chunk: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapReply {
    /// Archivo final (merge) escrito por el nodo
    pub output: String,
    pub keys: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    pub done: usize,
    pub finished: bool,
    /// Identidades emitidas hasta ahora
    pub workers: u64,
    pub live_nodes: usize,
}
