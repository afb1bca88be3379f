// master/src/nodes.rs

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{info, warn};

use common::{HeartbeatReply, NodeInfo, WorkerId};

#[derive(Debug, Clone)]
pub struct WorkerNode {
    pub address: String,
    pub hostname: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Instant,
    pub worker_id: Option<WorkerId>,

    // Métricas del último heartbeat
    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

/// Conjunto de nodos vivos, indexado por dirección.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, WorkerNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkerNode>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Alta idempotente. Devuelve true si el nodo es nuevo.
    pub fn register_me(&self, address: &str, hostname: &str) -> bool {
        let mut nodes = self.lock();
        if let Some(node) = nodes.get_mut(address) {
            node.last_seen_at = Instant::now();
            return false;
        }

        info!("agregando nodo {} ({})", address, hostname);
        nodes.insert(
            address.to_string(),
            WorkerNode {
                address: address.to_string(),
                hostname: hostname.to_string(),
                registered_at: Utc::now(),
                last_seen_at: Instant::now(),
                worker_id: None,
                last_cpu_percent: None,
                last_mem_bytes: None,
            },
        );
        true
    }

    /// Foto estable (ordenada) de las direcciones vivas.
    pub fn snapshot(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.lock().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn record_heartbeat(&self, address: &str, reply: &HeartbeatReply) {
        let mut nodes = self.lock();
        if let Some(node) = nodes.get_mut(address) {
            node.last_seen_at = Instant::now();
            node.worker_id = reply.worker_id.or(node.worker_id);
            node.last_cpu_percent = Some(reply.cpu_percent);
            node.last_mem_bytes = Some(reply.mem_bytes);
        }
    }

    /// Baja del conjunto vivo. Devuelve true si estaba.
    pub fn evict(&self, address: &str) -> bool {
        let removed = self.lock().remove(address).is_some();
        if removed {
            warn!("nodo {} eliminado del conjunto vivo", address);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn list(&self) -> Vec<NodeInfo> {
        let nodes = self.lock();
        let mut out: Vec<NodeInfo> = nodes
            .values()
            .map(|n| NodeInfo {
                address: n.address.clone(),
                hostname: n.hostname.clone(),
                worker_id: n.worker_id,
                registered_at: n.registered_at,
                last_seen_secs_ago: n.last_seen_at.elapsed().as_secs(),
                last_cpu_percent: n.last_cpu_percent,
                last_mem_bytes: n.last_mem_bytes,
            })
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }
}
