// master/src/state.rs

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::watch;

use common::{RpcClient, WorkerId};

use crate::config::MasterConfig;
use crate::dispatch::Dispatcher;
use crate::nodes::NodeRegistry;
use crate::registry::TaskRegistry;

#[derive(Clone)]
pub struct AppState {
    // tareas del job pull (leases)
    pub registry: Arc<TaskRegistry>,
    // nodos registrados para despacho push
    pub nodes: Arc<NodeRegistry>,
    pub identities: Arc<IdentityIssuer>,
    pub dispatcher: Arc<Dispatcher<RpcClient>>,
}

impl AppState {
    /// `shutdown` corta los despachos push en vuelo al apagar.
    pub fn new(config: &MasterConfig, shutdown: watch::Receiver<bool>) -> Self {
        let nodes = Arc::new(NodeRegistry::new());
        let client = Arc::new(RpcClient::new());

        Self {
            registry: Arc::new(TaskRegistry::new(config.lease_timeout)),
            dispatcher: Arc::new(Dispatcher::new(
                Arc::clone(&nodes),
                client,
                config.map_timeout,
                shutdown,
            )),
            nodes,
            identities: Arc::new(IdentityIssuer::new()),
        }
    }
}

/// Emite ids de worker crecientes a partir de 1; nunca se reutilizan.
#[derive(Debug)]
pub struct IdentityIssuer {
    next: AtomicU64,
}

impl IdentityIssuer {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn assign(&self) -> WorkerId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn is_issued(&self, id: WorkerId) -> bool {
        id >= 1 && id < self.next.load(Ordering::SeqCst)
    }

    /// Cuántas identidades se emitieron.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }
}

impl Default for IdentityIssuer {
    fn default() -> Self {
        Self::new()
    }
}
