use std::{path::PathBuf, time::Duration};

use common::config::{env_millis, env_opt, env_or};

pub const DEFAULT_MASTER_URL: &str = "http://localhost:8080";
pub const DEFAULT_APP: &str = "wc";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ERROR_BUDGET: u32 = 5;
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_NODE_N_REDUCE: u32 = 2;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_url: String,
    pub app: String,
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub error_budget: u32,
    pub rpc_timeout: Duration,
    /// Si está definida, el worker también atiende como nodo (Heartbeat + Map)
    pub node_addr: Option<String>,
    /// Dirección que se anuncia al master en RegisterMe
    pub advertise_addr: Option<String>,
    pub node_n_reduce: u32,
}

impl WorkerConfig {
    /// - En Docker usaremos: MASTER_BASE_URL=http://master:8080
    /// - Si no está definida, usa http://localhost:8080 (pruebas locales)
    pub fn from_env() -> Self {
        let node_addr = env_opt("MR_NODE_ADDR");
        let advertise_addr = env_opt("MR_ADVERTISE_ADDR").or_else(|| node_addr.clone());

        Self {
            master_url: env_opt("MASTER_BASE_URL").unwrap_or_else(|| DEFAULT_MASTER_URL.to_string()),
            app: env_opt("MR_APP").unwrap_or_else(|| DEFAULT_APP.to_string()),
            output_dir: PathBuf::from(env_opt("MR_OUTPUT_DIR").unwrap_or_else(|| ".".to_string())),
            poll_interval: env_millis("MR_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL),
            error_budget: env_or("MR_ERROR_BUDGET", DEFAULT_ERROR_BUDGET),
            rpc_timeout: env_millis("MR_RPC_TIMEOUT_MS", DEFAULT_RPC_TIMEOUT),
            node_addr,
            advertise_addr,
            node_n_reduce: env_or("MR_NODE_N_REDUCE", DEFAULT_NODE_N_REDUCE).max(1),
        }
    }
}
