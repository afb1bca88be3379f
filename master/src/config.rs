use std::time::Duration;

use anyhow::{Context, Result};
use glob::glob;
use tracing::warn;

use common::config::{env_millis, env_opt, env_or};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_N_REDUCE: u32 = 10;
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LEASE_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_HEARTBEAT_TICK: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen_addr: String,
    /// Patrones glob separados por coma (MR_INPUTS)
    pub input_patterns: Vec<String>,
    pub n_reduce: u32,
    pub lease_timeout: Duration,
    pub lease_tick: Duration,
    pub heartbeat_tick: Duration,
    pub heartbeat_timeout: Duration,
    pub map_timeout: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            input_patterns: Vec::new(),
            n_reduce: DEFAULT_N_REDUCE,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            lease_tick: DEFAULT_LEASE_TICK,
            heartbeat_tick: DEFAULT_HEARTBEAT_TICK,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            map_timeout: DEFAULT_MAP_TIMEOUT,
        }
    }
}

impl MasterConfig {
    pub fn from_env() -> Self {
        let input_patterns = env_opt("MR_INPUTS")
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            listen_addr: env_opt("MR_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            input_patterns,
            n_reduce: env_or("MR_N_REDUCE", DEFAULT_N_REDUCE).max(1),
            lease_timeout: env_millis("MR_LEASE_TIMEOUT_MS", DEFAULT_LEASE_TIMEOUT),
            lease_tick: env_millis("MR_LEASE_TICK_MS", DEFAULT_LEASE_TICK),
            heartbeat_tick: env_millis("MR_HEARTBEAT_TICK_MS", DEFAULT_HEARTBEAT_TICK),
            heartbeat_timeout: env_millis("MR_HEARTBEAT_TIMEOUT_MS", DEFAULT_HEARTBEAT_TIMEOUT),
            map_timeout: env_millis("MR_MAP_TIMEOUT_MS", DEFAULT_MAP_TIMEOUT),
        }
    }

    /// Expande los globs a archivos, sin duplicados y en orden.
    pub fn resolve_inputs(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();

        for pattern in &self.input_patterns {
            let entries =
                glob(pattern).with_context(|| format!("patrón de entrada inválido: {}", pattern))?;
            let mut matched = 0;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => {
                        files.push(path.to_string_lossy().to_string());
                        matched += 1;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("no se pudo leer {}: {}", e.path().display(), e),
                }
            }
            if matched == 0 {
                warn!("el patrón {} no encontró archivos", pattern);
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }
}
