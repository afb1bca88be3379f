use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant, time::MissedTickBehavior};
use tracing::{info, warn};

use common::shutdown;

use crate::registry::TaskRegistry;

/// Monitor de leases: en cada tick devuelve a Idle las tareas cuyo lease
/// venció, sin esperar noticias del worker que la tenía.
pub async fn run_lease_monitor(
    registry: Arc<TaskRegistry>,
    tick: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown::signalled(&mut shutdown_rx) => {
                info!("monitor de leases detenido");
                return;
            }
        }

        for (task_id, source) in registry.expire_leases(Instant::now()) {
            warn!(
                "lease vencido: re-encolando tarea {} ({})",
                task_id, source
            );
        }
    }
}
