mod config;
mod dispatch;
mod handlers;
mod heartbeat;
mod monitor;
mod nodes;
mod registry;
mod state;
mod transport;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{shutdown, RpcClient};

use crate::config::MasterConfig;
use crate::state::AppState;

/// Espera entre "todas las tareas Done" y el apagado.
const FINISH_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info,axum=info")),
        )
        .init();

    let config = MasterConfig::from_env();
    let inputs = config.resolve_inputs()?;

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let shutdown_tx = Arc::new(shutdown_tx);
    let state = AppState::new(&config, shutdown_rx.clone());

    let pull_job = !inputs.is_empty();
    if pull_job {
        info!("procesando {} archivos de entrada", inputs.len());
        state.registry.submit(inputs, config.n_reduce);
    } else {
        info!("sin archivos de entrada: sólo despacho push");
    }

    // monitor de leases en segundo plano
    tokio::spawn(monitor::run_lease_monitor(
        Arc::clone(&state.registry),
        config.lease_tick,
        shutdown_rx.clone(),
    ));

    // heartbeat de nodos en segundo plano
    tokio::spawn(heartbeat::run_heartbeat_loop(
        Arc::clone(&state.nodes),
        Arc::new(RpcClient::new()),
        config.heartbeat_tick,
        config.heartbeat_timeout,
        shutdown_rx.clone(),
    ));

    if pull_job {
        tokio::spawn(stop_when_finished(
            state.clone(),
            Arc::clone(&shutdown_tx),
            shutdown_rx.clone(),
        ));
    }

    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("ctrl-c recibido, apagando");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let app = handlers::build_router(state.clone());
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.listen_addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown::signalled(&mut server_shutdown).await })
        .await
        .context("el servidor RPC terminó con error")?;

    let counts = state.registry.counts();
    info!(
        "master detenido: {}/{} tareas terminadas",
        counts.done, counts.total
    );
    Ok(())
}

/// Con un job pull, apaga el master cuando todas las tareas están Done.
async fn stop_when_finished(
    state: AppState,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown::signalled(&mut shutdown_rx) => return,
        }
        if state.registry.is_finished() {
            info!("todas las tareas terminadas");
            tokio::time::sleep(FINISH_GRACE).await;
            let _ = shutdown_tx.send(true);
            return;
        }
    }
}
