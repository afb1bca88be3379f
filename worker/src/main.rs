mod client;
mod config;
mod node;
mod worker;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{app, shutdown, MapReduceApp, WorkerId};

use crate::client::CoordinatorClient;
use crate::config::WorkerConfig;
use crate::node::NodeState;
use crate::worker::{Executor, Termination};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let config = WorkerConfig::from_env();
    let app = app::lookup(&config.app).ok_or_else(|| {
        anyhow!(
            "app desconocida {:?} (disponibles: {})",
            config.app,
            app::AVAILABLE_APPS.join(", ")
        )
    })?;
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("no se pudo crear {}", config.output_dir.display())
    })?;

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c recibido, apagando");
            let _ = shutdown_tx.send(true);
        }
    });

    let coordinator =
        CoordinatorClient::new(&config.master_url, config.rpc_timeout, shutdown_rx.clone())?;

    // 1) Pedir identidad al master
    let worker_id = coordinator
        .assign_id()
        .await
        .with_context(|| format!("no se pudo obtener id del master en {}", config.master_url))?;
    info!("worker registrado con id = {} contra {}", worker_id, config.master_url);

    // 2) Opcional: atender como nodo para los envíos push
    let node = match &config.node_addr {
        Some(addr) => Some(
            start_node(
                &config,
                addr,
                worker_id,
                Arc::clone(&app),
                &coordinator,
                shutdown_rx.clone(),
            )
            .await?,
        ),
        None => None,
    };

    // 3) Loop pull
    let executor = Executor::new(
        worker_id,
        coordinator,
        app,
        config.output_dir.clone(),
        config.poll_interval,
        config.error_budget,
    );
    let termination = executor.run(shutdown_rx).await;
    info!("loop pull terminado: {:?}", termination);

    if let Some(handle) = node {
        if termination != Termination::Shutdown {
            info!("el nodo sigue atendiendo hasta ctrl-c");
        }
        handle.await.context("el servidor del nodo terminó con panic")??;
    }

    if termination == Termination::ErrorBudgetExhausted {
        bail!("worker {} abandonó tras agotar su presupuesto de errores", worker_id);
    }
    Ok(())
}

/// Levanta el servidor del nodo y se anuncia al master con RegisterMe.
async fn start_node(
    config: &WorkerConfig,
    addr: &str,
    worker_id: WorkerId,
    app: Arc<dyn MapReduceApp>,
    coordinator: &CoordinatorClient,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<JoinHandle<Result<()>>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", addr))?;
    let local = listener.local_addr()?;
    info!("nodo escuchando en {}", local);

    let router = node::build_router(NodeState::new(
        worker_id,
        app,
        config.output_dir.clone(),
        config.node_n_reduce,
    ));
    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown::signalled(&mut shutdown_rx).await })
            .await
            .context("el servidor del nodo terminó con error")
    });

    // Nombre de host (solo para info)
    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let advertise = config
        .advertise_addr
        .clone()
        .unwrap_or_else(|| local.to_string());

    coordinator
        .register_me(&advertise, &hostname)
        .await
        .with_context(|| format!("RegisterMe de {} falló", advertise))?;
    info!("nodo {} anunciado al master", advertise);

    Ok(handle)
}
