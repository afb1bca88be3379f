use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use common::{
    engine::{self, TaskOutput},
    shutdown, MapReduceApp, ReportOutcome, TaskLease, WorkerId,
};

use crate::client::Coordinator;

/// Por qué terminó el loop pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// El master respondió NoJobs
    JobComplete,
    ErrorBudgetExhausted,
    Shutdown,
}

/// Resultado de ejecutar una tarea concedida.
#[derive(Debug)]
pub enum Execution {
    Completed(TaskOutput),
    Failed(String),
}

/// Loop principal del worker:
/// - espera al tick,
/// - pide tarea al master,
/// - ejecuta map -> reduce -> merge en un hilo de bloqueo,
/// - reporta Done o SignalFailure.
pub struct Executor<C> {
    worker_id: WorkerId,
    coordinator: C,
    app: Arc<dyn MapReduceApp>,
    output_dir: PathBuf,
    poll_interval: Duration,
    error_budget: u32,
}

impl<C: Coordinator> Executor<C> {
    pub fn new(
        worker_id: WorkerId,
        coordinator: C,
        app: Arc<dyn MapReduceApp>,
        output_dir: PathBuf,
        poll_interval: Duration,
        error_budget: u32,
    ) -> Self {
        Self {
            worker_id,
            coordinator,
            app,
            output_dir,
            poll_interval,
            error_budget,
        }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Termination {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Reintentos tolerados; el error siguiente al último corta el loop.
        // El presupuesto no se recarga con los éxitos.
        let mut budget = self.error_budget;

        info!(
            "worker {} ejecutando app {} (salida en {})",
            self.worker_id,
            self.app.name(),
            self.output_dir.display()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown_rx) => {
                    info!("worker {} apagándose", self.worker_id);
                    return Termination::Shutdown;
                }
                _ = ticker.tick() => {}
            }

            let request = self.coordinator.get_task(self.worker_id);
            let reply = match shutdown::or_shutdown(&mut shutdown_rx, request).await {
                Some(reply) => reply,
                None => {
                    info!("worker {} apagándose con GetTask en vuelo", self.worker_id);
                    return Termination::Shutdown;
                }
            };

            let lease = match reply {
                Ok(lease) => lease,
                Err(e) if e.is_no_jobs() => {
                    info!("no quedan tareas, worker {} termina", self.worker_id);
                    return Termination::JobComplete;
                }
                Err(e) if e.is_cancelled() => {
                    info!("worker {} apagándose", self.worker_id);
                    return Termination::Shutdown;
                }
                Err(e) => {
                    if budget == 0 {
                        error!("error pidiendo tarea, sin reintentos restantes: {}", e);
                        return Termination::ErrorBudgetExhausted;
                    }
                    budget -= 1;
                    if e.is_transient() {
                        warn!("master no disponible ({} reintentos restantes): {}", budget, e);
                    } else {
                        warn!("error pidiendo tarea ({} reintentos restantes): {}", budget, e);
                    }
                    continue;
                }
            };

            self.execute(lease).await;
        }
    }

    /// Ejecuta una tarea y reporta el resultado al master. Los errores al
    /// reportar sólo se loguean: el monitor de leases recupera la tarea.
    pub async fn execute(&self, lease: TaskLease) -> Execution {
        info!(
            "tengo tarea {} (gen {}) sobre {}, lease de {:?}",
            lease.task_id,
            lease.generation,
            lease.source,
            lease.lease_timeout()
        );

        let app = Arc::clone(&self.app);
        let output_dir = self.output_dir.clone();
        let worker_id = self.worker_id;
        let source = lease.source.clone();
        let stem = lease.stem();
        let n_reduce = lease.n_reduce;

        let handle = tokio::task::spawn_blocking(move || {
            let contents = engine::read_input(&source)?;
            engine::run_pipeline(
                app.as_ref(),
                &source,
                &contents,
                n_reduce,
                &output_dir,
                &stem,
                worker_id,
            )
        });

        let failure = match handle.await {
            Ok(Ok(output)) => {
                self.report_done(&lease, &output).await;
                return Execution::Completed(output);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("panic o join error: {}", e),
        };

        warn!("tarea {} falló: {}", lease.task_id, failure);
        match self.coordinator.signal_failure(&lease, &failure).await {
            Ok(ReportOutcome::Applied) => debug!("tarea {} devuelta al master", lease.task_id),
            Ok(outcome) => debug!("SignalFailure de {} ignorado: {:?}", lease.task_id, outcome),
            Err(e) => warn!("no se pudo señalar el fallo de {}: {}", lease.task_id, e),
        }
        Execution::Failed(failure)
    }

    async fn report_done(&self, lease: &TaskLease, output: &TaskOutput) {
        match &output.merged {
            Some(path) => info!(
                "terminé tarea {}: {} claves en {}",
                lease.task_id,
                output.keys,
                path.display()
            ),
            None => info!(
                "terminé tarea {} sin merge ({} parciales)",
                lease.task_id,
                output.partials.len()
            ),
        }

        match self.coordinator.report_done(self.worker_id, lease).await {
            Ok(ReportOutcome::Applied) => {}
            Ok(ReportOutcome::AlreadyDone) => {
                debug!("tarea {} ya estaba terminada", lease.task_id)
            }
            Ok(ReportOutcome::Stale) => warn!(
                "lease de la tarea {} (gen {}) ya no es nuestro",
                lease.task_id, lease.generation
            ),
            Err(e) => warn!("no se pudo reportar la tarea {}: {}", lease.task_id, e),
        }
    }
}
