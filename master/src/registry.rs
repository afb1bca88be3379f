//! Registro de tareas: cola de splits sin asignar + leases en vuelo.
//!
//! Todo el estado vive detrás de un único Mutex; cada transición
//! (take / done / failure / expire) es una sola sección crítica.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{Generation, ReportOutcome, TaskId, TaskLease, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Leased {
        worker_id: WorkerId,
        deadline: Instant,
    },
    Done,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub source: String,
    pub n_reduce: u32,
    pub state: TaskState,
    /// Generación del último lease emitido (0 = nunca se entregó)
    pub generation: Generation,
    /// Cuántas veces se entregó
    pub attempts: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no quedan tareas")]
    NoJobs,
    #[error("el worker no tiene identidad asignada")]
    NoIdentity,
    #[error("tarea desconocida {0}")]
    UnknownTask(TaskId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    pub done: usize,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    // ids en estado Idle, en orden de llegada
    idle: VecDeque<TaskId>,
    next_id: TaskId,
}

pub struct TaskRegistry {
    inner: Mutex<Inner>,
    lease_timeout: Duration,
}

impl TaskRegistry {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
            lease_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // ninguna transición deja el estado a medias, así que un lock
        // envenenado sigue siendo utilizable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Encola una tarea Idle por cada fuente. Devuelve los ids creados.
    pub fn submit<I>(&self, sources: I, n_reduce: u32) -> Vec<TaskId>
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.lock();
        let mut ids = Vec::new();

        for source in sources {
            let id = inner.next_id;
            inner.next_id += 1;

            info!("tarea {} creada para {}", id, source);
            inner.tasks.insert(
                id,
                Task {
                    id,
                    source,
                    n_reduce: n_reduce.max(1),
                    state: TaskState::Idle,
                    generation: 0,
                    attempts: 0,
                },
            );
            inner.idle.push_back(id);
            ids.push(id);
        }
        ids
    }

    pub fn take_task(&self, worker_id: Option<WorkerId>) -> Result<TaskLease, RegistryError> {
        self.take_task_at(worker_id, Instant::now())
    }

    /// Saca la primera tarea Idle y la deja Leased hasta `now + lease_timeout`.
    pub fn take_task_at(
        &self,
        worker_id: Option<WorkerId>,
        now: Instant,
    ) -> Result<TaskLease, RegistryError> {
        let worker_id = worker_id.ok_or(RegistryError::NoIdentity)?;
        let lease_timeout = self.lease_timeout;

        let mut inner = self.lock();
        let id = inner.idle.pop_front().ok_or(RegistryError::NoJobs)?;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTask(id))?;

        task.generation += 1;
        task.attempts += 1;
        task.state = TaskState::Leased {
            worker_id,
            deadline: now + lease_timeout,
        };

        info!(
            "asignando tarea {} ({}) al worker {} (gen={}, intento={})",
            task.id, task.source, worker_id, task.generation, task.attempts
        );

        Ok(TaskLease {
            task_id: task.id,
            generation: task.generation,
            source: task.source.clone(),
            lease_timeout_ms: lease_timeout.as_millis() as u64,
            n_reduce: task.n_reduce,
        })
    }

    /// Leased -> Done. Idempotente; un reporte de otra generación se ignora.
    pub fn mark_done(
        &self,
        task_id: TaskId,
        generation: Generation,
    ) -> Result<ReportOutcome, RegistryError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(RegistryError::UnknownTask(task_id))?;

        if task.state == TaskState::Done {
            debug!("tarea {} ya estaba terminada", task_id);
            return Ok(ReportOutcome::AlreadyDone);
        }
        if task.generation != generation {
            warn!(
                "reporte done viejo para tarea {} (gen {} != {}), ignorado",
                task_id, generation, task.generation
            );
            return Ok(ReportOutcome::Stale);
        }

        // si el lease ya venció pero nadie la volvió a tomar, el trabajo vale igual
        if task.state == TaskState::Idle {
            inner.idle.retain(|id| *id != task_id);
        }
        task.state = TaskState::Done;
        info!("tarea {} ({}) terminada", task_id, task.source);
        Ok(ReportOutcome::Applied)
    }

    /// Leased -> Idle inmediato: el worker devuelve la tarea.
    pub fn report_failure(
        &self,
        task_id: TaskId,
        generation: Generation,
    ) -> Result<ReportOutcome, RegistryError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(RegistryError::UnknownTask(task_id))?;

        match task.state {
            TaskState::Done => Ok(ReportOutcome::AlreadyDone),
            TaskState::Leased { worker_id, .. } if task.generation == generation => {
                task.state = TaskState::Idle;
                inner.idle.push_back(task_id);
                warn!(
                    "worker {} devolvió la tarea {} ({}), re-encolada",
                    worker_id, task_id, task.source
                );
                Ok(ReportOutcome::Applied)
            }
            _ => {
                debug!(
                    "reporte de fallo ignorado para tarea {} (gen {} vs {})",
                    task_id, generation, task.generation
                );
                Ok(ReportOutcome::Stale)
            }
        }
    }

    /// Vuelve a Idle todo lease vencido. Devuelve (id, fuente) de los expirados.
    pub fn expire_leases(&self, now: Instant) -> Vec<(TaskId, String)> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let mut expired = Vec::new();

        for task in inner.tasks.values_mut() {
            if let TaskState::Leased { deadline, .. } = task.state {
                if deadline <= now {
                    task.state = TaskState::Idle;
                    expired.push((task.id, task.source.clone()));
                }
            }
        }

        // orden estable para la cola
        expired.sort_by_key(|(id, _)| *id);
        inner.idle.extend(expired.iter().map(|(id, _)| *id));
        expired
    }

    pub fn counts(&self) -> TaskCounts {
        let inner = self.lock();
        let mut counts = TaskCounts {
            total: inner.tasks.len(),
            ..Default::default()
        };
        for task in inner.tasks.values() {
            match task.state {
                TaskState::Idle => counts.idle += 1,
                TaskState::Leased { .. } => counts.leased += 1,
                TaskState::Done => counts.done += 1,
            }
        }
        counts
    }

    /// Todas las tareas en Done.
    pub fn is_finished(&self) -> bool {
        let inner = self.lock();
        inner.tasks.values().all(|t| t.state == TaskState::Done)
    }

    #[cfg(test)]
    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&task_id).cloned()
    }
}
