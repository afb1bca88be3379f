use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use common::{
    AssignIdReply, AssignIdRequest, Empty, FaultCode, GetTaskRequest, Method, NodeInfo,
    NodesRequest, ProcessReply, ProcessRequest, RegisterMeRequest, ReportAck, ReportDoneRequest,
    RpcFault, SignalFailureRequest, StatusReply, StatusRequest, TaskLease,
};

use crate::dispatch::DispatchError;
use crate::registry::RegistryError;
use crate::state::AppState;

/// El corpus de Process viaja como arreglo JSON; el límite por defecto (2MB) se queda corto.
const PROCESS_BODY_LIMIT: usize = 256 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&Method::AssignId.path(), post(assign_id))
        .route(&Method::GetTask.path(), post(get_task))
        .route(&Method::ReportDone.path(), post(report_done))
        .route(&Method::SignalFailure.path(), post(signal_failure))
        .route(&Method::RegisterMe.path(), post(register_me))
        .route(
            &Method::Process.path(),
            post(process).layer(DefaultBodyLimit::max(PROCESS_BODY_LIMIT)),
        )
        .route(&Method::Status.path(), post(status))
        .route(&Method::Nodes.path(), post(list_nodes))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/* ---------------- errores ---------------- */

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    fault: RpcFault,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.fault)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let (status, code) = match e {
            RegistryError::NoJobs => (StatusCode::GONE, FaultCode::NoJobs),
            RegistryError::NoIdentity => (StatusCode::PRECONDITION_FAILED, FaultCode::NoIdentity),
            RegistryError::UnknownTask(_) => (StatusCode::NOT_FOUND, FaultCode::UnknownTask),
        };
        ApiError {
            status,
            fault: RpcFault::new(code, e.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let (status, code) = match e {
            DispatchError::NoLiveNodes => (StatusCode::SERVICE_UNAVAILABLE, FaultCode::NoLiveNodes),
            DispatchError::Node { .. } => (StatusCode::BAD_GATEWAY, FaultCode::NodeFailed),
            DispatchError::Cancelled => {
                (StatusCode::SERVICE_UNAVAILABLE, FaultCode::ShuttingDown)
            }
            DispatchError::Join(_) => (StatusCode::INTERNAL_SERVER_ERROR, FaultCode::Internal),
        };
        ApiError {
            status,
            fault: RpcFault::new(code, e.to_string()),
        }
    }
}

/* ---------------- handlers RPC ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn assign_id(
    State(state): State<AppState>,
    Json(_req): Json<AssignIdRequest>,
) -> Json<AssignIdReply> {
    let id = state.identities.assign();
    info!("identidad {} asignada", id);
    Json(AssignIdReply { id })
}

async fn get_task(
    State(state): State<AppState>,
    Json(req): Json<GetTaskRequest>,
) -> Result<Json<TaskLease>, ApiError> {
    // un id que nunca emitimos cuenta como "sin identidad"
    let worker_id = req
        .worker_id
        .filter(|id| state.identities.is_issued(*id));

    match state.registry.take_task(worker_id) {
        Ok(lease) => Ok(Json(lease)),
        Err(RegistryError::NoJobs) => {
            info!("worker {:?} pidió tarea pero no hay en cola", req.worker_id);
            Err(RegistryError::NoJobs.into())
        }
        Err(e) => {
            warn!("GetTask rechazado para {:?}: {}", req.worker_id, e);
            Err(e.into())
        }
    }
}

async fn report_done(
    State(state): State<AppState>,
    Json(req): Json<ReportDoneRequest>,
) -> Result<Json<ReportAck>, ApiError> {
    let outcome = state.registry.mark_done(req.task_id, req.generation)?;
    info!(
        "worker {} reportó tarea {} (gen {}) terminada: {:?}",
        req.worker_id, req.task_id, req.generation, outcome
    );
    Ok(Json(ReportAck { outcome }))
}

async fn signal_failure(
    State(state): State<AppState>,
    Json(req): Json<SignalFailureRequest>,
) -> Result<Json<ReportAck>, ApiError> {
    warn!(
        "fallo en tarea {} ({}): {}",
        req.task_id, req.task_source, req.reason
    );
    let outcome = state.registry.report_failure(req.task_id, req.generation)?;
    Ok(Json(ReportAck { outcome }))
}

async fn register_me(
    State(state): State<AppState>,
    Json(req): Json<RegisterMeRequest>,
) -> Json<Empty> {
    state.nodes.register_me(&req.address, &req.hostname);
    Json(Empty {})
}

async fn process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessReply>, ApiError> {
    let reply = state.dispatcher.process(req.corpus).await?;
    Ok(Json(reply))
}

async fn status(
    State(state): State<AppState>,
    Json(_req): Json<StatusRequest>,
) -> Json<StatusReply> {
    let counts = state.registry.counts();
    Json(StatusReply {
        total: counts.total,
        idle: counts.idle,
        leased: counts.leased,
        done: counts.done,
        finished: state.registry.is_finished(),
        workers: state.identities.issued(),
        live_nodes: state.nodes.len(),
    })
}

async fn list_nodes(
    State(state): State<AppState>,
    Json(_req): Json<NodesRequest>,
) -> Json<Vec<NodeInfo>> {
    Json(state.nodes.list())
}
