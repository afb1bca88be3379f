use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sysinfo::{CpuExt, System, SystemExt};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use common::{
    engine, FaultCode, HeartbeatReply, HeartbeatRequest, MapReduceApp, MapReply, MapRequest,
    Method, RpcFault, WorkerId,
};

/// Un chunk viaja como arreglo JSON de bytes.
const MAP_BODY_LIMIT: usize = 256 * 1024 * 1024;

/// Estado del nodo: lo que el master le empuja por Map se procesa con la
/// misma app y el mismo directorio de salida que el loop pull.
#[derive(Clone)]
pub struct NodeState {
    worker_id: WorkerId,
    app: Arc<dyn MapReduceApp>,
    output_dir: PathBuf,
    n_reduce: u32,
    // System para leer CPU y memoria
    sys: Arc<Mutex<System>>,
}

impl NodeState {
    pub fn new(
        worker_id: WorkerId,
        app: Arc<dyn MapReduceApp>,
        output_dir: PathBuf,
        n_reduce: u32,
    ) -> Self {
        Self {
            worker_id,
            app,
            output_dir,
            n_reduce,
            sys: Arc::new(Mutex::new(System::new())),
        }
    }

    fn sample(&self) -> (f32, u64) {
        let mut sys = self.sys.lock().unwrap_or_else(|p| p.into_inner());
        sys.refresh_cpu();
        sys.refresh_memory();
        // used_memory devuelve KB -> lo pasamos a bytes
        (sys.global_cpu_info().cpu_usage(), sys.used_memory() * 1024)
    }
}

pub fn build_router(state: NodeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&Method::Heartbeat.path(), post(heartbeat))
        .route(
            &Method::Map.path(),
            post(map_chunk).layer(DefaultBodyLimit::max(MAP_BODY_LIMIT)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct NodeError(RpcFault);

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self.0)).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn heartbeat(
    State(state): State<NodeState>,
    Json(_): Json<HeartbeatRequest>,
) -> Json<HeartbeatReply> {
    let (cpu_percent, mem_bytes) = state.sample();
    Json(HeartbeatReply {
        worker_id: Some(state.worker_id),
        cpu_percent,
        mem_bytes,
    })
}

/// Corre map -> reduce -> merge sobre un chunk empujado por el master.
async fn map_chunk(
    State(state): State<NodeState>,
    Json(req): Json<MapRequest>,
) -> Result<Json<MapReply>, NodeError> {
    info!(
        "chunk de {} bytes para el job {}",
        req.chunk.len(),
        req.job_id
    );

    let job_id = req.job_id.clone();
    let app = Arc::clone(&state.app);
    let output_dir = state.output_dir.clone();
    let n_reduce = state.n_reduce;
    let worker_id = state.worker_id;

    let res = tokio::task::spawn_blocking(move || {
        // los cortes de chunk pueden partir un carácter multibyte
        let contents = String::from_utf8_lossy(&req.chunk);
        engine::run_pipeline(
            app.as_ref(),
            &req.job_id,
            &contents,
            n_reduce,
            &output_dir,
            &req.job_id,
            worker_id,
        )
    })
    .await;

    let output = match res {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("job {} falló en este nodo: {}", job_id, e);
            return Err(NodeError(RpcFault::new(FaultCode::ExecutionFailed, e.to_string())));
        }
        Err(e) => {
            warn!("panic o join error en el job {}: {}", job_id, e);
            return Err(NodeError(RpcFault::new(FaultCode::ExecutionFailed, e.to_string())));
        }
    };

    let written = output.merged.as_ref().or(output.partials.first());
    Ok(Json(MapReply {
        output: written.map(|p| p.display().to_string()).unwrap_or_default(),
        keys: output.keys,
    }))
}
