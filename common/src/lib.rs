pub mod app;
pub mod config;
pub mod engine;
pub mod indexer;
pub mod job;
pub mod rpc;
pub mod shutdown;
pub mod task;
pub mod wordcount;
pub mod worker;

pub use app::{AppError, FnApp, KeyValue, MapReduceApp};
pub use job::{
    MapReply, MapRequest, ProcessReply, ProcessRequest, StatusReply, StatusRequest,
};
pub use rpc::{FaultCode, Method, RpcClient, RpcError, RpcFault};
pub use task::{
    Generation, GetTaskRequest, ReportAck, ReportDoneRequest, ReportOutcome,
    SignalFailureRequest, TaskId, TaskLease,
};
pub use worker::{
    AssignIdReply, AssignIdRequest, Empty, HeartbeatReply, HeartbeatRequest, NodeInfo,
    NodesRequest, RegisterMeRequest, WorkerId,
};
