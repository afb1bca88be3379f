//! Despacho push: el corpus se corta en un chunk contiguo por nodo vivo y se
//! manda a todos a la vez. El primer error cancela el resto.

use std::{ops::Range, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
};
use tracing::{info, warn};

use common::{shutdown, MapRequest, Method, ProcessReply, RpcError};

use crate::nodes::NodeRegistry;
use crate::transport::NodeTransport;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no hay nodos vivos")]
    NoLiveNodes,

    #[error("el nodo {address} falló: {source}")]
    Node {
        address: String,
        #[source]
        source: RpcError,
    },

    #[error("despacho cancelado por apagado")]
    Cancelled,

    #[error("llamada a nodo abortada: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// `nodes` rangos contiguos de `len / nodes` bytes. El resto (hasta
/// `nodes - 1` bytes) queda fuera.
pub fn chunk_ranges(len: usize, nodes: usize) -> Vec<Range<usize>> {
    if nodes == 0 {
        return Vec::new();
    }
    let size = len / nodes;
    (0..nodes).map(|i| i * size..(i + 1) * size).collect()
}

/// Id corto de job, ej: "3f9a0c1b".
pub fn new_job_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub struct Dispatcher<T> {
    nodes: Arc<NodeRegistry>,
    transport: Arc<T>,
    call_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<T: NodeTransport> Dispatcher<T> {
    pub fn new(
        nodes: Arc<NodeRegistry>,
        transport: Arc<T>,
        call_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            nodes,
            transport,
            call_timeout,
            shutdown,
        }
    }

    pub async fn process(&self, corpus: Vec<u8>) -> Result<ProcessReply, DispatchError> {
        // foto del conjunto vivo antes de empezar el fan-out
        let addrs = self.nodes.snapshot();
        if addrs.is_empty() {
            return Err(DispatchError::NoLiveNodes);
        }

        let job_id = new_job_id();
        let ranges = chunk_ranges(corpus.len(), addrs.len());
        let chunk_len = ranges.first().map(|r| r.len()).unwrap_or(0);
        let dropped_bytes = corpus.len() - chunk_len * addrs.len();

        info!(
            "job {}: {} bytes en {} chunks de {} ({} bytes sin asignar)",
            job_id,
            corpus.len(),
            addrs.len(),
            chunk_len,
            dropped_bytes
        );

        let limit = Arc::new(Semaphore::new(addrs.len()));
        let mut calls = JoinSet::new();

        for (addr, range) in addrs.iter().cloned().zip(ranges) {
            let permit = Arc::clone(&limit).acquire_owned().await;
            let transport = Arc::clone(&self.transport);
            let request = MapRequest {
                job_id: job_id.clone(),
                chunk: corpus[range].to_vec(),
            };
            let deadline = self.call_timeout;
            let mut shutdown_rx = self.shutdown.clone();

            calls.spawn(async move {
                let _permit = permit;
                let call = transport.map_chunk(&addr, request, deadline);
                let res = shutdown::or_shutdown(&mut shutdown_rx, call)
                    .await
                    .unwrap_or_else(|| {
                        Err(RpcError::Cancelled {
                            address: addr.clone(),
                            method: Method::Map,
                        })
                    });
                (addr, res)
            });
        }

        let mut outputs = Vec::with_capacity(addrs.len());
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((addr, Ok(reply))) => {
                    info!("job {}: nodo {} escribió {}", job_id, addr, reply.output);
                    outputs.push((addr, reply.output));
                }
                Ok((_, Err(e))) if e.is_cancelled() => {
                    info!("job {}: apagado, se abandonan los chunks en vuelo", job_id);
                    calls.abort_all();
                    return Err(DispatchError::Cancelled);
                }
                Ok((addr, Err(e))) => {
                    warn!("job {}: nodo {} falló, cancelando el resto: {}", job_id, addr, e);
                    calls.abort_all();
                    return Err(DispatchError::Node {
                        address: addr,
                        source: e,
                    });
                }
                Err(e) => {
                    calls.abort_all();
                    return Err(DispatchError::Join(e));
                }
            }
        }

        outputs.sort();
        Ok(ProcessReply {
            job_id,
            nodes: addrs.len(),
            chunk_len,
            dropped_bytes,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{HeartbeatReply, MapReply};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn ten_bytes_over_three_nodes_drops_one() {
        let ranges = chunk_ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..9]);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 9);
    }

    #[test]
    fn chunk_ranges_edge_cases() {
        assert!(chunk_ranges(10, 0).is_empty());
        assert_eq!(chunk_ranges(2, 3), vec![0..0, 0..0, 0..0]);
        assert_eq!(chunk_ranges(9, 3), vec![0..3, 3..6, 6..9]);
    }

    #[test]
    fn job_ids_are_short_and_distinct() {
        let a = new_job_id();
        let b = new_job_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    /// Transporte falso que anota los chunks recibidos.
    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<HashMap<String, Vec<u8>>>,
        failing: Option<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl NodeTransport for RecordingTransport {
        async fn heartbeat(&self, _a: &str, _d: Duration) -> Result<HeartbeatReply, RpcError> {
            Ok(HeartbeatReply::default())
        }

        async fn map_chunk(
            &self,
            address: &str,
            request: MapRequest,
            deadline: Duration,
        ) -> Result<MapReply, RpcError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.as_deref() == Some(address) {
                return Err(RpcError::Timeout {
                    address: address.to_string(),
                    method: Method::Map,
                    deadline,
                });
            }
            self.seen
                .lock()
                .unwrap()
                .insert(address.to_string(), request.chunk);
            Ok(MapReply {
                output: format!("mr-out-{}-x", request.job_id),
                keys: 1,
            })
        }
    }

    /// Receptor cuyo emisor ya no existe: el apagado nunca llega.
    fn idle_shutdown() -> watch::Receiver<bool> {
        shutdown::channel().1
    }

    fn nodes_with(addrs: &[&str]) -> Arc<NodeRegistry> {
        let nodes = Arc::new(NodeRegistry::new());
        for a in addrs {
            nodes.register_me(a, "h");
        }
        nodes
    }

    #[tokio::test]
    async fn process_sends_one_contiguous_chunk_per_node() {
        let nodes = nodes_with(&["a:1", "b:1", "c:1"]);
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(nodes, Arc::clone(&transport), Duration::from_secs(1), idle_shutdown());

        let reply = dispatcher.process(b"0123456789".to_vec()).await.unwrap();

        assert_eq!(reply.nodes, 3);
        assert_eq!(reply.chunk_len, 3);
        assert_eq!(reply.dropped_bytes, 1);
        assert_eq!(reply.outputs.len(), 3);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen["a:1"], b"012");
        assert_eq!(seen["b:1"], b"345");
        assert_eq!(seen["c:1"], b"678");
        // todas en paralelo, nunca más que la cantidad de nodos
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn first_node_failure_fails_the_whole_process() {
        let nodes = nodes_with(&["a:1", "b:1"]);
        let transport = Arc::new(RecordingTransport {
            failing: Some("b:1".to_string()),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(nodes, transport, Duration::from_secs(1), idle_shutdown());

        let err = dispatcher.process(b"abcd".to_vec()).await.unwrap_err();

        match err {
            DispatchError::Node { address, source } => {
                assert_eq!(address, "b:1");
                assert!(source.is_transient());
            }
            other => panic!("esperaba Node, obtuve {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_live_nodes_is_an_error() {
        let dispatcher = Dispatcher::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(RecordingTransport::default()),
            Duration::from_secs(1),
            idle_shutdown(),
        );
        assert!(matches!(
            dispatcher.process(b"abc".to_vec()).await,
            Err(DispatchError::NoLiveNodes)
        ));
    }

    #[tokio::test]
    async fn evicted_node_is_not_dispatched_to() {
        let nodes = nodes_with(&["a:1", "b:1"]);
        nodes.evict("a:1");
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(nodes, Arc::clone(&transport), Duration::from_secs(1), idle_shutdown());

        let reply = dispatcher.process(b"abcd".to_vec()).await.unwrap();

        assert_eq!(reply.nodes, 1);
        let seen = transport.seen.lock().unwrap();
        assert!(!seen.contains_key("a:1"));
        assert_eq!(seen["b:1"], b"abcd");
    }

    /// Nodo que acepta el chunk y nunca contesta.
    struct HangingTransport;

    impl NodeTransport for HangingTransport {
        async fn heartbeat(&self, _a: &str, _d: Duration) -> Result<HeartbeatReply, RpcError> {
            std::future::pending().await
        }

        async fn map_chunk(
            &self,
            _address: &str,
            _request: MapRequest,
            _deadline: Duration,
        ) -> Result<MapReply, RpcError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_abandons_in_flight_chunks() {
        let nodes = nodes_with(&["a:1", "b:1"]);
        let (tx, rx) = shutdown::channel();
        let dispatcher = Dispatcher::new(nodes, Arc::new(HangingTransport), Duration::from_secs(60), rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let res = tokio::time::timeout(Duration::from_secs(2), dispatcher.process(b"abcd".to_vec()))
            .await
            .expect("el apagado debió cortar el despacho");
        assert!(matches!(res, Err(DispatchError::Cancelled)), "{:?}", res);
    }
}
