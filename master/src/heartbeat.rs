use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinSet, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use common::{shutdown, Method, RpcError};

use crate::nodes::NodeRegistry;
use crate::transport::NodeTransport;

/// Loop de liveness:
/// - cada `tick` prueba todos los nodos registrados en paralelo
/// - el que falla el heartbeat sale del conjunto vivo
/// - no avanza al siguiente tick hasta que terminaron todas las pruebas
pub async fn run_heartbeat_loop<T: NodeTransport>(
    nodes: Arc<NodeRegistry>,
    transport: Arc<T>,
    tick: Duration,
    probe_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown::signalled(&mut shutdown_rx) => {
                info!("heartbeat detenido");
                return;
            }
        }

        let evicted = probe_once(&nodes, &transport, probe_timeout, &shutdown_rx).await;
        if !evicted.is_empty() {
            warn!("heartbeat: {} nodo(s) caídos: {:?}", evicted.len(), evicted);
        }
    }
}

/// Una pasada: prueba cada dirección y desaloja las que fallan.
/// Devuelve las direcciones desalojadas. Una sonda cortada por el apagado
/// no desaloja a nadie.
pub async fn probe_once<T: NodeTransport>(
    nodes: &Arc<NodeRegistry>,
    transport: &Arc<T>,
    probe_timeout: Duration,
    shutdown_rx: &watch::Receiver<bool>,
) -> Vec<String> {
    let addrs = nodes.snapshot();
    if addrs.is_empty() {
        return Vec::new();
    }

    let mut probes = JoinSet::new();
    for addr in addrs {
        let transport = Arc::clone(transport);
        let mut shutdown_rx = shutdown_rx.clone();
        probes.spawn(async move {
            let probe = transport.heartbeat(&addr, probe_timeout);
            let res = shutdown::or_shutdown(&mut shutdown_rx, probe)
                .await
                .unwrap_or_else(|| {
                    Err(RpcError::Cancelled {
                        address: addr.clone(),
                        method: Method::Heartbeat,
                    })
                });
            (addr, res)
        });
    }

    let mut evicted = Vec::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((addr, Ok(reply))) => {
                debug!("heartbeat ok de {}", addr);
                nodes.record_heartbeat(&addr, &reply);
            }
            Ok((addr, Err(e))) if e.is_cancelled() => {
                debug!("heartbeat a {} abandonado por apagado", addr);
            }
            Ok((addr, Err(e))) => {
                warn!("no se pudo alcanzar el nodo {}: {}", addr, e);
                if nodes.evict(&addr) {
                    evicted.push(addr);
                }
            }
            Err(e) => warn!("sonda de heartbeat abortada: {}", e),
        }
    }

    evicted.sort();
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{HeartbeatReply, MapReply, MapRequest};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Transporte falso: las direcciones en `down` fallan con timeout y
    /// las de `hung` nunca contestan.
    #[derive(Default)]
    struct FakeTransport {
        down: Mutex<HashSet<String>>,
        hung: Mutex<HashSet<String>>,
    }

    impl FakeTransport {
        fn take_down(&self, addr: &str) {
            self.down.lock().unwrap().insert(addr.to_string());
        }
    }

    impl NodeTransport for FakeTransport {
        async fn heartbeat(
            &self,
            address: &str,
            deadline: Duration,
        ) -> Result<HeartbeatReply, RpcError> {
            let hung = self.hung.lock().unwrap().contains(address);
            if hung {
                std::future::pending::<()>().await;
            }
            if self.down.lock().unwrap().contains(address) {
                return Err(RpcError::Timeout {
                    address: address.to_string(),
                    method: Method::Heartbeat,
                    deadline,
                });
            }
            Ok(HeartbeatReply {
                worker_id: Some(1),
                cpu_percent: 1.0,
                mem_bytes: 1,
            })
        }

        async fn map_chunk(
            &self,
            _address: &str,
            _request: MapRequest,
            _deadline: Duration,
        ) -> Result<MapReply, RpcError> {
            unreachable!("no se usa en heartbeat")
        }
    }

    #[tokio::test]
    async fn failed_probe_evicts_before_next_snapshot() {
        let nodes = Arc::new(NodeRegistry::new());
        nodes.register_me("a:1", "a");
        nodes.register_me("b:1", "b");
        nodes.register_me("c:1", "c");

        let transport = Arc::new(FakeTransport::default());
        transport.take_down("b:1");

        let (_tx, rx) = shutdown::channel();
        let evicted = probe_once(&nodes, &transport, Duration::from_secs(5), &rx).await;

        assert_eq!(evicted, vec!["b:1"]);
        assert_eq!(nodes.snapshot(), vec!["a:1", "c:1"]);
        // los vivos quedan con métricas
        assert!(nodes.list().iter().all(|n| n.last_cpu_percent == Some(1.0)));
    }

    #[tokio::test]
    async fn probe_on_empty_registry_is_noop() {
        let nodes = Arc::new(NodeRegistry::new());
        let transport = Arc::new(FakeTransport::default());
        let (_tx, rx) = shutdown::channel();
        assert!(probe_once(&nodes, &transport, Duration::from_secs(1), &rx)
            .await
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_pruning_until_shutdown() {
        let nodes = Arc::new(NodeRegistry::new());
        nodes.register_me("a:1", "a");
        nodes.register_me("b:1", "b");
        let transport = Arc::new(FakeTransport::default());
        let (tx, rx) = shutdown::channel();

        let handle = tokio::spawn(run_heartbeat_loop(
            Arc::clone(&nodes),
            Arc::clone(&transport),
            Duration::from_secs(5),
            Duration::from_secs(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(nodes.len(), 2);

        transport.take_down("a:1");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(nodes.snapshot(), vec!["b:1"]);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cuts_probes_without_evicting() {
        let nodes = Arc::new(NodeRegistry::new());
        nodes.register_me("a:1", "a");
        nodes.register_me("b:1", "b");

        let transport = Arc::new(FakeTransport::default());
        transport.hung.lock().unwrap().insert("a:1".to_string());

        let (tx, rx) = shutdown::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let evicted = tokio::time::timeout(
            Duration::from_secs(2),
            probe_once(&nodes, &transport, Duration::from_secs(60), &rx),
        )
        .await
        .expect("el apagado debió cortar la sonda colgada");

        assert!(evicted.is_empty());
        assert_eq!(nodes.snapshot(), vec!["a:1", "b:1"]);
    }
}
