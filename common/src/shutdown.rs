use std::future::Future;

use tokio::sync::watch;

/// Canal de apagado compartido por los loops de fondo y las llamadas salientes.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Se completa cuando alguien publica `true`. Si el emisor desaparece sin
/// avisar, nunca se completa.
pub async fn signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Corre `fut` salvo que se publique el apagado antes de que termine.
/// Devuelve None si ganó el apagado (el futuro se descarta).
pub async fn or_shutdown<F: Future>(rx: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = signalled(rx) => None,
        out = fut => Some(out),
    }
}
