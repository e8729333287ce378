use tokio::sync::watch;

/// Sender side, held by whatever orchestrates the worker's lifetime.
/// Call `trigger()` to broadcast shutdown to all listeners.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Receiver side, distributed to every loop that must stop consuming new
/// deliveries once shutdown begins. Clone freely; each clone observes the
/// signal independently. In-flight deliveries are never interrupted; loops
/// stop pulling new work and drain.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Construct a linked handle/signal pair.
pub fn new_pair() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    /// Broadcast shutdown to all outstanding [`ShutdownSignal`] receivers.
    pub fn trigger(self) {
        // Errors only if all receivers are gone already, which is harmless.
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    /// Wait until shutdown has been triggered. Resolves immediately if the
    /// signal fired before this call.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|&v| v).await;
    }
}

/// Wait for `SIGINT` (Ctrl-C) or `SIGTERM` (container stop / kill).
///
/// A free function so the host can await it next to the running worker
/// without any prior state.
pub async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => tracing::info!("SIGINT received"),
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
    }
}
