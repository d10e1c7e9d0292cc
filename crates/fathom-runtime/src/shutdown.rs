use tokio_util::sync::CancellationToken;
use tracing::info;

/// Process-wide shutdown flag. Cloned into every component that must stop
/// on SIGINT/SIGTERM; tests trigger it directly.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when shutdown has been requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// Listen for SIGINT and, on unix, SIGTERM. The listener task lives
    /// until the first signal; repeated signals are a no-op because the
    /// token latches.
    pub fn listen_for_os_signals(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            wait_for_os_signal().await;
            info!("shutdown signal received, starting graceful drain");
            signal.trigger();
        });
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_latches_and_wakes_waiters() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.triggered().await });

        signal.trigger();
        handle.await.unwrap();
        assert!(signal.is_triggered());
        signal.trigger(); // idempotent
    }
}
