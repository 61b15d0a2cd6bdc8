use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token on SIGTERM or SIGINT.
///
/// The token is the parent of every attempt's cancellation token in the CLI,
/// so a shutdown signal stops outcome tracking without firing callbacks.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    #[cfg(unix)]
    pub fn try_new() -> Result<Self, std::io::Error> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        Ok(Self::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }))
    }

    #[cfg(not(unix))]
    pub fn try_new() -> Result<Self, std::io::Error> {
        Ok(Self::spawn(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
            }
        }))
    }

    fn spawn(signal: impl Future<Output = ()> + Send + 'static) -> Self {
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let cancel = token.clone();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = signal => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        });
        task_tracker.close();
        Self {
            task_tracker,
            cancellation_token: token,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits until shutdown is requested and the listener task has exited.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
