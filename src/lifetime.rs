use tokio_util::sync::CancellationToken;

/// The three application lifecycle checkpoints.
///
/// Each checkpoint is a [`CancellationToken`] that the host cancels when the application
/// reaches it, so callers can `.cancelled().await` on any of them. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ApplicationLifetime {
    started: CancellationToken,
    stopping: CancellationToken,
    stopped: CancellationToken,
    stop_requested: CancellationToken,
}

impl ApplicationLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once every hosted service has started.
    pub fn started(&self) -> CancellationToken {
        self.started.clone()
    }

    /// Fires when shutdown begins.
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Fires when shutdown has completed.
    pub fn stopped(&self) -> CancellationToken {
        self.stopped.clone()
    }

    /// Asks a running host to shut down.
    pub fn stop_application(&self) {
        self.stop_requested.cancel();
    }

    /// Resolves once [`ApplicationLifetime::stop_application`] has been called.
    pub async fn stop_requested(&self) {
        self.stop_requested.cancelled().await;
    }

    pub(crate) fn notify_started(&self) {
        self.started.cancel();
    }

    pub(crate) fn notify_stopping(&self) {
        self.stopping.cancel();
    }

    pub(crate) fn notify_stopped(&self) {
        self.stopped.cancel();
    }
}
