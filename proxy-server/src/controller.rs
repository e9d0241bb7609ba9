use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Determines how to shut down the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Stop accepting metrics and drain open connections within the shutdown timeout.
    Graceful,
    /// Close all connections right away.
    Immediate,
}

/// Shutdown request broadcast by the [`Controller`].
///
/// With a timeout, open connections may finish within that time. Without one, they are closed
/// immediately.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shutdown {
    /// The timeout for graceful shutdowns.
    pub timeout: Option<Duration>,
}

/// Notifies a component of the server shutdown.
///
/// Obtained from [`Controller::shutdown_handle`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Waits until a shutdown was requested.
    ///
    /// Resolves immediately if the shutdown was requested before. If the controller is dropped
    /// without requesting one, this resolves with an immediate shutdown.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                return Shutdown { timeout: None };
            }
        }
    }

    /// Returns the shutdown request, if there is one.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }
}

/// Turns termination signals into a [`Shutdown`] broadcast.
///
/// Components subscribe with [`shutdown_handle`](Self::shutdown_handle). Once
/// [`start`](Self::start) has been called, `SIGINT` and `SIGTERM` trigger a graceful shutdown.
#[derive(Clone, Debug)]
pub struct Controller {
    timeout: Duration,
    tx: Arc<watch::Sender<Option<Shutdown>>>,
}

impl Controller {
    /// Creates a controller with the timeout for graceful shutdowns.
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            timeout,
            tx: Arc::new(tx),
        }
    }

    /// Spawns the signal listener on the current runtime.
    pub fn start(&self) {
        tokio::spawn(monitor_signals(self.clone()));
    }

    /// Returns a handle to wait for the shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.tx.subscribe())
    }

    /// Broadcasts a shutdown to all handles.
    ///
    /// Only the first request takes effect.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let timeout = match mode {
            ShutdownMode::Graceful => Some(self.timeout),
            ShutdownMode::Immediate => None,
        };

        self.tx.send_if_modified(|shutdown| {
            if shutdown.is_some() {
                return false;
            }
            *shutdown = Some(Shutdown { timeout });
            true
        });
    }
}

#[cfg(unix)]
async fn monitor_signals(controller: Controller) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            proxy_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to register SIGTERM handler"
            );
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => proxy_log::info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => proxy_log::info!("SIGTERM received, shutting down"),
    }

    controller.shutdown(ShutdownMode::Graceful);
}

#[cfg(not(unix))]
async fn monitor_signals(controller: Controller) {
    if tokio::signal::ctrl_c().await.is_ok() {
        proxy_log::info!("SIGINT received, shutting down");
        controller.shutdown(ShutdownMode::Graceful);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let controller = Controller::new(Duration::from_secs(5));
        let mut handle = controller.shutdown_handle();
        assert_eq!(handle.get(), None);

        controller.shutdown(ShutdownMode::Graceful);
        controller.shutdown(ShutdownMode::Immediate);

        let shutdown = handle.notified().await;
        assert_eq!(shutdown.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_late_subscriber() {
        let controller = Controller::new(Duration::from_secs(5));
        controller.shutdown(ShutdownMode::Immediate);

        let mut handle = controller.shutdown_handle();
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
    }

    #[tokio::test]
    async fn test_dropped_controller() {
        let controller = Controller::new(Duration::from_secs(5));
        let mut handle = controller.shutdown_handle();
        drop(controller);

        assert_eq!(handle.notified().await.timeout, None);
    }
}
