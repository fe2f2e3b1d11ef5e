use super::{ShutdownReason, StaywatchOrchestrator};
use crate::error::{Result, StaywatchError};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

impl StaywatchOrchestrator {
    /// Run until a shutdown signal arrives, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("Staywatch is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| StaywatchError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| StaywatchError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender).await;

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| StaywatchError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if shutdown_reason.is_failure() {
            exit_code = exit_code.max(1);
        }

        info!("Staywatch shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    async fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // SIGTERM (systemd stop), Unix only
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                                let _ = sender.send(ShutdownReason::Signal("SIGTERM"));
                            }
                        }
                    });
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        }

        // SIGINT (Ctrl+C)
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT"));
                }
            }
        });

        // An API server that dies on its own takes the process down with it
        let shutdown_sender_server = Arc::clone(&shutdown_sender);
        let server_stopped = self.cancellation_token.clone();
        let server_exited = self.server_task.as_ref().map(|task| task.abort_handle());
        if let Some(server_exited) = server_exited {
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = server_stopped.cancelled() => return,
                        _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
                    }
                    if server_exited.is_finished() {
                        warn!("API server exited unexpectedly");
                        if let Some(sender) = shutdown_sender_server.lock().await.take() {
                            let _ = sender.send(ShutdownReason::ServerExited);
                        }
                        return;
                    }
                }
            });
        }
    }
}
