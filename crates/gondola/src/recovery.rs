//! Post-launch watchdog.
//!
//! Monitoring begins when the host signals that its JS instance exists. A
//! fatal error inside the success window demotes the launched update and
//! relaunches from the best remaining fallback; a quiet window marks the
//! launch successful. Either verdict is deferred while a remote load is
//! still in flight, so an incoming replacement is not thrown away by a
//! premature demotion.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::loader::RemoteLoadStatus;

/// Narrow capability surface the watchdog drives. Implemented by the
/// engine; keeping it small breaks the engine↔recovery reference cycle.
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    async fn mark_failed_launch(&self);
    async fn mark_successful_launch(&self);
    /// Relaunch from another stored update; true when one was installed.
    async fn relaunch_from_catalog(&self) -> bool;
    /// Roll back to the embedded payload; true when that was possible.
    async fn relaunch_embedded(&self) -> bool;
    /// Nothing left to fall back to.
    fn escalate(&self, message: &str);
}

/// Handle the host uses to feed lifecycle signals into the watchdog.
#[derive(Clone)]
pub struct ErrorRecovery {
    error_tx: mpsc::UnboundedSender<String>,
    start_tx: mpsc::UnboundedSender<()>,
}

impl ErrorRecovery {
    /// Create the watchdog. Nothing runs until
    /// [`on_react_instance_created`](Self::on_react_instance_created).
    #[must_use]
    pub fn spawn(
        actions: Arc<dyn RecoveryActions>,
        remote_status: watch::Receiver<RemoteLoadStatus>,
        success_timeout: Duration,
    ) -> Self {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (start_tx, mut start_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Arm only once the JS instance exists.
            if start_rx.recv().await.is_none() {
                return;
            }
            monitor(actions, remote_status, error_rx, success_timeout).await;
        });

        Self { error_tx, start_tx }
    }

    /// The host created its JS instance; the success window starts now.
    pub fn on_react_instance_created(&self) {
        let _ = self.start_tx.send(());
    }

    /// The host observed a fatal JS error.
    pub fn on_fatal_error(&self, message: impl Into<String>) {
        let _ = self.error_tx.send(message.into());
    }
}

async fn monitor(
    actions: Arc<dyn RecoveryActions>,
    mut remote_status: watch::Receiver<RemoteLoadStatus>,
    mut error_rx: mpsc::UnboundedReceiver<String>,
    success_timeout: Duration,
) {
    tokio::select! {
        message = error_rx.recv() => {
            let message = message.unwrap_or_else(|| "host error stream closed".into());
            tracing::warn!(%message, "fatal error within success window");
            wait_remote_settled(&mut remote_status).await;
            actions.mark_failed_launch().await;
            if actions.relaunch_from_catalog().await {
                return;
            }
            if actions.relaunch_embedded().await {
                return;
            }
            actions.escalate(&message);
        }
        () = tokio::time::sleep(success_timeout) => {
            wait_remote_settled(&mut remote_status).await;
            actions.mark_successful_launch().await;
        }
    }
}

/// Hold the verdict while a remote load is in progress.
async fn wait_remote_settled(rx: &mut watch::Receiver<RemoteLoadStatus>) {
    while *rx.borrow() == RemoteLoadStatus::NewUpdateLoading {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
