//! Cold-start orchestrator.
//!
//! Runs the remote loader concurrently with a launch-wait timer and
//! delivers exactly one terminal outcome, as early as possible:
//!
//! - the cached launcher once the timer fires, or
//! - the cached launcher once the server reports nothing newer, or
//! - a freshly stored update once it becomes ready.
//!
//! The in-flight loader is never cancelled by the timer; its remaining
//! delegate callbacks still fire after the terminal outcome, ending with
//! `on_remote_update_finished`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gondola_assets::{EmbeddedAssets, FileStore};
use gondola_db::{keys, DatabaseHandle, UpdateEntity, UpdateStatus};
use gondola_net::{protocol::UpdateResponse, HttpClient};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    config::UpdatesConfig,
    launcher::Launcher,
    loader::{
        evaluate_response, LoaderCallbacks, LoaderResult, RemoteLoadStatus, RemoteLoader,
        ResponseDecision,
    },
    policy::{ManifestFilters, SelectionPolicy},
    EngineError, EngineResult,
};

/// What the remote check concluded, before any download.
#[derive(Clone, Debug)]
pub enum RemoteCheckOutcome {
    NoUpdateAvailable,
    UpdateAvailable { manifest: serde_json::Value },
    RollBackToEmbedded { commit_time: DateTime<Utc> },
}

/// Terminal status of the remote half of a loader task run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteUpdateStatus {
    Error,
    NoUpdateAvailable,
    UpdateLoaded,
}

/// Observer of a loader task run. All callbacks are serialized on the
/// task; implementations need no locking.
pub trait LoaderTaskDelegate: Send + Sync {
    /// A cached launchable update exists. Return true to arm the launch
    /// timer; false launches it only once the remote check resolves.
    fn on_cached_update_loaded(&self, update: &UpdateEntity) -> bool {
        let _ = update;
        true
    }

    fn on_remote_check_started(&self) {}

    fn on_remote_check_finished(&self, outcome: &RemoteCheckOutcome) {
        let _ = outcome;
    }

    fn on_remote_load_started(&self) {}

    /// Always the last remote callback of a run.
    fn on_remote_update_finished(
        &self,
        status: RemoteUpdateStatus,
        update: Option<&UpdateEntity>,
        error: Option<&EngineError>,
    ) {
        let _ = (status, update, error);
    }
}

/// Terminal outcome: the launcher to hand to the host, and whether the
/// server confirmed it is current.
#[derive(Clone, Debug)]
pub struct LaunchOutcome {
    pub launcher: Launcher,
    pub is_up_to_date: bool,
}

enum RemoteEvent {
    CheckFinished(RemoteCheckOutcome),
    LoadStarted,
    Finished {
        status: RemoteUpdateStatus,
        update: Option<UpdateEntity>,
        error: Option<EngineError>,
    },
}

/// Cold-start loader task. Consumed by [`run`](Self::run).
pub struct LoaderTask {
    pub db: DatabaseHandle,
    pub store: FileStore,
    pub embedded: Option<EmbeddedAssets>,
    pub http: HttpClient,
    pub config: Arc<UpdatesConfig>,
    pub policy: SelectionPolicy,
    pub remote_status: watch::Sender<RemoteLoadStatus>,
}

impl LoaderTask {
    /// Run to the terminal outcome. Remote callbacks continue on a
    /// background task after this returns, until the loader finishes.
    pub async fn run(self, delegate: Arc<dyn LoaderTaskDelegate>) -> EngineResult<LaunchOutcome> {
        let scope = self.config.scope_key().to_string();
        let filters_scope = scope.clone();
        let filters: ManifestFilters = self
            .db
            .with(move |c| c.string_map(keys::MANIFEST_FILTERS, &filters_scope))
            .await
            .unwrap_or_default();

        let cached = match Launcher::from_catalog(
            &self.db,
            &self.store,
            self.embedded.as_ref(),
            &self.policy.launcher,
            &scope,
            &filters,
        )
        .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%e, "cached launcher unusable, continuing without one");
                None
            }
        };

        let timer_armed = cached
            .as_ref()
            .and_then(|l| l.update.as_ref())
            .is_some_and(|u| delegate.on_cached_update_loaded(u));

        if !self.config.should_check_on_launch() {
            return match cached {
                Some(launcher) => Ok(LaunchOutcome {
                    launcher,
                    is_up_to_date: true,
                }),
                None => Err(EngineError::NoLaunchableUpdate),
            };
        }

        delegate.on_remote_check_started();

        let launched_update = cached.as_ref().and_then(|l| l.update.clone());
        let candidates_scope = scope.clone();
        let embedded_update = self
            .db
            .with(move |c| c.launch_candidates(&candidates_scope))
            .await
            .unwrap_or_default()
            .into_iter()
            .find(|u| u.status == UpdateStatus::Embedded);

        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let loader = RemoteLoader {
            http: self.http.clone(),
            db: self.db.clone(),
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            launched_update_id: launched_update.as_ref().map(|u| u.id),
            embedded_update_id: embedded_update.as_ref().map(|u| u.id),
        };
        let callbacks = TaskLoaderCallbacks {
            policy: self.policy.clone(),
            launched: launched_update,
            embedded: embedded_update,
            scope_key: scope,
            ev_tx: ev_tx.clone(),
            status_tx: self.remote_status.clone(),
        };
        let status_tx = self.remote_status.clone();
        tokio::spawn(async move {
            let result = loader.load(&callbacks).await;
            let event = match result {
                Ok(LoaderResult {
                    update: Some(update),
                    ..
                }) => {
                    let _ = status_tx.send(RemoteLoadStatus::NewUpdateLoaded);
                    RemoteEvent::Finished {
                        status: RemoteUpdateStatus::UpdateLoaded,
                        update: Some(update),
                        error: None,
                    }
                }
                Ok(LoaderResult { update: None, .. }) => {
                    let _ = status_tx.send(RemoteLoadStatus::Idle);
                    RemoteEvent::Finished {
                        status: RemoteUpdateStatus::NoUpdateAvailable,
                        update: None,
                        error: None,
                    }
                }
                Err(e) => {
                    let _ = status_tx.send(RemoteLoadStatus::Idle);
                    RemoteEvent::Finished {
                        status: RemoteUpdateStatus::Error,
                        update: None,
                        error: Some(e),
                    }
                }
            };
            let _ = ev_tx.send(event);
        });

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(self.drive(delegate, cached, timer_armed, filters, ev_rx, outcome_tx));
        outcome_rx
            .await
            .map_err(|_| EngineError::LaunchFailure("loader task aborted".into()))?
    }

    /// The serialized callback/decision loop. Runs past terminal delivery
    /// until the remote worker reports in.
    async fn drive(
        self,
        delegate: Arc<dyn LoaderTaskDelegate>,
        cached: Option<Launcher>,
        timer_armed: bool,
        filters: ManifestFilters,
        mut ev_rx: mpsc::UnboundedReceiver<RemoteEvent>,
        outcome_tx: oneshot::Sender<EngineResult<LaunchOutcome>>,
    ) {
        let mut outcome_tx = Some(outcome_tx);
        let mut timer_armed = timer_armed && cached.is_some();
        let mut rollback_accepted = false;
        let timer = tokio::time::sleep(self.config.launch_wait);
        tokio::pin!(timer);

        fn deliver(
            slot: &mut Option<oneshot::Sender<EngineResult<LaunchOutcome>>>,
            result: EngineResult<LaunchOutcome>,
        ) {
            if let Some(tx) = slot.take() {
                let _ = tx.send(result);
            }
        }

        loop {
            tokio::select! {
                () = &mut timer, if timer_armed => {
                    timer_armed = false;
                    if let Some(launcher) = cached.clone() {
                        tracing::debug!("launch timer fired, serving cached update");
                        deliver(&mut outcome_tx, Ok(LaunchOutcome { launcher, is_up_to_date: false }));
                    }
                }
                ev = ev_rx.recv() => match ev {
                    Some(RemoteEvent::CheckFinished(outcome)) => {
                        if matches!(outcome, RemoteCheckOutcome::RollBackToEmbedded { .. }) {
                            rollback_accepted = true;
                        }
                        delegate.on_remote_check_finished(&outcome);
                        if matches!(outcome, RemoteCheckOutcome::NoUpdateAvailable) {
                            if let Some(launcher) = cached.clone() {
                                deliver(&mut outcome_tx, Ok(LaunchOutcome { launcher, is_up_to_date: true }));
                            }
                        }
                    }
                    Some(RemoteEvent::LoadStarted) => delegate.on_remote_load_started(),
                    Some(RemoteEvent::Finished { status, update, error }) => {
                        delegate.on_remote_update_finished(status, update.as_ref(), error.as_ref());
                        if outcome_tx.is_some() {
                            let result = self
                                .terminal_outcome(status, update, error, cached.clone(), rollback_accepted, &filters)
                                .await;
                            deliver(&mut outcome_tx, result);
                        }
                        break;
                    }
                    None => {
                        deliver(&mut outcome_tx, match cached.clone() {
                            Some(launcher) => Ok(LaunchOutcome { launcher, is_up_to_date: false }),
                            None => Err(EngineError::NoLaunchableUpdate),
                        });
                        break;
                    }
                }
            }
        }
    }

    async fn terminal_outcome(
        &self,
        status: RemoteUpdateStatus,
        update: Option<UpdateEntity>,
        error: Option<EngineError>,
        cached: Option<Launcher>,
        rollback_accepted: bool,
        filters: &ManifestFilters,
    ) -> EngineResult<LaunchOutcome> {
        let scope = self.config.scope_key();

        if rollback_accepted {
            if let Ok(Some(launcher)) =
                Launcher::embedded_from_catalog(&self.db, &self.store, self.embedded.as_ref(), scope)
                    .await
            {
                return Ok(LaunchOutcome {
                    launcher,
                    is_up_to_date: true,
                });
            }
        }

        if update.is_some() {
            // Prefer freshly persisted filters; the response may have
            // changed them.
            let scope_owned = scope.to_string();
            let fresh = self
                .db
                .with(move |c| c.string_map(keys::MANIFEST_FILTERS, &scope_owned))
                .await
                .unwrap_or_else(|_| filters.clone());
            match Launcher::from_catalog(
                &self.db,
                &self.store,
                self.embedded.as_ref(),
                &self.policy.launcher,
                scope,
                &fresh,
            )
            .await
            {
                Ok(Some(launcher)) => {
                    return Ok(LaunchOutcome {
                        launcher,
                        is_up_to_date: true,
                    })
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%e, "failed to relaunch from fresh update"),
            }
        }

        match cached {
            Some(launcher) => Ok(LaunchOutcome {
                launcher,
                is_up_to_date: status == RemoteUpdateStatus::NoUpdateAvailable,
            }),
            None => Err(error.unwrap_or(EngineError::NoLaunchableUpdate)),
        }
    }
}

/// Loader callbacks that turn the response into check events and apply
/// the loader selection policy as the download veto.
struct TaskLoaderCallbacks {
    policy: SelectionPolicy,
    launched: Option<UpdateEntity>,
    embedded: Option<UpdateEntity>,
    scope_key: String,
    ev_tx: mpsc::UnboundedSender<RemoteEvent>,
    status_tx: watch::Sender<RemoteLoadStatus>,
}

impl LoaderCallbacks for TaskLoaderCallbacks {
    fn on_update_response_loaded(&self, response: &UpdateResponse) -> bool {
        match evaluate_response(
            &self.policy,
            response,
            self.launched.as_ref(),
            self.embedded.as_ref(),
            &self.scope_key,
        ) {
            ResponseDecision::Rollback { commit_time } => {
                let _ = self.ev_tx.send(RemoteEvent::CheckFinished(
                    RemoteCheckOutcome::RollBackToEmbedded { commit_time },
                ));
                false
            }
            ResponseDecision::Download { manifest } => {
                let _ = self.ev_tx.send(RemoteEvent::CheckFinished(
                    RemoteCheckOutcome::UpdateAvailable { manifest },
                ));
                let _ = self.ev_tx.send(RemoteEvent::LoadStarted);
                let _ = self.status_tx.send(RemoteLoadStatus::NewUpdateLoading);
                true
            }
            ResponseDecision::NoUpdate => {
                let _ = self
                    .ev_tx
                    .send(RemoteEvent::CheckFinished(RemoteCheckOutcome::NoUpdateAvailable));
                false
            }
        }
    }
}
