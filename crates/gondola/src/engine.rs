//! Engine façade: wires the catalog, file store, loader, state machine
//! and error recovery together behind the host-facing operations.
//!
//! Lifecycle is two-phase: [`UpdatesEngine::new`] captures configuration,
//! [`UpdatesEngine::start`] (idempotent) initializes storage and spawns
//! the cold-start loader task. The host's only blocking call is
//! [`UpdatesEngine::launch_asset_file`], which parks on a one-shot gate
//! until the loader task picks a launcher.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock, Weak,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gondola_assets::{EmbeddedAssets, FileStore};
use gondola_db::{keys, BuildData, DatabaseHandle, UpdateEntity, UpdateStatus, DB_FILE_NAME};
use gondola_events::{EventBus, UpdateContext, UpdateNotice};
use gondola_net::{protocol::UpdateManifest, HttpClient};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    config::UpdatesConfig,
    launcher::Launcher,
    loader::{
        entity_from_manifest,
        task::{
            LaunchOutcome, LoaderTask, LoaderTaskDelegate, RemoteCheckOutcome, RemoteUpdateStatus,
        },
        evaluate_response, NoopLoaderCallbacks, RemoteLoadStatus, RemoteLoader, ResponseDecision,
    },
    policy::{ManifestFilters, PolicySlot, SelectionPolicy},
    reaper::run_reaper,
    recovery::{ErrorRecovery, RecoveryActions},
    state::{MachineState, StateEvent, UpdateStateMachine},
    EngineError, EngineResult,
};

/// Host bridge the engine drives to swap and restart the JS runtime.
///
/// A failing bundle swap is non-fatal: the new path still applies at the
/// next natural reload, so callers treat it as success.
pub trait HostReloader: Send + Sync {
    fn set_js_bundle_file(&self, path: &Path) -> Result<(), String>;
    fn restart(&self);
}

/// Reloader that only logs; for tests and headless tooling.
pub struct NoopHostReloader;

impl HostReloader for NoopHostReloader {
    fn set_js_bundle_file(&self, path: &Path) -> Result<(), String> {
        tracing::debug!(path = %path.display(), "host bundle path set (noop)");
        Ok(())
    }

    fn restart(&self) {
        tracing::debug!("host restart requested (noop)");
    }
}

/// Result of a one-shot remote check.
#[derive(Clone, Debug)]
pub enum CheckForUpdateResult {
    NoUpdateAvailable,
    UpdateAvailable { manifest: serde_json::Value },
    RollBackToEmbedded { commit_time: DateTime<Utc> },
    Error { message: String },
}

/// Result of a one-shot fetch.
#[derive(Clone, Debug)]
pub enum FetchUpdateResult {
    /// A new update was stored and is pending a reload.
    Success { manifest: serde_json::Value },
    /// Nothing newer to fetch.
    Failure,
    RollBackToEmbedded { commit_time: DateTime<Utc> },
    Error { message: String },
}

/// What `launch_asset_file` / `bundle_asset_name` hand to the host.
#[derive(Clone, Debug)]
struct LaunchDecision {
    launch_asset_path: Option<PathBuf>,
    bundle_asset_name: Option<String>,
}

/// One-shot barrier the host blocks on until the loader task finishes.
struct LaunchGate {
    slot: std::sync::Mutex<Option<LaunchDecision>>,
    cv: std::sync::Condvar,
    notify: tokio::sync::Notify,
}

impl LaunchGate {
    fn new() -> Self {
        Self {
            slot: std::sync::Mutex::new(None),
            cv: std::sync::Condvar::new(),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// First write wins; later calls are ignored.
    fn set(&self, decision: LaunchDecision) {
        {
            let mut guard = self.slot.lock().expect("launch gate poisoned");
            if guard.is_none() {
                *guard = Some(decision);
            }
        }
        self.cv.notify_all();
        self.notify.notify_waiters();
    }

    fn get(&self) -> Option<LaunchDecision> {
        self.slot.lock().expect("launch gate poisoned").clone()
    }

    fn wait_blocking(&self) -> LaunchDecision {
        let mut guard = self.slot.lock().expect("launch gate poisoned");
        loop {
            if let Some(decision) = guard.as_ref() {
                return decision.clone();
            }
            guard = self.cv.wait(guard).expect("launch gate poisoned");
        }
    }

    async fn wait(&self) -> LaunchDecision {
        loop {
            let notified = self.notify.notified();
            if let Some(decision) = self.get() {
                return decision;
            }
            notified.await;
        }
    }
}

struct EngineInner {
    config: Arc<UpdatesConfig>,
    bus: EventBus,
    host: Arc<dyn HostReloader>,
    policy_slot: PolicySlot,
    embedded: Option<EmbeddedAssets>,
    started: AtomicBool,
    emergency: AtomicBool,
    gate: LaunchGate,
    machine: OnceLock<UpdateStateMachine>,
    db: OnceLock<DatabaseHandle>,
    store: OnceLock<FileStore>,
    recovery: OnceLock<ErrorRecovery>,
    launched: Mutex<Option<UpdateEntity>>,
    current_launcher: Mutex<Option<Launcher>>,
    /// Set when a rollback directive was accepted; consumed by `reload`.
    rollback_requested: Mutex<Option<DateTime<Utc>>>,
    remote_status_tx: watch::Sender<RemoteLoadStatus>,
}

impl EngineInner {
    fn machine(&self) -> Option<&UpdateStateMachine> {
        self.machine.get()
    }

    fn post(&self, event: StateEvent) {
        if let Some(machine) = self.machine() {
            machine.post(event);
        }
    }

    fn scope_key(&self) -> &str {
        self.config.scope_key()
    }

    /// Close the gate with the embedded payload, bypassing the catalog.
    fn finish_with_embedded(&self, emergency: bool, reason: &str) {
        if emergency {
            tracing::warn!(reason, "emergency launch: serving embedded payload");
            self.emergency.store(true, Ordering::SeqCst);
        } else {
            tracing::debug!(reason, "serving embedded payload");
        }
        let launcher = Launcher::embedded_fallback(self.embedded.as_ref());
        let decision = LaunchDecision {
            launch_asset_path: None,
            bundle_asset_name: launcher.bundle_asset_name.clone(),
        };
        *self.current_launcher.lock() = Some(launcher);
        self.gate.set(decision);
    }

    fn install_launcher(&self, launcher: &Launcher) {
        *self.launched.lock() = launcher.update.clone();
        *self.current_launcher.lock() = Some(launcher.clone());
    }

    async fn current_filters(&self) -> ManifestFilters {
        let Some(db) = self.db.get() else {
            return ManifestFilters::new();
        };
        let scope = self.scope_key().to_string();
        db.with(move |c| c.string_map(keys::MANIFEST_FILTERS, &scope))
            .await
            .unwrap_or_default()
    }

    async fn embedded_update_row(&self) -> Option<UpdateEntity> {
        let db = self.db.get()?;
        let scope = self.scope_key().to_string();
        db.with(move |c| c.launch_candidates(&scope))
            .await
            .ok()?
            .into_iter()
            .find(|u| u.status == UpdateStatus::Embedded)
    }

    fn spawn_reaper(self: &Arc<Self>, policy: SelectionPolicy) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let (Some(db), Some(store)) = (inner.db.get(), inner.store.get()) else {
                return;
            };
            let launched = inner.launched.lock().clone();
            let filters = inner.current_filters().await;
            match run_reaper(db, store, &policy, launched.as_ref(), &filters, inner.scope_key())
                .await
            {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "reaper removed stored updates"),
                Err(e) => tracing::warn!(%e, "reaper pass failed"),
            }
        });
    }

    /// Install `launcher`, point the host at its bundle and restart JS.
    /// Bridge failures are logged and swallowed.
    fn restart_with(self: &Arc<Self>, launcher: Launcher, policy: SelectionPolicy) {
        self.install_launcher(&launcher);
        if let Some(path) = &launcher.launch_asset_path {
            if let Err(e) = self.host.set_js_bundle_file(path) {
                tracing::warn!(error = %e, "host bundle swap failed; path applies at next reload");
            }
        }
        self.host.restart();
        if let Some(machine) = self.machine() {
            machine.reset();
        }
        self.spawn_reaper(policy);
    }
}

/// The update engine. One instance per application process.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct UpdatesEngine {
    inner: Arc<EngineInner>,
}

impl UpdatesEngine {
    /// Capture configuration without starting anything.
    #[must_use]
    pub fn new(config: UpdatesConfig, host: Arc<dyn HostReloader>) -> Self {
        let bus = EventBus::new(config.event_channel_capacity);
        let policy_slot = PolicySlot::new(SelectionPolicy::standard(&config.runtime_version));
        let embedded = config
            .embedded_dir
            .as_ref()
            .map(|dir| EmbeddedAssets::new(dir.clone()));
        let (remote_status_tx, _) = watch::channel(RemoteLoadStatus::Idle);
        Self {
            inner: Arc::new(EngineInner {
                config: Arc::new(config),
                bus,
                host,
                policy_slot,
                embedded,
                started: AtomicBool::new(false),
                emergency: AtomicBool::new(false),
                gate: LaunchGate::new(),
                machine: OnceLock::new(),
                db: OnceLock::new(),
                store: OnceLock::new(),
                recovery: OnceLock::new(),
                launched: Mutex::new(None),
                current_launcher: Mutex::new(None),
                rollback_requested: Mutex::new(None),
                remote_status_tx,
            }),
        }
    }

    /// Initialize storage and spawn the cold-start loader task.
    ///
    /// Idempotent. Only configuration errors are returned; directory and
    /// database failures degrade to an emergency launch of the embedded
    /// payload.
    pub async fn start(&self) -> EngineResult<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.config.validate()?;

        let _ = inner
            .machine
            .set(UpdateStateMachine::spawn(inner.bus.clone()));

        if !inner.config.enabled {
            inner.finish_with_embedded(false, "updates disabled");
            return Ok(());
        }

        let store = match FileStore::create(&inner.config.updates_dir) {
            Ok(store) => store,
            Err(e) => {
                inner.finish_with_embedded(true, &e.to_string());
                return Ok(());
            }
        };
        let db = match DatabaseHandle::open(&inner.config.updates_dir.join(DB_FILE_NAME)) {
            Ok(db) => db,
            Err(e) => {
                inner.finish_with_embedded(true, &e.to_string());
                return Ok(());
            }
        };
        let _ = inner.store.set(store.clone());
        let _ = inner.db.set(db.clone());

        let build_data = BuildData {
            runtime_version: inner.config.runtime_version.clone(),
            scope_key: inner.scope_key().to_string(),
            update_url: inner
                .config
                .update_url
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };
        if let Err(e) = db
            .with(move |c| BuildData::ensure_consistency(c, &build_data).map(|_| ()))
            .await
        {
            inner.finish_with_embedded(true, &e.to_string());
            return Ok(());
        }

        if inner.config.has_embedded_update {
            if let Err(e) = self.seed_embedded_update(&db).await {
                tracing::warn!(%e, "failed to seed embedded update into catalog");
            }
        }

        let actions = Arc::new(EngineRecoveryActions {
            inner: Arc::downgrade(inner),
        });
        let _ = inner.recovery.set(ErrorRecovery::spawn(
            actions,
            inner.remote_status_tx.subscribe(),
            inner.config.success_timeout,
        ));

        let task = LoaderTask {
            db,
            store,
            embedded: inner.embedded.clone(),
            http: HttpClient::new(inner.config.net.clone()),
            config: Arc::clone(&inner.config),
            policy: inner.policy_slot.current(),
            remote_status: inner.remote_status_tx.clone(),
        };
        let delegate = Arc::new(EngineDelegate {
            inner: Arc::clone(inner),
            load_started: AtomicBool::new(false),
        });
        let task_inner = Arc::clone(inner);
        tokio::spawn(async move {
            match task.run(delegate).await {
                Ok(LaunchOutcome { launcher, .. }) => {
                    task_inner.install_launcher(&launcher);
                    task_inner.gate.set(LaunchDecision {
                        launch_asset_path: launcher.launch_asset_path.clone(),
                        bundle_asset_name: launcher.bundle_asset_name.clone(),
                    });
                    task_inner.spawn_reaper(task_inner.policy_slot.current());
                }
                Err(e) => task_inner.finish_with_embedded(true, &e.to_string()),
            }
        });

        Ok(())
    }

    /// Register the embedded payload as a catalog row so the selection
    /// policy can always fall back to it.
    async fn seed_embedded_update(&self, db: &DatabaseHandle) -> EngineResult<()> {
        let Some(embedded) = &self.inner.embedded else {
            return Ok(());
        };
        let manifest = UpdateManifest::parse(embedded.load_manifest()?)?;
        if manifest.runtime_version != self.inner.config.runtime_version {
            tracing::warn!(
                embedded = %manifest.runtime_version,
                binary = %self.inner.config.runtime_version,
                "embedded manifest runtime version differs from binary"
            );
        }
        let mut entity = entity_from_manifest(&manifest, self.inner.scope_key());
        entity.status = UpdateStatus::Embedded;

        let mut assets = Vec::new();
        for (asset, is_launch) in manifest.all_assets() {
            let hash = gondola_core::Sha256Hash::parse_hex(&asset.hash)
                .map_err(gondola_db::DbError::from)?;
            let mut row = gondola_db::AssetEntity::for_hash(hash);
            row.asset_type = asset.content_type.clone();
            row.embedded_asset_filename = asset.embedded_asset_filename.clone();
            assets.push((row, is_launch));
        }

        db.with(move |c| {
            c.insert_update(&entity)?;
            c.commit_update_with_assets(&entity, &assets)
        })
        .await?;
        Ok(())
    }

    // ── host-facing queries ─────────────────────────────────────────────

    /// Block the calling thread until the cold-start loader task settles,
    /// then return the launch asset path, or `None` for an emergency
    /// launch. Must not be called from inside the async runtime.
    #[must_use]
    pub fn launch_asset_file(&self) -> Option<PathBuf> {
        self.inner.gate.wait_blocking().launch_asset_path
    }

    /// Async twin of [`launch_asset_file`](Self::launch_asset_file).
    pub async fn launch_asset_file_async(&self) -> Option<PathBuf> {
        self.inner.gate.wait().await.launch_asset_path
    }

    /// Name of the embedded asset to load, iff `launch_asset_file`
    /// returned `None`.
    #[must_use]
    pub fn bundle_asset_name(&self) -> Option<String> {
        let decision = self.inner.gate.get()?;
        if decision.launch_asset_path.is_some() {
            return None;
        }
        decision.bundle_asset_name
    }

    #[must_use]
    pub fn is_loader_task_finished(&self) -> bool {
        self.inner.gate.get().is_some()
    }

    #[must_use]
    pub fn is_emergency_launch(&self) -> bool {
        self.inner.emergency.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn launched_update(&self) -> Option<UpdateEntity> {
        self.inner.launched.lock().clone()
    }

    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    #[must_use]
    pub fn machine_state(&self) -> Option<MachineState> {
        self.inner.machine().map(UpdateStateMachine::state)
    }

    #[must_use]
    pub fn update_context(&self) -> Option<UpdateContext> {
        self.inner.machine().map(UpdateStateMachine::context)
    }

    // ── one-shot operations ─────────────────────────────────────────────

    /// One remote check, run through the selection policy and the state
    /// machine. Every path posts a terminal machine event.
    pub async fn check_for_update(&self) -> CheckForUpdateResult {
        let inner = &self.inner;
        inner.post(StateEvent::Check);

        let decision = match self.evaluate_remote().await {
            Ok(decision) => decision,
            Err(e) => {
                let message = e.to_string();
                inner.post(StateEvent::CheckError {
                    message: message.clone(),
                });
                inner.bus.publish(UpdateNotice::Error {
                    message: message.clone(),
                });
                return CheckForUpdateResult::Error { message };
            }
        };

        match decision {
            ResponseDecision::NoUpdate => {
                inner.post(StateEvent::CheckCompleteUnavailable);
                inner.bus.publish(UpdateNotice::NoUpdateAvailable);
                CheckForUpdateResult::NoUpdateAvailable
            }
            ResponseDecision::Download { manifest } => {
                inner.post(StateEvent::CheckCompleteWithUpdate {
                    manifest: manifest.clone(),
                });
                inner.bus.publish(UpdateNotice::UpdateAvailable {
                    manifest: manifest.clone(),
                });
                CheckForUpdateResult::UpdateAvailable { manifest }
            }
            ResponseDecision::Rollback { commit_time } => {
                inner.post(StateEvent::CheckCompleteWithRollback { commit_time });
                *inner.rollback_requested.lock() = Some(commit_time);
                CheckForUpdateResult::RollBackToEmbedded { commit_time }
            }
        }
    }

    async fn evaluate_remote(&self) -> EngineResult<ResponseDecision> {
        let inner = &self.inner;
        let loader = self.remote_loader().await?;
        let response = loader.check().await?;
        let launched = inner.launched.lock().clone();
        let embedded = inner.embedded_update_row().await;
        Ok(evaluate_response(
            &inner.policy_slot.current(),
            &response,
            launched.as_ref(),
            embedded.as_ref(),
            inner.scope_key(),
        ))
    }

    async fn remote_loader(&self) -> EngineResult<RemoteLoader> {
        let inner = &self.inner;
        let db = inner.db.get().ok_or(EngineError::NotStarted)?.clone();
        let store = inner.store.get().ok_or(EngineError::NotStarted)?.clone();
        let launched_update_id = inner.launched.lock().as_ref().map(|u| u.id);
        let embedded_update_id = inner.embedded_update_row().await.map(|u| u.id);
        Ok(RemoteLoader {
            http: HttpClient::new(inner.config.net.clone()),
            db,
            store,
            config: Arc::clone(&inner.config),
            launched_update_id,
            embedded_update_id,
        })
    }

    /// One full loader run: download, verify, store. Drives the state
    /// machine through `Download` and a matching completion.
    pub async fn fetch_update(&self) -> FetchUpdateResult {
        let inner = &self.inner;
        inner.post(StateEvent::Download);

        let loader = match self.remote_loader().await {
            Ok(loader) => loader,
            Err(e) => {
                let message = e.to_string();
                inner.post(StateEvent::DownloadError {
                    message: message.clone(),
                });
                return FetchUpdateResult::Error { message };
            }
        };

        let _ = inner.remote_status_tx.send(RemoteLoadStatus::NewUpdateLoading);
        let result = loader.load(&NoopLoaderCallbacks).await;
        match result {
            Ok(result) => {
                if let Some(update) = result.update {
                    let _ = inner.remote_status_tx.send(RemoteLoadStatus::NewUpdateLoaded);
                    inner.post(StateEvent::DownloadCompleteWithUpdate {
                        manifest: update.manifest.clone(),
                    });
                    return FetchUpdateResult::Success {
                        manifest: update.manifest,
                    };
                }
                let _ = inner.remote_status_tx.send(RemoteLoadStatus::Idle);
                if let Some(gondola_net::protocol::UpdateDirective::RollBackToEmbedded {
                    commit_time,
                }) = result.directive
                {
                    inner.post(StateEvent::DownloadCompleteWithRollback);
                    *inner.rollback_requested.lock() = Some(commit_time);
                    return FetchUpdateResult::RollBackToEmbedded { commit_time };
                }
                inner.post(StateEvent::DownloadComplete);
                FetchUpdateResult::Failure
            }
            Err(e) => {
                let _ = inner.remote_status_tx.send(RemoteLoadStatus::Idle);
                let message = e.to_string();
                inner.post(StateEvent::DownloadError {
                    message: message.clone(),
                });
                inner.bus.publish(UpdateNotice::Error {
                    message: message.clone(),
                });
                FetchUpdateResult::Error { message }
            }
        }
    }

    /// Rebuild a launcher against the current catalog, install it and
    /// restart the host's JS. A pending rollback switches to the embedded
    /// update. The reaper runs asynchronously afterwards.
    pub async fn reload(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let db = inner.db.get().ok_or(EngineError::NotStarted)?;
        let store = inner.store.get().ok_or(EngineError::NotStarted)?;
        inner.post(StateEvent::Restart);

        let policy = inner.policy_slot.take_for_launch();
        let filters = inner.current_filters().await;
        let rollback = inner.rollback_requested.lock().take();

        let launcher = if rollback.is_some() {
            Launcher::embedded_from_catalog(db, store, inner.embedded.as_ref(), inner.scope_key())
                .await?
        } else {
            Launcher::from_catalog(
                db,
                store,
                inner.embedded.as_ref(),
                &policy.launcher,
                inner.scope_key(),
                &filters,
            )
            .await?
        };

        let launcher = match launcher {
            Some(launcher) => launcher,
            None if inner.embedded.is_some() => {
                Launcher::embedded_fallback(inner.embedded.as_ref())
            }
            None => return Err(EngineError::NoLaunchableUpdate),
        };

        inner.restart_with(launcher, policy);
        Ok(())
    }

    // ── extra params & policy control ───────────────────────────────────

    pub async fn get_extra_params(&self) -> EngineResult<BTreeMap<String, String>> {
        let db = self.inner.db.get().ok_or(EngineError::NotStarted)?;
        let scope = self.inner.scope_key().to_string();
        Ok(db.with(move |c| c.extra_params(&scope)).await?)
    }

    pub async fn set_extra_param(&self, name: &str, value: Option<&str>) -> EngineResult<()> {
        let db = self.inner.db.get().ok_or(EngineError::NotStarted)?;
        let scope = self.inner.scope_key().to_string();
        let name = name.to_string();
        let value = value.map(ToString::to_string);
        Ok(db
            .with(move |c| c.set_extra_param(&scope, &name, value.as_deref()))
            .await?)
    }

    /// Use `policy` for the next launcher build only.
    pub fn set_next_selection_policy(&self, policy: SelectionPolicy) {
        self.inner.policy_slot.set_next(policy);
    }

    pub fn reset_selection_policy_to_default(&self) {
        self.inner.policy_slot.reset_to_default();
    }

    // ── host lifecycle signals ──────────────────────────────────────────

    /// The host created its JS instance; error recovery arms now.
    pub fn on_react_instance_created(&self) {
        if let Some(recovery) = self.inner.recovery.get() {
            recovery.on_react_instance_created();
        }
    }

    /// The host observed a fatal JS error.
    pub fn on_fatal_js_error(&self, message: impl Into<String>) {
        if let Some(recovery) = self.inner.recovery.get() {
            recovery.on_fatal_error(message);
        }
    }
}

/// Loader-task delegate that drives the state machine and legacy events.
struct EngineDelegate {
    inner: Arc<EngineInner>,
    load_started: AtomicBool,
}

impl LoaderTaskDelegate for EngineDelegate {
    fn on_remote_check_started(&self) {
        self.inner.post(StateEvent::Check);
    }

    fn on_remote_check_finished(&self, outcome: &RemoteCheckOutcome) {
        match outcome {
            RemoteCheckOutcome::NoUpdateAvailable => {
                self.inner.post(StateEvent::CheckCompleteUnavailable);
                self.inner.bus.publish(UpdateNotice::NoUpdateAvailable);
            }
            RemoteCheckOutcome::UpdateAvailable { manifest } => {
                self.inner.post(StateEvent::CheckCompleteWithUpdate {
                    manifest: manifest.clone(),
                });
                self.inner.bus.publish(UpdateNotice::UpdateAvailable {
                    manifest: manifest.clone(),
                });
            }
            RemoteCheckOutcome::RollBackToEmbedded { commit_time } => {
                self.inner.post(StateEvent::CheckCompleteWithRollback {
                    commit_time: *commit_time,
                });
                *self.inner.rollback_requested.lock() = Some(*commit_time);
            }
        }
    }

    fn on_remote_load_started(&self) {
        self.load_started.store(true, Ordering::SeqCst);
        self.inner.post(StateEvent::Download);
    }

    fn on_remote_update_finished(
        &self,
        status: RemoteUpdateStatus,
        update: Option<&UpdateEntity>,
        error: Option<&EngineError>,
    ) {
        let message = error.map(ToString::to_string);
        if self.load_started.load(Ordering::SeqCst) {
            match status {
                RemoteUpdateStatus::UpdateLoaded => {
                    self.inner.post(StateEvent::DownloadCompleteWithUpdate {
                        manifest: update.map(|u| u.manifest.clone()).unwrap_or_default(),
                    });
                }
                RemoteUpdateStatus::NoUpdateAvailable => {
                    self.inner.post(StateEvent::DownloadComplete);
                }
                RemoteUpdateStatus::Error => {
                    self.inner.post(StateEvent::DownloadError {
                        message: message.clone().unwrap_or_else(|| "download failed".into()),
                    });
                }
            }
        } else if status == RemoteUpdateStatus::Error {
            // Failure before the check resolved: close the Checking state.
            self.inner.post(StateEvent::CheckError {
                message: message.clone().unwrap_or_else(|| "check failed".into()),
            });
        }
        if let Some(message) = message {
            self.inner.bus.publish(UpdateNotice::Error { message });
        }
    }
}

/// Recovery actions over a weak engine reference, breaking the
/// engine↔recovery cycle.
struct EngineRecoveryActions {
    inner: Weak<EngineInner>,
}

#[async_trait]
impl RecoveryActions for EngineRecoveryActions {
    async fn mark_failed_launch(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let (Some(db), Some(update)) = (inner.db.get(), inner.launched.lock().clone()) else {
            return;
        };
        let id = update.id;
        if let Err(e) = db.with(move |c| c.increment_failed_launch_count(&id)).await {
            tracing::warn!(%e, "failed to record failed launch");
        }
    }

    async fn mark_successful_launch(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let (Some(db), Some(update)) = (inner.db.get(), inner.launched.lock().clone()) else {
            return;
        };
        let id = update.id;
        if let Err(e) = db
            .with(move |c| c.increment_successful_launch_count(&id))
            .await
        {
            tracing::warn!(%e, "failed to record successful launch");
        }
    }

    async fn relaunch_from_catalog(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let (Some(db), Some(store)) = (inner.db.get(), inner.store.get()) else {
            return false;
        };
        let policy = inner.policy_slot.take_for_launch();
        let filters = inner.current_filters().await;
        match Launcher::from_catalog(
            db,
            store,
            inner.embedded.as_ref(),
            &policy.launcher,
            inner.scope_key(),
            &filters,
        )
        .await
        {
            Ok(Some(launcher)) => {
                tracing::warn!("relaunching from another stored update after failed launch");
                inner.restart_with(launcher, policy);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(%e, "relaunch candidate unusable");
                false
            }
        }
    }

    async fn relaunch_embedded(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        if !inner.config.has_embedded_update {
            return false;
        }
        let (Some(db), Some(store)) = (inner.db.get(), inner.store.get()) else {
            return false;
        };
        let launcher =
            match Launcher::embedded_from_catalog(db, store, inner.embedded.as_ref(), inner.scope_key())
                .await
            {
                Ok(Some(launcher)) => launcher,
                _ => Launcher::embedded_fallback(inner.embedded.as_ref()),
            };
        tracing::warn!("rolling back to embedded payload after failed launch");
        inner.restart_with(launcher, inner.policy_slot.take_for_launch());
        true
    }

    fn escalate(&self, message: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        tracing::error!(message, "unrecoverable launch failure; no fallback remains");
        inner.bus.publish(UpdateNotice::Error {
            message: message.to_string(),
        });
    }
}
