//! Loader task ordering guarantees: callbacks are serialized, `onRemote*`
//! events precede the terminal one, and the outcome is delivered once.


use std::{sync::Arc, time::Duration};

use fixture::{
    asset_route, directive_route, manifest_json, manifest_route, no_update_directive,
    seed_ready_update, serve, test_config,
};
use gondola::{
    EngineError, LaunchOutcome, LoaderTask, LoaderTaskDelegate, RemoteCheckOutcome,
    RemoteLoadStatus, RemoteUpdateStatus,
};
use gondola_assets::FileStore;
use gondola_db::{DatabaseHandle, UpdateEntity, DB_FILE_NAME};
use gondola_net::HttpClient;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

const U_NEW: &str = "11111111-1111-4111-8111-111111111111";
const U_CACHED: &str = "22222222-2222-4222-8222-222222222222";

#[derive(Default)]
struct RecordingDelegate {
    calls: Mutex<Vec<String>>,
    done_tx: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl RecordingDelegate {
    fn with_done() -> (Arc<Self>, tokio::sync::oneshot::Receiver<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let delegate = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            done_tx: Mutex::new(Some(tx)),
        });
        (delegate, rx)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn assert_calls(&self, expected: &[&str]) {
        let calls = self.calls();
        let calls: Vec<&str> = calls.iter().map(String::as_str).collect();
        assert_eq!(calls, expected);
    }
}

impl LoaderTaskDelegate for RecordingDelegate {
    fn on_cached_update_loaded(&self, _update: &UpdateEntity) -> bool {
        self.calls.lock().push("cached".into());
        true
    }

    fn on_remote_check_started(&self) {
        self.calls.lock().push("check_started".into());
    }

    fn on_remote_check_finished(&self, outcome: &RemoteCheckOutcome) {
        let tag = match outcome {
            RemoteCheckOutcome::NoUpdateAvailable => "check_finished:none",
            RemoteCheckOutcome::UpdateAvailable { .. } => "check_finished:update",
            RemoteCheckOutcome::RollBackToEmbedded { .. } => "check_finished:rollback",
        };
        self.calls.lock().push(tag.into());
    }

    fn on_remote_load_started(&self) {
        self.calls.lock().push("load_started".into());
    }

    fn on_remote_update_finished(
        &self,
        status: RemoteUpdateStatus,
        _update: Option<&UpdateEntity>,
        _error: Option<&EngineError>,
    ) {
        self.calls.lock().push(format!("finished:{status:?}"));
        if let Some(tx) = self.done_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

fn task_for(base: &str, dir: &TempDir) -> (LoaderTask, watch::Receiver<RemoteLoadStatus>) {
    let config = Arc::new(test_config(base, dir.path()));
    let (status_tx, status_rx) = watch::channel(RemoteLoadStatus::Idle);
    let task = LoaderTask {
        db: DatabaseHandle::open(&dir.path().join(DB_FILE_NAME)).unwrap(),
        store: FileStore::create(dir.path()).unwrap(),
        embedded: None,
        http: HttpClient::new(config.net.clone()),
        config,
        policy: gondola::policy::SelectionPolicy::standard(fixture::RUNTIME),
        remote_status: status_tx,
    };
    (task, status_rx)
}

#[tokio::test]
async fn new_update_path_fires_callbacks_in_order() {
    let dir = TempDir::new().unwrap();
    seed_ready_update(dir.path(), U_CACHED, 100, b"cached bundle", 0);

    let bundle = b"new bundle".to_vec();
    let asset_base = serve(asset_route("/assets/bundle.js", bundle.clone())).await;
    let manifest = manifest_json(
        U_NEW,
        "2024-02-01T00:00:00Z",
        &format!("{asset_base}/assets/bundle.js"),
        &bundle,
    );
    let base = serve(manifest_route(manifest, Duration::ZERO)).await;

    let (task, status_rx) = task_for(&base, &dir);
    let (delegate, done) = RecordingDelegate::with_done();
    let LaunchOutcome {
        launcher,
        is_up_to_date,
    } = task.run(delegate.clone()).await.unwrap();

    done.await.unwrap();
    delegate.assert_calls(&[
        "cached",
        "check_started",
        "check_finished:update",
        "load_started",
        "finished:UpdateLoaded",
    ]);
    assert!(is_up_to_date);
    assert_eq!(launcher.update.unwrap().id.to_string(), U_NEW);
    assert_eq!(*status_rx.borrow(), RemoteLoadStatus::NewUpdateLoaded);
}

#[tokio::test]
async fn no_update_path_serves_cache_and_reports_up_to_date() {
    let dir = TempDir::new().unwrap();
    let (cached_id, _) = seed_ready_update(dir.path(), U_CACHED, 100, b"cached bundle", 0);

    let base = serve(directive_route(no_update_directive(), Duration::ZERO)).await;
    let (task, _status_rx) = task_for(&base, &dir);
    let (delegate, done) = RecordingDelegate::with_done();
    let outcome = task.run(delegate.clone()).await.unwrap();

    done.await.unwrap();
    assert!(outcome.is_up_to_date);
    assert_eq!(outcome.launcher.update.unwrap().id, cached_id);
    delegate.assert_calls(&[
        "cached",
        "check_started",
        "check_finished:none",
        "finished:NoUpdateAvailable",
    ]);
}

#[tokio::test]
async fn empty_catalog_and_unreachable_server_fails() {
    let dir = TempDir::new().unwrap();
    // Nothing listens on this port.
    let (task, _status_rx) = task_for("http://127.0.0.1:9", &dir);
    let (delegate, done) = RecordingDelegate::with_done();
    let result = task.run(delegate.clone()).await;

    assert!(result.is_err());
    done.await.unwrap();
    let calls = delegate.calls();
    assert_eq!(calls.first().map(String::as_str), Some("check_started"));
    assert_eq!(
        calls.last().map(String::as_str),
        Some("finished:Error")
    );
}

#[tokio::test]
async fn timer_outcome_precedes_slow_remote_finish() {
    let dir = TempDir::new().unwrap();
    let (cached_id, _) = seed_ready_update(dir.path(), U_CACHED, 100, b"cached bundle", 0);

    let base = serve(directive_route(
        no_update_directive(),
        Duration::from_millis(400),
    ))
    .await;
    let dir_path = dir.path().to_path_buf();
    let config = test_config(&base, &dir_path).with_launch_wait(Duration::from_millis(50));
    let (status_tx, _status_rx) = watch::channel(RemoteLoadStatus::Idle);
    let task = LoaderTask {
        db: DatabaseHandle::open(&dir_path.join(DB_FILE_NAME)).unwrap(),
        store: FileStore::create(&dir_path).unwrap(),
        embedded: None,
        http: HttpClient::new(config.net.clone()),
        config: Arc::new(config),
        policy: gondola::policy::SelectionPolicy::standard(fixture::RUNTIME),
        remote_status: status_tx,
    };

    let (delegate, done) = RecordingDelegate::with_done();
    let started = std::time::Instant::now();
    let outcome = task.run(delegate.clone()).await.unwrap();

    // Timer outcome: cached update, server verdict unknown.
    assert!(started.elapsed() < Duration::from_millis(350));
    assert!(!outcome.is_up_to_date);
    assert_eq!(outcome.launcher.update.unwrap().id, cached_id);

    // The remote side still completes afterwards.
    done.await.unwrap();
    assert_eq!(
        delegate.calls().last().map(String::as_str),
        Some("finished:NoUpdateAvailable")
    );
}
