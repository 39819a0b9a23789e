use std::path::Path;

use crate::{Catalog, DbError, DbResult};

type Job = Box<dyn FnOnce(&mut Catalog) + Send + 'static>;

/// Handle to the catalog's dedicated worker thread.
///
/// The underlying connection never leaves that thread; callers submit
/// closures and await their results. Jobs run strictly in submission
/// order, so a sequence of operations posted from one task is atomic
/// with respect to other callers even without an explicit transaction.
#[derive(Clone)]
pub struct DatabaseHandle {
    tx: kanal::Sender<Job>,
}

impl DatabaseHandle {
    /// Open the catalog at `path` and spawn its worker thread.
    ///
    /// Open errors surface here, synchronously, so the engine can fall
    /// back to an emergency launch before anything else runs.
    pub fn open(path: &Path) -> DbResult<Self> {
        Self::spawn(Catalog::open(path)?)
    }

    /// In-memory catalog behind a worker thread, for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::spawn(Catalog::open_in_memory()?)
    }

    fn spawn(catalog: Catalog) -> DbResult<Self> {
        let (tx, rx) = kanal::unbounded::<Job>();
        std::thread::Builder::new()
            .name("gondola-db".into())
            .spawn(move || {
                let mut catalog = catalog;
                while let Ok(job) = rx.recv() {
                    job(&mut catalog);
                }
                tracing::debug!("database worker stopped");
            })?;
        Ok(Self { tx })
    }

    /// Run `f` on the worker thread and await its result.
    pub async fn with<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Catalog) -> DbResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let job: Job = Box::new(move |catalog| {
            let _ = reply_tx.send(f(catalog));
        });
        self.tx.send(job).map_err(|_| DbError::WorkerClosed)?;
        reply_rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    /// Blocking twin of [`with`](Self::with), for callers outside the
    /// runtime (the host's `launch_asset_file` path).
    pub fn with_blocking<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Catalog) -> DbResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let job: Job = Box::new(move |catalog| {
            let _ = reply_tx.send(f(catalog));
        });
        self.tx.send(job).map_err(|_| DbError::WorkerClosed)?;
        reply_rx.blocking_recv().map_err(|_| DbError::WorkerClosed)?
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gondola_core::UpdateId;
    use uuid::Uuid;

    use super::*;
    use crate::{UpdateEntity, UpdateStatus};

    fn sample_update() -> UpdateEntity {
        UpdateEntity {
            id: UpdateId::new(Uuid::new_v4()),
            commit_time: Utc::now(),
            runtime_version: "1.0".into(),
            scope_key: "scope".into(),
            manifest: serde_json::json!({"id": "x"}),
            manifest_filters: Default::default(),
            status: UpdateStatus::Ready,
            failed_launch_count: 0,
            successful_launch_count: 0,
            last_accessed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let handle = DatabaseHandle::open_in_memory().unwrap();
        let update = sample_update();
        let id = update.id;

        handle
            .with(move |catalog| catalog.insert_update(&update).map(|_| ()))
            .await
            .unwrap();
        handle
            .with(move |catalog| catalog.increment_failed_launch_count(&id))
            .await
            .unwrap();
        let loaded = handle
            .with(move |catalog| catalog.update_by_id(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.failed_launch_count, 1);
    }

    #[tokio::test]
    async fn errors_propagate_to_caller() {
        let handle = DatabaseHandle::open_in_memory().unwrap();
        let result: DbResult<()> = handle.with(|_| Err(DbError::InvalidStatus(42))).await;
        assert!(matches!(result, Err(DbError::InvalidStatus(42))));
    }

    #[test]
    fn blocking_access_works_off_runtime() {
        let handle = DatabaseHandle::open_in_memory().unwrap();
        let update = sample_update();
        let id = update.id;
        handle
            .with_blocking(move |catalog| catalog.insert_update(&update).map(|_| ()))
            .unwrap();
        let loaded = handle
            .with_blocking(move |catalog| catalog.update_by_id(&id))
            .unwrap();
        assert!(loaded.is_some());
    }
}
