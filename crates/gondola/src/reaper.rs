//! Deletion of stored updates the selection policy no longer needs.

use gondola_assets::FileStore;
use gondola_db::{DatabaseHandle, UpdateEntity};

use crate::{
    policy::{ManifestFilters, SelectionPolicy},
    EngineResult,
};

/// Run one reap pass: ask the policy which updates may go, delete their
/// rows, then unlink files no surviving update references.
///
/// Rows commit before any file is removed, so a crash mid-pass leaves
/// extra files (harmless, content-addressed) rather than dangling rows.
pub async fn run_reaper(
    db: &DatabaseHandle,
    store: &FileStore,
    policy: &SelectionPolicy,
    launched: Option<&UpdateEntity>,
    filters: &ManifestFilters,
    scope_key: &str,
) -> EngineResult<usize> {
    let scope = scope_key.to_string();
    let all = db.with(move |c| c.all_updates(&scope)).await?;
    let doomed = policy.reaper.updates_to_delete(&all, launched, filters);
    if doomed.is_empty() {
        return Ok(0);
    }

    let count = doomed.len();
    tracing::debug!(count, "reaping stored updates");
    let orphans = db
        .with(move |c| {
            c.delete_updates(&doomed)?;
            c.delete_orphaned_assets()
        })
        .await?;

    for asset in orphans {
        if let Err(e) = store.remove(&asset.key) {
            tracing::warn!(key = %asset.key, %e, "failed to remove reaped asset file");
        }
    }
    Ok(count)
}
