//! Resolution of a catalog update into concrete on-disk paths.

use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use gondola_assets::{EmbeddedAssets, FileStore};
use gondola_db::{DatabaseHandle, UpdateEntity, UpdateStatus};
use gondola_net::protocol::UpdateManifest;

use crate::{
    policy::{LauncherSelectionPolicy, ManifestFilters},
    EngineError, EngineResult,
};

/// Name handed to the host when no embedded manifest names one.
pub const EMBEDDED_BUNDLE_NAME: &str = "app.bundle";

/// A resolved launch decision: which update runs and where its launch
/// asset lives.
///
/// `launch_asset_path` is `None` only for an emergency launch, in which
/// case `bundle_asset_name` names the asset the host must load from its
/// own binary.
#[derive(Clone, Debug)]
pub struct Launcher {
    pub update: Option<UpdateEntity>,
    pub launch_asset_path: Option<PathBuf>,
    pub bundle_asset_name: Option<String>,
    pub is_emergency: bool,
}

impl Launcher {
    /// Pick the best stored update and resolve its launch asset.
    ///
    /// Returns `Ok(None)` when the policy admits nothing. A chosen update
    /// whose launch asset is missing or corrupt on disk is an error; the
    /// caller decides whether to fall back.
    pub async fn from_catalog(
        db: &DatabaseHandle,
        store: &FileStore,
        embedded: Option<&EmbeddedAssets>,
        policy: &Arc<dyn LauncherSelectionPolicy>,
        scope_key: &str,
        filters: &ManifestFilters,
    ) -> EngineResult<Option<Self>> {
        let scope = scope_key.to_string();
        let candidates = db.with(move |c| c.launch_candidates(&scope)).await?;
        let Some(update) = policy.launchable_update(&candidates, filters) else {
            return Ok(None);
        };

        let id = update.id;
        let asset = db
            .with(move |c| c.launch_asset_for_update(&id))
            .await?
            .ok_or_else(|| {
                EngineError::LaunchFailure(format!("update {id} has no launch asset"))
            })?;

        let embedded_path = asset.embedded_asset_filename.as_deref().and_then(|name| {
            embedded
                .filter(|e| e.has_asset(name))
                .map(|e| e.asset_path(name))
        });
        let path = if let Some(path) = embedded_path {
            path
        } else if store.contains_verified(&asset.key, &asset.expected_hash) {
            store.path_for(&asset.key)
        } else {
            return Err(EngineError::LaunchFailure(format!(
                "launch asset {} missing or corrupt on disk",
                asset.key
            )));
        };

        let is_embedded = update.status == UpdateStatus::Embedded;
        db.with(move |c| {
            c.mark_update_accessed(&id, Utc::now())?;
            if !is_embedded {
                c.set_update_status(&id, UpdateStatus::Launchable)?;
            }
            Ok(())
        })
        .await?;

        Ok(Some(Self {
            update: Some(update),
            launch_asset_path: Some(path),
            bundle_asset_name: None,
            is_emergency: false,
        }))
    }

    /// Launcher for the embedded update row specifically, ignoring the
    /// selection policy. Used after an accepted rollback directive and by
    /// error recovery when no other stored update remains.
    pub async fn embedded_from_catalog(
        db: &DatabaseHandle,
        store: &FileStore,
        embedded: Option<&EmbeddedAssets>,
        scope_key: &str,
    ) -> EngineResult<Option<Self>> {
        let scope = scope_key.to_string();
        let candidates = db.with(move |c| c.launch_candidates(&scope)).await?;
        let Some(update) = candidates
            .into_iter()
            .find(|u| u.status == UpdateStatus::Embedded)
        else {
            return Ok(None);
        };

        let id = update.id;
        let asset = db
            .with(move |c| c.launch_asset_for_update(&id))
            .await?
            .ok_or_else(|| {
                EngineError::LaunchFailure(format!("embedded update {id} has no launch asset"))
            })?;

        let embedded_path = asset.embedded_asset_filename.as_deref().and_then(|name| {
            embedded
                .filter(|e| e.has_asset(name))
                .map(|e| e.asset_path(name))
        });
        let path = if let Some(path) = embedded_path {
            path
        } else if store.contains_verified(&asset.key, &asset.expected_hash) {
            store.path_for(&asset.key)
        } else {
            return Err(EngineError::LaunchFailure(
                "embedded launch asset missing on disk".into(),
            ));
        };

        db.with(move |c| c.mark_update_accessed(&id, Utc::now())).await?;

        Ok(Some(Self {
            update: Some(update),
            launch_asset_path: Some(path),
            bundle_asset_name: None,
            is_emergency: false,
        }))
    }

    /// Launcher that bypasses the catalog entirely and points the host at
    /// its own embedded payload. Used when the database or updates
    /// directory is unusable and for rollback when nothing else runs.
    #[must_use]
    pub fn embedded_fallback(embedded: Option<&EmbeddedAssets>) -> Self {
        let bundle_asset_name = embedded
            .and_then(|e| e.load_manifest().ok())
            .and_then(|raw| UpdateManifest::parse(raw).ok())
            .and_then(|m| m.launch_asset.embedded_asset_filename)
            .unwrap_or_else(|| EMBEDDED_BUNDLE_NAME.to_string());

        Self {
            update: None,
            launch_asset_path: None,
            bundle_asset_name: Some(bundle_asset_name),
            is_emergency: true,
        }
    }
}
