//! Remote update loader: one protocol round-trip plus verified asset
//! downloads, committed to the catalog in a single transaction.

pub mod task;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::Utc;
use futures::StreamExt;
use gondola_assets::FileStore;
use gondola_core::{AssetKey, Sha256Hash, UpdateId};
use gondola_db::{keys, AssetEntity, DatabaseHandle, UpdateEntity, UpdateStatus};
use gondola_net::{
    protocol::{self, ManifestAsset, UpdateDirective, UpdateManifest, UpdateResponse},
    Headers, HttpClient, ProtocolError,
};

use crate::{config::UpdatesConfig, EngineError, EngineResult};

/// Progress of a remote load, exposed so error recovery can hold its
/// verdict while a replacement update is on the way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RemoteLoadStatus {
    #[default]
    Idle,
    NewUpdateLoading,
    NewUpdateLoaded,
}

/// What one loader invocation produced.
#[derive(Clone, Debug)]
pub struct LoaderResult {
    /// The newly stored update, `Ready` in the catalog.
    pub update: Option<UpdateEntity>,
    /// Directive received alongside (or instead of) a manifest.
    pub directive: Option<UpdateDirective>,
}

/// Hooks a caller gets during one loader invocation.
///
/// All callbacks fire on the loader's task, in order; per-asset progress
/// callbacks report cumulative counts.
pub trait LoaderCallbacks: Send + Sync {
    /// Called once with the parsed response, before any download. Return
    /// false to skip downloading a manifest present in the response.
    fn on_update_response_loaded(&self, response: &UpdateResponse) -> bool {
        let _ = response;
        true
    }

    fn on_asset_loaded(&self, asset: &ManifestAsset, successful: usize, failed: usize, total: usize) {
        let _ = (asset, successful, failed, total);
    }
}

/// Callback set that accepts everything silently.
pub struct NoopLoaderCallbacks;

impl LoaderCallbacks for NoopLoaderCallbacks {}

/// Policy verdict over one parsed server response.
#[derive(Clone, Debug)]
pub(crate) enum ResponseDecision {
    NoUpdate,
    Download { manifest: serde_json::Value },
    Rollback { commit_time: chrono::DateTime<chrono::Utc> },
}

/// Run the loader selection policy against a parsed response.
pub(crate) fn evaluate_response(
    policy: &crate::policy::SelectionPolicy,
    response: &UpdateResponse,
    launched: Option<&UpdateEntity>,
    embedded: Option<&UpdateEntity>,
    scope_key: &str,
) -> ResponseDecision {
    if let Some(UpdateDirective::RollBackToEmbedded { commit_time }) = &response.directive {
        if policy.loader.should_load_rollback_directive(
            *commit_time,
            embedded,
            launched,
            &response.manifest_filters,
        ) {
            return ResponseDecision::Rollback {
                commit_time: *commit_time,
            };
        }
        return ResponseDecision::NoUpdate;
    }

    if let Some(manifest) = &response.manifest {
        let candidate = entity_from_manifest(manifest, scope_key);
        if policy
            .loader
            .should_load_new_update(&candidate, launched, &response.manifest_filters)
        {
            return ResponseDecision::Download {
                manifest: manifest.raw.clone(),
            };
        }
    }

    ResponseDecision::NoUpdate
}

/// Build a catalog entity from a wire manifest. Born `Pending`; the
/// commit transaction flips it to `Ready` once assets are in place.
#[must_use]
pub fn entity_from_manifest(manifest: &UpdateManifest, scope_key: &str) -> UpdateEntity {
    UpdateEntity {
        id: manifest.id,
        commit_time: manifest.created_at,
        runtime_version: manifest.runtime_version.clone(),
        scope_key: scope_key.to_string(),
        manifest: manifest.raw.clone(),
        manifest_filters: manifest.metadata.clone(),
        status: UpdateStatus::Pending,
        failed_launch_count: 0,
        successful_launch_count: 0,
        last_accessed_at: Utc::now(),
    }
}

/// Protocol client for one server round-trip.
pub struct RemoteLoader {
    pub http: HttpClient,
    pub db: DatabaseHandle,
    pub store: FileStore,
    pub config: Arc<UpdatesConfig>,
    /// Update currently running in the host, echoed to the server.
    pub launched_update_id: Option<UpdateId>,
    pub embedded_update_id: Option<UpdateId>,
}

impl RemoteLoader {
    /// Request headers: persisted server-defined headers first, then the
    /// static config headers, then the protocol fields.
    async fn compose_headers(&self) -> EngineResult<Headers> {
        let scope = self.config.scope_key().to_string();
        let (server_defined, extra_params) = self
            .db
            .with(move |c| {
                Ok((
                    c.string_map(keys::SERVER_DEFINED_HEADERS, &scope)?,
                    c.extra_params(&scope)?,
                ))
            })
            .await?;

        let mut headers = Headers::new();
        headers.insert("accept", "multipart/mixed, application/json");
        for (k, v) in &server_defined {
            headers.insert(k.clone(), v.clone());
        }
        headers.extend(&self.config.request_headers);
        headers.insert("expo-protocol-version", "1");
        headers.insert("expo-runtime-version", self.config.runtime_version.clone());
        if let Some(id) = self.launched_update_id {
            headers.insert("expo-current-update-id", id.to_string());
        }
        if let Some(id) = self.embedded_update_id {
            headers.insert("expo-embedded-update-id", id.to_string());
        }
        if !extra_params.is_empty() {
            let joined = extra_params
                .iter()
                .map(|(k, v)| format!("{k}=\"{v}\""))
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert("expo-extra-params", joined);
        }
        Ok(headers)
    }

    /// One GET against the update URL, parsed; the response's manifest
    /// filters and server-defined headers are persisted as a side effect.
    pub async fn check(&self) -> EngineResult<UpdateResponse> {
        let url = self
            .config
            .update_url
            .clone()
            .ok_or_else(|| EngineError::ConfigInvalid("updateUrl not configured".into()))?;
        let headers = self.compose_headers().await?;
        let resp = self.http.get(url, Some(&headers)).await?;
        let parsed = protocol::parse_update_response(&resp)?;

        let scope = self.config.scope_key().to_string();
        let filters = parsed.manifest_filters.clone();
        let server_defined = parsed.server_defined_headers.clone();
        self.db
            .with(move |c| {
                c.set_string_map(keys::MANIFEST_FILTERS, &scope, &filters)?;
                if let Some(map) = server_defined {
                    c.set_string_map(keys::SERVER_DEFINED_HEADERS, &scope, &map)?;
                }
                Ok(())
            })
            .await?;

        Ok(parsed)
    }

    /// The full loader sequence: check, veto point, asset downloads, one
    /// commit transaction.
    ///
    /// A rollback directive short-circuits the asset fetch. Any network,
    /// digest or database failure is terminal for this invocation; assets
    /// already stored stay (content-addressed, reused next attempt) and
    /// the update row remains `Pending`, invisible to selection.
    pub async fn load(&self, callbacks: &dyn LoaderCallbacks) -> EngineResult<LoaderResult> {
        let response = self.check().await?;
        let should_download = callbacks.on_update_response_loaded(&response);

        if matches!(
            response.directive,
            Some(UpdateDirective::RollBackToEmbedded { .. })
        ) {
            return Ok(LoaderResult {
                update: None,
                directive: response.directive,
            });
        }

        let Some(manifest) = &response.manifest else {
            return Ok(LoaderResult {
                update: None,
                directive: response.directive,
            });
        };
        if !should_download {
            return Ok(LoaderResult {
                update: None,
                directive: response.directive,
            });
        }

        if manifest.runtime_version != self.config.runtime_version {
            return Err(EngineError::RuntimeVersionMismatch {
                expected: self.config.runtime_version.clone(),
                got: manifest.runtime_version.clone(),
            });
        }

        let assets = self.download_assets(manifest, callbacks).await?;
        let mut entity = entity_from_manifest(manifest, self.config.scope_key());
        let to_commit = entity.clone();
        self.db
            .with(move |c| c.commit_update_with_assets(&to_commit, &assets))
            .await?;
        entity.status = UpdateStatus::Ready;

        tracing::debug!(id = %entity.id, commit_time = %entity.commit_time, "update stored");
        Ok(LoaderResult {
            update: Some(entity),
            directive: response.directive,
        })
    }

    async fn download_assets(
        &self,
        manifest: &UpdateManifest,
        callbacks: &dyn LoaderCallbacks,
    ) -> EngineResult<Vec<(AssetEntity, bool)>> {
        let total = manifest.assets.len() + 1;
        let successful = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let owned_assets: Vec<(ManifestAsset, bool)> = manifest
            .all_assets()
            .map(|(asset, is_launch)| (asset.clone(), is_launch))
            .collect();

        let results: Vec<EngineResult<(AssetEntity, bool)>> =
            futures::stream::iter(owned_assets.into_iter().map(|(asset, is_launch)| {
                self.download_one_asset(asset, is_launch, &successful, &failed, total, callbacks)
            }))
            .buffer_unordered(self.config.asset_parallelism.max(1))
            .collect()
            .await;

        results.into_iter().collect()
    }

    async fn download_one_asset(
        &self,
        asset: ManifestAsset,
        is_launch: bool,
        successful: &AtomicUsize,
        failed: &AtomicUsize,
        total: usize,
        callbacks: &dyn LoaderCallbacks,
    ) -> EngineResult<(AssetEntity, bool)> {
        let outcome = self.fetch_one(&asset).await;
        match &outcome {
            Ok(_) => successful.fetch_add(1, Ordering::SeqCst),
            Err(_) => failed.fetch_add(1, Ordering::SeqCst),
        };
        callbacks.on_asset_loaded(
            &asset,
            successful.load(Ordering::SeqCst),
            failed.load(Ordering::SeqCst),
            total,
        );
        outcome.map(|entity| (entity, is_launch))
    }

    /// Fetch one asset unless an identical verified copy is already
    /// stored. The digest check happens before anything is renamed into
    /// the content-addressed path.
    async fn fetch_one(&self, asset: &ManifestAsset) -> EngineResult<AssetEntity> {
        let hash = Sha256Hash::parse_hex(&asset.hash).map_err(|e| {
            EngineError::Protocol(ProtocolError::MalformedManifest(e.to_string()))
        })?;
        let key = AssetKey::from_hash(&hash);

        if self.store.contains_verified(&key, &hash) {
            tracing::debug!(key = %key, "asset already on disk, skipping download");
        } else {
            let bytes = self
                .http
                .get_bytes(asset.url.clone(), Some(&self.config.request_headers))
                .await?;
            self.store.write_verified(&bytes, &hash)?;
        }

        Ok(AssetEntity {
            key,
            asset_type: asset.content_type.clone(),
            url: Some(asset.url.clone()),
            expected_hash: hash,
            downloaded_at: Some(Utc::now()),
            embedded_asset_filename: asset.embedded_asset_filename.clone(),
            marked_for_deletion: false,
        })
    }
}
