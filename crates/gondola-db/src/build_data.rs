use serde::{Deserialize, Serialize};

use crate::{catalog::keys, Catalog, DbResult};

/// Fingerprint of the binary configuration the catalog was written under.
///
/// Stored updates are only meaningful for the runtime/scope/server they
/// were fetched for; when any of the three changes, the catalog rows are
/// stale and must go.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildData {
    pub runtime_version: String,
    pub scope_key: String,
    pub update_url: String,
}

impl BuildData {
    /// Compare the persisted fingerprint with `current`. On mismatch,
    /// drop every update and asset row (on-disk files stay: they are
    /// content-addressed and safe to re-reference) and persist the new
    /// fingerprint. Returns true when the catalog was cleared.
    pub fn ensure_consistency(catalog: &Catalog, current: &BuildData) -> DbResult<bool> {
        let stored: Option<BuildData> = catalog
            .json_value(keys::BUILD_DATA, &current.scope_key)?
            .and_then(|v| serde_json::from_value(v).ok());

        if stored.as_ref() == Some(current) {
            return Ok(false);
        }

        if let Some(previous) = &stored {
            tracing::warn!(
                ?previous,
                ?current,
                "build fingerprint changed, clearing stored updates"
            );
            catalog.clear_all_updates()?;
        }

        catalog.set_json_value(
            keys::BUILD_DATA,
            &current.scope_key,
            &serde_json::to_value(current)?,
        )?;
        Ok(stored.is_some())
    }
}
