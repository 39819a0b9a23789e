use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gondola_core::UpdateId;
use serde::Deserialize;
use url::Url;

use crate::ProtocolError;

/// One file referenced by a manifest.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAsset {
    /// Optional server-side key; the content hash is authoritative.
    #[serde(default)]
    pub key: Option<String>,
    /// Hex SHA-256 the downloaded bytes must match.
    pub hash: String,
    pub url: Url,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
    /// Present only in embedded manifests: the file name inside the
    /// binary's embedded assets directory.
    #[serde(default)]
    pub embedded_asset_filename: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDoc {
    id: String,
    created_at: DateTime<Utc>,
    runtime_version: String,
    launch_asset: ManifestAsset,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// A parsed update manifest.
///
/// `raw` preserves the exact document the server sent; it is what the
/// catalog stores and what state snapshots expose to the host.
#[derive(Clone, Debug)]
pub struct UpdateManifest {
    pub id: UpdateId,
    pub created_at: DateTime<Utc>,
    pub runtime_version: String,
    pub launch_asset: ManifestAsset,
    pub assets: Vec<ManifestAsset>,
    /// Filterable key/value fields, matched against server manifest
    /// filters. Keys are lowercased here, mirroring the filters header
    /// codec, so filter matching is case-insensitive end to end.
    pub metadata: BTreeMap<String, String>,
    pub raw: serde_json::Value,
}

impl UpdateManifest {
    pub fn parse(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let doc: ManifestDoc = serde_json::from_value(value.clone())?;
        let id = UpdateId::parse(&doc.id)
            .map_err(|e| ProtocolError::MalformedManifest(e.to_string()))?;
        Ok(Self {
            id,
            created_at: doc.created_at,
            runtime_version: doc.runtime_version,
            launch_asset: doc.launch_asset,
            assets: doc.assets,
            metadata: doc
                .metadata
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            raw: value,
        })
    }

    /// Launch asset first, then the rest, with the launch flag.
    pub fn all_assets(&self) -> impl Iterator<Item = (&ManifestAsset, bool)> {
        std::iter::once((&self.launch_asset, true))
            .chain(self.assets.iter().map(|a| (a, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(extra_assets: usize) -> serde_json::Value {
        let assets: Vec<serde_json::Value> = (0..extra_assets)
            .map(|i| {
                serde_json::json!({
                    "hash": format!("{:0>64}", i),
                    "url": format!("https://cdn.example.com/asset-{i}.png"),
                    "contentType": "image/png"
                })
            })
            .collect();
        serde_json::json!({
            "id": "3f2c2ab2-44e2-4a44-9e1f-0a89d1b2c3d4",
            "createdAt": "2024-03-01T12:00:00Z",
            "runtimeVersion": "exposed-1.0",
            "launchAsset": {
                "hash": "b".repeat(64),
                "url": "https://cdn.example.com/bundle.js"
            },
            "assets": assets,
            "metadata": {"branch": "main"}
        })
    }

    #[test]
    fn parses_and_keeps_raw_document() {
        let value = fixture(2);
        let manifest = UpdateManifest::parse(value.clone()).unwrap();
        assert_eq!(manifest.runtime_version, "exposed-1.0");
        assert_eq!(manifest.assets.len(), 2);
        assert_eq!(manifest.metadata.get("branch").unwrap(), "main");
        assert_eq!(manifest.raw, value);
    }

    #[test]
    fn metadata_keys_are_lowercased() {
        let mut value = fixture(0);
        value["metadata"] = serde_json::json!({"Branch": "main", "CHANNEL": "beta"});
        let manifest = UpdateManifest::parse(value).unwrap();
        assert_eq!(manifest.metadata.get("branch").unwrap(), "main");
        assert_eq!(manifest.metadata.get("channel").unwrap(), "beta");
        assert!(manifest.metadata.get("Branch").is_none());
    }

    #[test]
    fn all_assets_yields_launch_asset_first() {
        let manifest = UpdateManifest::parse(fixture(1)).unwrap();
        let flags: Vec<bool> = manifest.all_assets().map(|(_, launch)| launch).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn rejects_manifest_without_launch_asset() {
        let value = serde_json::json!({
            "id": "3f2c2ab2-44e2-4a44-9e1f-0a89d1b2c3d4",
            "createdAt": "2024-03-01T12:00:00Z",
            "runtimeVersion": "1.0"
        });
        assert!(UpdateManifest::parse(value).is_err());
    }

    #[test]
    fn rejects_malformed_id() {
        let mut value = fixture(0);
        value["id"] = serde_json::json!("not-a-uuid");
        assert!(matches!(
            UpdateManifest::parse(value),
            Err(ProtocolError::MalformedManifest(_))
        ));
    }
}
