use std::path::{Path, PathBuf};

use crate::AssetsResult;

/// File name of the manifest describing the payload shipped in the binary.
const EMBEDDED_MANIFEST_NAME: &str = "app.manifest";

/// Read-only view over the assets bundled into the application binary.
///
/// The host build step materializes these into a directory; assets are
/// looked up by the `embeddedAssetFilename` recorded in the catalog.
#[derive(Clone, Debug)]
pub struct EmbeddedAssets {
    dir: PathBuf,
}

impl EmbeddedAssets {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(EMBEDDED_MANIFEST_NAME)
    }

    /// Load and parse the embedded manifest document.
    pub fn load_manifest(&self) -> AssetsResult<serde_json::Value> {
        let bytes = std::fs::read(self.manifest_path())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[must_use]
    pub fn asset_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    #[must_use]
    pub fn has_asset(&self, filename: &str) -> bool {
        self.asset_path(filename).is_file()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn loads_manifest_and_resolves_assets() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(EMBEDDED_MANIFEST_NAME),
            br#"{"id":"00000000-0000-4000-8000-000000000000"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("bundle.js"), b"js").unwrap();

        let embedded = EmbeddedAssets::new(dir.path());
        let manifest = embedded.load_manifest().unwrap();
        assert!(manifest["id"].is_string());
        assert!(embedded.has_asset("bundle.js"));
        assert!(!embedded.has_asset("missing.png"));
    }

    #[test]
    fn missing_manifest_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let embedded = EmbeddedAssets::new(dir.path());
        assert!(embedded.load_manifest().is_err());
    }
}
