use std::path::{Path, PathBuf};

use gondola_core::{AssetKey, Sha256Hash};

use crate::{AssetsError, AssetsResult};

/// Subdirectory of the updates directory holding content-addressed files.
pub const ASSETS_DIR_NAME: &str = ".expo-internal";

/// Content-addressed file store.
///
/// Cheap to clone conceptually (it is just a path); all methods are
/// synchronous filesystem calls over small files.
#[derive(Clone, Debug)]
pub struct FileStore {
    assets_dir: PathBuf,
}

impl FileStore {
    /// Create the store under `updates_dir`, creating directories as
    /// needed and probing that they are writable.
    pub fn create(updates_dir: &Path) -> AssetsResult<Self> {
        let assets_dir = updates_dir.join(ASSETS_DIR_NAME);
        std::fs::create_dir_all(&assets_dir)
            .map_err(|e| AssetsError::DirectoryUnavailable(format!("{}: {e}", assets_dir.display())))?;

        let probe = assets_dir.join(".probe");
        std::fs::write(&probe, b"")
            .map_err(|e| AssetsError::DirectoryUnavailable(format!("{}: {e}", assets_dir.display())))?;
        let _ = std::fs::remove_file(&probe);

        Ok(Self { assets_dir })
    }

    #[must_use]
    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    #[must_use]
    pub fn path_for(&self, key: &AssetKey) -> PathBuf {
        self.assets_dir.join(key.as_str())
    }

    #[must_use]
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.path_for(key).is_file()
    }

    /// True iff the file exists and re-hashes to `expected`.
    #[must_use]
    pub fn contains_verified(&self, key: &AssetKey, expected: &Sha256Hash) -> bool {
        matches!(self.verify(key, expected), Ok(true))
    }

    /// Re-hash the stored file against `expected`. `Ok(false)` covers both
    /// a missing file and a corrupt one.
    pub fn verify(&self, key: &AssetKey, expected: &Sha256Hash) -> AssetsResult<bool> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(false);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Sha256Hash::digest(&bytes) == *expected)
    }

    /// Store `bytes` under their content hash.
    ///
    /// The digest is checked against `expected` before anything touches
    /// disk, so a corrupt download leaves no file behind. Writing goes
    /// temp file → atomic rename; if a matching file already exists the
    /// write is skipped, making repeated loads of the same response
    /// idempotent.
    pub fn write_verified(&self, bytes: &[u8], expected: &Sha256Hash) -> AssetsResult<PathBuf> {
        let actual = Sha256Hash::digest(bytes);
        if actual != *expected {
            return Err(AssetsError::DigestMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let key = AssetKey::from_hash(expected);
        let path = self.path_for(&key);
        if self.contains_verified(&key, expected) {
            tracing::debug!(key = %key, "asset already stored, skipping write");
            return Ok(path);
        }

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, bytes)?;
        std::fs::rename(&temp_path, &path)?;
        tracing::debug!(key = %key, len = bytes.len(), "asset stored");
        Ok(path)
    }

    /// Remove a stored file. Missing files are not an error; the reaper
    /// may race a previous cleanup.
    pub fn remove(&self, key: &AssetKey) -> AssetsResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::create(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_makes_hidden_assets_dir() {
        let (dir, store) = store();
        assert_eq!(store.assets_dir(), dir.path().join(ASSETS_DIR_NAME));
        assert!(store.assets_dir().is_dir());
    }

    #[test]
    fn write_verified_stores_under_content_hash() {
        let (_dir, store) = store();
        let bytes = b"launch bundle";
        let hash = Sha256Hash::digest(bytes);
        let path = store.write_verified(bytes, &hash).unwrap();

        let key = AssetKey::from_hash(&hash);
        assert_eq!(path, store.path_for(&key));
        assert!(store.contains_verified(&key, &hash));
        assert_eq!(std::fs::read(path).unwrap(), bytes);
    }

    #[test]
    fn write_verified_rejects_wrong_digest_and_leaves_nothing() {
        let (_dir, store) = store();
        let expected = Sha256Hash::digest(b"what the server promised");
        let err = store.write_verified(b"what actually arrived", &expected);
        assert!(matches!(err, Err(AssetsError::DigestMismatch { .. })));

        let key = AssetKey::from_hash(&expected);
        assert!(!store.contains(&key));
        // No temp file left behind either.
        let leftovers: Vec<_> = std::fs::read_dir(store.assets_dir())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn rewrite_of_existing_asset_is_a_no_op() {
        let (_dir, store) = store();
        let bytes = b"shared asset";
        let hash = Sha256Hash::digest(bytes);
        let first = store.write_verified(bytes, &hash).unwrap();
        let second = store.write_verified(bytes, &hash).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corrupted_file_fails_verification_and_is_replaced() {
        let (_dir, store) = store();
        let bytes = b"good contents";
        let hash = Sha256Hash::digest(bytes);
        store.write_verified(bytes, &hash).unwrap();

        let key = AssetKey::from_hash(&hash);
        std::fs::write(store.path_for(&key), b"bit rot").unwrap();
        assert!(!store.contains_verified(&key, &hash));

        store.write_verified(bytes, &hash).unwrap();
        assert!(store.contains_verified(&key, &hash));
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, store) = store();
        let hash = Sha256Hash::digest(b"z");
        let key = AssetKey::from_hash(&hash);
        store.write_verified(b"z", &hash).unwrap();
        store.remove(&key).unwrap();
        store.remove(&key).unwrap();
        assert!(!store.contains(&key));
    }
}
