use uuid::Uuid;

use crate::{CoreError, CoreResult, Sha256Hash};

/// Server-assigned identity of one published update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateId(Uuid);

impl UpdateId {
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::InvalidUpdateId(s.into()))
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Hyphenated lowercase, the form servers publish and the catalog stores.
        write!(f, "{}", self.0)
    }
}

/// Content-addressed key of a stored asset: the hex SHA-256 of its bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey(String);

impl AssetKey {
    /// Key for the given content digest.
    #[must_use]
    pub fn from_hash(hash: &Sha256Hash) -> Self {
        Self(hash.to_hex())
    }

    /// Accept an externally supplied key, validating it is a hex digest.
    pub fn parse(s: &str) -> CoreResult<Self> {
        Sha256Hash::parse_hex(s)?;
        Ok(Self(s.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_hash(&self) -> CoreResult<Sha256Hash> {
        Sha256Hash::parse_hex(&self.0)
    }
}

impl std::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn update_id_round_trips() {
        let id = UpdateId::new(Uuid::new_v4());
        assert_eq!(UpdateId::parse(&id.to_string()).unwrap(), id);
    }

    #[rstest]
    #[case("not-a-uuid")]
    #[case("")]
    fn update_id_rejects_garbage(#[case] s: &str) {
        assert!(UpdateId::parse(s).is_err());
    }

    #[test]
    fn asset_key_matches_digest_of_contents() {
        let hash = Sha256Hash::digest(b"asset bytes");
        let key = AssetKey::from_hash(&hash);
        assert_eq!(key.to_hash().unwrap(), hash);
    }

    #[test]
    fn asset_key_normalizes_case() {
        let hash = Sha256Hash::digest(b"x");
        let upper = hash.to_hex().to_ascii_uppercase();
        assert_eq!(AssetKey::parse(&upper).unwrap(), AssetKey::from_hash(&hash));
    }
}
