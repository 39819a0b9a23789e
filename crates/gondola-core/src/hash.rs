use sha2::{Digest, Sha256};

use crate::{CoreError, CoreResult};

/// SHA-256 digest of an asset's contents.
///
/// The hex encoding of this digest is both the wire-protocol value
/// (`expectedHash` in manifests) and the on-disk file name in the
/// content-addressed store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    /// Hash raw bytes.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parse a lowercase or uppercase hex digest.
    pub fn parse_hex(hex_str: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex_str).map_err(|_| CoreError::InvalidDigest(hex_str.into()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidDigest(hex_str.into()))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_round_trips_through_hex() {
        let h = Sha256Hash::digest(b"bundle contents");
        let parsed = Sha256Hash::parse_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(Sha256Hash::digest(b"abc"), Sha256Hash::digest(b"abc"));
        assert_ne!(Sha256Hash::digest(b"abc"), Sha256Hash::digest(b"abd"));
    }

    #[test]
    fn parse_rejects_short_and_non_hex_input() {
        assert!(Sha256Hash::parse_hex("deadbeef").is_err());
        assert!(Sha256Hash::parse_hex("zz").is_err());
    }
}
