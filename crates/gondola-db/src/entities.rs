use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gondola_core::{AssetKey, Sha256Hash, UpdateId};
use url::Url;

use crate::{DbError, DbResult};

/// Lifecycle state of a stored update.
///
/// Discriminants are the on-disk values and must not be renumbered.
/// `Ready0` is a legacy alias of `Ready` written by old clients; it is
/// read back as a launch candidate but never written anymore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Manifest persisted, assets not yet verified on disk.
    Pending = 0,
    /// All assets present and verified.
    Ready = 1,
    /// Admitted by the selection policy at least once.
    Launchable = 2,
    /// The payload shipped inside the binary.
    Embedded = 3,
    /// Legacy `Ready` written by old clients.
    Ready0 = 4,
}

impl UpdateStatus {
    pub fn from_i64(v: i64) -> DbResult<Self> {
        match v {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Ready),
            2 => Ok(Self::Launchable),
            3 => Ok(Self::Embedded),
            4 => Ok(Self::Ready0),
            other => Err(DbError::InvalidStatus(other)),
        }
    }

    #[must_use]
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Whether the selection policy may consider this update at all.
    /// `Pending` rows are invisible until their assets are verified.
    #[must_use]
    pub fn is_launch_candidate(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One remotely published (or embedded) payload.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateEntity {
    pub id: UpdateId,
    pub commit_time: DateTime<Utc>,
    pub runtime_version: String,
    pub scope_key: String,
    /// The manifest document exactly as the server sent it.
    pub manifest: serde_json::Value,
    /// Filterable fields of this update, matched against server filters.
    /// Keys are lowercase; the wire layer normalizes them on parse.
    pub manifest_filters: BTreeMap<String, String>,
    pub status: UpdateStatus,
    pub failed_launch_count: u32,
    pub successful_launch_count: u32,
    pub last_accessed_at: DateTime<Utc>,
}

impl UpdateEntity {
    /// An update that crashed on its only launch is quarantined from
    /// selection until some launch of it succeeds.
    #[must_use]
    pub fn has_failed_without_success(&self) -> bool {
        self.failed_launch_count >= 1 && self.successful_launch_count == 0
    }
}

/// One content-addressed file referenced by zero or more updates.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetEntity {
    pub key: AssetKey,
    pub asset_type: Option<String>,
    pub url: Option<Url>,
    pub expected_hash: Sha256Hash,
    pub downloaded_at: Option<DateTime<Utc>>,
    /// Set when the same file ships inside the binary.
    pub embedded_asset_filename: Option<String>,
    pub marked_for_deletion: bool,
}

impl AssetEntity {
    /// Asset row for a file whose contents hash to `hash`.
    #[must_use]
    pub fn for_hash(hash: Sha256Hash) -> Self {
        Self {
            key: AssetKey::from_hash(&hash),
            asset_type: None,
            url: None,
            expected_hash: hash,
            downloaded_at: None,
            embedded_asset_filename: None,
            marked_for_deletion: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(UpdateStatus::Pending, false)]
    #[case(UpdateStatus::Ready, true)]
    #[case(UpdateStatus::Launchable, true)]
    #[case(UpdateStatus::Embedded, true)]
    #[case(UpdateStatus::Ready0, true)]
    fn launch_candidacy(#[case] status: UpdateStatus, #[case] expected: bool) {
        assert_eq!(status.is_launch_candidate(), expected);
    }

    #[rstest]
    #[case(0, UpdateStatus::Pending)]
    #[case(1, UpdateStatus::Ready)]
    #[case(2, UpdateStatus::Launchable)]
    #[case(3, UpdateStatus::Embedded)]
    #[case(4, UpdateStatus::Ready0)]
    fn status_round_trips(#[case] raw: i64, #[case] status: UpdateStatus) {
        assert_eq!(UpdateStatus::from_i64(raw).unwrap(), status);
        assert_eq!(status.as_i64(), raw);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(matches!(
            UpdateStatus::from_i64(99),
            Err(DbError::InvalidStatus(99))
        ));
    }
}
