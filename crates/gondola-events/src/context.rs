use chrono::{DateTime, Utc};
use serde::Serialize;

/// Rollback directive data surfaced to the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackInfo {
    pub commit_time: DateTime<Utc>,
}

/// Snapshot of the state machine's context, serialized to the host bridge
/// on every accepted transition.
///
/// `sequence_number` increases monotonically; hosts drop snapshots whose
/// number is lower than the last one they rendered.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContext {
    pub is_update_available: bool,
    pub is_update_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_manifest: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_manifest: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_for_update_time: Option<DateTime<Utc>>,
    pub sequence_number: u64,
}

impl UpdateContext {
    /// Context for a fresh machine, carrying over the fields that survive
    /// a restart.
    #[must_use]
    pub fn reset_from(&self) -> Self {
        Self {
            last_check_for_update_time: self.last_check_for_update_time,
            sequence_number: self.sequence_number,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_omits_empty_fields() {
        let ctx = UpdateContext {
            is_update_available: true,
            sequence_number: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["isUpdateAvailable"], true);
        assert_eq!(json["sequenceNumber"], 3);
        assert!(json.get("checkError").is_none());
        assert!(json.get("rollback").is_none());
    }

    #[test]
    fn reset_keeps_sequence_and_check_time() {
        let ctx = UpdateContext {
            is_update_pending: true,
            check_error: Some("boom".into()),
            last_check_for_update_time: Some(Utc::now()),
            sequence_number: 17,
            ..Default::default()
        };
        let fresh = ctx.reset_from();
        assert!(!fresh.is_update_pending);
        assert!(fresh.check_error.is_none());
        assert_eq!(fresh.sequence_number, 17);
        assert_eq!(
            fresh.last_check_for_update_time,
            ctx.last_check_for_update_time
        );
    }
}
