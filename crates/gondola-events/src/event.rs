#![forbid(unsafe_code)]

use serde::Serialize;

use crate::UpdateContext;

/// Kind of state machine transition a [`StateChangePayload`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StateChangeEventType {
    Check,
    CheckCompleteAvailable,
    CheckCompleteUnavailable,
    CheckError,
    Download,
    DownloadComplete,
    DownloadError,
    Restart,
}

/// One accepted state machine transition plus the resulting context.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangePayload {
    pub event_type: StateChangeEventType,
    pub context: UpdateContext,
}

/// Legacy one-shot notification, kept for hosts that consume the old
/// `UpdatesEvent` bridge channel instead of state snapshots.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum UpdateNotice {
    NoUpdateAvailable,
    UpdateAvailable { manifest: serde_json::Value },
    Error { message: String },
}

/// Unified event for the update runtime.
///
/// Hierarchical: each family has its own variant, converted via `From` so
/// publishers can pass the inner value directly.
#[derive(Clone, Debug)]
pub enum Event {
    /// State machine snapshot.
    StateChange(StateChangePayload),
    /// Legacy notification.
    Notice(UpdateNotice),
}

impl From<StateChangePayload> for Event {
    fn from(e: StateChangePayload) -> Self {
        Self::StateChange(e)
    }
}

impl From<UpdateNotice> for Event {
    fn from(e: UpdateNotice) -> Self {
        Self::Notice(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_into_event() {
        let event: Event = UpdateNotice::NoUpdateAvailable.into();
        assert!(matches!(event, Event::Notice(UpdateNotice::NoUpdateAvailable)));
    }

    #[test]
    fn state_change_into_event() {
        let payload = StateChangePayload {
            event_type: StateChangeEventType::Check,
            context: UpdateContext::default(),
        };
        let event: Event = payload.into();
        match event {
            Event::StateChange(p) => assert_eq!(p.event_type, StateChangeEventType::Check),
            Event::Notice(_) => panic!("expected StateChange"),
        }
    }

    #[test]
    fn event_type_serializes_camel_case() {
        let json = serde_json::to_string(&StateChangeEventType::CheckCompleteUnavailable).unwrap();
        assert_eq!(json, "\"checkCompleteUnavailable\"");
    }
}
