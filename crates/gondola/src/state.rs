//! Observable update state machine.
//!
//! Four states, no terminal state; every accepted event advances a
//! monotonic sequence number and publishes a context snapshot on the
//! event bus. Rejected events are logged and dropped — they never crash
//! and never emit.
//!
//! Processing is serialized on one dedicated task; [`UpdateStateMachine::post`]
//! is a plain channel send and may be called from any thread.

use chrono::{DateTime, Utc};
use gondola_events::{
    EventBus, RollbackInfo, StateChangeEventType, StateChangePayload, UpdateContext,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Machine states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MachineState {
    #[default]
    Idle,
    Checking,
    Downloading,
    Restarting,
}

/// Machine events.
#[derive(Clone, Debug)]
pub enum StateEvent {
    Check,
    CheckCompleteUnavailable,
    CheckCompleteWithUpdate { manifest: serde_json::Value },
    CheckCompleteWithRollback { commit_time: DateTime<Utc> },
    CheckError { message: String },
    Download,
    DownloadComplete,
    DownloadCompleteWithUpdate { manifest: serde_json::Value },
    DownloadCompleteWithRollback,
    DownloadError { message: String },
    Restart,
}

impl StateEvent {
    fn is_check_completion(&self) -> bool {
        matches!(
            self,
            Self::CheckCompleteUnavailable
                | Self::CheckCompleteWithUpdate { .. }
                | Self::CheckCompleteWithRollback { .. }
                | Self::CheckError { .. }
        )
    }

    fn is_download_completion(&self) -> bool {
        matches!(
            self,
            Self::DownloadComplete
                | Self::DownloadCompleteWithUpdate { .. }
                | Self::DownloadCompleteWithRollback
                | Self::DownloadError { .. }
        )
    }

    fn event_type(&self) -> StateChangeEventType {
        match self {
            Self::Check => StateChangeEventType::Check,
            Self::CheckCompleteUnavailable => StateChangeEventType::CheckCompleteUnavailable,
            Self::CheckCompleteWithUpdate { .. } | Self::CheckCompleteWithRollback { .. } => {
                StateChangeEventType::CheckCompleteAvailable
            }
            Self::CheckError { .. } => StateChangeEventType::CheckError,
            Self::Download => StateChangeEventType::Download,
            Self::DownloadComplete
            | Self::DownloadCompleteWithUpdate { .. }
            | Self::DownloadCompleteWithRollback => StateChangeEventType::DownloadComplete,
            Self::DownloadError { .. } => StateChangeEventType::DownloadError,
            Self::Restart => StateChangeEventType::Restart,
        }
    }
}

/// Deterministic transition function; `None` rejects the event.
pub(crate) fn transition(state: MachineState, event: &StateEvent) -> Option<MachineState> {
    use MachineState::{Checking, Downloading, Idle, Restarting};

    match (state, event) {
        (Idle, StateEvent::Check) => Some(Checking),
        (Idle | Checking, StateEvent::Download) => Some(Downloading),
        (Idle | Checking | Downloading | Restarting, StateEvent::Restart) => Some(Restarting),
        (Checking, e) if e.is_check_completion() => Some(Idle),
        (Downloading, e) if e.is_download_completion() => Some(Idle),
        _ => None,
    }
}

fn apply(context: &mut UpdateContext, event: &StateEvent) {
    match event {
        StateEvent::Check | StateEvent::Restart => {}
        StateEvent::CheckCompleteUnavailable => {
            context.is_update_available = false;
            context.latest_manifest = None;
            context.rollback = None;
            context.check_error = None;
            context.last_check_for_update_time = Some(Utc::now());
        }
        StateEvent::CheckCompleteWithUpdate { manifest } => {
            context.is_update_available = true;
            context.latest_manifest = Some(manifest.clone());
            context.rollback = None;
            context.check_error = None;
            context.last_check_for_update_time = Some(Utc::now());
        }
        StateEvent::CheckCompleteWithRollback { commit_time } => {
            context.is_update_available = true;
            context.latest_manifest = None;
            context.rollback = Some(RollbackInfo {
                commit_time: *commit_time,
            });
            context.check_error = None;
            context.last_check_for_update_time = Some(Utc::now());
        }
        StateEvent::CheckError { message } => {
            context.check_error = Some(message.clone());
            context.last_check_for_update_time = Some(Utc::now());
        }
        StateEvent::Download => {
            context.download_error = None;
        }
        // Plain DownloadComplete closes a download that stored nothing new
        // (e.g. nothing newer on the server); only completions that carry
        // content mark an update pending.
        StateEvent::DownloadComplete => {}
        StateEvent::DownloadCompleteWithRollback => {
            context.is_update_pending = true;
        }
        StateEvent::DownloadCompleteWithUpdate { manifest } => {
            context.is_update_pending = true;
            context.is_update_available = true;
            context.latest_manifest = Some(manifest.clone());
            context.downloaded_manifest = Some(manifest.clone());
        }
        StateEvent::DownloadError { message } => {
            context.download_error = Some(message.clone());
        }
    }
}

enum Msg {
    Event(StateEvent),
    Reset,
}

#[derive(Default)]
struct Shared {
    state: MachineState,
    context: UpdateContext,
}

/// Handle to the serialized state machine task.
#[derive(Clone)]
pub struct UpdateStateMachine {
    tx: mpsc::UnboundedSender<Msg>,
    shared: Arc<Mutex<Shared>>,
}

impl UpdateStateMachine {
    /// Spawn the processing task. Requires a tokio runtime.
    #[must_use]
    pub fn spawn(bus: EventBus) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let task_shared = Arc::clone(&shared);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    Msg::Event(event) => {
                        let mut guard = task_shared.lock();
                        let Some(next) = transition(guard.state, &event) else {
                            tracing::warn!(state = ?guard.state, ?event, "rejected state machine event");
                            continue;
                        };
                        guard.state = next;
                        apply(&mut guard.context, &event);
                        guard.context.sequence_number += 1;
                        let payload = StateChangePayload {
                            event_type: event.event_type(),
                            context: guard.context.clone(),
                        };
                        drop(guard);
                        bus.publish(payload);
                    }
                    Msg::Reset => {
                        let mut guard = task_shared.lock();
                        guard.state = MachineState::Idle;
                        guard.context = guard.context.reset_from();
                    }
                }
            }
        });

        Self { tx, shared }
    }

    /// Post an event from any thread; returns immediately.
    pub fn post(&self, event: StateEvent) {
        let _ = self.tx.send(Msg::Event(event));
    }

    /// Return to `Idle` after a restart completes, clearing transient
    /// fields while keeping the sequence counter and last check time.
    pub fn reset(&self) {
        let _ = self.tx.send(Msg::Reset);
    }

    #[must_use]
    pub fn state(&self) -> MachineState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn context(&self) -> UpdateContext {
        self.shared.lock().context.clone()
    }
}
