#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::{Event, StateChangePayload};

/// Fan-out channel between the update engine and the host.
///
/// Two event families travel here: state machine snapshots and legacy
/// one-shot notices. Snapshots carry a monotonic sequence number, and the
/// bus enforces it centrally: a snapshot whose number does not exceed the
/// last published one is dropped before fan-out, so no subscriber ever
/// observes state history running backwards. The most recent snapshot is
/// also cached, letting a host that subscribes after cold start read the
/// current state via [`latest_state`](Self::latest_state) instead of
/// waiting for the next transition.
///
/// Publishing never blocks and never fails; with no subscribers, events
/// (other than the cached snapshot) go nowhere. A subscriber that falls
/// behind the channel capacity sees `RecvError::Lagged` and can resync
/// from `latest_state`.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    latest_state: Arc<Mutex<Option<StateChangePayload>>>,
}

impl EventBus {
    /// Bus with room for `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest_state: Arc::new(Mutex::new(None)),
        }
    }

    /// Publish an event to all subscribers. Sync, callable from blocking
    /// threads and async tasks alike.
    ///
    /// State snapshots pass through the sequence guard; notices are
    /// forwarded as-is.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let event = event.into();
        if let Event::StateChange(payload) = &event {
            let mut latest = self.latest_state.lock().expect("latest state poisoned");
            if let Some(current) = latest.as_ref() {
                if payload.context.sequence_number <= current.context.sequence_number {
                    tracing::debug!(
                        stale = payload.context.sequence_number,
                        current = current.context.sequence_number,
                        "dropping stale state snapshot"
                    );
                    return;
                }
            }
            *latest = Some(payload.clone());
        }
        let _ = self.tx.send(event);
    }

    /// The newest state snapshot published so far, if any. Hosts read
    /// this on subscription to render current state without waiting for
    /// the next transition.
    #[must_use]
    pub fn latest_state(&self) -> Option<StateChangePayload> {
        self.latest_state
            .lock()
            .expect("latest state poisoned")
            .clone()
    }

    /// Subscribe to all future events. Each subscriber gets an
    /// independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StateChangeEventType, UpdateContext, UpdateNotice};

    fn snapshot(sequence_number: u64, event_type: StateChangeEventType) -> StateChangePayload {
        StateChangePayload {
            event_type,
            context: UpdateContext {
                sequence_number,
                ..UpdateContext::default()
            },
        }
    }

    #[tokio::test]
    async fn snapshots_fan_out_in_sequence_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(snapshot(1, StateChangeEventType::Check));
        bus.publish(snapshot(2, StateChangeEventType::CheckCompleteUnavailable));

        for expected in 1..=2u64 {
            match rx.recv().await.unwrap() {
                Event::StateChange(p) => assert_eq!(p.context.sequence_number, expected),
                Event::Notice(n) => panic!("unexpected notice {n:?}"),
            }
        }
    }

    #[tokio::test]
    async fn stale_snapshot_is_dropped_before_fan_out() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(snapshot(5, StateChangeEventType::DownloadComplete));
        // A snapshot from an older transition arrives out of order.
        bus.publish(snapshot(4, StateChangeEventType::Download));
        bus.publish(snapshot(6, StateChangeEventType::Restart));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let sequences: Vec<u64> = [first, second]
            .into_iter()
            .map(|e| match e {
                Event::StateChange(p) => p.context.sequence_number,
                Event::Notice(n) => panic!("unexpected notice {n:?}"),
            })
            .collect();
        assert_eq!(sequences, vec![5, 6]);
        assert!(rx.try_recv().is_err(), "the stale snapshot must not arrive");
    }

    #[test]
    fn late_subscriber_reads_current_state_from_cache() {
        let bus = EventBus::new(8);
        assert!(bus.latest_state().is_none());

        // Published before anyone subscribed; broadcast drops it, the
        // cache keeps it.
        bus.publish(snapshot(3, StateChangeEventType::DownloadComplete));

        let cached = bus.latest_state().unwrap();
        assert_eq!(cached.context.sequence_number, 3);
        assert_eq!(cached.event_type, StateChangeEventType::DownloadComplete);
    }

    #[tokio::test]
    async fn notices_bypass_the_sequence_guard() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(snapshot(2, StateChangeEventType::Check));
        // Notices have no sequence number and must always go through,
        // even right after a newer snapshot.
        bus.publish(UpdateNotice::NoUpdateAvailable);
        bus.publish(UpdateNotice::NoUpdateAvailable);

        let _ = rx.recv().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Notice(UpdateNotice::NoUpdateAvailable)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Notice(UpdateNotice::NoUpdateAvailable)
        ));
        assert_eq!(bus.latest_state().unwrap().context.sequence_number, 2);
    }

    #[tokio::test]
    async fn overrun_subscriber_resyncs_from_latest_state() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for seq in 1..=10u64 {
            bus.publish(snapshot(seq, StateChangeEventType::Check));
        }

        // The receiver overran its buffer; the cache still has the tip.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(bus.latest_state().unwrap().context.sequence_number, 10);
    }

    #[test]
    fn clones_share_channel_and_cache() {
        let bus = EventBus::new(8);
        let engine_side = bus.clone();
        let mut rx = bus.subscribe();

        engine_side.publish(snapshot(1, StateChangeEventType::Check));
        assert!(rx.try_recv().is_ok());
        assert_eq!(bus.latest_state().unwrap().context.sequence_number, 1);
    }
}
