use parking_lot::Mutex;

use super::SelectionPolicy;

/// Holder for the engine's active policy with a one-shot override.
///
/// `set_next` installs a policy for exactly the next launcher build; the
/// first `take_for_launch` consumes it and subsequent launches revert to
/// the default. Reads that do not build a launcher (`current`) never
/// consume the override.
pub struct PolicySlot {
    default: Mutex<SelectionPolicy>,
    next: Mutex<Option<SelectionPolicy>>,
}

impl PolicySlot {
    #[must_use]
    pub fn new(default: SelectionPolicy) -> Self {
        Self {
            default: Mutex::new(default),
            next: Mutex::new(None),
        }
    }

    /// Policy the next launcher build will use, without consuming it.
    #[must_use]
    pub fn current(&self) -> SelectionPolicy {
        self.next
            .lock()
            .clone()
            .unwrap_or_else(|| self.default.lock().clone())
    }

    /// Consume the override if one is set, else the default.
    #[must_use]
    pub fn take_for_launch(&self) -> SelectionPolicy {
        self.next
            .lock()
            .take()
            .unwrap_or_else(|| self.default.lock().clone())
    }

    /// Install a policy for the next launcher build only.
    pub fn set_next(&self, policy: SelectionPolicy) {
        *self.next.lock() = Some(policy);
    }

    /// Drop any pending override.
    pub fn reset_to_default(&self) {
        *self.next.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::policy::SelectionPolicy;

    #[test]
    fn override_is_consumed_exactly_once() {
        let slot = PolicySlot::new(SelectionPolicy::standard("1.0"));
        let dev = SelectionPolicy::development("1.0");
        slot.set_next(dev.clone());

        let first = slot.take_for_launch();
        assert!(Arc::ptr_eq(&first.reaper, &dev.reaper));

        let second = slot.take_for_launch();
        assert!(!Arc::ptr_eq(&second.reaper, &dev.reaper));
    }

    #[test]
    fn current_does_not_consume() {
        let slot = PolicySlot::new(SelectionPolicy::standard("1.0"));
        let dev = SelectionPolicy::development("1.0");
        slot.set_next(dev.clone());

        let peeked = slot.current();
        assert!(Arc::ptr_eq(&peeked.reaper, &dev.reaper));
        let taken = slot.take_for_launch();
        assert!(Arc::ptr_eq(&taken.reaper, &dev.reaper));
    }

    #[test]
    fn reset_drops_pending_override() {
        let slot = PolicySlot::new(SelectionPolicy::standard("1.0"));
        let dev = SelectionPolicy::development("1.0");
        slot.set_next(dev.clone());
        slot.reset_to_default();
        let taken = slot.take_for_launch();
        assert!(!Arc::ptr_eq(&taken.reaper, &dev.reaper));
    }
}
