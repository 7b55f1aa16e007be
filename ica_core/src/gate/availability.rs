//! AvailabilityState transitions and the outstanding-cause set.

use ica_common::state::{AvailabilityEvent, AvailabilityState};
use std::collections::BTreeSet;

use super::operation::TransitionResult;

#[derive(Debug, Clone)]
pub struct AvailabilityStateMachine {
    state: AvailabilityState,
    causes: BTreeSet<u32>,
}

impl AvailabilityStateMachine {
    pub const fn new() -> Self {
        Self {
            state: AvailabilityState::Normal,
            causes: BTreeSet::new(),
        }
    }

    #[inline]
    pub const fn state(&self) -> AvailabilityState {
        self.state
    }

    /// Outstanding error causes.
    pub fn causes(&self) -> impl Iterator<Item = u32> + '_ {
        self.causes.iter().copied()
    }

    pub fn handle_event(&mut self, event: AvailabilityEvent) -> TransitionResult<AvailabilityState> {
        use AvailabilityEvent::*;

        let next = match (self.state, event) {
            (AvailabilityState::Normal, EnterErrorState) => AvailabilityState::Error,
            (AvailabilityState::Error, EnterNormalState) => AvailabilityState::Normal,
            (AvailabilityState::Normal, EnterNormalState) => {
                return TransitionResult::Rejected("Normal: already normal");
            }
            (AvailabilityState::Error, EnterErrorState) => {
                return TransitionResult::Rejected("Error: already in error state");
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Raise or clear an error cause.
    ///
    /// Raising the first cause enters `Error`. Clearing *any* cause clears
    /// the whole cause set and returns to `Normal`, even when other causes
    /// were never cleared individually.
    ///
    /// Known discrepancy: this does not fit a multi-cause error model,
    /// where `Error` would persist until the last cause is cleared.
    ///
    /// Returns the new state when a transition happened.
    pub fn set_availability(&mut self, active: bool, cause: u32) -> Option<AvailabilityState> {
        if active {
            let first = self.causes.is_empty();
            self.causes.insert(cause);
            if first {
                return self.transition(AvailabilityEvent::EnterErrorState);
            }
            None
        } else {
            if self.causes.is_empty() {
                return None;
            }
            self.causes.clear();
            self.transition(AvailabilityEvent::EnterNormalState)
        }
    }

    fn transition(&mut self, event: AvailabilityEvent) -> Option<AvailabilityState> {
        match self.handle_event(event) {
            TransitionResult::Ok(state) => Some(state),
            TransitionResult::Rejected(_) => None,
        }
    }
}

impl Default for AvailabilityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_error_round_trip() {
        let mut sm = AvailabilityStateMachine::new();
        assert_eq!(
            sm.handle_event(AvailabilityEvent::EnterErrorState),
            TransitionResult::Ok(AvailabilityState::Error)
        );
        assert_eq!(
            sm.handle_event(AvailabilityEvent::EnterNormalState),
            TransitionResult::Ok(AvailabilityState::Normal)
        );
    }

    #[test]
    fn repeated_events_rejected() {
        let mut sm = AvailabilityStateMachine::new();
        assert!(!sm.handle_event(AvailabilityEvent::EnterNormalState).is_ok());
        sm.handle_event(AvailabilityEvent::EnterErrorState);
        assert!(!sm.handle_event(AvailabilityEvent::EnterErrorState).is_ok());
    }

    #[test]
    fn first_cause_enters_error() {
        let mut sm = AvailabilityStateMachine::new();
        assert_eq!(sm.set_availability(true, 42), Some(AvailabilityState::Error));
        assert_eq!(sm.set_availability(true, 43), None);
        assert_eq!(sm.state(), AvailabilityState::Error);
        assert_eq!(sm.causes().collect::<Vec<_>>(), vec![42, 43]);
    }

    #[test]
    fn clearing_one_cause_clears_all() {
        let mut sm = AvailabilityStateMachine::new();
        sm.set_availability(true, 42);
        sm.set_availability(true, 43);
        assert_eq!(sm.set_availability(false, 42), Some(AvailabilityState::Normal));
        assert_eq!(sm.causes().count(), 0);
    }

    #[test]
    fn clearing_with_no_causes_is_noop() {
        let mut sm = AvailabilityStateMachine::new();
        assert_eq!(sm.set_availability(false, 1), None);
        assert_eq!(sm.state(), AvailabilityState::Normal);
    }

    #[test]
    fn duplicate_cause_keeps_error() {
        let mut sm = AvailabilityStateMachine::new();
        sm.set_availability(true, 7);
        assert_eq!(sm.set_availability(true, 7), None);
        assert_eq!(sm.causes().count(), 1);
    }
}
