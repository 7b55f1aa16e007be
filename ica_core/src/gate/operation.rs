//! OperationState transitions.
//!
//! Default → SoftSwitchMonitor → Init → Idle ↔ Busy, Init → InitFailed,
//! Idle → Init for re-initialisation.

use ica_common::state::{OperationEvent, OperationState};

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult<S> {
    /// Transition succeeded — new state.
    Ok(S),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

impl<S> TransitionResult<S> {
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

#[derive(Debug, Clone)]
pub struct OperationStateMachine {
    state: OperationState,
}

impl OperationStateMachine {
    pub const fn new() -> Self {
        Self {
            state: OperationState::Default,
        }
    }

    #[inline]
    pub const fn state(&self) -> OperationState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: OperationEvent) -> TransitionResult<OperationState> {
        use OperationEvent::*;
        use OperationState::*;

        let next = match (self.state, event) {
            (Default, MonitorStart) => SoftSwitchMonitor,
            (SoftSwitchMonitor, SwitchPressed) => Init,

            (OperationState::Init, InitComplete) => Idle,
            (OperationState::Init, OperationEvent::InitFailed) => OperationState::InitFailed,

            (Idle, EnterBusy) => Busy,
            (Busy, EnterIdle) => Idle,

            (Idle, EnterInit) => OperationState::Init,

            _ => return TransitionResult::Rejected(invalid_transition_reason(self.state)),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Force `InitFailed` after a failed init stage, from any state.
    #[inline]
    pub fn force_init_failed(&mut self) {
        self.state = OperationState::InitFailed;
    }
}

impl Default for OperationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_transition_reason(state: OperationState) -> &'static str {
    match state {
        OperationState::Default => "Default: only monitor-start allowed",
        OperationState::SoftSwitchMonitor => "SoftSwitchMonitor: only switch-pressed allowed",
        OperationState::Init => "Init: only init-complete or init-failed allowed",
        OperationState::Idle => "Idle: only enter-busy or enter-init allowed",
        OperationState::Busy => "Busy: only enter-idle allowed",
        OperationState::InitFailed => "InitFailed: terminal until restart",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
