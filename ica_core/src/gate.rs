//! State gate: two independent FSMs plus the command authorisation check.
//!
//! - [`operation`] — OperationState transitions
//! - [`availability`] — AvailabilityState transitions and the cause set
//!
//! [`StateGate::is_allowed`] conjuncts both current states against a
//! command's permission bitset. Workers read the gate through a
//! [`SharedStateGate`]; only the master mutates it.

pub mod availability;
pub mod operation;

use ica_common::command::Command;
use ica_common::error::DispatchError;
use ica_common::event::{Event, EventCode, Severity, SharedEventSink};
use ica_common::state::{AvailabilityState, InitStage, OperationEvent, OperationState};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use availability::AvailabilityStateMachine;
use operation::{OperationStateMachine, TransitionResult};

/// Read-mostly gate handle shared by the master and every worker.
pub type SharedStateGate = Arc<RwLock<StateGate>>;

/// A state change the master propagates to the broadcast list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateChange {
    Operation(OperationState),
    Availability(AvailabilityState),
}

/// Tracks which init stages have reported success.
#[derive(Debug, Clone, Copy, Default)]
struct InitTracker {
    required: u8,
    done: u8,
}

impl InitTracker {
    fn new(required: &[InitStage]) -> Self {
        Self {
            required: required.iter().fold(0, |mask, s| mask | s.bit()),
            done: 0,
        }
    }

    #[inline]
    fn complete(&self) -> bool {
        self.done & self.required == self.required
    }
}

pub struct StateGate {
    operation: OperationStateMachine,
    availability: AvailabilityStateMachine,
    init: InitTracker,
    /// Sticky: set by the first failed init stage, never cleared.
    software_init_failed: bool,
    events: SharedEventSink,
}

impl StateGate {
    pub fn new(required_stages: &[InitStage], events: SharedEventSink) -> Self {
        Self {
            operation: OperationStateMachine::new(),
            availability: AvailabilityStateMachine::new(),
            init: InitTracker::new(required_stages),
            software_init_failed: false,
            events,
        }
    }

    /// Wrap into the shared handle.
    pub fn shared(self) -> SharedStateGate {
        Arc::new(RwLock::new(self))
    }

    #[inline]
    pub const fn operation(&self) -> OperationState {
        self.operation.state()
    }

    #[inline]
    pub const fn availability(&self) -> AvailabilityState {
        self.availability.state()
    }

    #[inline]
    pub const fn software_init_failed(&self) -> bool {
        self.software_init_failed
    }

    pub fn causes(&self) -> Vec<u32> {
        self.availability.causes().collect()
    }

    /// True when both current states are enabled in the command's bitset.
    #[inline]
    pub fn is_allowed(&self, command: &Command) -> bool {
        command
            .permissions()
            .permits(self.operation.state(), self.availability.state())
    }

    /// Like [`is_allowed`](Self::is_allowed), but reports a denial to the
    /// event sink and returns `StateDenied`.
    pub fn check(&self, command: &Command) -> Result<(), DispatchError> {
        if self.is_allowed(command) {
            return Ok(());
        }
        let operation = self.operation.state();
        let availability = self.availability.state();
        debug!(command = command.name(), ?operation, ?availability, "command denied by state gate");
        self.events.report(
            Event::new(EventCode::CommandDenied, Severity::Warning)
                .arg(command.name())
                .arg(operation.name())
                .arg(availability.name()),
        );
        Err(DispatchError::StateDenied {
            command: command.name(),
            operation,
            availability,
        })
    }

    /// Fire a named operation event.
    ///
    /// Returns every resulting change (entering `Init` may complete
    /// initialisation straight away).
    pub fn fire(&mut self, event: OperationEvent) -> Result<Vec<GateChange>, &'static str> {
        let mut changes = Vec::new();
        match self.operation.handle_event(event) {
            TransitionResult::Ok(state) => {
                self.report_operation(state, event.name());
                changes.push(GateChange::Operation(state));
            }
            TransitionResult::Rejected(reason) => {
                debug!(event = event.name(), reason, "operation event rejected");
                return Err(reason);
            }
        }

        if event == OperationEvent::EnterInit {
            self.init.done = 0;
        }
        if self.operation.state() == OperationState::Init {
            changes.extend(self.try_complete_init());
        }
        Ok(changes)
    }

    /// Raise (`active`) or clear an availability cause. See
    /// [`AvailabilityStateMachine::set_availability`] for the clearing rule.
    pub fn set_availability(&mut self, active: bool, cause: u32) -> Option<GateChange> {
        let changed = self.availability.set_availability(active, cause)?;
        info!(?changed, cause, active, "availability state changed");
        self.events.report(
            Event::new(
                EventCode::AvailabilityChanged,
                if changed == AvailabilityState::Error { Severity::Error } else { Severity::Info },
            )
            .arg(changed.name())
            .arg(cause),
        );
        Some(GateChange::Availability(changed))
    }

    /// Record an init stage result.
    ///
    /// Once every required stage has succeeded the gate moves Init → Idle.
    /// Any failure sets the sticky software-init-failed flag and forces
    /// `InitFailed`.
    pub fn set_init_stage_progress(&mut self, stage: InitStage, success: bool) -> Vec<GateChange> {
        if !success {
            warn!(?stage, "init stage failed");
            self.software_init_failed = true;
            self.events.report(
                Event::new(EventCode::InitStageFailed, Severity::Fatal).arg(format!("{stage:?}")),
            );
            if self.operation.state() == OperationState::InitFailed {
                return Vec::new();
            }
            self.operation.force_init_failed();
            self.report_operation(OperationState::InitFailed, "init-stage-failed");
            return vec![GateChange::Operation(OperationState::InitFailed)];
        }

        debug!(?stage, "init stage succeeded");
        self.init.done |= stage.bit();
        if self.operation.state() == OperationState::Init {
            self.try_complete_init().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn try_complete_init(&mut self) -> Option<GateChange> {
        if self.software_init_failed || !self.init.complete() {
            return None;
        }
        match self.operation.handle_event(OperationEvent::InitComplete) {
            TransitionResult::Ok(state) => {
                self.report_operation(state, OperationEvent::InitComplete.name());
                Some(GateChange::Operation(state))
            }
            TransitionResult::Rejected(_) => None,
        }
    }

    fn report_operation(&self, state: OperationState, cause: &str) {
        info!(state = state.name(), cause, "operation state changed");
        self.events.report(
            Event::new(EventCode::OperationChanged, Severity::Info)
                .arg(state.name())
                .arg(cause),
        );
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
