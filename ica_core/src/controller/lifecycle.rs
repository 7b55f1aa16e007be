//! Worker lifecycle: Created → Initialized → Running → Stopping → Destroyed.

use crate::gate::operation::TransitionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    /// `create_and_initialize_objects` succeeded.
    Initialized = 1,
    /// `Go` received; commands are serviced.
    Running = 2,
    /// `Stop` received; no new commands accepted.
    Stopping = 3,
    /// `cleanup_and_destroy_objects` done; the loop exits.
    Destroyed = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Initialized,
    Go,
    Stop,
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: LifecycleState::Created,
        }
    }

    #[inline]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, LifecycleState::Running)
    }

    pub fn handle_event(&mut self, event: LifecycleEvent) -> TransitionResult<LifecycleState> {
        use LifecycleState::*;

        let next = match (self.state, event) {
            (Created, LifecycleEvent::Initialized) => Initialized,
            (Initialized, LifecycleEvent::Go) => Running,
            // Stop is accepted before Go so a worker can be torn down early.
            (Initialized | Running, LifecycleEvent::Stop) => Stopping,
            (Created | Stopping, LifecycleEvent::Destroyed) => Destroyed,
            (Destroyed, _) => return TransitionResult::Rejected("Destroyed: terminal"),
            (Created, _) => return TransitionResult::Rejected("Created: initialise first"),
            (Initialized, _) => return TransitionResult::Rejected("Initialized: only Go or Stop allowed"),
            (Running, _) => return TransitionResult::Rejected("Running: only Stop allowed"),
            (Stopping, _) => return TransitionResult::Rejected("Stopping: only Destroyed allowed"),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
