//! Error taxonomy of the dispatch core.
//!
//! | Error | Where | Fatal? |
//! |-------|-------|--------|
//! | [`ChannelError::Closed`] | `Send` / `SendAck` | caller decides |
//! | [`DispatchError::UnknownReference`] | ack / timeout lookup | no, reported |
//! | [`DispatchError::StateDenied`] | state gate | no, NOK to originator |
//! | [`PoolError::Exhausted`] | device correlation pool | no, command fails fast |
//! | [`RegistrationError`] | master startup | yes, at initialisation |
//! | [`DispatchError::CommandTimeout`] | pending table | handed to timeout handler |

use thiserror::Error;

use crate::reference::{ChannelId, Reference};
use crate::state::{AvailabilityState, OperationState};

/// Channel send failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The peer end has been torn down.
    #[error("channel {channel} closed")]
    Closed { channel: ChannelId },
}

/// Startup registration mistakes. Never reached at runtime in a correctly
/// wired system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Same command name registered twice in one registry.
    #[error("command '{name}' is already registered")]
    DuplicateName { name: &'static str },

    /// Name is both executed locally and routed.
    #[error("command '{name}' cannot be both executed locally and routed")]
    ExecutedAndRouted { name: &'static str },

    /// Route or broadcast target does not exist.
    #[error("unknown channel {channel}")]
    UnknownChannel { channel: ChannelId },
}

/// Device correlation pool failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every slot is active.
    #[error("correlation pool exhausted ({capacity} slots active)")]
    Exhausted { capacity: usize },

    /// Command name does not fit in a slot.
    #[error("command name '{name}' exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },

    /// Slot index out of range or not active.
    #[error("slot {index} is not active")]
    InvalidSlot { index: usize },
}

/// Worker start-up failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("worker '{worker}' failed to initialise: {reason}")]
    InitFailed { worker: String, reason: String },

    #[error("failed to spawn worker '{worker}': {reason}")]
    SpawnFailed { worker: String, reason: String },
}

/// Top-level dispatch error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Ack or timeout for a reference that is not pending.
    #[error("unknown reference {reference}")]
    UnknownReference { reference: Reference },

    /// Reference handed out twice; the generator never does this.
    #[error("reference {reference} already pending")]
    DuplicateReference { reference: Reference },

    /// Rejected by the state gate.
    #[error("'{command}' not allowed in {operation:?}/{availability:?}")]
    StateDenied {
        command: &'static str,
        operation: OperationState,
        availability: AvailabilityState,
    },

    /// No acknowledgment within the declared timeout.
    #[error("'{command}' {reference} timed out")]
    CommandTimeout {
        reference: Reference,
        command: &'static str,
    },

    /// Neither executed locally nor routed.
    #[error("no handler or route for '{command}'")]
    NoRoute { command: &'static str },
}
