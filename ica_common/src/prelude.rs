//! Prelude module for common re-exports.
//!
//! ```rust
//! use ica_common::prelude::*;
//! ```

// ─── Messages ───────────────────────────────────────────────────────
pub use crate::ack::{AckOutcome, AckPayload, Acknowledgment};
pub use crate::command::{names, CmdTimeout, Command, CommandKind, ComponentType, DeviceCommand};
pub use crate::reference::{ChannelId, Reference, ReferenceGenerator};

// ─── State ──────────────────────────────────────────────────────────
pub use crate::state::{
    AvailabilityEvent, AvailabilityState, InitStage, OperationEvent, OperationState,
    StatePermissions,
};

// ─── Events & Errors ────────────────────────────────────────────────
pub use crate::error::{ChannelError, DispatchError, LifecycleError, PoolError, RegistrationError};
pub use crate::event::{Event, EventCode, EventSink, Severity, SharedEventSink};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig, Validate};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_CMD_TIMEOUT, DEVICE_POOL_CAPACITY};
