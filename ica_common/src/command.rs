//! Command model.
//!
//! A [`Command`] is a closed tagged variant ([`CommandKind`]) plus a timeout
//! and a per-instance [`StatePermissions`] bitset. The variant's name is a
//! compile-time constant (see [`names`]) used as the dispatch key, the
//! routing key and the serde tag.
//!
//! Commands are immutable once built: the builder methods consume `self`
//! and there are no setters. They move through channels by value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::consts::DEFAULT_CMD_TIMEOUT;
use crate::state::{InitStage, OperationEvent, OperationState, AvailabilityState, StatePermissions};

/// Stable command names.
pub mod names {
    pub const OPERATION_EVENT: &str = "CmdOperationEvent";
    pub const SET_AVAILABILITY: &str = "CmdSetAvailability";
    pub const INIT_STAGE_PROGRESS: &str = "CmdInitStageProgress";
    pub const SHUTDOWN: &str = "CmdShutdown";
    pub const OPERATION_STATE_CHANGED: &str = "CmdOperationStateChanged";
    pub const AVAILABILITY_STATE_CHANGED: &str = "CmdAvailabilityStateChanged";
    pub const DATA_CHANGED: &str = "CmdDataChanged";
    pub const DEVICE: &str = "CmdDevice";
    pub const DAY_LOG_ENTRY: &str = "CmdDayLogEntry";
    pub const RAISE_EVENT: &str = "CmdRaiseEvent";
    pub const REMOTE_CARE_NOTIFY: &str = "CmdRemoteCareNotify";
    pub const GUI_NOTIFY: &str = "CmdGuiNotify";
}

/// Worker family a command belongs to, used for component-type routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Master,
    DeviceControl,
    DataLogging,
    EventHandler,
    RemoteCare,
    GuiBridge,
}

impl ComponentType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::DeviceControl => "device_control",
            Self::DataLogging => "data_logging",
            Self::EventHandler => "event_handler",
            Self::RemoteCare => "remote_care",
            Self::GuiBridge => "gui_bridge",
        }
    }
}

/// Command timeout: a duration, or the fire-and-forget sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdTimeout {
    /// Expect an acknowledgment within this duration.
    After(Duration),
    /// Fire-and-forget: no acknowledgment, no pending entry.
    Never,
}

impl CmdTimeout {
    #[inline]
    pub const fn is_fire_and_forget(&self) -> bool {
        matches!(self, Self::Never)
    }

    #[inline]
    pub const fn duration(&self) -> Option<Duration> {
        match self {
            Self::After(d) => Some(*d),
            Self::Never => None,
        }
    }
}

impl Default for CmdTimeout {
    fn default() -> Self {
        Self::After(DEFAULT_CMD_TIMEOUT)
    }
}

/// Opaque device-directed command: instance id + verb + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub instance_id: u32,
    pub verb: String,
    pub payload: Vec<u8>,
}

impl DeviceCommand {
    pub fn new(instance_id: u32, verb: impl Into<String>) -> Self {
        Self {
            instance_id,
            verb: verb.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// Every command the workspace knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum CommandKind {
    // ── state / master ──
    #[serde(rename = "CmdOperationEvent")]
    OperationEvent(OperationEvent),
    #[serde(rename = "CmdSetAvailability")]
    SetAvailability { active: bool, cause: u32 },
    #[serde(rename = "CmdInitStageProgress")]
    InitStageProgress { stage: InitStage, success: bool },
    #[serde(rename = "CmdShutdown")]
    Shutdown,

    // ── state propagation (broadcast) ──
    #[serde(rename = "CmdOperationStateChanged")]
    OperationStateChanged(OperationState),
    #[serde(rename = "CmdAvailabilityStateChanged")]
    AvailabilityStateChanged(AvailabilityState),
    #[serde(rename = "CmdDataChanged")]
    DataChanged { key: String, value: String },

    // ── worker families ──
    #[serde(rename = "CmdDevice")]
    Device(DeviceCommand),
    #[serde(rename = "CmdDayLogEntry")]
    DayLogEntry { text: String },
    #[serde(rename = "CmdRaiseEvent")]
    RaiseEvent { code: u32, active: bool },
    #[serde(rename = "CmdRemoteCareNotify")]
    RemoteCareNotify { payload: String },
    #[serde(rename = "CmdGuiNotify")]
    GuiNotify { text: String },
}

impl CommandKind {
    /// Stable dispatch key.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OperationEvent(_) => names::OPERATION_EVENT,
            Self::SetAvailability { .. } => names::SET_AVAILABILITY,
            Self::InitStageProgress { .. } => names::INIT_STAGE_PROGRESS,
            Self::Shutdown => names::SHUTDOWN,
            Self::OperationStateChanged(_) => names::OPERATION_STATE_CHANGED,
            Self::AvailabilityStateChanged(_) => names::AVAILABILITY_STATE_CHANGED,
            Self::DataChanged { .. } => names::DATA_CHANGED,
            Self::Device(_) => names::DEVICE,
            Self::DayLogEntry { .. } => names::DAY_LOG_ENTRY,
            Self::RaiseEvent { .. } => names::RAISE_EVENT,
            Self::RemoteCareNotify { .. } => names::REMOTE_CARE_NOTIFY,
            Self::GuiNotify { .. } => names::GUI_NOTIFY,
        }
    }

    /// Family used for component-type routing.
    pub const fn component(&self) -> ComponentType {
        match self {
            Self::OperationEvent(_)
            | Self::SetAvailability { .. }
            | Self::InitStageProgress { .. }
            | Self::Shutdown
            | Self::OperationStateChanged(_)
            | Self::AvailabilityStateChanged(_)
            | Self::DataChanged { .. } => ComponentType::Master,
            Self::Device(_) => ComponentType::DeviceControl,
            Self::DayLogEntry { .. } => ComponentType::DataLogging,
            Self::RaiseEvent { .. } => ComponentType::EventHandler,
            Self::RemoteCareNotify { .. } => ComponentType::RemoteCare,
            Self::GuiNotify { .. } => ComponentType::GuiBridge,
        }
    }
}

/// A command value: variant payload, timeout and permission bitset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    kind: CommandKind,
    #[serde(default)]
    timeout: CmdTimeout,
    #[serde(default)]
    permissions: StatePermissions,
}

impl Command {
    /// New command with the default timeout and no permitted states.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            timeout: CmdTimeout::default(),
            permissions: StatePermissions::empty(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = CmdTimeout::After(timeout);
        self
    }

    /// Mark as fire-and-forget.
    pub fn fire_and_forget(mut self) -> Self {
        self.timeout = CmdTimeout::Never;
        self
    }

    /// Enable execution in the given states (additive).
    pub fn allowed_in(mut self, states: StatePermissions) -> Self {
        self.permissions |= states;
        self
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    #[inline]
    pub const fn kind(&self) -> &CommandKind {
        &self.kind
    }

    #[inline]
    pub const fn component(&self) -> ComponentType {
        self.kind.component()
    }

    #[inline]
    pub const fn timeout(&self) -> CmdTimeout {
        self.timeout
    }

    #[inline]
    pub const fn permissions(&self) -> StatePermissions {
        self.permissions
    }

    /// True iff the named state's bit is set.
    pub fn is_allowed(&self, state_name: &str) -> bool {
        self.permissions.is_allowed(state_name)
    }

    /// Consume and return the variant payload.
    pub fn into_kind(self) -> CommandKind {
        self.kind
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<CommandKind> for Command {
    fn from(kind: CommandKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_stable_per_variant() {
        let a = CommandKind::DayLogEntry { text: "a".into() };
        let b = CommandKind::DayLogEntry { text: "b".into() };
        assert_eq!(a.name(), b.name());
        assert_eq!(a.name(), names::DAY_LOG_ENTRY);
    }

    #[test]
    fn new_command_has_default_timeout_and_no_permissions() {
        let cmd = Command::new(CommandKind::Shutdown);
        assert_eq!(cmd.timeout(), CmdTimeout::After(DEFAULT_CMD_TIMEOUT));
        assert!(cmd.permissions().is_empty());
        assert!(!cmd.is_allowed("Idle"));
    }

    #[test]
    fn builder_enables_states() {
        let cmd = Command::new(CommandKind::Shutdown)
            .allowed_in(StatePermissions::IDLE)
            .allowed_in(StatePermissions::BUSY)
            .with_timeout(Duration::from_millis(500));
        assert!(cmd.is_allowed("Idle"));
        assert!(cmd.is_allowed("Busy"));
        assert!(!cmd.is_allowed("Init"));
        assert_eq!(cmd.timeout().duration(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn fire_and_forget_has_no_duration() {
        let cmd = Command::new(CommandKind::GuiNotify { text: "x".into() }).fire_and_forget();
        assert!(cmd.timeout().is_fire_and_forget());
        assert_eq!(cmd.timeout().duration(), None);
    }

    #[test]
    fn component_families() {
        assert_eq!(
            CommandKind::Device(DeviceCommand::new(7, "Attach")).component(),
            ComponentType::DeviceControl
        );
        assert_eq!(
            CommandKind::DataChanged { key: "k".into(), value: "v".into() }.component(),
            ComponentType::Master
        );
        assert_eq!(
            CommandKind::RemoteCareNotify { payload: String::new() }.component(),
            ComponentType::RemoteCare
        );
    }
}
