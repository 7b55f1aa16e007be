//! Operational state enums and the per-command permission bitset.
//!
//! Two independent state values gate command execution:
//! - [`OperationState`] — instrument lifecycle (Default → … → Idle ↔ Busy)
//! - [`AvailabilityState`] — Normal / Error overlay
//!
//! Transitions are edge-triggered by [`OperationEvent`] / [`AvailabilityEvent`];
//! the transition functions live in `ica_core::gate`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Operation State ────────────────────────────────────────────────

/// Instrument operation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationState {
    /// Power-on state before the soft switch is monitored.
    Default = 0,
    /// Waiting for the operator to press the soft switch.
    SoftSwitchMonitor = 1,
    /// Workers are initialising.
    Init = 2,
    /// Ready, no program running.
    Idle = 3,
    /// A program or long-running operation is active.
    Busy = 4,
    /// Initialisation failed. Terminal until restart.
    InitFailed = 5,
}

impl OperationState {
    /// All states, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Default,
        Self::SoftSwitchMonitor,
        Self::Init,
        Self::Idle,
        Self::Busy,
        Self::InitFailed,
    ];

    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::SoftSwitchMonitor),
            2 => Some(Self::Init),
            3 => Some(Self::Idle),
            4 => Some(Self::Busy),
            5 => Some(Self::InitFailed),
            _ => None,
        }
    }

    /// Stable state name, as used by [`StatePermissions::from_state_name`].
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::SoftSwitchMonitor => "SoftSwitchMonitor",
            Self::Init => "Init",
            Self::Idle => "Idle",
            Self::Busy => "Busy",
            Self::InitFailed => "InitFailed",
        }
    }

    /// The permission bit that authorises execution in this state.
    pub const fn permission(self) -> StatePermissions {
        match self {
            Self::Default => StatePermissions::DEFAULT,
            Self::SoftSwitchMonitor => StatePermissions::SOFT_SWITCH_MONITOR,
            Self::Init => StatePermissions::INIT,
            Self::Idle => StatePermissions::IDLE,
            Self::Busy => StatePermissions::BUSY,
            Self::InitFailed => StatePermissions::INIT_FAILED,
        }
    }
}

impl Default for OperationState {
    fn default() -> Self {
        Self::Default
    }
}

/// Named events driving the [`OperationState`] machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationEvent {
    /// "monitor-start": begin watching the soft switch.
    MonitorStart,
    /// "switch-pressed": operator pressed the soft switch.
    SwitchPressed,
    /// "init-complete": all required init stages succeeded.
    InitComplete,
    /// "init-failed": an init stage failed.
    InitFailed,
    /// "enter-busy".
    EnterBusy,
    /// "enter-idle".
    EnterIdle,
    /// "enter-init": re-initialisation from Idle.
    EnterInit,
}

impl OperationEvent {
    pub const fn name(self) -> &'static str {
        match self {
            Self::MonitorStart => "monitor-start",
            Self::SwitchPressed => "switch-pressed",
            Self::InitComplete => "init-complete",
            Self::InitFailed => "init-failed",
            Self::EnterBusy => "enter-busy",
            Self::EnterIdle => "enter-idle",
            Self::EnterInit => "enter-init",
        }
    }
}

// ─── Availability State ─────────────────────────────────────────────

/// Availability overlay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AvailabilityState {
    /// No outstanding error causes.
    Normal = 0,
    /// At least one error cause was raised.
    Error = 1,
}

impl AvailabilityState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Error),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Error => "ErrorState",
        }
    }
}

impl Default for AvailabilityState {
    fn default() -> Self {
        Self::Normal
    }
}

/// Named events driving the [`AvailabilityState`] machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityEvent {
    /// "enter-error-state".
    EnterErrorState,
    /// "enter-normal-state".
    EnterNormalState,
}

// ─── Init Stages ────────────────────────────────────────────────────

/// Initialisation stages reported by the workers during `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InitStage {
    /// Settings snapshot loaded and validated.
    Settings = 0,
    /// Event handler worker ready.
    EventHandler = 1,
    /// Data logging worker ready.
    DataLogging = 2,
    /// Device control worker ready (drivers initialised).
    DeviceControl = 3,
    /// Remote care agent connected.
    RemoteCare = 4,
}

impl InitStage {
    pub const ALL: [Self; 5] = [
        Self::Settings,
        Self::EventHandler,
        Self::DataLogging,
        Self::DeviceControl,
        Self::RemoteCare,
    ];

    /// Bit index inside an init-stage mask.
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

// ─── Permission bitset ──────────────────────────────────────────────

bitflags! {
    /// States in which a command may execute.
    ///
    /// Empty by default: a command is disallowed everywhere unless the
    /// constructing code enables states explicitly. `Normal` availability
    /// imposes no restriction; `Error` availability requires `ERROR_STATE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StatePermissions: u16 {
        const DEFAULT             = 0x0001;
        const SOFT_SWITCH_MONITOR = 0x0002;
        const INIT                = 0x0004;
        const IDLE                = 0x0008;
        const BUSY                = 0x0010;
        const INIT_FAILED         = 0x0020;
        /// May execute while availability is `Error`.
        const ERROR_STATE         = 0x0100;
    }
}

impl StatePermissions {
    /// Every operation state, `Error` availability excluded.
    pub const ALL_OPERATION: Self = Self::from_bits_truncate(
        Self::DEFAULT.bits()
            | Self::SOFT_SWITCH_MONITOR.bits()
            | Self::INIT.bits()
            | Self::IDLE.bits()
            | Self::BUSY.bits()
            | Self::INIT_FAILED.bits(),
    );

    /// Every state, including `Error` availability.
    pub const ANYWHERE: Self =
        Self::from_bits_truncate(Self::ALL_OPERATION.bits() | Self::ERROR_STATE.bits());

    /// Map a state name to its bit. Accepts operation state names and
    /// `"ErrorState"`; `"Normal"` has no bit and yields `None`.
    pub fn from_state_name(name: &str) -> Option<Self> {
        match name {
            "Default" => Some(Self::DEFAULT),
            "SoftSwitchMonitor" => Some(Self::SOFT_SWITCH_MONITOR),
            "Init" => Some(Self::INIT),
            "Idle" => Some(Self::IDLE),
            "Busy" => Some(Self::BUSY),
            "InitFailed" => Some(Self::INIT_FAILED),
            "ErrorState" => Some(Self::ERROR_STATE),
            _ => None,
        }
    }

    /// True iff the named state's bit is set. Unknown names are never allowed.
    pub fn is_allowed(&self, state_name: &str) -> bool {
        Self::from_state_name(state_name).is_some_and(|bit| self.contains(bit))
    }

    /// Conjunction of both current states against this bitset.
    #[inline]
    pub const fn permits(&self, operation: OperationState, availability: AvailabilityState) -> bool {
        let op_ok = self.contains(operation.permission());
        let avail_ok = match availability {
            AvailabilityState::Normal => true,
            AvailabilityState::Error => self.contains(Self::ERROR_STATE),
        };
        op_ok && avail_ok
    }
}

impl Default for StatePermissions {
    fn default() -> Self {
        Self::empty()
    }
}
