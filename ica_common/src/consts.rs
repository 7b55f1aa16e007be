//! Workspace-wide constants.

use static_assertions::const_assert;
use std::time::Duration;

/// Timeout applied to commands built without an explicit one.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(5);

/// Slot count of the device-command correlation pool.
pub const DEVICE_POOL_CAPACITY: usize = 25;

/// Longest command/verb name a pool slot can hold.
pub const MAX_SLOT_NAME_LEN: usize = 32;

/// Default master loop tick: upper bound on deadline-check latency.
pub const DEFAULT_TIMER_TICK: Duration = Duration::from_millis(10);

// Slot indices are reported as u8 in events.
const_assert!(DEVICE_POOL_CAPACITY <= u8::MAX as usize);
const_assert!(MAX_SLOT_NAME_LEN >= 8);
