//! Application configuration for the `ica_core` binary.
//!
//! One TOML snapshot, loaded at startup and immutable afterwards.
//! Optional fields use `#[serde(default)]` so older files keep loading.

use ica_common::config::{ConfigError, SharedConfig, Validate};
use ica_common::consts::{DEFAULT_CMD_TIMEOUT, DEFAULT_TIMER_TICK, DEVICE_POOL_CAPACITY, MAX_SLOT_NAME_LEN};
use ica_common::state::InitStage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// ─── Top-Level Config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Validate for SystemConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.master.validate()?;
        self.gate.validate()?;
        self.device.validate()?;
        Ok(())
    }
}

// ─── Master ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Upper bound on deadline-check latency [ms] (default: 10).
    #[serde(default = "default_timer_tick_ms")]
    pub timer_tick_ms: u64,

    /// Timeout of commands the master builds itself [ms] (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Per-worker wait on shutdown before detaching [ms] (default: 2000).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_timer_tick_ms() -> u64 {
    DEFAULT_TIMER_TICK.as_millis() as u64
}
fn default_timeout_ms() -> u64 {
    DEFAULT_CMD_TIMEOUT.as_millis() as u64
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            timer_tick_ms: default_timer_tick_ms(),
            default_timeout_ms: default_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl MasterConfig {
    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_tick_ms == 0 {
            return Err(invalid("master.timer_tick_ms must be > 0"));
        }
        if self.default_timeout_ms == 0 {
            return Err(invalid("master.default_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

// ─── Gate ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Stages that must all succeed before Init → Idle.
    #[serde(default = "default_required_stages")]
    pub required_init_stages: Vec<InitStage>,

    /// Fire "monitor-start" right after startup.
    #[serde(default = "default_true")]
    pub auto_monitor: bool,
}

fn default_required_stages() -> Vec<InitStage> {
    vec![InitStage::Settings, InitStage::DataLogging, InitStage::DeviceControl]
}
fn default_true() -> bool {
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            required_init_stages: default_required_stages(),
            auto_monitor: true,
        }
    }
}

impl GateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.required_init_stages.is_empty() {
            return Err(invalid("gate.required_init_stages cannot be empty"));
        }
        let mut seen = HashSet::new();
        for stage in &self.required_init_stages {
            if !seen.insert(stage) {
                return Err(invalid(format!("gate.required_init_stages lists {stage:?} twice")));
            }
        }
        Ok(())
    }
}

// ─── Device ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Correlation pool slots in use, 1..=25 (default: 25).
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    #[serde(default)]
    pub instances: Vec<DeviceInstanceConfig>,

    /// Verbs answered asynchronously.
    #[serde(default)]
    pub long_running: Vec<LongRunningVerb>,
}

fn default_pool_capacity() -> usize {
    DEVICE_POOL_CAPACITY
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEVICE_POOL_CAPACITY,
            instances: Vec::new(),
            long_running: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInstanceConfig {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongRunningVerb {
    pub verb: String,
    /// Simulated completion delay [ms].
    #[serde(default)]
    pub delay_ms: u64,
    /// Event name the device reports on completion.
    pub completion_event: String,
}

impl LongRunningVerb {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 || self.pool_capacity > DEVICE_POOL_CAPACITY {
            return Err(invalid(format!(
                "device.pool_capacity {} out of range [1, {}]",
                self.pool_capacity, DEVICE_POOL_CAPACITY
            )));
        }
        let mut ids = HashSet::new();
        for instance in &self.instances {
            if !ids.insert(instance.id) {
                return Err(invalid(format!("device instance id {} listed twice", instance.id)));
            }
        }
        for lr in &self.long_running {
            if lr.completion_event.trim().is_empty() {
                return Err(invalid(format!("long-running verb '{}' has no completion_event", lr.verb)));
            }
            if lr.verb.is_empty() || lr.verb.len() > MAX_SLOT_NAME_LEN {
                return Err(invalid(format!(
                    "long-running verb '{}' must be 1..={} bytes",
                    lr.verb, MAX_SLOT_NAME_LEN
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}
