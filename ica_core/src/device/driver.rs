//! Device driver boundary.
//!
//! The core hands opaque [`DeviceCommand`]s to a [`DeviceDriver`] and gets
//! back either a synchronous result or [`DeviceResponse::Accepted`]. An
//! accepted command finishes later with a [`DeviceCompletion`] pushed
//! through the [`CompletionSink`] given to the driver at `init()`.
//!
//! # Lifecycle
//!
//! 1. `init()` - once, from the device worker's initialisation
//! 2. `execute()` / `cancel()` - from the device worker thread only
//! 3. `shutdown()` - when the worker is destroyed
//!
//! Completions may be pushed from any thread.

use crossbeam_channel::Sender;
use ica_common::command::DeviceCommand;
use thiserror::Error;

use crate::channel::WorkerWaker;

/// Error types for device driver operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Driver initialisation failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Instance id not served by this driver
    #[error("Unknown device instance {0}")]
    UnknownInstance(u32),

    /// Hardware communication error
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),
}

/// Immediate outcome of [`DeviceDriver::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResponse {
    /// Done; result bytes or failure text.
    Completed(Result<Vec<u8>, String>),
    /// Started; a completion follows through the sink.
    Accepted,
}

/// Asynchronous completion as reported by the device. Carries no
/// correlation reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCompletion {
    pub instance_id: u32,
    /// Completion event name (not necessarily the verb that started it).
    pub event: String,
    pub result: Result<Vec<u8>, String>,
}

/// Where drivers push completions. Wakes the device worker on each push.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    tx: Sender<DeviceCompletion>,
    waker: WorkerWaker,
}

impl CompletionSink {
    pub fn new(tx: Sender<DeviceCompletion>, waker: WorkerWaker) -> Self {
        Self { tx, waker }
    }

    /// Returns `false` once the device worker is gone.
    pub fn complete(&self, completion: DeviceCompletion) -> bool {
        self.tx.send(completion).is_ok() && self.waker.wake()
    }
}

/// Interface of a pluggable device backend (simulation, real hardware).
pub trait DeviceDriver: Send + 'static {
    /// Driver identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Prepare the backend. The sink is the only way to report
    /// asynchronous completions.
    fn init(&mut self, completions: CompletionSink) -> Result<(), DeviceError>;

    /// True for verbs that answer with [`DeviceResponse::Accepted`].
    fn is_long_running(&self, verb: &str) -> bool;

    fn execute(&mut self, command: &DeviceCommand) -> DeviceResponse;

    /// Abort an accepted operation. Unknown operations are ignored.
    fn cancel(&mut self, instance_id: u32, verb: &str);

    fn shutdown(&mut self) -> Result<(), DeviceError>;
}
