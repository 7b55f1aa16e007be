//! Device control: correlation pool, driver boundary, simulated backend
//! and the worker that ties them together.

pub mod driver;
pub mod pool;
pub mod simulation;
pub mod worker;

pub use driver::{CompletionSink, DeviceCompletion, DeviceDriver, DeviceError, DeviceResponse};
pub use pool::{CorrelationPool, DevicePool};
pub use simulation::SimulatedDriver;
pub use worker::DeviceWorker;
