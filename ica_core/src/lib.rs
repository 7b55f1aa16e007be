//! # ICA Core Library
//!
//! Command dispatch, correlation and state-gated execution for the
//! instrument-control application.
//!
//! # Module Structure
//!
//! - [`channel`] - Master↔worker channel pairs
//! - [`controller`] - Thread controller trait, worker runner, lifecycle
//! - [`master`] - Master controller, registries, pending table, handle
//! - [`gate`] - Operation/availability FSMs and the authorisation check
//! - [`device`] - Correlation pool, driver boundary, device worker
//! - [`logging`] - Data-logging worker
//! - [`config`] - Application configuration
//! - [`app`] - System assembly and startup sequence
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      ica_core (one process)                    │
//! │                                                                │
//! │  MasterHandle ──► ┌──────────────────────┐                     │
//! │  (any thread)     │  MasterController     │◄── SharedStateGate │
//! │                   │  registries, pending  │    (RwLock)         │
//! │                   │  table, deadline heap │                     │
//! │                   └───┬──────────────┬───┘                     │
//! │                Channel│              │Channel                   │
//! │                       ▼              ▼                          │
//! │              ┌──────────────┐  ┌──────────────┐                │
//! │              │ DeviceWorker │  │LoggingWorker │   ...          │
//! │              │ + pool (25)  │  └──────────────┘                │
//! │              └──────┬───────┘                                  │
//! │                     ▼                                          │
//! │              DeviceDriver (trait)                              │
//! └────────────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod channel;
pub mod config;
pub mod controller;
pub mod device;
pub mod gate;
pub mod logging;
pub mod master;

use static_assertions::assert_impl_all;

assert_impl_all!(master::handle::MasterHandle: Send, Sync, Clone);
assert_impl_all!(device::DevicePool: Send, Sync);
assert_impl_all!(gate::StateGate: Send, Sync);
